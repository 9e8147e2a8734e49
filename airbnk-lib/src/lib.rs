pub mod advert;
pub mod cipher;
pub mod config;
pub mod constants;
pub mod error;
pub mod message;
pub mod operation;
pub mod packet;
pub mod provision;
pub mod session;
pub mod signing;

// Re-export the session types for easy access
pub use config::DeviceConfig;
pub use error::LockError;
pub use session::{LockSession, LockStatus};
