use std::io;
use thiserror::Error;

/// The primary error type for the `airbnk-lib` library.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Invalid AES key length: expected 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid ciphertext length {0}: must be a non-zero multiple of 16")]
    InvalidCiphertextLength(usize),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Advertisement header mismatch: expected {expected:02X?}, got {actual:02X?}")]
    HeaderMismatch { expected: [u8; 2], actual: [u8; 2] },

    #[error("Serial number in advertisement ({actual}) differs from provisioned ({expected})")]
    SerialMismatch { expected: String, actual: String },

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Invalid lock direction {0}")]
    InvalidDirection(u8),

    #[error("Lock operation already in progress")]
    OperationInProgress,

    #[error("No event counter advertised by the lock yet")]
    NoEventCounter,

    #[error("Clock value {0} does not fit a 32-bit protocol timestamp")]
    TimestampOutOfRange(i64),

    #[error("Failed sending frame: returned {0}")]
    AckFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification of [`LockError`] used by callers deciding what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad key or ciphertext; fatal to the current operation.
    Crypto,
    /// Malformed provisioning input; attach must be retried with corrected data.
    Provisioning,
    /// Record discarded, session continues with its previous state.
    ProtocolMismatch,
    /// The gateway reported a failed write.
    AckFailure,
    /// Inbound payload that is not JSON or hex.
    Message,
    /// Caller misuse or unreadable configuration.
    Request,
}

impl LockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LockError::InvalidKeyLength(_) | LockError::InvalidCiphertextLength(_) => ErrorKind::Crypto,
            LockError::Provisioning(_) | LockError::Base64(_) => ErrorKind::Provisioning,
            LockError::InsufficientData { .. }
            | LockError::HeaderMismatch { .. }
            | LockError::SerialMismatch { .. }
            | LockError::InvalidPacket(_) => ErrorKind::ProtocolMismatch,
            LockError::AckFailure(_) => ErrorKind::AckFailure,
            LockError::Hex(_) | LockError::Json(_) => ErrorKind::Message,
            LockError::Io(_)
            | LockError::InvalidDirection(_)
            | LockError::OperationInProgress
            | LockError::NoEventCounter
            | LockError::TimestampOutOfRange(_)
            | LockError::Config(_) => ErrorKind::Request,
        }
    }
}
