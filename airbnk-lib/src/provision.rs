//! Key provisioning for a lock session.
//!
//! The cloud hands out a base64 `newSnInfo` blob per lock. Decrypted with the app key
//! it yields the serial number, the model and two key slots that are in turn
//! encrypted under a session key derived from serial and app key.
//!
//! # Blob layout (after base64 and trailer removal, decrypted)
//!
//! - `[0, 16)`: serial number, NUL-padded
//! - `[16, 48)`: manufacturer key, encrypted under the session key
//! - `[48, 80)`: binding key, encrypted under the session key
//! - `[80, 88)`: model identifier, NUL-padded

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use std::fmt;
use std::ops::Range;
use tracing::debug;

use crate::cipher;
use crate::constants::{APP_KEY_SUFFIX_LEN, BLOCK_SIZE, PROVISIONING_TRAILER_LEN};
use crate::error::LockError;

const SERIAL_RANGE: Range<usize> = 0..16;
const MANUFACTURER_KEY_RANGE: Range<usize> = 16..48;
const BINDING_KEY_RANGE: Range<usize> = 48..80;
const MODEL_RANGE: Range<usize> = 80..88;

/// Secrets and identity of one lock, derived once per attach.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceCredentials {
    serial_number: String,
    model_id: String,
    manufacturer_key: Vec<u8>,
    binding_key: Vec<u8>,
}

impl DeviceCredentials {
    /// Derive credentials from the provisioning blob and the app key.
    pub fn provision(new_sn_info: &str, app_key: &str) -> Result<Self, LockError> {
        let decoded = BASE64
            .decode(new_sn_info.trim())
            .map_err(|e| LockError::Provisioning(format!("blob is not valid base64: {e}")))?;
        let body_len = decoded
            .len()
            .checked_sub(PROVISIONING_TRAILER_LEN)
            .ok_or_else(|| LockError::Provisioning(format!("blob too short: {} bytes", decoded.len())))?;

        let blob_key = blob_key(app_key)?;
        let record = cipher::decrypt_raw(blob_key.as_bytes(), &decoded[..body_len]).map_err(provisioning_error)?;

        let serial_number = extract_string(&record, SERIAL_RANGE)?;
        let model_id = extract_string(&record, MODEL_RANGE)?;

        let session_key = session_key(&serial_number, app_key);
        let manufacturer_key = decrypt_key_slot(&record, MANUFACTURER_KEY_RANGE, &session_key)?;
        let binding_key = decrypt_key_slot(&record, BINDING_KEY_RANGE, &session_key)?;

        if manufacturer_key.len() < BLOCK_SIZE {
            return Err(LockError::Provisioning(format!(
                "manufacturer key has {} usable bytes, need {BLOCK_SIZE}",
                manufacturer_key.len()
            )));
        }

        debug!(serial = %serial_number, model = %model_id, "provisioned lock credentials");

        Ok(Self {
            serial_number,
            model_id,
            manufacturer_key,
            binding_key,
        })
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Key encrypting the command sub-payload (first 16 bytes are used)
    pub fn manufacturer_key(&self) -> &[u8] {
        &self.manufacturer_key
    }

    /// Key the per-operation working key is derived from
    pub fn binding_key(&self) -> &[u8] {
        &self.binding_key
    }
}

impl fmt::Debug for DeviceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCredentials")
            .field("serial_number", &self.serial_number)
            .field("model_id", &self.model_id)
            .field("manufacturer_key", &"<redacted>")
            .field("binding_key", &"<redacted>")
            .finish()
    }
}

/// First 16 bytes of SHA-1(serial ‖ app key).
pub fn session_key(serial_number: &str, app_key: &str) -> [u8; 16] {
    let mut hasher = Sha1::new();
    hasher.update(serial_number.as_bytes());
    hasher.update(app_key.as_bytes());
    let digest = hasher.finalize();

    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

/// App key without its last four characters.
fn blob_key(app_key: &str) -> Result<String, LockError> {
    let chars = app_key.chars().count();
    let keep = chars
        .checked_sub(APP_KEY_SUFFIX_LEN)
        .ok_or_else(|| LockError::Provisioning(format!("app key too short: {chars} characters")))?;
    Ok(app_key.chars().take(keep).collect())
}

fn slice(record: &[u8], range: Range<usize>) -> Result<&[u8], LockError> {
    record.get(range.clone()).ok_or_else(|| {
        LockError::Provisioning(format!(
            "decrypted record has {} bytes, field {:?} out of bounds",
            record.len(),
            range
        ))
    })
}

/// Extract a NUL-padded UTF-8 string.
fn extract_string(record: &[u8], range: Range<usize>) -> Result<String, LockError> {
    let raw = slice(record, range)?;
    let text = std::str::from_utf8(raw).map_err(|e| LockError::Provisioning(format!("field is not UTF-8: {e}")))?;
    Ok(text.trim_end_matches('\0').to_string())
}

fn decrypt_key_slot(record: &[u8], range: Range<usize>, session_key: &[u8; 16]) -> Result<Vec<u8>, LockError> {
    let encrypted = slice(record, range)?;
    let mut key = cipher::decrypt_raw(session_key, encrypted).map_err(provisioning_error)?;
    let usable = usable_key_len(&key);
    key.truncate(usable);
    Ok(key)
}

/// Length of a decrypted key slot once a well-formed byte-value pad is removed.
///
/// Slots whose tail is not such a pad are used verbatim.
pub fn usable_key_len(slot: &[u8]) -> usize {
    let Some(&pad) = slot.last() else {
        return 0;
    };
    let pad_len = pad as usize;
    if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > slot.len() {
        return slot.len();
    }
    if slot[slot.len() - pad_len..].iter().all(|&b| b == pad) {
        slot.len() - pad_len
    } else {
        slot.len()
    }
}

fn provisioning_error(err: LockError) -> LockError {
    match err {
        LockError::Provisioning(_) => err,
        other => LockError::Provisioning(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_is_sha1_prefix() {
        // SHA-1("abc") = a9993e364706816aba3e25717850c26c9cd0d89d
        let key = session_key("ab", "c");
        assert_eq!(hex::encode(key), "a9993e364706816aba3e25717850c26c");
    }

    #[test]
    fn test_blob_key_drops_last_four_characters() {
        assert_eq!(blob_key("0123456789abcdefWXYZ").unwrap(), "0123456789abcdef");
        assert!(matches!(blob_key("abc"), Err(LockError::Provisioning(_))));
    }

    #[test]
    fn test_usable_key_len() {
        let mut slot = vec![0x5Au8; 20];
        slot.extend_from_slice(&[0x0C; 12]);
        assert_eq!(usable_key_len(&slot), 20);

        let mut full = vec![0x5Au8; 16];
        full.extend_from_slice(&[0x10; 16]);
        assert_eq!(usable_key_len(&full), 16);

        // Tail that is not a pad is kept
        let mut raw = vec![0x01u8; 31];
        raw.push(0x03);
        assert_eq!(usable_key_len(&raw), 32);

        let mut zero = vec![0x01u8; 31];
        zero.push(0x00);
        assert_eq!(usable_key_len(&zero), 32);
    }

    #[test]
    fn test_rejects_non_base64_blob() {
        let err = DeviceCredentials::provision("***", "0123456789abcdefWXYZ").unwrap_err();
        assert!(matches!(err, LockError::Provisioning(_)));
    }

    #[test]
    fn test_rejects_short_blob() {
        let blob = BASE64.encode([0u8; 4]);
        let err = DeviceCredentials::provision(&blob, "0123456789abcdefWXYZ").unwrap_err();
        assert!(matches!(err, LockError::Provisioning(_)));
    }

    #[test]
    fn test_debug_redacts_keys() {
        let creds = DeviceCredentials {
            serial_number: "SN1".into(),
            model_id: "M1".into(),
            manufacturer_key: vec![0xAB; 16],
            binding_key: vec![0xCD; 20],
        };
        let text = format!("{creds:?}");
        assert!(text.contains("SN1"));
        assert!(!text.contains("171")); // 0xAB
        assert!(text.contains("<redacted>"));
    }
}
