//! AES-128-ECB keyed permutation with byte-value padding.
//!
//! The lock protocol never chains blocks and never uses an IV. Encryption pads the
//! plaintext with N bytes of value N. Every protocol caller knows its plaintext
//! length, so decryption leaves the trailing bytes alone.

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use crate::constants::BLOCK_SIZE;
use crate::error::LockError;

fn cipher_for(key: &[u8]) -> Result<Aes128, LockError> {
    Aes128::new_from_slice(key).map_err(|_| LockError::InvalidKeyLength(key.len()))
}

/// Append `N` bytes of value `N` so the length becomes a multiple of 16.
///
/// An already aligned input gains a full block of `0x10`.
pub fn pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad_len, pad_len as u8);
    padded
}

/// Encrypt `plaintext` after padding it.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, LockError> {
    let cipher = cipher_for(key)?;
    let mut output = pad(plaintext);

    for chunk in output.chunks_mut(BLOCK_SIZE) {
        cipher.encrypt_block(chunk.into());
    }

    Ok(output)
}

/// Decrypt every block without touching the trailing bytes.
pub fn decrypt_raw(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, LockError> {
    let cipher = cipher_for(key)?;
    if ciphertext.is_empty() || !ciphertext.len().is_multiple_of(BLOCK_SIZE) {
        return Err(LockError::InvalidCiphertextLength(ciphertext.len()));
    }

    let mut output = ciphertext.to_vec();
    for chunk in output.chunks_mut(BLOCK_SIZE) {
        cipher.decrypt_block(chunk.into());
    }

    Ok(output)
}
