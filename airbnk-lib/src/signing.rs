//! Working-key derivation and command signing.
//!
//! Both constructions are a double SHA-1 (inner/outer) in the shape of HMAC, but with
//! fixed buffer layouts: the key is zero-padded to 64 bytes, only those 64 bytes are
//! XORed with the pad constant, and the event counter is appended big-endian at the
//! end of the inner buffer.

use sha1::{Digest, Sha1};

/// SHA-1 output size
pub const DIGEST_SIZE: usize = 20;

/// Size of the verification code placed in a command packet
pub const VERIFICATION_CODE_SIZE: usize = 8;

/// Counter the command working key is derived with
pub const WORKING_KEY_COUNTER: u32 = 0;

const PAD_BLOCK: usize = 64;
const INNER_PAD: u8 = 0x36;
const OUTER_PAD: u8 = 0x5C;
const COUNTER_SIZE: usize = 4;

pub type WorkingKey = [u8; DIGEST_SIZE];
pub type VerificationCode = [u8; VERIFICATION_CODE_SIZE];

fn xor_pad_block(buffer: &mut [u8], value: u8) {
    for byte in &mut buffer[..PAD_BLOCK] {
        *byte ^= value;
    }
}

/// SHA-1 over `key` (zero-padded to 64, XOR 0x5C) followed by the inner digest.
fn outer_digest(key: &[u8], inner: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut buffer = [0u8; PAD_BLOCK + DIGEST_SIZE];
    buffer[..key.len()].copy_from_slice(key);
    xor_pad_block(&mut buffer, OUTER_PAD);
    buffer[PAD_BLOCK..].copy_from_slice(inner);
    Sha1::digest(buffer).into()
}

fn key_prefix(key: &[u8], max: usize) -> &[u8] {
    &key[..key.len().min(max)]
}

/// Derive the 20-byte working key from the binding key and a counter.
pub fn derive_working_key(binding_key: &[u8], counter: u32) -> WorkingKey {
    let key = key_prefix(binding_key, PAD_BLOCK);

    let mut inner = [0u8; PAD_BLOCK + 2 * COUNTER_SIZE];
    inner[..key.len()].copy_from_slice(key);
    xor_pad_block(&mut inner, INNER_PAD);
    inner[PAD_BLOCK + COUNTER_SIZE..].copy_from_slice(&counter.to_be_bytes());
    let inner_digest = Sha1::digest(inner);

    outer_digest(key, &inner_digest)
}

/// Raw 20-byte signature of `message` under the working key and counter.
pub fn sign(working_key: &[u8], counter: u32, message: &[u8]) -> [u8; DIGEST_SIZE] {
    let key = key_prefix(working_key, DIGEST_SIZE);

    let mut inner = vec![0u8; PAD_BLOCK + message.len() + COUNTER_SIZE];
    inner[..key.len()].copy_from_slice(key);
    xor_pad_block(&mut inner, INNER_PAD);
    inner[PAD_BLOCK..PAD_BLOCK + message.len()].copy_from_slice(message);
    let counter_at = inner.len() - COUNTER_SIZE;
    inner[counter_at..].copy_from_slice(&counter.to_be_bytes());
    let inner_digest = Sha1::digest(&inner);

    outer_digest(key, &inner_digest)
}

/// Fold a raw signature into the 8-byte code the lock checks.
///
/// Each nibble of the last four signature bytes indexes into the first sixteen.
pub fn derive_verification_code(signature: &[u8; DIGEST_SIZE]) -> VerificationCode {
    let mut code = [0u8; VERIFICATION_CODE_SIZE];
    for i in 0..4 {
        let b = signature[i + 16];
        code[2 * i] = signature[((b >> 4) & 0x0F) as usize];
        code[2 * i + 1] = signature[(b & 0x0F) as usize];
    }
    code
}

/// `sign` followed by `derive_verification_code`.
pub fn verification_code(working_key: &[u8], counter: u32, message: &[u8]) -> VerificationCode {
    derive_verification_code(&sign(working_key, counter, message))
}
