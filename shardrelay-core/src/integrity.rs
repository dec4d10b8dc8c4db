//! HMAC-SHA-256 envelope authentication
//!
//! The tag covers the exact encoded shard-envelope bytes, before any shard
//! is decrypted or decoded.

use crate::crypto::SymmetricKey;
use crate::error::{Result, ShardRelayError};
use ring::hmac;

/// HMAC-SHA-256 tag size (32 bytes)
pub const HMAC_SIZE: usize = 32;

/// Compute the tag over `data`
pub fn sign(key: &SymmetricKey, data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key.as_bytes());
    hmac::sign(&key, data).as_ref().to_vec()
}

/// Constant-time tag verification
pub fn verify(key: &SymmetricKey, data: &[u8], tag: &[u8]) -> bool {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key.as_bytes());
    hmac::verify(&key, data, tag).is_ok()
}

/// Like [`verify`], but a mismatch becomes [`ShardRelayError::IntegrityFailure`]
pub fn ensure_valid(key: &SymmetricKey, data: &[u8], tag: &[u8]) -> Result<()> {
    if verify(key, data, tag) {
        Ok(())
    } else {
        Err(ShardRelayError::IntegrityFailure)
    }
}
