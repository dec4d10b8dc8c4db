//! Symmetric primitives for ShardRelay
//!
//! Provides:
//! - AES-256-GCM shard sealing with the SRC-derived deterministic nonce
//! - AES-256 key wrap (RFC 3394) for moving key fans under a NONCE
//! - The zeroizing 32-byte key container shared by every derived key

use crate::error::{Result, ShardRelayError};
use crate::kdf::{self, Src, SRC_SIZE};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use aes_kw::KekAes256;
use std::fmt;

/// AES-256-GCM key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size (12 bytes / 96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// AES key wrap adds one 8-byte integrity block
pub const WRAP_OVERHEAD: usize = 8;

/// 256-bit symmetric key (signing, encryption or key-encryption key)
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice (validates length)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != KEY_SIZE {
            return Err(ShardRelayError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(slice);
        Ok(Self(key))
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

/// Build the shard nonce: SRC in the low 8 bytes, zero in the remaining 4
pub fn shard_nonce(src: &Src) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..SRC_SIZE].copy_from_slice(src.as_bytes());
    nonce
}

/// Per-shard AEAD framing.
///
/// The nonce is fixed per SRC, so every shard is sealed under its own
/// subkey derived from the node key and the shard index. A node key is
/// therefore never used directly, and no subkey seals more than one shard.
pub struct ShardCipher;

impl ShardCipher {
    /// Seal one shard. Output is `ciphertext || tag`.
    pub fn seal(node_key: &SymmetricKey, src: &Src, index: usize, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Self::cipher_for(node_key, src, index)?;
        let nonce_bytes = shard_nonce(src);
        cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| ShardRelayError::Internal("AES-GCM encryption failed".to_string()))
    }

    /// Open one shard sealed by [`ShardCipher::seal`]
    pub fn open(node_key: &SymmetricKey, src: &Src, index: usize, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < TAG_SIZE {
            return Err(ShardRelayError::DecryptionFailed);
        }
        let cipher = Self::cipher_for(node_key, src, index)?;
        let nonce_bytes = shard_nonce(src);
        cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), sealed)
            .map_err(|_| ShardRelayError::DecryptionFailed)
    }

    fn cipher_for(node_key: &SymmetricKey, src: &Src, index: usize) -> Result<Aes256Gcm> {
        let subkey = kdf::shard_key(node_key, src, index)?;
        Aes256Gcm::new_from_slice(subkey.as_bytes()).map_err(|_| ShardRelayError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: subkey.as_bytes().len(),
        })
    }
}

/// Wrap a key under a key-encryption key (RFC 3394)
pub fn wrap_key(kek: &SymmetricKey, key: &SymmetricKey) -> Result<Vec<u8>> {
    KekAes256::from(*kek.as_bytes())
        .wrap_vec(key.as_bytes())
        .map_err(|_| ShardRelayError::Internal("AES-KW wrap error".to_string()))
}

/// Unwrap a key wrapped by [`wrap_key`]. Any integrity failure is reported
/// as [`ShardRelayError::DecryptionFailed`].
pub fn unwrap_key(kek: &SymmetricKey, wrapped: &[u8]) -> Result<SymmetricKey> {
    if wrapped.len() != KEY_SIZE + WRAP_OVERHEAD {
        return Err(ShardRelayError::DecryptionFailed);
    }
    let unwrapped = KekAes256::from(*kek.as_bytes())
        .unwrap_vec(wrapped)
        .map_err(|_| ShardRelayError::DecryptionFailed)?;
    SymmetricKey::from_slice(&unwrapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_src() -> Src {
        Src::from_bytes([1, 2, 3, 4, 5, 6, 7, 8])
    }

    #[test]
    fn test_nonce_layout() {
        let nonce = shard_nonce(&test_src());
        assert_eq!(&nonce[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&nonce[8..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = SymmetricKey::generate();
        let sealed = ShardCipher::seal(&key, &test_src(), 4, b"shard bytes").unwrap();
        assert_eq!(sealed.len(), b"shard bytes".len() + TAG_SIZE);

        let opened = ShardCipher::open(&key, &test_src(), 4, &sealed).unwrap();
        assert_eq!(opened, b"shard bytes");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = ShardCipher::seal(&SymmetricKey::generate(), &test_src(), 0, b"secret").unwrap();
        let result = ShardCipher::open(&SymmetricKey::generate(), &test_src(), 0, &sealed);
        assert!(matches!(result, Err(ShardRelayError::DecryptionFailed)));
    }

    #[test]
    fn test_wrong_index_fails() {
        let key = SymmetricKey::generate();
        let sealed = ShardCipher::seal(&key, &test_src(), 0, b"secret").unwrap();
        assert!(ShardCipher::open(&key, &test_src(), 1, &sealed).is_err());
    }

    #[test]
    fn test_tampered_tag_fails() {
        let key = SymmetricKey::generate();
        let mut sealed = ShardCipher::seal(&key, &test_src(), 2, b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            ShardCipher::open(&key, &test_src(), 2, &sealed),
            Err(ShardRelayError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_truncated_input_fails() {
        let key = SymmetricKey::generate();
        assert!(matches!(
            ShardCipher::open(&key, &test_src(), 0, &[0u8; 3]),
            Err(ShardRelayError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_same_key_distinct_shards_distinct_ciphertext() {
        // identical plaintext under one node key must not produce identical ciphertext
        let key = SymmetricKey::generate();
        let a = ShardCipher::seal(&key, &test_src(), 0, &[7u8; 32]).unwrap();
        let b = ShardCipher::seal(&key, &test_src(), 1, &[7u8; 32]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrap_unwrap() {
        let kek = SymmetricKey::generate();
        let key = SymmetricKey::generate();
        let wrapped = wrap_key(&kek, &key).unwrap();
        assert_eq!(wrapped.len(), KEY_SIZE + WRAP_OVERHEAD);
        assert_eq!(unwrap_key(&kek, &wrapped).unwrap(), key);
    }

    #[test]
    fn test_unwrap_with_wrong_kek_fails() {
        let wrapped = wrap_key(&SymmetricKey::generate(), &SymmetricKey::generate()).unwrap();
        assert!(matches!(
            unwrap_key(&SymmetricKey::generate(), &wrapped),
            Err(ShardRelayError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_key_from_slice_validates_length() {
        assert!(matches!(
            SymmetricKey::from_slice(&[0u8; 16]),
            Err(ShardRelayError::InvalidKeyLength { expected: 32, actual: 16 })
        ));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = SymmetricKey::from_bytes([0xAB; KEY_SIZE]);
        assert_eq!(format!("{:?}", key), "SymmetricKey([REDACTED])");
    }
}
