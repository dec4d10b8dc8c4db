//! X25519 key agreement
//!
//! Nodes issue one ephemeral keypair per fan slot on every Register, Login
//! and Rekey; the device holds a longer-lived DE keypair. Both sides derive
//! the rotating login fans from the agreement outputs.

use crate::crypto::KEY_SIZE;
use crate::error::{Result, ShardRelayError};
use aes_gcm::aead::OsRng;
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};

/// X25519 public key size (32 bytes)
pub const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 keypair
#[derive(Clone)]
pub struct ExchangeKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl ExchangeKeyPair {
    /// Generate a fresh random keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Agree with a peer public key. Low-order peer keys are rejected.
    pub fn agree(&self, their_public: &[u8]) -> Result<[u8; KEY_SIZE]> {
        let their_public = parse_public(their_public)?;
        let shared = self.secret.diffie_hellman(&their_public);
        if !shared.was_contributory() {
            return Err(ShardRelayError::KeyDerivation(
                "non-contributory key agreement".to_string(),
            ));
        }
        Ok(shared.to_bytes())
    }
}

impl fmt::Debug for ExchangeKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeKeyPair")
            .field("public", &self.public.as_bytes())
            .finish_non_exhaustive()
    }
}

fn parse_public(bytes: &[u8]) -> Result<PublicKey> {
    let array: [u8; PUBLIC_KEY_SIZE] =
        bytes
            .try_into()
            .map_err(|_| ShardRelayError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            })?;
    Ok(PublicKey::from(array))
}
