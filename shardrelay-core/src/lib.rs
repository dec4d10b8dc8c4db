//! ShardRelay Core Library
//!
//! Building blocks for splitting authenticated, encrypted transactions
//! across mutually untrusting nodes. This crate provides:
//! - HKDF key hierarchy with per-node key fans (`kdf`)
//! - Per-shard AES-256-GCM sealing and AES key wrap (`crypto`)
//! - X25519 key agreement (`exchange`)
//! - HMAC-SHA-256 envelope integrity (`integrity`)
//! - Reed-Solomon shard sizing and packing (`erasure`)
//! - Quorum reconstruction of out-of-order shards (`reconstruct`)
//! - Common error handling

pub mod crypto;
pub mod erasure;
pub mod error;
pub mod exchange;
pub mod integrity;
pub mod kdf;
pub mod reconstruct;

pub use crypto::{unwrap_key, wrap_key, ShardCipher, SymmetricKey};
pub use erasure::{pack, unpack, ShardCodec, ShardGeometry};
pub use error::{Result, ShardRelayError};
pub use exchange::ExchangeKeyPair;
pub use kdf::{KeyFan, KeyHierarchy, Src};
pub use reconstruct::{InsertOutcome, QuorumReconstructor, ReconstructionState};
