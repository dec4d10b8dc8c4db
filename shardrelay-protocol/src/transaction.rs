//! Sealing and opening transaction envelopes
//!
//! Outbound: pack -> seal shard `i` under `encrypts[i / shards_per_node + 1]`
//! -> encode ShardEnvelope -> HMAC with `signs[0]`.
//!
//! Inbound runs the same steps in reverse, and nothing is decrypted until
//! the HMAC over the raw shard-envelope bytes has been verified.

use crate::envelope::{ShardEnvelope, TransactionEnvelope};
use shardrelay_core::crypto::{ShardCipher, TAG_SIZE};
use shardrelay_core::erasure::{self, ShardGeometry};
use shardrelay_core::error::{Result, ShardRelayError};
use shardrelay_core::integrity;
use shardrelay_core::kdf::{KeyFan, Src};
use tracing::trace;

/// Seal `payload` for the nodes of `encrypts` and authenticate it with the
/// owner entry of `signs`
pub fn seal_transaction(
    payload: &[u8],
    src: &Src,
    encrypts: &KeyFan,
    signs: &KeyFan,
) -> Result<TransactionEnvelope> {
    let (shards, geometry) = erasure::pack(payload, encrypts.node_count())?;

    let sealed = shards
        .iter()
        .enumerate()
        .map(|(i, shard)| {
            let key = encrypts.node(geometry.node_for_shard(i) + 1)?;
            ShardCipher::seal(key, src, i, shard)
        })
        .collect::<Result<Vec<_>>>()?;

    let shard_envelope = ShardEnvelope::new(sealed, *src).encode()?;
    let hmac = integrity::sign(signs.owner(), &shard_envelope);
    trace!(src = %src, geometry = %geometry, "sealed transaction");

    Ok(TransactionEnvelope {
        shard_envelope,
        hmac,
    })
}

/// A decoded but not yet authenticated transaction
#[derive(Debug, Clone)]
pub struct InboundTransaction {
    envelope: TransactionEnvelope,
    shards: ShardEnvelope,
}

impl InboundTransaction {
    /// Structural decode only. Failures are `MalformedEnvelope`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope = TransactionEnvelope::decode(bytes)?;
        let shards = envelope.shards()?;
        Ok(Self { envelope, shards })
    }

    /// Identity the transaction claims to come from
    pub fn src(&self) -> &Src {
        &self.shards.src
    }

    pub fn hmac(&self) -> &[u8] {
        &self.envelope.hmac
    }

    /// Ciphertext shards in index order
    pub fn sealed_shards(&self) -> &[Vec<u8>] {
        &self.shards.shards
    }

    /// Layout of the ciphertext shards across `node_count` nodes
    pub fn sealed_geometry(&self, node_count: usize) -> Result<ShardGeometry> {
        let shards = &self.shards.shards;
        let shard_length = shards.first().map_or(0, Vec::len);
        if shard_length <= TAG_SIZE || shards.iter().any(|s| s.len() != shard_length) {
            return Err(ShardRelayError::MalformedEnvelope(
                "shards differ in length".to_string(),
            ));
        }
        ShardGeometry::for_shards(shards.len(), shard_length, node_count)
    }

    /// Verify, decrypt and decode the payload.
    ///
    /// `signs[0]` gates everything else; shard `i` is opened with the key of
    /// the node that carries it.
    pub fn open(&self, encrypts: &KeyFan, signs: &KeyFan) -> Result<Vec<u8>> {
        integrity::ensure_valid(signs.owner(), &self.envelope.shard_envelope, &self.envelope.hmac)?;

        let sealed = self.sealed_geometry(encrypts.node_count())?;
        let geometry = ShardGeometry {
            shard_length: sealed.shard_length - TAG_SIZE,
            ..sealed
        };

        let shards = self
            .shards
            .shards
            .iter()
            .enumerate()
            .map(|(i, shard)| {
                let key = encrypts.node(geometry.node_for_shard(i) + 1)?;
                ShardCipher::open(key, self.src(), i, shard).map(Some)
            })
            .collect::<Result<Vec<_>>>()?;

        erasure::unpack(shards, &geometry)
            .map_err(|e| ShardRelayError::MalformedEnvelope(format!("payload decode: {}", e)))
    }
}
