//! Reed-Solomon shard sizing and packing
//!
//! A payload of `len` bytes sent to `n` nodes is split as follows:
//! - `total = n * ceil((len + 1) / 256)`, capped at 255 (lowered to a
//!   multiple of `n` when the cap applies)
//! - `parity = total / 2`, `data = total - parity`
//! - `shards_per_node = total / n`
//!
//! The payload is terminated with a single `0x01` byte and zero-padded to a
//! multiple of `data` before slicing, so any `data` of the `total` shards
//! reproduce it exactly.

use crate::error::{Result, ShardRelayError};
use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Symbol limit of GF(2^8)
pub const MAX_TOTAL_SHARDS: usize = 255;

/// Payload bytes covered by one shard per node
pub const BLOCK_SIZE: usize = 256;

/// Byte appended after the payload before zero padding
pub const PADDING_TERMINATOR: u8 = 0x01;

/// Shard layout for a single payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardGeometry {
    pub total: usize,
    pub data: usize,
    pub parity: usize,
    pub shards_per_node: usize,
    pub shard_length: usize,
}

impl ShardGeometry {
    /// Compute the layout for a payload of `payload_len` bytes across
    /// `node_count` nodes
    pub fn for_payload(payload_len: usize, node_count: usize) -> Result<Self> {
        if node_count == 0 || node_count > MAX_TOTAL_SHARDS {
            return Err(ShardRelayError::Configuration(format!(
                "node count must be in 1..={}, got {}",
                MAX_TOTAL_SHARDS, node_count
            )));
        }

        let blocks = (payload_len + 1).div_ceil(BLOCK_SIZE);
        let mut total = node_count.saturating_mul(blocks);
        if total > MAX_TOTAL_SHARDS {
            total = (MAX_TOTAL_SHARDS / node_count) * node_count;
        }

        let parity = total / 2;
        let data = total - parity;
        let padded_len = (payload_len + 1).div_ceil(data) * data;

        Ok(Self {
            total,
            data,
            parity,
            shards_per_node: total / node_count,
            shard_length: padded_len / data,
        })
    }

    /// Recover the layout of `total` equal-length shards spread over
    /// `node_count` nodes
    pub fn for_shards(total: usize, shard_length: usize, node_count: usize) -> Result<Self> {
        if node_count == 0 || total == 0 || total > MAX_TOTAL_SHARDS || total % node_count != 0 {
            return Err(ShardRelayError::MalformedEnvelope(format!(
                "{} shards cannot be spread over {} nodes",
                total, node_count
            )));
        }

        let parity = total / 2;
        let geometry = Self {
            total,
            data: total - parity,
            parity,
            shards_per_node: total / node_count,
            shard_length,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Check a layout received from elsewhere for internal consistency
    pub fn validate(&self) -> Result<()> {
        let consistent = self.data >= 1
            && self.total <= MAX_TOTAL_SHARDS
            && self.data + self.parity == self.total
            && self.shards_per_node >= 1
            && self.total % self.shards_per_node == 0
            && self.shard_length >= 1;
        if consistent {
            Ok(())
        } else {
            Err(ShardRelayError::MalformedEnvelope(format!(
                "inconsistent shard geometry: {}",
                self
            )))
        }
    }

    pub fn node_count(&self) -> usize {
        self.total / self.shards_per_node
    }

    /// Zero-based node that carries shard `index`
    pub fn node_for_shard(&self, index: usize) -> usize {
        index / self.shards_per_node
    }

    /// Shard indices carried by zero-based node `node`
    pub fn shards_for_node(&self, node: usize) -> std::ops::Range<usize> {
        let start = node * self.shards_per_node;
        start..start + self.shards_per_node
    }
}

impl fmt::Display for ShardGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+{} shards ({} per node) of {} bytes",
            self.data, self.parity, self.shards_per_node, self.shard_length
        )
    }
}

/// Erasure codec bound to one geometry.
///
/// With zero parity shards there is nothing to encode, and decoding needs
/// every data shard.
pub struct ShardCodec {
    geometry: ShardGeometry,
    encoder: Option<ReedSolomon>,
}

impl ShardCodec {
    pub fn new(geometry: ShardGeometry) -> Result<Self> {
        geometry.validate()?;
        let encoder = if geometry.parity > 0 {
            Some(ReedSolomon::new(geometry.data, geometry.parity)?)
        } else {
            None
        };
        Ok(Self { geometry, encoder })
    }

    pub fn geometry(&self) -> &ShardGeometry {
        &self.geometry
    }

    /// Fill the parity shards from the leading `data` shards
    pub fn encode_parity(&self, shards: &mut [Vec<u8>]) -> Result<()> {
        self.check_count(shards.len())?;
        for shard in shards.iter() {
            self.check_length(shard.len())?;
        }
        if let Some(encoder) = &self.encoder {
            encoder.encode(shards)?;
        }
        Ok(())
    }

    /// Rebuild every missing shard in place
    pub fn decode_missing(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        self.check_count(shards.len())?;
        let mut available = 0;
        for shard in shards.iter().flatten() {
            self.check_length(shard.len())?;
            available += 1;
        }
        if available < self.geometry.data {
            return Err(ShardRelayError::InsufficientShards {
                available,
                required: self.geometry.data,
            });
        }
        if available == self.geometry.total {
            return Ok(());
        }

        let encoder = self.encoder.as_ref().ok_or_else(|| {
            ShardRelayError::Internal("no parity to reconstruct from".to_string())
        })?;
        encoder.reconstruct(shards)?;
        Ok(())
    }

    fn check_count(&self, count: usize) -> Result<()> {
        if count != self.geometry.total {
            return Err(ShardRelayError::ShardSizeMismatch {
                expected: self.geometry.total,
                actual: count,
            });
        }
        Ok(())
    }

    fn check_length(&self, length: usize) -> Result<()> {
        if length != self.geometry.shard_length {
            return Err(ShardRelayError::ShardSizeMismatch {
                expected: self.geometry.shard_length,
                actual: length,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ShardCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardCodec")
            .field("geometry", &self.geometry)
            .finish()
    }
}

/// Split `payload` into `total` shards for `node_count` nodes
pub fn pack(payload: &[u8], node_count: usize) -> Result<(Vec<Vec<u8>>, ShardGeometry)> {
    let geometry = ShardGeometry::for_payload(payload.len(), node_count)?;
    let codec = ShardCodec::new(geometry)?;

    let padded = pad(payload, geometry.data * geometry.shard_length);
    let mut shards: Vec<Vec<u8>> = padded
        .chunks(geometry.shard_length)
        .map(|c| c.to_vec())
        .collect();
    shards.resize(geometry.total, vec![0u8; geometry.shard_length]);

    codec.encode_parity(&mut shards)?;
    Ok((shards, geometry))
}

/// Rebuild the payload from any `data` of the shards. Missing shards are
/// `None`.
pub fn unpack(mut shards: Vec<Option<Vec<u8>>>, geometry: &ShardGeometry) -> Result<Vec<u8>> {
    let codec = ShardCodec::new(*geometry)?;
    codec.decode_missing(&mut shards)?;

    let mut padded = Vec::with_capacity(geometry.data * geometry.shard_length);
    for shard in shards.into_iter().take(geometry.data) {
        let shard = shard.ok_or_else(|| {
            ShardRelayError::Internal("data shard missing after reconstruction".to_string())
        })?;
        padded.extend_from_slice(&shard);
    }
    strip_padding(padded)
}

/// Terminate and zero-pad `payload` to exactly `padded_len` bytes
pub fn pad(payload: &[u8], padded_len: usize) -> Vec<u8> {
    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(payload);
    padded.push(PADDING_TERMINATOR);
    padded.resize(padded_len, 0);
    padded
}

/// Inverse of [`pad`]: drop trailing zeros and the terminator before them
pub fn strip_padding(mut padded: Vec<u8>) -> Result<Vec<u8>> {
    let end = padded
        .iter()
        .rposition(|&b| b != 0)
        .ok_or(ShardRelayError::InvalidPadding)?;
    if padded[end] != PADDING_TERMINATOR {
        return Err(ShardRelayError::InvalidPadding);
    }
    padded.truncate(end);
    Ok(padded)
}
