//! Relay-to-node shard packet
//!
//! One packet per node carries that node's contiguous shard range together
//! with the transaction SRC, the envelope HMAC and the geometry needed to
//! place the shards. Nodes answer with a packet of the same shape holding
//! their shards of the response payload.

use crate::cbor::{self, MapReader};
use shardrelay_core::erasure::ShardGeometry;
use shardrelay_core::error::{Result, ShardRelayError};
use shardrelay_core::kdf::Src;
use uuid::Uuid;

const SESSION_ID: &str = "sessionId";
const SHARDS_PER_NODE: &str = "shardsPerNode";
const TOTAL_SHARDS: &str = "totalShards";
const DATA_SHARDS: &str = "dataShards";
const PARITY_SHARDS: &str = "parityShards";
const SHARD_LENGTH: &str = "shardLength";
const SRC: &str = "src";
const HMAC: &str = "hmac";
const SHARD_INDICES: &str = "shardIndices";
const SHARD_BYTES: &str = "shardBytes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPacket {
    pub session_id: Uuid,
    pub geometry: ShardGeometry,
    pub src: Src,
    pub hmac: Vec<u8>,
    pub shard_indices: Vec<usize>,
    pub shard_bytes: Vec<Vec<u8>>,
}

impl ShardPacket {
    /// Iterate `(index, shard)` pairs
    pub fn shards(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.shard_indices
            .iter()
            .copied()
            .zip(self.shard_bytes.iter().map(Vec::as_slice))
    }

    pub fn into_shards(self) -> impl Iterator<Item = (usize, Vec<u8>)> {
        self.shard_indices.into_iter().zip(self.shard_bytes)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let g = &self.geometry;
        let indices = self.shard_indices.iter().map(|&i| cbor::uint(i)).collect();
        cbor::to_vec(&cbor::map(vec![
            (SESSION_ID, cbor::bytes(self.session_id.as_bytes())),
            (SHARDS_PER_NODE, cbor::uint(g.shards_per_node)),
            (TOTAL_SHARDS, cbor::uint(g.total)),
            (DATA_SHARDS, cbor::uint(g.data)),
            (PARITY_SHARDS, cbor::uint(g.parity)),
            (SHARD_LENGTH, cbor::uint(g.shard_length)),
            (SRC, cbor::bytes(self.src.as_bytes())),
            (HMAC, cbor::bytes(&self.hmac)),
            (SHARD_INDICES, ciborium::value::Value::Array(indices)),
            (SHARD_BYTES, cbor::byte_list(&self.shard_bytes)),
        ]))
    }

    /// Decode and check the packet for internal consistency
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut map = MapReader::decode(bytes)?;

        let session_id = Uuid::from_slice(&map.bytes(SESSION_ID)?)
            .map_err(|_| cbor::malformed("bad session id"))?;
        let geometry = ShardGeometry {
            shards_per_node: map.uint(SHARDS_PER_NODE)?,
            total: map.uint(TOTAL_SHARDS)?,
            data: map.uint(DATA_SHARDS)?,
            parity: map.uint(PARITY_SHARDS)?,
            shard_length: map.uint(SHARD_LENGTH)?,
        };
        let src = Src::from_slice(&map.bytes(SRC)?).map_err(|_| cbor::malformed("bad SRC length"))?;
        let hmac = map.bytes(HMAC)?;
        let shard_indices = cbor::into_array(map.take(SHARD_INDICES)?)?
            .into_iter()
            .map(cbor::into_uint)
            .collect::<Result<Vec<_>>>()?;
        let shard_bytes = map.byte_list(SHARD_BYTES)?;
        map.finish()?;

        let packet = Self {
            session_id,
            geometry,
            src,
            hmac,
            shard_indices,
            shard_bytes,
        };
        packet.validate()?;
        Ok(packet)
    }

    /// Geometry is self-consistent and every shard fits it
    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        if self.shard_indices.len() != self.shard_bytes.len() {
            return Err(cbor::malformed("shard index and shard count differ"));
        }
        for (index, shard) in self.shards() {
            if index >= self.geometry.total {
                return Err(ShardRelayError::InvalidShardIndex {
                    index,
                    max: self.geometry.total - 1,
                });
            }
            if shard.len() != self.geometry.shard_length {
                return Err(ShardRelayError::ShardSizeMismatch {
                    expected: self.geometry.shard_length,
                    actual: shard.len(),
                });
            }
        }
        Ok(())
    }
}
