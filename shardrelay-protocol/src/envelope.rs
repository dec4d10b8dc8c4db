//! Shard and transaction envelopes
//!
//! ```text
//! TransactionEnvelope = [ bstr(ShardEnvelope bytes), bstr(hmac) ]
//! ShardEnvelope       = [ bstr(shard 0), ..., bstr(shard total-1), bstr(SRC) ]
//! ```
//!
//! The HMAC is computed over the exact encoded ShardEnvelope bytes, so the
//! transaction envelope keeps them verbatim instead of re-encoding.

use crate::cbor;
use ciborium::value::Value;
use shardrelay_core::error::Result;
use shardrelay_core::kdf::Src;

/// Ciphertext shards ordered by index, followed by the SRC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardEnvelope {
    pub shards: Vec<Vec<u8>>,
    pub src: Src,
}

impl ShardEnvelope {
    pub fn new(shards: Vec<Vec<u8>>, src: Src) -> Self {
        Self { shards, src }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut items: Vec<Value> = self.shards.iter().map(|s| cbor::bytes(s)).collect();
        items.push(cbor::bytes(self.src.as_bytes()));
        cbor::to_vec(&Value::Array(items))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut items = cbor::into_byte_list(cbor::from_slice(bytes)?)?;
        let src = items
            .pop()
            .ok_or_else(|| cbor::malformed("empty shard envelope"))?;
        let src = Src::from_slice(&src).map_err(|_| cbor::malformed("bad SRC length"))?;
        if items.is_empty() {
            return Err(cbor::malformed("shard envelope carries no shards"));
        }
        Ok(Self { shards: items, src })
    }
}

/// Outer authenticated unit: raw shard-envelope bytes plus their HMAC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEnvelope {
    pub shard_envelope: Vec<u8>,
    pub hmac: Vec<u8>,
}

impl TransactionEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>> {
        cbor::to_vec(&Value::Array(vec![
            cbor::bytes(&self.shard_envelope),
            cbor::bytes(&self.hmac),
        ]))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let items = cbor::into_byte_list(cbor::from_slice(bytes)?)?;
        let [shard_envelope, hmac]: [Vec<u8>; 2] = items
            .try_into()
            .map_err(|_| cbor::malformed("transaction envelope must have two elements"))?;
        Ok(Self {
            shard_envelope,
            hmac,
        })
    }

    /// Parse the inner shard envelope. The result is unauthenticated until
    /// the HMAC has been checked.
    pub fn shards(&self) -> Result<ShardEnvelope> {
        ShardEnvelope::decode(&self.shard_envelope)
    }
}
