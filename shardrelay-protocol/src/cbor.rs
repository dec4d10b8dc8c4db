//! Thin helpers over `ciborium::Value`
//!
//! Every wire structure is built and read as an explicit CBOR value tree so
//! that byte fields always encode as CBOR byte strings.

use ciborium::value::{Integer, Value};
use shardrelay_core::error::{Result, ShardRelayError};

pub fn to_vec(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| ShardRelayError::Internal(format!("CBOR encode: {}", e)))?;
    Ok(out)
}

pub fn from_slice(bytes: &[u8]) -> Result<Value> {
    ciborium::de::from_reader::<Value, _>(bytes)
        .map_err(|e| ShardRelayError::MalformedEnvelope(format!("CBOR decode: {}", e)))
}

pub fn bytes(data: &[u8]) -> Value {
    Value::Bytes(data.to_vec())
}

pub fn uint(n: usize) -> Value {
    Value::Integer(Integer::from(n as u64))
}

pub fn byte_list<T: AsRef<[u8]>>(items: &[T]) -> Value {
    Value::Array(items.iter().map(|b| bytes(b.as_ref())).collect())
}

pub fn map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::Text(k.to_string()), v))
            .collect(),
    )
}

pub fn into_array(value: Value) -> Result<Vec<Value>> {
    value
        .into_array()
        .map_err(|_| malformed("expected an array"))
}

pub fn into_bytes(value: Value) -> Result<Vec<u8>> {
    value
        .into_bytes()
        .map_err(|_| malformed("expected a byte string"))
}

pub fn into_byte_list(value: Value) -> Result<Vec<Vec<u8>>> {
    into_array(value)?.into_iter().map(into_bytes).collect()
}

pub fn into_uint(value: Value) -> Result<usize> {
    let n = value
        .into_integer()
        .map_err(|_| malformed("expected an unsigned integer"))?;
    let n = u64::try_from(n).map_err(|_| malformed("integer out of range"))?;
    usize::try_from(n).map_err(|_| malformed("integer out of range"))
}

pub(crate) fn malformed(reason: &str) -> ShardRelayError {
    ShardRelayError::MalformedEnvelope(reason.to_string())
}

/// Text-keyed CBOR map being taken apart field by field
#[derive(Debug)]
pub struct MapReader {
    entries: Vec<(Value, Value)>,
}

impl MapReader {
    pub fn new(value: Value) -> Result<Self> {
        let entries = value
            .into_map()
            .map_err(|_| malformed("expected a map"))?;
        Ok(Self { entries })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::new(from_slice(bytes)?)
    }

    /// Remove and return the value stored under `key`
    pub fn take(&mut self, key: &str) -> Result<Value> {
        let pos = self
            .entries
            .iter()
            .position(|(k, _)| k.as_text() == Some(key))
            .ok_or_else(|| ShardRelayError::MalformedEnvelope(format!("missing field {}", key)))?;
        Ok(self.entries.swap_remove(pos).1)
    }

    pub fn bytes(&mut self, key: &str) -> Result<Vec<u8>> {
        into_bytes(self.take(key)?)
    }

    pub fn byte_list(&mut self, key: &str) -> Result<Vec<Vec<u8>>> {
        into_byte_list(self.take(key)?)
    }

    pub fn uint(&mut self, key: &str) -> Result<usize> {
        into_uint(self.take(key)?)
    }

    pub fn text(&mut self, key: &str) -> Result<String> {
        self.take(key)?
            .into_text()
            .map_err(|_| ShardRelayError::MalformedEnvelope(format!("field {} is not text", key)))
    }

    /// Fail if any field was left unread
    pub fn finish(self) -> Result<()> {
        match self.entries.first() {
            None => Ok(()),
            Some((key, _)) => Err(ShardRelayError::MalformedEnvelope(format!(
                "unexpected field {}",
                key.as_text().unwrap_or("<non-text key>")
            ))),
        }
    }
}
