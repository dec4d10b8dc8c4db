//! Quorum reconstruction of shards arriving out of order
//!
//! ```text
//! Empty --insert--> Accumulating --(received >= data)--> Reconstructable
//!                                                           |
//!                                                      reconstruct()
//!                                                           v
//!                                                      Reconstructed
//! ```
//!
//! An index is filled at most once; later inserts at the same index are
//! dropped, never overwritten. Once reconstructed the accumulator ignores
//! all further input.

use crate::erasure::{self, ShardGeometry};
use crate::error::{Result, ShardRelayError};

/// Accumulator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructionState {
    Empty,
    Accumulating,
    Reconstructable,
    Reconstructed,
}

/// What happened to a single insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Shard stored at a new index
    Inserted,
    /// Index already filled
    Duplicate,
    /// Accumulator is terminal
    Ignored,
}

/// Shard matrix plus presence tracking for one in-flight transaction
#[derive(Debug)]
pub struct QuorumReconstructor {
    geometry: ShardGeometry,
    shards: Vec<Option<Vec<u8>>>,
    received: usize,
    state: ReconstructionState,
}

impl QuorumReconstructor {
    pub fn new(geometry: ShardGeometry) -> Result<Self> {
        geometry.validate()?;
        Ok(Self {
            geometry,
            shards: vec![None; geometry.total],
            received: 0,
            state: ReconstructionState::Empty,
        })
    }

    pub fn geometry(&self) -> &ShardGeometry {
        &self.geometry
    }

    pub fn state(&self) -> ReconstructionState {
        self.state
    }

    /// Distinct indices received so far
    pub fn received(&self) -> usize {
        self.received
    }

    pub fn is_reconstructable(&self) -> bool {
        self.state == ReconstructionState::Reconstructable
    }

    /// Store `shard` at `index` unless that index is already filled.
    ///
    /// Out-of-range indices and wrong-length shards are errors and leave the
    /// accumulator unchanged.
    pub fn insert(&mut self, index: usize, shard: Vec<u8>) -> Result<InsertOutcome> {
        if self.state == ReconstructionState::Reconstructed {
            return Ok(InsertOutcome::Ignored);
        }
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
        if self.shards[index].is_some() {
            return Ok(InsertOutcome::Duplicate);
        }

        self.shards[index] = Some(shard);
        self.received += 1;
        self.state = if self.received >= self.geometry.data {
            ReconstructionState::Reconstructable
        } else {
            ReconstructionState::Accumulating
        };
        Ok(InsertOutcome::Inserted)
    }

    /// Decode the payload. Fails with `InsufficientShards` until quorum is
    /// reached; after success the accumulator is terminal and the matrix is
    /// released. A failed decode leaves the accumulator as it was.
    pub fn reconstruct(&mut self) -> Result<Vec<u8>> {
        match self.state {
            ReconstructionState::Reconstructable => {}
            ReconstructionState::Reconstructed => {
                return Err(ShardRelayError::Internal(
                    "transaction already reconstructed".to_string(),
                ))
            }
            ReconstructionState::Empty | ReconstructionState::Accumulating => {
                return Err(ShardRelayError::InsufficientShards {
                    available: self.received,
                    required: self.geometry.data,
                })
            }
        }

        let payload = erasure::unpack(self.shards.clone(), &self.geometry)?;
        self.shards = Vec::new();
        self.state = ReconstructionState::Reconstructed;
        Ok(payload)
    }
}
