//! Seeded randomness and recorded I/O for deterministic replay.
//!
//! A run's entire random sequence is derived from its `run_id`, and every
//! external call a recordable node makes is captured as a [`RecordedIo`].
//! Replaying a run re-derives the same seed and serves recorded calls back
//! instead of hitting the outside world, so a replayed run is byte-identical
//! to the original as long as nothing non-deterministic leaked in through a
//! side channel.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::EngineError;
use crate::types::NodeId;

/// Derive a run's RNG seed from its `run_id`: the low 8 bytes of
/// `SHA-256(run_id)`, reinterpreted as a little-endian `i64`.
#[must_use]
pub fn derive_run_seed(run_id: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_le_bytes(bytes)
}

/// A deterministic per-(node, attempt) random source.
///
/// Nodes never share a single mutable RNG: concurrent node executions
/// within a step would then produce draws in an order that depends on
/// thread scheduling, breaking reproducibility. Instead each work item
/// gets its own handle, derived from the run seed plus the node id and
/// attempt number, so the sequence a given node/attempt pair draws is
/// fixed regardless of what else is running alongside it.
pub struct RngHandle {
    rng: StdRng,
}

impl RngHandle {
    /// Derive the handle for `node_id`'s `attempt`-th execution within a
    /// run whose seed is `run_seed`.
    #[must_use]
    pub fn derive(run_seed: i64, node_id: &NodeId, attempt: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(run_seed.to_le_bytes());
        hasher.update(node_id.as_key_bytes());
        hasher.update(attempt.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let seed = u64::from_le_bytes(bytes);
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.rng.random()
    }

    /// Exponential backoff with seeded jitter: `base * 2^attempt + jitter`,
    /// where `jitter` is drawn uniformly from `[0, base)`.
    pub fn backoff(&mut self, base: Duration, attempt: u32) -> Duration {
        let exp = base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        let jitter_millis = if base.as_millis() == 0 {
            0
        } else {
            self.rng.random_range(0..base.as_millis() as u64)
        };
        exp + Duration::from_millis(jitter_millis)
    }
}

/// A captured external call, persisted alongside the checkpoint so replay
/// can serve it back without re-invoking the outside world.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordedIo {
    pub node_id: NodeId,
    pub attempt: u32,
    pub request: Value,
    pub response: Value,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
}

fn hash_response(response: &Value) -> String {
    let bytes = canonical_bytes(response);
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Canonical, byte-stable serialization used for hashing: `serde_json`
/// naturally preserves `BTreeMap`-style key order for the `Value::Object`
/// variant as long as the `preserve_order` feature is not enabled, so a
/// plain `to_vec` is already canonical here.
#[must_use]
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).expect("serde_json::Value serialization is infallible")
}

/// Record a completed external call.
#[must_use]
pub fn record_io(
    node_id: NodeId,
    attempt: u32,
    request: Value,
    response: Value,
    duration: Duration,
) -> RecordedIo {
    let hash = hash_response(&response);
    RecordedIo {
        node_id,
        attempt,
        request,
        response,
        hash,
        timestamp: Utc::now(),
        duration,
    }
}

/// Find a previously recorded call by `(node_id, attempt)`.
#[must_use]
pub fn lookup_recorded_io<'a>(
    list: &'a [RecordedIo],
    node_id: &NodeId,
    attempt: u32,
) -> Option<&'a RecordedIo> {
    list.iter()
        .find(|rec| &rec.node_id == node_id && rec.attempt == attempt)
}

/// Verify that `actual` hashes to the same value as `recorded.hash`.
pub fn verify_replay_hash(recorded: &RecordedIo, actual: &Value) -> Result<(), EngineError> {
    let actual_hash = hash_response(actual);
    if actual_hash == recorded.hash {
        Ok(())
    } else {
        Err(EngineError::ReplayMismatch {
            node_id: recorded.node_id.clone(),
            attempt: recorded.attempt,
        })
    }
}
