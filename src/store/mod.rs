//! Durable checkpointing: the [`Store`] trait and the checkpoint wire format.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::io_rng::RecordedIo;
use crate::order_key::WorkItem;

/// A durable, append-only snapshot of a run at a step boundary.
///
/// Checkpoints are never mutated once committed. [`crate::engine::Engine::run`]
/// reads the latest committed `step_id` for a `run_id` and resumes from
/// there when one exists past the bootstrap checkpoint (`step_id == 0`);
/// [`crate::engine::Engine::replay`] always restarts from the bootstrap
/// checkpoint, serving recorded I/O instead of resuming live.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    pub run_id: String,
    pub step_id: u64,
    pub state: S,
    pub frontier: Vec<WorkItem<S>>,
    pub rng_seed: i64,
    pub recorded_ios: Vec<RecordedIo>,
    pub idempotency_key: String,
    pub timestamp: DateTime<Utc>,
    pub label: Option<String>,
}

/// Canonical serialization + SHA-256, used for both `idempotency_key` and
/// `RecordedIo.hash`. `serde_json::to_vec` is already byte-stable for these
/// types as long as map keys are inserted in a fixed order — callers build
/// `state`/`frontier` through the engine's own deterministic paths, so this
/// holds without extra bookkeeping.
#[must_use]
pub fn compute_idempotency_key<S: Serialize>(
    run_id: &str,
    step_id: u64,
    state: &S,
    frontier: &[WorkItem<S>],
) -> String
where
    S: Serialize,
{
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(step_id.to_le_bytes());
    hasher.update(
        serde_json::to_vec(state).expect("state serialization is infallible for engine state"),
    );
    hasher.update(
        serde_json::to_vec(frontier)
            .expect("frontier serialization is infallible for engine state"),
    );
    format!("sha256:{:x}", hasher.finalize())
}

/// The durable persistence boundary the engine commits through.
///
/// Implementations must give all-or-nothing commits across
/// `{state, frontier, rng_seed, recorded_ios, idempotency_key}` and
/// first-writer-wins semantics on the idempotency key — a second
/// `save_checkpoint` with a key that's already committed must fail with
/// `StoreError::IdempotencyConflict` rather than overwrite anything.
#[async_trait]
pub trait Store<S>: Send + Sync
where
    S: Send + Sync,
{
    async fn save_checkpoint(&self, cp: Checkpoint<S>) -> Result<(), StoreError>;
    async fn load_checkpoint(
        &self,
        run_id: &str,
        step_id: u64,
    ) -> Result<Option<Checkpoint<S>>, StoreError>;
    async fn latest_checkpoint(&self, run_id: &str) -> Result<Option<Checkpoint<S>>, StoreError>;
    async fn check_idempotency(&self, key: &str) -> Result<bool, StoreError>;
}
