//! Volatile, process-local [`Store`] implementation.
//!
//! Keeps the full checkpoint history per run (not just the latest), plus
//! the set of committed idempotency keys, under a single `RwLock` — matching
//! the design note that in-memory stores must enforce atomic-commit and
//! first-writer-wins semantics under one mutex, the same way a SQL store
//! would under one transaction.

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use super::{Checkpoint, Store};
use crate::errors::StoreError;

#[derive(Default)]
struct Inner<S> {
    by_run: FxHashMap<String, Vec<Checkpoint<S>>>,
    idempotency_keys: FxHashSet<String>,
}

/// Non-durable [`Store`] backed by an in-process `RwLock`. Fast, suitable
/// for tests and ephemeral runs; state is lost on process exit.
pub struct InMemoryStore<S> {
    inner: RwLock<Inner<S>>,
}

impl<S> Default for InMemoryStore<S> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl<S> InMemoryStore<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<S> Store<S> for InMemoryStore<S>
where
    S: Clone + Send + Sync,
{
    async fn save_checkpoint(&self, cp: Checkpoint<S>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.idempotency_keys.contains(&cp.idempotency_key) {
            // First-writer-wins: any key already committed is a conflict,
            // even if this commit is byte-identical to the one that won.
            // Recovering from a retried identical commit is the caller's
            // job, not the store's.
            return Err(StoreError::IdempotencyConflict {
                key: cp.idempotency_key,
            });
        }
        inner.idempotency_keys.insert(cp.idempotency_key.clone());
        inner.by_run.entry(cp.run_id.clone()).or_default().push(cp);
        Ok(())
    }

    async fn load_checkpoint(
        &self,
        run_id: &str,
        step_id: u64,
    ) -> Result<Option<Checkpoint<S>>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .by_run
            .get(run_id)
            .and_then(|history| history.iter().find(|cp| cp.step_id == step_id))
            .cloned())
    }

    async fn latest_checkpoint(&self, run_id: &str) -> Result<Option<Checkpoint<S>>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .by_run
            .get(run_id)
            .and_then(|history| history.iter().max_by_key(|cp| cp.step_id))
            .cloned())
    }

    async fn check_idempotency(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.inner.read().idempotency_keys.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;
    use chrono::Utc;

    fn checkpoint(run_id: &str, step_id: u64, key: &str) -> Checkpoint<i64> {
        Checkpoint {
            run_id: run_id.to_string(),
            step_id,
            state: step_id as i64,
            frontier: vec![],
            rng_seed: 0,
            recorded_ios: vec![],
            idempotency_key: key.to_string(),
            timestamp: Utc::now(),
            label: None,
        }
    }

    #[tokio::test]
    async fn second_save_with_same_key_but_different_commit_is_rejected() {
        let store = InMemoryStore::new();
        store.save_checkpoint(checkpoint("r1", 1, "k1")).await.unwrap();
        let result = store.save_checkpoint(checkpoint("r1", 2, "k1")).await;
        assert!(matches!(result, Err(StoreError::IdempotencyConflict { .. })));
    }

    #[tokio::test]
    async fn replaying_the_identical_commit_is_rejected_by_the_store() {
        // First-writer-wins is unconditional at this layer: the store has no
        // notion of "the same commit retried", only "this key is taken".
        // Tolerating a retried identical commit is the engine's job.
        let store = InMemoryStore::new();
        store.save_checkpoint(checkpoint("r1", 1, "k1")).await.unwrap();
        let result = store.save_checkpoint(checkpoint("r1", 1, "k1")).await;
        assert!(matches!(result, Err(StoreError::IdempotencyConflict { .. })));
        let latest = store.latest_checkpoint("r1").await.unwrap().unwrap();
        assert_eq!(latest.step_id, 1);
    }

    #[tokio::test]
    async fn latest_checkpoint_tracks_highest_step() {
        let store = InMemoryStore::new();
        store.save_checkpoint(checkpoint("r1", 1, "k1")).await.unwrap();
        store.save_checkpoint(checkpoint("r1", 2, "k2")).await.unwrap();
        let latest = store.latest_checkpoint("r1").await.unwrap().unwrap();
        assert_eq!(latest.step_id, 2);
    }

    #[tokio::test]
    async fn unrelated_nodes_do_not_share_idempotency_state() {
        let store = InMemoryStore::new();
        store.save_checkpoint(checkpoint("r1", 1, "k1")).await.unwrap();
        assert!(store.check_idempotency("k1").await.unwrap());
        assert!(!store.check_idempotency("k2").await.unwrap());
        let _ = NodeId::Start;
    }
}
