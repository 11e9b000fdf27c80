//! Durable, file- (or memory-) backed [`Store`] implementation.
//!
//! The idempotency key and the checkpoint row are inserted in the same
//! transaction, with the key column uniquely indexed, so the database
//! itself enforces the atomic-commit-plus-first-writer-wins contract
//! rather than relying on application-level locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use super::{Checkpoint, Store};
use crate::errors::StoreError;

const MIGRATION_SQL: &str = r"
CREATE TABLE IF NOT EXISTS checkpoints (
    run_id TEXT NOT NULL,
    step_id INTEGER NOT NULL,
    state_json TEXT NOT NULL,
    frontier_json TEXT NOT NULL,
    rng_seed INTEGER NOT NULL,
    recorded_ios_json TEXT NOT NULL,
    idempotency_key TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    label TEXT,
    PRIMARY KEY (run_id, step_id)
);
CREATE INDEX IF NOT EXISTS idx_checkpoints_run_id ON checkpoints(run_id);
";

/// SQLite-backed [`Store`]. `S` round-trips through a JSON text column, so
/// it must serialize to a stable byte form (see [`super::compute_idempotency_key`]).
pub struct SqliteStore<S> {
    pool: SqlitePool,
    _marker: std::marker::PhantomData<fn() -> S>,
}

impl<S> SqliteStore<S> {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| StoreError::Backend {
                message: e.to_string(),
            })?;
        sqlx::query(MIGRATION_SQL)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Backend {
                message: e.to_string(),
            })?;
        Ok(Self {
            pool,
            _marker: std::marker::PhantomData,
        })
    }
}

fn row_to_checkpoint<S: DeserializeOwned>(row: SqliteRow) -> Result<Checkpoint<S>, StoreError> {
    let decode = |field: &'static str, text: String| -> Result<_, StoreError> {
        serde_json::from_str(&text).map_err(|e| StoreError::Backend {
            message: format!("decoding {field}: {e}"),
        })
    };
    let state_json: String = row.try_get("state_json").map_err(backend_err)?;
    let frontier_json: String = row.try_get("frontier_json").map_err(backend_err)?;
    let recorded_ios_json: String = row.try_get("recorded_ios_json").map_err(backend_err)?;
    Ok(Checkpoint {
        run_id: row.try_get("run_id").map_err(backend_err)?,
        step_id: row.try_get::<i64, _>("step_id").map_err(backend_err)? as u64,
        state: decode("state_json", state_json)?,
        frontier: decode("frontier_json", frontier_json)?,
        rng_seed: row.try_get("rng_seed").map_err(backend_err)?,
        recorded_ios: decode("recorded_ios_json", recorded_ios_json)?,
        idempotency_key: row.try_get("idempotency_key").map_err(backend_err)?,
        timestamp: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(backend_err)?,
        label: row.try_get("label").map_err(backend_err)?,
    })
}

fn backend_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend {
        message: e.to_string(),
    }
}

#[async_trait]
impl<S> Store<S> for SqliteStore<S>
where
    S: Serialize + DeserializeOwned + Send + Sync,
{
    async fn save_checkpoint(&self, cp: Checkpoint<S>) -> Result<(), StoreError> {
        let state_json = serde_json::to_string(&cp.state).map_err(|e| StoreError::Backend {
            message: e.to_string(),
        })?;
        let frontier_json =
            serde_json::to_string(&cp.frontier).map_err(|e| StoreError::Backend {
                message: e.to_string(),
            })?;
        let recorded_ios_json =
            serde_json::to_string(&cp.recorded_ios).map_err(|e| StoreError::Backend {
                message: e.to_string(),
            })?;

        let result = sqlx::query(
            "INSERT INTO checkpoints \
             (run_id, step_id, state_json, frontier_json, rng_seed, recorded_ios_json, idempotency_key, created_at, label) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&cp.run_id)
        .bind(cp.step_id as i64)
        .bind(&state_json)
        .bind(&frontier_json)
        .bind(cp.rng_seed)
        .bind(&recorded_ios_json)
        .bind(&cp.idempotency_key)
        .bind(cp.timestamp)
        .bind(&cp.label)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // First-writer-wins: the unique index already rejected this
                // key, full stop. Recovering from a retried identical
                // commit is the engine's job, not the store's.
                Err(StoreError::IdempotencyConflict {
                    key: cp.idempotency_key,
                })
            }
            Err(e) => Err(backend_err(e)),
        }
    }

    async fn load_checkpoint(
        &self,
        run_id: &str,
        step_id: u64,
    ) -> Result<Option<Checkpoint<S>>, StoreError> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE run_id = ? AND step_id = ?")
            .bind(run_id)
            .bind(step_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.map(row_to_checkpoint).transpose()
    }

    async fn latest_checkpoint(&self, run_id: &str) -> Result<Option<Checkpoint<S>>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM checkpoints WHERE run_id = ? ORDER BY step_id DESC LIMIT 1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;
        row.map(row_to_checkpoint).transpose()
    }

    async fn check_idempotency(&self, key: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM checkpoints WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(row.is_some())
    }
}
