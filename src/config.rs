//! Runtime configuration: which store backend to use and how to reach it.

/// Which [`crate::store::Store`] backend a [`RuntimeConfig`] resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    /// Non-durable, in-process. Lost on exit.
    Memory,
    /// Durable, backed by SQLite. Requires the `sqlite` feature.
    Sqlite,
}

/// Configuration for constructing a [`crate::store::Store`] and the
/// surrounding run environment. Resolved once at startup, not re-read per run.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub store_kind: StoreKind,
    /// SQLite connection string, e.g. `sqlite://weavestep.db`. Only
    /// meaningful when `store_kind == StoreKind::Sqlite`.
    pub sqlite_url: Option<String>,
    pub event_buffer_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store_kind: StoreKind::Memory,
            sqlite_url: Self::resolve_sqlite_url(None),
            event_buffer_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Resolve the SQLite URL: an explicitly-provided value wins, otherwise
    /// `.env` (via `dotenvy`) then the `WEAVESTEP_SQLITE_URL` environment
    /// variable, falling back to a local file named after `SQLITE_DB_NAME`
    /// (or `weavestep.db`) if neither is set.
    fn resolve_sqlite_url(provided: Option<String>) -> Option<String> {
        if let Some(url) = provided {
            return Some(url);
        }
        dotenvy::dotenv().ok();
        if let Ok(url) = std::env::var("WEAVESTEP_SQLITE_URL") {
            return Some(url);
        }
        let db_name = std::env::var("SQLITE_DB_NAME").unwrap_or_else(|_| "weavestep.db".to_string());
        Some(format!("sqlite://{db_name}"))
    }

    #[must_use]
    pub fn new(store_kind: StoreKind, sqlite_url: Option<String>) -> Self {
        Self {
            store_kind,
            sqlite_url: Self::resolve_sqlite_url(sqlite_url),
            event_buffer_capacity: 1024,
        }
    }

    #[must_use]
    pub fn with_event_buffer_capacity(mut self, capacity: usize) -> Self {
        self.event_buffer_capacity = if capacity == 0 { 1024 } else { capacity };
        self
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(StoreKind::Memory, None)
    }

    #[must_use]
    pub fn sqlite(url: impl Into<String>) -> Self {
        Self::new(StoreKind::Sqlite, Some(url.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_config_carries_no_sqlite_url_requirement() {
        let cfg = RuntimeConfig::in_memory();
        assert_eq!(cfg.store_kind, StoreKind::Memory);
    }

    #[test]
    fn explicit_sqlite_url_is_not_overridden_by_env() {
        let cfg = RuntimeConfig::sqlite("sqlite://explicit.db");
        assert_eq!(cfg.sqlite_url.as_deref(), Some("sqlite://explicit.db"));
    }

    #[test]
    fn zero_buffer_capacity_falls_back_to_default() {
        let cfg = RuntimeConfig::in_memory().with_event_buffer_capacity(0);
        assert_eq!(cfg.event_buffer_capacity, 1024);
    }
}
