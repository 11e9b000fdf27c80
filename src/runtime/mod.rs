//! Per-item node execution: timeout, retry/backoff, recording, cancellation.

pub mod node_runtime;
