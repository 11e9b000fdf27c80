//! Closed error surface for the engine.
//!
//! `ErrorKind` is the small, closed vocabulary the rest of the crate reasons
//! about — node policies classify retryability against it, and every
//! [`EngineError`] variant maps onto exactly one kind via [`EngineError::kind`].
//! `EngineError` itself carries the full diagnostic payload (which node,
//! which attempt, what caused it); `ErrorKind` is what you match on.

use miette::Diagnostic;
use thiserror::Error;

use crate::types::NodeId;

/// The closed vocabulary of ways a run can fail. Matches the error-kind
/// list surfaced by the engine's design, not a 1:1 mirror of `EngineError`'s
/// variants (several `EngineError` variants carry payload specific to one
/// kind).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MaxStepsExceeded,
    MaxAttemptsExceeded,
    BackpressureTimeout,
    ReplayMismatch,
    NoProgress,
    IdempotencyViolation,
    NodeNotFound,
    NodeTimeout,
    Cancelled,
    /// Reserved: constructed by conflict-detection paths but the engine's
    /// single conflict policy (`Fail`) never actually returns it — ties are
    /// resolved by the deterministic sort-then-fold merge before any
    /// conflict could be observed.
    ReducerConflict,
    NodeError,
}

/// A node implementation's own failure, returned from [`crate::node::Node::run`].
///
/// Distinct from [`EngineError`]: this is the "hard stop" channel a node
/// uses when it cannot produce a [`crate::node::NodeResult`] at all. A node
/// that ran but wants to flag a problem alongside a delta should instead
/// set [`crate::node::NodeResult::error`].
#[derive(Error, Diagnostic, Debug)]
pub enum NodeError {
    /// Expected input is missing from the state the node was given.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(weavestep::node::missing_input),
        help("Check that the node producing this input routed here.")
    )]
    MissingInput { what: &'static str },

    /// A generic, policy-classified failure carrying a machine-readable code.
    #[error("{message}")]
    #[diagnostic(code(weavestep::node::failed))]
    Failed { code: String, message: String },

    /// JSON (de)serialization failure, typically while recording I/O.
    #[error(transparent)]
    #[diagnostic(code(weavestep::node::serde_json))]
    Serde(#[from] serde_json::Error),
}

impl NodeError {
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            NodeError::MissingInput { what } => format!("missing_input:{what}"),
            NodeError::Failed { code, .. } => code.clone(),
            NodeError::Serde(_) => "serde_json".to_string(),
        }
    }
}

/// Failures from a [`crate::store::Store`] implementation.
#[derive(Error, Diagnostic, Debug)]
pub enum StoreError {
    #[error("checkpoint not found for run {run_id} at step {step_id}")]
    #[diagnostic(code(weavestep::store::not_found))]
    NotFound { run_id: String, step_id: u64 },

    #[error("idempotency key already committed: {key}")]
    #[diagnostic(
        code(weavestep::store::idempotency_conflict),
        help("First-writer-wins: re-load the existing checkpoint for this key.")
    )]
    IdempotencyConflict { key: String },

    #[error("store backend error: {message}")]
    #[diagnostic(code(weavestep::store::backend))]
    Backend { message: String },
}

/// Failures from the [`crate::frontier::Frontier`].
#[derive(Error, Diagnostic, Debug)]
pub enum FrontierError {
    #[error("cancelled while waiting on the frontier")]
    #[diagnostic(code(weavestep::frontier::cancelled))]
    Cancelled,

    #[error("backpressure timeout waiting to enqueue onto the frontier")]
    #[diagnostic(code(weavestep::frontier::backpressure_timeout))]
    BackpressureTimeout,
}

/// The top-level error returned by [`crate::engine::Engine::run`] and
/// [`crate::engine::Engine::replay`].
#[derive(Error, Diagnostic, Debug)]
pub enum EngineError {
    #[error("exceeded maximum steps ({max})")]
    #[diagnostic(
        code(weavestep::engine::max_steps_exceeded),
        help("Raise `EngineOptions::max_steps` or check for a non-terminating loop.")
    )]
    MaxStepsExceeded { max: u64 },

    #[error("node {node_id} exhausted {max_attempts} attempt(s)")]
    #[diagnostic(code(weavestep::engine::max_attempts_exceeded))]
    MaxAttemptsExceeded {
        node_id: NodeId,
        max_attempts: u32,
        #[source]
        cause: Box<EngineError>,
    },

    #[error("backpressure timeout waiting to enqueue onto the frontier")]
    #[diagnostic(code(weavestep::engine::backpressure_timeout))]
    BackpressureTimeout,

    #[error("replay mismatch for node {node_id} attempt {attempt}")]
    #[diagnostic(
        code(weavestep::engine::replay_mismatch),
        help("The recorded response hash no longer matches; run with `strict_replay=false` to tolerate drift.")
    )]
    ReplayMismatch { node_id: NodeId, attempt: u32 },

    #[error("no progress: node {node_id} produced no route and no edge matched")]
    #[diagnostic(
        code(weavestep::engine::no_progress),
        help("Add an edge, a conditional predicate, or return an explicit `Next`.")
    )]
    NoProgress { node_id: NodeId },

    #[error("idempotency violation for key {key}")]
    #[diagnostic(code(weavestep::engine::idempotency_violation))]
    IdempotencyViolation { key: String },

    #[error("node not found: {0}")]
    #[diagnostic(code(weavestep::engine::node_not_found))]
    NodeNotFound(NodeId),

    #[error("node {node_id} timed out")]
    #[diagnostic(code(weavestep::engine::node_timeout))]
    NodeTimeout { node_id: NodeId, attempt: u32 },

    #[error("cancelled")]
    #[diagnostic(code(weavestep::engine::cancelled))]
    Cancelled,

    #[error("reducer conflict (reserved, never returned by the built-in `Fail` policy)")]
    #[diagnostic(code(weavestep::engine::reducer_conflict))]
    ReducerConflict,

    #[error("node {node_id} failed on attempt {attempt}: {message}")]
    #[diagnostic(code(weavestep::engine::node_error))]
    NodeError {
        node_id: NodeId,
        attempt: u32,
        code: String,
        message: String,
        #[source]
        cause: Option<Box<EngineError>>,
    },

    #[error(transparent)]
    #[diagnostic(code(weavestep::engine::store))]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(code(weavestep::engine::frontier))]
    Frontier(#[from] FrontierError),
}

impl EngineError {
    /// Classify this error into the closed [`ErrorKind`] vocabulary, for
    /// policy decisions and for tests asserting "failed with kind X".
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MaxStepsExceeded { .. } => ErrorKind::MaxStepsExceeded,
            EngineError::MaxAttemptsExceeded { .. } => ErrorKind::MaxAttemptsExceeded,
            EngineError::BackpressureTimeout => ErrorKind::BackpressureTimeout,
            EngineError::ReplayMismatch { .. } => ErrorKind::ReplayMismatch,
            EngineError::NoProgress { .. } => ErrorKind::NoProgress,
            EngineError::IdempotencyViolation { .. } => ErrorKind::IdempotencyViolation,
            EngineError::NodeNotFound(_) => ErrorKind::NodeNotFound,
            EngineError::NodeTimeout { .. } => ErrorKind::NodeTimeout,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::ReducerConflict => ErrorKind::ReducerConflict,
            EngineError::NodeError { .. } => ErrorKind::NodeError,
            EngineError::Store(StoreError::IdempotencyConflict { .. }) => {
                ErrorKind::IdempotencyViolation
            }
            EngineError::Store(_) => ErrorKind::NodeError,
            EngineError::Frontier(FrontierError::Cancelled) => ErrorKind::Cancelled,
            EngineError::Frontier(FrontierError::BackpressureTimeout) => {
                ErrorKind::BackpressureTimeout
            }
        }
    }

    /// The node and attempt this error is attributed to, when applicable.
    #[must_use]
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            EngineError::MaxAttemptsExceeded { node_id, .. }
            | EngineError::ReplayMismatch { node_id, .. }
            | EngineError::NoProgress { node_id, .. }
            | EngineError::NodeTimeout { node_id, .. }
            | EngineError::NodeError { node_id, .. } => Some(node_id),
            EngineError::NodeNotFound(node_id) => Some(node_id),
            _ => None,
        }
    }
}

/// Default retry classification: retry everything that is not explicitly
/// fatal. Fatal kinds are the ones that, per the engine's failure
/// semantics, can never be resolved by re-running the same node.
#[must_use]
pub fn default_retryable(kind: &ErrorKind) -> bool {
    !matches!(
        kind,
        ErrorKind::MaxStepsExceeded
            | ErrorKind::NoProgress
            | ErrorKind::NodeNotFound
            | ErrorKind::IdempotencyViolation
            | ErrorKind::Cancelled
            | ErrorKind::ReplayMismatch
    )
}
