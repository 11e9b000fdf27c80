//! The [`Node`] trait: the single unit of computation a workflow graph runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::errors::{ErrorKind, NodeError, default_retryable};
use crate::events::{Event, EventEmitter};
use crate::io_rng::{RecordedIo, RngHandle};
use crate::types::NodeId;

/// Executable unit of a workflow graph.
///
/// Nodes are stateless and deterministic: given the same `state`, a node
/// should produce the same `delta` and routing decision (external calls
/// aside — those go through [`NodeContext`]'s recording so replay can
/// reproduce them too). A node that cannot proceed at all returns
/// `Err(NodeError)`; one that ran but wants to flag a problem alongside a
/// delta sets [`NodeResult::error`] instead.
#[async_trait]
pub trait Node<S>: Send + Sync {
    async fn run(&self, ctx: NodeContext, state: S) -> Result<NodeResult<S>, NodeError>;

    /// Execution policy for this node. Defaults to [`NodePolicy::default`].
    fn policy(&self) -> NodePolicy {
        NodePolicy::default()
    }
}

/// Per-invocation execution context handed to a node.
///
/// Carries everything a node needs that isn't part of the state value
/// itself: identity, the event emitter, and a deterministic RNG handle.
/// Nodes that need randomness must draw from `ctx.rng`, never from an
/// ambient source — that's what makes replay reproducible.
pub struct NodeContext {
    pub run_id: String,
    pub node_id: NodeId,
    pub step_id: u64,
    pub attempt: u32,
    pub rng: RngHandle,
    emitter: Arc<dyn EventEmitter>,
    replay_mode: bool,
    strict_replay: bool,
    recorded: Option<Arc<RecordedIo>>,
    recorder: Arc<Mutex<Vec<RecordedIo>>>,
}

impl NodeContext {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: String,
        node_id: NodeId,
        step_id: u64,
        attempt: u32,
        rng: RngHandle,
        emitter: Arc<dyn EventEmitter>,
        replay_mode: bool,
        strict_replay: bool,
        recorded: Option<Arc<RecordedIo>>,
        recorder: Arc<Mutex<Vec<RecordedIo>>>,
    ) -> Self {
        Self {
            run_id,
            node_id,
            step_id,
            attempt,
            rng,
            emitter,
            replay_mode,
            strict_replay,
            recorded,
            recorder,
        }
    }

    /// Emit a diagnostic event scoped to this node's execution. Best-effort;
    /// emitter errors are swallowed here, matching the engine's own policy
    /// of never letting observability failures affect a run.
    pub fn emit(&self, scope: impl Into<String>, message: impl Into<String>) {
        let _ = self.emitter.emit(Event::diagnostic(scope, message));
    }

    /// Whether this invocation is replaying a previously recorded run.
    /// Recordable nodes should check this before making an external call.
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        self.replay_mode
    }

    /// The recorded call for this `(node_id, attempt)`, if replaying one.
    #[must_use]
    pub fn recorded_io(&self) -> Option<&RecordedIo> {
        self.recorded.as_deref()
    }

    /// Reconcile a freshly-computed response against what was recorded,
    /// when replaying.
    ///
    /// Not replaying, or no prior recording for this attempt: returns
    /// `live` unchanged. Replaying and the hashes match: returns the
    /// recorded response, byte-identical to the original run. Replaying
    /// and the hashes differ: fails with `NodeError::Failed` under
    /// `EngineOptions::strict_replay`, otherwise falls back to `live`.
    pub fn verify_or_tolerate(&self, live: Value) -> Result<Value, NodeError> {
        let Some(recorded) = self.recorded.as_deref() else {
            return Ok(live);
        };
        match crate::io_rng::verify_replay_hash(recorded, &live) {
            Ok(()) => Ok(recorded.response.clone()),
            Err(_) if self.strict_replay => Err(NodeError::Failed {
                code: "replay_mismatch".into(),
                message: format!(
                    "{} attempt {}: live response diverges from recorded hash {}",
                    self.node_id, self.attempt, recorded.hash
                ),
            }),
            Err(_) => {
                self.emit(
                    "replay",
                    format!(
                        "{} attempt {}: tolerating replay mismatch, using live response",
                        self.node_id, self.attempt
                    ),
                );
                Ok(live)
            }
        }
    }

    /// Record a freshly-made external call so it can be replayed later.
    /// Only meaningful for nodes whose [`NodePolicy::recordable`] is set;
    /// the node runtime discards recordings from non-recordable nodes.
    pub fn record(&self, request: Value, response: Value, duration: Duration) -> RecordedIo {
        let rec = crate::io_rng::record_io(
            self.node_id.clone(),
            self.attempt,
            request,
            response,
            duration,
        );
        self.recorder.lock().push(rec.clone());
        rec
    }
}

/// What a node produced: a state delta, an optional routing override, and
/// an optional soft error to carry alongside the delta.
///
/// `route: None` means "defer to the graph's declared edges for this
/// node" (§4.7 step 6 of the routing design); `Some(next)` is an explicit
/// override that bypasses edge evaluation entirely.
pub struct NodeResult<S> {
    pub delta: S,
    pub route: Option<Next>,
    pub error: Option<ErrorKind>,
}

impl<S> NodeResult<S> {
    /// A result that defers routing to the graph's declared edges.
    #[must_use]
    pub fn new(delta: S, route: Next) -> Self {
        Self {
            delta,
            route: Some(route),
            error: None,
        }
    }

    /// A result with no explicit route: the engine evaluates this node's
    /// outgoing edges in declaration order instead.
    #[must_use]
    pub fn via_edges(delta: S) -> Self {
        Self {
            delta,
            route: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: ErrorKind) -> Self {
        self.error = Some(error);
        self
    }
}

/// A node's explicit routing decision, mutually exclusive by construction.
#[derive(Clone, Debug)]
pub enum Next {
    /// This branch is finished; contributes no successors.
    Stop,
    /// Route to exactly one node, using `edge_index = 0`.
    Goto(NodeId),
    /// Fan out to each listed node, in order; `edge_index` is the position
    /// within this list. Empty is rejected — see [`ErrorKind::NoProgress`].
    Many(Vec<NodeId>),
}

/// Per-node execution policy: timeout, retry, and I/O-recording behavior.
#[derive(Clone)]
pub struct NodePolicy {
    /// `None` means "defer to the engine default"; `Some(Duration::ZERO)`
    /// means unlimited for this layer (the run-wall-clock budget still applies).
    pub timeout: Option<Duration>,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Whether this node's external calls should be captured/replayed.
    pub recordable: bool,
    /// Whether this node requires a unique idempotency key per attempt
    /// (set for nodes with externally-visible side effects).
    pub requires_idempotency: bool,
    /// Classifies whether a given error kind should be retried. Defaults
    /// to [`default_retryable`] — retry everything not explicitly fatal.
    pub retryable: Arc<dyn Fn(&ErrorKind) -> bool + Send + Sync>,
}

impl Default for NodePolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            max_attempts: 1,
            backoff_base: Duration::from_millis(100),
            recordable: false,
            requires_idempotency: false,
            retryable: Arc::new(default_retryable),
        }
    }
}

impl NodePolicy {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    #[must_use]
    pub fn recordable(mut self) -> Self {
        self.recordable = true;
        self
    }

    #[must_use]
    pub fn requires_idempotency(mut self) -> Self {
        self.requires_idempotency = true;
        self
    }

    #[must_use]
    pub fn with_retryable(mut self, f: impl Fn(&ErrorKind) -> bool + Send + Sync + 'static) -> Self {
        self.retryable = Arc::new(f);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_single_attempt_non_recordable() {
        let policy = NodePolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.recordable);
        assert!(!policy.requires_idempotency);
    }

    #[test]
    fn max_attempts_is_floored_at_one() {
        let policy = NodePolicy::default().with_max_attempts(0);
        assert_eq!(policy.max_attempts, 1);
    }
}
