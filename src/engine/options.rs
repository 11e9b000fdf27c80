//! The engine's closed configuration surface.

use std::time::Duration;

/// How a commit-time merge conflict should be handled. `Fail` is the only
/// variant the engine actually returns today — the deterministic
/// sort-then-fold merge never produces a conflict in practice, so this is
/// reserved for future conflict policies rather than load-bearing now.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    #[default]
    Fail,
}

/// The closed set of knobs an [`crate::engine::Engine`] accepts. Adding a
/// field here is a deliberate, reviewed change to the engine's contract —
/// this is not an extensible bag of options.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Hard ceiling on step count; `None` means unbounded.
    pub max_steps: Option<u64>,
    /// Upper bound on concurrently-dispatched node executions per step.
    pub max_concurrent_nodes: usize,
    /// Frontier capacity (`Invariant 4: |frontier| <= queue_depth`).
    pub queue_depth: usize,
    /// How long `Frontier::enqueue` blocks under backpressure before
    /// failing. `None` means block indefinitely.
    pub backpressure_timeout: Option<Duration>,
    /// Per-node timeout applied when the node's own policy doesn't set one.
    pub default_node_timeout: Option<Duration>,
    /// Cancels the whole run once elapsed. `None` means unbounded.
    pub run_wall_clock_budget: Option<Duration>,
    /// Whether this run replays recorded I/O instead of making live calls.
    pub replay_mode: bool,
    /// Whether a replay hash mismatch is fatal (`true`) or tolerated by
    /// falling back to the live response (`false`).
    pub strict_replay: bool,
    pub conflict_policy: ConflictPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_steps: Some(10_000),
            max_concurrent_nodes: 8,
            queue_depth: 1_024,
            backpressure_timeout: Some(Duration::from_secs(30)),
            default_node_timeout: Some(Duration::from_secs(60)),
            run_wall_clock_budget: None,
            replay_mode: false,
            strict_replay: true,
            conflict_policy: ConflictPolicy::Fail,
        }
    }
}

impl EngineOptions {
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: Option<u64>) -> Self {
        self.max_steps = max_steps;
        self
    }

    #[must_use]
    pub fn with_max_concurrent_nodes(mut self, n: usize) -> Self {
        self.max_concurrent_nodes = n.max(1);
        self
    }

    #[must_use]
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    #[must_use]
    pub fn with_backpressure_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.backpressure_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_default_node_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_node_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_run_wall_clock_budget(mut self, budget: Option<Duration>) -> Self {
        self.run_wall_clock_budget = budget;
        self
    }

    #[must_use]
    pub fn replaying(mut self, strict: bool) -> Self {
        self.replay_mode = true;
        self.strict_replay = strict;
        self
    }
}
