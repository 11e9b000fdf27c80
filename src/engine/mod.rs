//! The step loop: dispatch, merge, route, commit.
//!
//! One **step** is one dispatch→merge→route→commit cycle. Dispatch runs a
//! step's ready work items concurrently; merge folds their deltas into the
//! state in a single deterministic order; route resolves each result's
//! successors; commit persists the new state and frontier atomically before
//! anything is enqueued for the next step. The merge/route/commit region is
//! always single-threaded, which is what lets the reducer stay lock-free.

pub mod options;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

pub use options::{ConflictPolicy, EngineOptions};

use crate::cancellation::CancellationToken;
use crate::errors::EngineError;
use crate::events::{Event, EngineMetrics, EventEmitter, MetricsSnapshot, NodeEvent, NodeOutcome, StepEvent};
use crate::graph::Graph;
use crate::io_rng::{RecordedIo, derive_run_seed};
use crate::node::Next;
use crate::order_key::{WorkItem, compute_order_key};
use crate::runtime::node_runtime::{self, DispatchOutcome};
use crate::state::ReducerFn;
use crate::store::{Checkpoint, Store, compute_idempotency_key};
use crate::types::NodeId;

/// Bundles the immutable collaborators an [`Engine`] was built with: the
/// compiled graph, the reducer, the durable store, and the event emitter.
pub struct Engine<S> {
    graph: Graph<S>,
    reducer: ReducerFn<S>,
    store: Arc<dyn Store<S>>,
    emitter: Arc<dyn EventEmitter>,
    options: EngineOptions,
    metrics: Arc<EngineMetrics>,
}

/// One resolved successor: the node to route to and its position among
/// the routing node's declared/returned successors (used for `order_key`).
struct Successor {
    node_id: NodeId,
    edge_index: usize,
}

impl<S> Engine<S>
where
    S: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    #[must_use]
    pub fn new(
        graph: Graph<S>,
        reducer: ReducerFn<S>,
        store: Arc<dyn Store<S>>,
        emitter: Arc<dyn EventEmitter>,
        options: EngineOptions,
    ) -> Self {
        Self {
            graph,
            reducer,
            store,
            emitter,
            options,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Evaluate `Start`'s outgoing edges against `state`, producing the
    /// first step's work items (`step_id = 1`).
    fn seed_frontier_items(&self, state: &S) -> Vec<WorkItem<S>> {
        self.graph
            .outgoing(&NodeId::Start)
            .iter()
            .enumerate()
            .filter(|(_, edge)| edge.holds(state))
            .map(|(edge_index, edge)| {
                WorkItem::new(1, edge.to.clone(), state.clone(), NodeId::Start, edge_index)
            })
            .collect()
    }

    /// Execute a run to completion, persisting checkpoints as it goes, until
    /// the frontier empties or a fatal error occurs.
    ///
    /// If `run_id` already has a committed checkpoint past the bootstrap
    /// one (e.g. a prior call stopped on `BackpressureTimeout` or was
    /// interrupted), this resumes from the latest committed step instead of
    /// reseeding from `initial_state` — `initial_state` is only consulted
    /// for a run's first call. Resuming this way never re-runs an
    /// already-committed step, so a recordable node's real side effect
    /// fires at most once per run.
    #[instrument(skip(self, initial_state), fields(run_id))]
    pub async fn run(&self, run_id: &str, initial_state: S) -> Result<S, EngineError> {
        let run_id = run_id.to_string();
        let run_seed = derive_run_seed(&run_id);

        if let Some(latest) = self.store.latest_checkpoint(&run_id).await?
            && latest.step_id > 0
        {
            let frontier = crate::frontier::Frontier::new(self.options.queue_depth);
            let cancel = CancellationToken::new();
            for item in latest.frontier {
                frontier
                    .enqueue(item, &cancel, self.options.backpressure_timeout)
                    .await?;
            }
            return self
                .drive(
                    &run_id,
                    latest.rng_seed,
                    latest.state,
                    frontier,
                    latest.step_id + 1,
                    &cancel,
                    None,
                )
                .await;
        }

        let start_items = self.seed_frontier_items(&initial_state);

        let bootstrap_key =
            compute_idempotency_key(&run_id, 0, &initial_state, &start_items);
        let bootstrap = Checkpoint {
            run_id: run_id.clone(),
            step_id: 0,
            state: initial_state.clone(),
            frontier: start_items.clone(),
            rng_seed: run_seed,
            recorded_ios: Vec::new(),
            idempotency_key: bootstrap_key,
            timestamp: Utc::now(),
            label: Some("bootstrap".to_string()),
        };
        match self.store.save_checkpoint(bootstrap).await {
            Ok(()) | Err(crate::errors::StoreError::IdempotencyConflict { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let frontier = crate::frontier::Frontier::new(self.options.queue_depth);
        let cancel = CancellationToken::new();
        for item in start_items {
            frontier
                .enqueue(item, &cancel, self.options.backpressure_timeout)
                .await?;
        }

        self.drive(&run_id, run_seed, initial_state, frontier, 1, &cancel, None)
            .await
    }

    /// Re-execute a previously recorded run from its bootstrap checkpoint,
    /// serving each step's external calls from that step's persisted
    /// `recorded_ios` instead of invoking them live.
    #[instrument(skip(self), fields(run_id))]
    pub async fn replay(&self, run_id: &str) -> Result<S, EngineError> {
        let run_id = run_id.to_string();
        let bootstrap = self
            .store
            .load_checkpoint(&run_id, 0)
            .await?
            .ok_or_else(|| {
                EngineError::Store(crate::errors::StoreError::NotFound {
                    run_id: run_id.clone(),
                    step_id: 0,
                })
            })?;

        let latest = self
            .store
            .latest_checkpoint(&run_id)
            .await?
            .map(|cp| cp.step_id)
            .unwrap_or(0);
        let mut recorded_by_step = std::collections::HashMap::new();
        for step in 1..=latest {
            if let Some(cp) = self.store.load_checkpoint(&run_id, step).await? {
                recorded_by_step.insert(step, cp.recorded_ios);
            }
        }

        let frontier = crate::frontier::Frontier::new(self.options.queue_depth);
        let cancel = CancellationToken::new();
        for item in bootstrap.frontier {
            frontier
                .enqueue(item, &cancel, self.options.backpressure_timeout)
                .await?;
        }

        self.drive(
            &run_id,
            bootstrap.rng_seed,
            bootstrap.state,
            frontier,
            1,
            &cancel,
            Some(recorded_by_step),
        )
        .await
    }

    /// The shared step loop driving both [`Engine::run`] and [`Engine::replay`].
    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        run_id: &str,
        run_seed: i64,
        mut state: S,
        frontier: crate::frontier::Frontier<S>,
        mut current_step: u64,
        cancel: &CancellationToken,
        mut replay_recorded_ios: Option<std::collections::HashMap<u64, Vec<RecordedIo>>>,
    ) -> Result<S, EngineError> {
        let replay_mode = replay_recorded_ios.is_some();
        let run_deadline = self
            .options
            .run_wall_clock_budget
            .map(|budget| Instant::now() + budget);

        loop {
            if frontier.is_empty() {
                return Ok(state);
            }
            if let Some(max) = self.options.max_steps
                && current_step > max
            {
                return Err(EngineError::MaxStepsExceeded { max });
            }
            if let Some(deadline) = run_deadline
                && Instant::now() >= deadline
            {
                cancel.cancel();
                return Err(EngineError::Cancelled);
            }

            let batch = frontier.drain_step(current_step);
            if batch.is_empty() {
                current_step += 1;
                continue;
            }

            let recorded_for_step: Vec<RecordedIo> = replay_recorded_ios
                .as_mut()
                .and_then(|m| m.remove(&current_step))
                .unwrap_or_default();

            let outcomes = self
                .dispatch_batch(run_id, run_seed, batch, cancel, replay_mode, &recorded_for_step)
                .await;

            let mut succeeded = Vec::with_capacity(outcomes.len());
            for outcome in outcomes {
                match outcome {
                    Ok(o) => succeeded.push(o),
                    Err(e) => {
                        cancel.cancel();
                        return Err(e);
                    }
                }
            }

            // Merge: sort by ascending order_key, then fold deltas in that order.
            succeeded.sort_by(|a, b| a.item.order_key.cmp(&b.item.order_key));

            let mut ran_nodes = Vec::with_capacity(succeeded.len());
            let mut step_recorded_ios = Vec::new();
            let mut successors: Vec<WorkItem<S>> = Vec::new();

            for outcome in &succeeded {
                ran_nodes.push(outcome.item.node_id.clone());
                step_recorded_ios.extend(outcome.recorded.iter().cloned());
                state = (self.reducer)(state, outcome.result.delta.clone());

                let resolved = self.resolve_route(&outcome.item.node_id, &outcome.result.route, &state)?;
                for successor in resolved {
                    // Routing to `End` terminates this branch; there is no
                    // node registered under it to dispatch next.
                    if successor.node_id.is_end() {
                        continue;
                    }
                    let order_key = compute_order_key(&outcome.item.node_id, successor.edge_index);
                    successors.push(WorkItem {
                        step_id: current_step + 1,
                        order_key,
                        node_id: successor.node_id,
                        state: state.clone(),
                        attempt: 0,
                        parent_node_id: outcome.item.node_id.clone(),
                        edge_index: successor.edge_index,
                    });
                }

                let node_outcome = match &outcome.result.error {
                    Some(kind) => NodeOutcome::SucceededWithWarning {
                        error: format!("{kind:?}"),
                    },
                    None => NodeOutcome::Succeeded,
                };
                self.emitter
                    .emit(Event::Node(NodeEvent {
                        run_id: run_id.to_string(),
                        step_id: current_step,
                        node_id: outcome.item.node_id.clone(),
                        attempt: outcome.item.attempt,
                        outcome: node_outcome,
                        timestamp: Utc::now(),
                    }))
                    .ok();
            }
            successors.sort_by(|a, b| a.order_key.cmp(&b.order_key));

            // Checkpointed under the step that just ran, not the next one:
            // this is what lets `replay()` key a step's `recorded_ios` by
            // the same `current_step` the driving loop looks them up under.
            let idempotency_key =
                compute_idempotency_key(run_id, current_step, &state, &successors);
            let checkpoint = Checkpoint {
                run_id: run_id.to_string(),
                step_id: current_step,
                state: state.clone(),
                frontier: successors.clone(),
                rng_seed: run_seed,
                recorded_ios: step_recorded_ios,
                idempotency_key: idempotency_key.clone(),
                timestamp: Utc::now(),
                label: None,
            };

            if !replay_mode {
                match self.store.save_checkpoint(checkpoint).await {
                    Ok(()) => {}
                    Err(crate::errors::StoreError::IdempotencyConflict { .. }) => {
                        // Someone already committed this exact step (a retried
                        // supervisor re-drive); recover by trusting the stored
                        // successors/state over our freshly-recomputed copy.
                        if let Some(existing) =
                            self.store.load_checkpoint(run_id, current_step).await?
                        {
                            state = existing.state;
                            successors = existing.frontier;
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            self.emitter
                .emit(Event::Step(StepEvent {
                    run_id: run_id.to_string(),
                    step_id: current_step,
                    ran_nodes,
                    state_version: current_step,
                    committed: !replay_mode,
                    timestamp: Utc::now(),
                }))
                .ok();

            for item in successors {
                if let Err(e) = frontier
                    .enqueue(item, cancel, self.options.backpressure_timeout)
                    .await
                {
                    if matches!(e, crate::errors::FrontierError::BackpressureTimeout) {
                        self.metrics.record_backpressure_event();
                    }
                    return Err(e.into());
                }
            }
            self.metrics.set_queue_depth(frontier.len() as i64);

            current_step += 1;
        }
    }

    async fn dispatch_batch(
        &self,
        run_id: &str,
        run_seed: i64,
        batch: Vec<WorkItem<S>>,
        cancel: &CancellationToken,
        replay_mode: bool,
        recorded_ios: &[RecordedIo],
    ) -> Vec<Result<DispatchOutcome<S>, EngineError>> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.options.max_concurrent_nodes));
        let futures = batch.into_iter().map(|item| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                self.metrics
                    .set_in_flight_workers(i64::try_from(semaphore.available_permits()).unwrap_or(0));
                let Some(node) = self.graph.node(&item.node_id) else {
                    // Cancel siblings immediately: waiting for the caller to
                    // see this `Err` after `join_all` resolves would let a
                    // long-running sibling keep going for no reason.
                    cancel.cancel();
                    return Err(EngineError::NodeNotFound(item.node_id.clone()));
                };
                let outcome = node_runtime::dispatch_one(
                    node,
                    node.policy(),
                    run_id,
                    run_seed,
                    item,
                    Arc::clone(&self.emitter),
                    replay_mode,
                    self.options.strict_replay,
                    recorded_ios,
                    cancel,
                    self.options.default_node_timeout,
                )
                .await;
                if outcome.is_err() {
                    cancel.cancel();
                }
                outcome
            }
        });
        join_all(futures).await
    }

    /// Resolve a node's routing outcome into its successors, per §4.7 step 6:
    /// an explicit `route` overrides edge evaluation; `None` falls back to
    /// the node's declared outgoing edges in order.
    fn resolve_route(
        &self,
        node_id: &NodeId,
        route: &Option<Next>,
        state: &S,
    ) -> Result<Vec<Successor>, EngineError> {
        match route {
            Some(Next::Stop) => Ok(Vec::new()),
            Some(Next::Goto(to)) => Ok(vec![Successor {
                node_id: to.clone(),
                edge_index: 0,
            }]),
            Some(Next::Many(ids)) => {
                if ids.is_empty() {
                    return Err(EngineError::NoProgress {
                        node_id: node_id.clone(),
                    });
                }
                Ok(ids
                    .iter()
                    .enumerate()
                    .map(|(edge_index, id)| Successor {
                        node_id: id.clone(),
                        edge_index,
                    })
                    .collect())
            }
            None => {
                let edges = self.graph.outgoing(node_id);
                let matched: Vec<Successor> = edges
                    .iter()
                    .enumerate()
                    .filter(|(_, edge)| edge.holds(state))
                    .map(|(edge_index, edge)| Successor {
                        node_id: edge.to.clone(),
                        edge_index,
                    })
                    .collect();
                if matched.is_empty() {
                    return Err(EngineError::NoProgress {
                        node_id: node_id.clone(),
                    });
                }
                Ok(matched)
            }
        }
    }
}

/// Upper bound a node may sleep between attempts before the run's overall
/// wall-clock budget, if any, would have expired anyway. Exposed for node
/// policies that want to cap their own backoff relative to the run budget.
#[must_use]
pub fn clamp_to_budget(requested: Duration, remaining_budget: Option<Duration>) -> Duration {
    match remaining_budget {
        Some(remaining) => requested.min(remaining),
        None => requested,
    }
}
