//! Node and reducer fixtures shared across the integration test scenarios.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use weavestep::errors::NodeError;
use weavestep::events::{Event, EmitterError, EventEmitter};
use weavestep::node::{Next, Node, NodeContext, NodePolicy, NodeResult};
use weavestep::state::ReducerFn;
use weavestep::types::NodeId;

/// Buffers every event published to it, for asserting on what the engine
/// actually emitted during a run.
#[derive(Default)]
pub struct RecordingEmitter {
    events: parking_lot::Mutex<Vec<Event>>,
}

impl RecordingEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, event: Event) -> Result<(), EmitterError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Sums deltas into the running total. Pairs with nodes that return an
/// increment rather than a full replacement value.
#[must_use]
pub fn sum_reducer() -> ReducerFn<i64> {
    Arc::new(|current, delta| current + delta)
}

/// Adds one to the counter and defers routing to the graph's declared edges.
pub struct Increment;

#[async_trait]
impl Node<i64> for Increment {
    async fn run(&self, _ctx: NodeContext, _state: i64) -> Result<NodeResult<i64>, NodeError> {
        Ok(NodeResult::via_edges(1))
    }
}

/// Like [`Increment`], but tracks how many times it was invoked — used to
/// assert that resuming a run doesn't re-execute an already-committed node.
#[derive(Default)]
pub struct CountingIncrement {
    pub calls: AtomicU32,
}

#[async_trait]
impl Node<i64> for CountingIncrement {
    async fn run(&self, _ctx: NodeContext, _state: i64) -> Result<NodeResult<i64>, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(NodeResult::via_edges(1))
    }
}

/// Succeeds and routes normally, but flags a non-fatal error alongside its
/// delta via [`NodeResult::with_error`].
pub struct WarnsButSucceeds;

#[async_trait]
impl Node<i64> for WarnsButSucceeds {
    async fn run(&self, _ctx: NodeContext, _state: i64) -> Result<NodeResult<i64>, NodeError> {
        Ok(NodeResult::via_edges(1).with_error(weavestep::errors::ErrorKind::NodeError))
    }
}

/// Scenario S2's state: an append-only record of which branch ran.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderState {
    pub order: Vec<String>,
}

/// Concatenates each branch's single-element delta onto the accumulated order.
#[must_use]
pub fn order_reducer() -> ReducerFn<OrderState> {
    Arc::new(|mut current, delta| {
        current.order.extend(delta.order);
        current
    })
}

/// Explicitly fans out to every node named in `targets`, in order —
/// `edge_index` for each is its position in this list (`Next::Many`).
pub struct FanOut {
    pub targets: Vec<&'static str>,
}

#[async_trait]
impl Node<OrderState> for FanOut {
    async fn run(&self, _ctx: NodeContext, _state: OrderState) -> Result<NodeResult<OrderState>, NodeError> {
        let ids = self
            .targets
            .iter()
            .map(|name| NodeId::Custom((*name).to_string()))
            .collect();
        Ok(NodeResult::new(OrderState::default(), Next::Many(ids)))
    }
}

/// Appends its own id to the order, as a delta (not the full accumulated list).
pub struct AppendId(pub &'static str);

#[async_trait]
impl Node<OrderState> for AppendId {
    async fn run(&self, _ctx: NodeContext, _state: OrderState) -> Result<NodeResult<OrderState>, NodeError> {
        Ok(NodeResult::via_edges(OrderState {
            order: vec![self.0.to_string()],
        }))
    }
}

/// Scenario S3's state: a bare counter driving a conditional loop.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LoopState {
    pub count: i64,
}

#[must_use]
pub fn loop_reducer() -> ReducerFn<LoopState> {
    Arc::new(|current, delta| LoopState {
        count: current.count + delta.count,
    })
}

/// Loops back to itself (`Goto("loop")`) while `count < target`, else stops.
pub struct LoopWhileBelow {
    pub target: i64,
}

#[async_trait]
impl Node<LoopState> for LoopWhileBelow {
    async fn run(&self, _ctx: NodeContext, state: LoopState) -> Result<NodeResult<LoopState>, NodeError> {
        let would_be = state.count + 1;
        let route = if would_be < self.target {
            Next::Goto(NodeId::Custom("loop".into()))
        } else {
            Next::Stop
        };
        Ok(NodeResult::new(LoopState { count: 1 }, route))
    }
}

/// Fails its first `fail_until` attempts, then succeeds. Tracks how many
/// times it was actually invoked, for asserting the retry count.
pub struct FlakyThenSucceed {
    pub fail_until: u32,
    pub calls: AtomicU32,
}

impl FlakyThenSucceed {
    #[must_use]
    pub fn new(fail_until: u32) -> Self {
        Self {
            fail_until,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Node<i64> for FlakyThenSucceed {
    async fn run(&self, ctx: NodeContext, _state: i64) -> Result<NodeResult<i64>, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if ctx.attempt < self.fail_until {
            return Err(NodeError::Failed {
                code: "flaky".into(),
                message: "not yet".into(),
            });
        }
        Ok(NodeResult::via_edges(1))
    }

    fn policy(&self) -> NodePolicy {
        NodePolicy::default()
            .with_max_attempts(3)
            .with_backoff_base(Duration::from_millis(5))
    }
}

/// A recordable node whose "live" answer differs between its original run
/// and a later replay, for exercising [`NodeContext::verify_or_tolerate`].
pub struct DriftingNode;

#[async_trait]
impl Node<i64> for DriftingNode {
    async fn run(&self, ctx: NodeContext, state: i64) -> Result<NodeResult<i64>, NodeError> {
        if !ctx.is_replaying() {
            let response = serde_json::json!({ "value": state + 1 });
            ctx.record(Value::Null, response, Duration::from_millis(1));
            return Ok(NodeResult::new(state + 1, Next::Stop));
        }
        // The outside world has since changed its answer.
        let live_response = serde_json::json!({ "value": state + 2 });
        let resolved = ctx.verify_or_tolerate(live_response)?;
        let value = resolved["value"].as_i64().expect("value field");
        Ok(NodeResult::new(value, Next::Stop))
    }

    fn policy(&self) -> NodePolicy {
        NodePolicy::default().recordable()
    }
}
