//! Observability: structured events, the emitter contract, and sinks.
//!
//! Events are best-effort and non-blocking from the engine's point of view —
//! an emitter failure (a lagging subscriber, a closed channel) is logged and
//! swallowed, never propagated into the run. The [`EventBus`] fans events
//! out to an arbitrary number of [`EventSink`]s over a broadcast channel, so
//! a slow sink cannot stall the engine or starve its siblings.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

use crate::types::NodeId;

/// A step boundary event: emitted once per completed dispatch-merge-route-commit cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepEvent {
    pub run_id: String,
    pub step_id: u64,
    pub ran_nodes: Vec<NodeId>,
    pub state_version: u64,
    pub committed: bool,
    pub timestamp: DateTime<Utc>,
}

/// A single node execution's outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeEvent {
    pub run_id: String,
    pub step_id: u64,
    pub node_id: NodeId,
    pub attempt: u32,
    pub outcome: NodeOutcome,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum NodeOutcome {
    Succeeded,
    /// Ran to completion and produced a delta, but flagged a non-fatal
    /// [`crate::errors::ErrorKind`] via `NodeResult::with_error`. The delta
    /// is still merged and routing still proceeds as normal.
    SucceededWithWarning { error: String },
    Retrying { error: String },
    Failed { error: String },
    TimedOut,
    Cancelled,
}

/// A free-form diagnostic: used for warnings that don't fit the step/node
/// shape, such as a sink lagging behind the broadcast channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub scope: String,
    pub message: String,
    pub detail: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// The full set of events the engine publishes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Event {
    Step(StepEvent),
    Node(NodeEvent),
    Diagnostic(DiagnosticEvent),
}

impl Event {
    #[must_use]
    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic(DiagnosticEvent {
            scope: scope.into(),
            message: message.into(),
            detail: None,
            timestamp: Utc::now(),
        })
    }

    /// Render as a `serde_json::Value`, for sinks that want structured output.
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Error, Debug, Clone)]
pub enum EmitterError {
    #[error("event channel closed")]
    Closed,
    #[error("subscriber lagged, {0} events dropped")]
    Lagged(usize),
    #[error("{0}")]
    Other(String),
}

/// Something that can receive structured engine events.
///
/// Implementations must be cheap and non-blocking: they're called from the
/// engine's merge region on the hot path, not from a background task.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: Event) -> Result<(), EmitterError>;
}

const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Broadcasts published events to every live subscriber.
///
/// Built directly on `tokio::sync::broadcast`: publishing never blocks, and
/// a subscriber that falls behind sees `EmitterError::Lagged` on its next
/// receive rather than stalling the publisher.
pub struct EventHub {
    sender: broadcast::Sender<Event>,
    dropped_events: Arc<std::sync::atomic::AtomicU64>,
}

impl EventHub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            dropped_events: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // A publish error just means there are currently no subscribers;
        // that's a normal and expected state, not a failure.
        let _ = self.sender.send(event);
    }

    pub fn record_lag(&self, n: u64) {
        self.dropped_events
            .fetch_add(n, std::sync::atomic::Ordering::Relaxed);
        warn!(dropped = n, "event subscriber lagged");
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

/// Adapts an [`EventHub`] to the [`EventEmitter`] trait.
pub struct HubEmitter {
    hub: Arc<EventHub>,
}

impl HubEmitter {
    #[must_use]
    pub fn new(hub: Arc<EventHub>) -> Self {
        Self { hub }
    }
}

impl EventEmitter for HubEmitter {
    fn emit(&self, event: Event) -> Result<(), EmitterError> {
        self.hub.publish(event);
        Ok(())
    }
}

/// A destination for events, driven by a spawned task subscribed to the hub.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn handle(&self, event: Event);
}

/// Writes each event as a single line of JSON to stdout.
pub struct StdOutSink;

#[async_trait::async_trait]
impl EventSink for StdOutSink {
    async fn handle(&self, event: Event) {
        println!("{}", event.to_json_value());
    }
}

/// Buffers every event it sees in memory, for test assertions.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

#[async_trait::async_trait]
impl EventSink for MemorySink {
    async fn handle(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// Forwards events onto a `flume` channel, for bridging to an external
/// consumer (an SSE handler, a websocket loop) without coupling that
/// consumer to `tokio::sync::broadcast`.
pub struct ChannelSink {
    tx: flume::Sender<Event>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, flume::Receiver<Event>) {
        let (tx, rx) = flume::bounded(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl EventSink for ChannelSink {
    async fn handle(&self, event: Event) {
        // Best-effort: a full or closed channel just means the external
        // consumer has gone away or fallen behind; the engine doesn't care.
        let _ = self.tx.try_send(event);
    }
}

/// Owns a set of sinks, each driven by its own spawned task subscribed to
/// an [`EventHub`]. Dropping the bus signals every sink task to shut down.
pub struct EventBus {
    hub: Arc<EventHub>,
    shutdown_txs: Vec<tokio::sync::oneshot::Sender<()>>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            hub: Arc::new(EventHub::new(capacity)),
            shutdown_txs: Vec::new(),
            handles: Vec::new(),
        }
    }

    #[must_use]
    pub fn hub(&self) -> Arc<EventHub> {
        Arc::clone(&self.hub)
    }

    #[must_use]
    pub fn emitter(&self) -> Arc<dyn EventEmitter> {
        Arc::new(HubEmitter::new(self.hub()))
    }

    /// Spawn a task that drives `sink` off the hub's broadcast stream until
    /// the bus shuts down.
    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        let mut rx = self.hub.subscribe();
        let hub = self.hub();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    received = rx.recv() => match received {
                        Ok(event) => sink.handle(event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => hub.record_lag(n),
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
        self.shutdown_txs.push(shutdown_tx);
        self.handles.push(handle);
    }

    pub async fn shutdown(mut self) {
        for tx in self.shutdown_txs.drain(..) {
            let _ = tx.send(());
        }
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        let mut bus = Self::new(DEFAULT_BUFFER_CAPACITY);
        bus.add_sink(Arc::new(StdOutSink));
        bus
    }
}

/// A no-op emitter for tests and contexts that don't need observability.
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _event: Event) -> Result<(), EmitterError> {
        Ok(())
    }
}

/// Atomic counters and gauges for a running engine, snapshot on demand.
///
/// No Prometheus exporter ships with this crate — that's an explicit
/// non-goal — but the counters themselves are cheap to maintain and useful
/// to tests and to any sink the caller wires up.
#[derive(Default)]
pub struct EngineMetrics {
    retries: std::sync::atomic::AtomicU64,
    backpressure_events: std::sync::atomic::AtomicU64,
    merge_conflicts: std::sync::atomic::AtomicU64,
    in_flight_workers: std::sync::atomic::AtomicI64,
    queue_depth: std::sync::atomic::AtomicI64,
    latencies: Mutex<Vec<Duration>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub retries: u64,
    pub backpressure_events: u64,
    pub merge_conflicts: u64,
    pub in_flight_workers: i64,
    pub queue_depth: i64,
    pub node_latency_samples: usize,
}

impl EngineMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_retry(&self) {
        self.retries
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn record_backpressure_event(&self) {
        self.backpressure_events
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn record_merge_conflict(&self) {
        self.merge_conflicts
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn set_in_flight_workers(&self, n: i64) {
        self.in_flight_workers
            .store(n, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, n: i64) {
        self.queue_depth
            .store(n, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn record_node_latency(&self, d: Duration) {
        self.latencies.lock().push(d);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        use std::sync::atomic::Ordering::Relaxed;
        MetricsSnapshot {
            retries: self.retries.load(Relaxed),
            backpressure_events: self.backpressure_events.load(Relaxed),
            merge_conflicts: self.merge_conflicts.load(Relaxed),
            in_flight_workers: self.in_flight_workers.load(Relaxed),
            queue_depth: self.queue_depth.load(Relaxed),
            node_latency_samples: self.latencies.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_collects_events_published_to_the_hub() {
        let mut bus = EventBus::new(16);
        let sink = Arc::new(MemorySink::new());
        bus.add_sink(sink.clone());
        let emitter = bus.emitter();

        emitter.emit(Event::diagnostic("test", "hello")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.shutdown().await;

        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn metrics_snapshot_reflects_recorded_values() {
        let metrics = EngineMetrics::new();
        metrics.record_retry();
        metrics.record_retry();
        metrics.record_backpressure_event();
        let snap = metrics.snapshot();
        assert_eq!(snap.retries, 2);
        assert_eq!(snap.backpressure_events, 1);
    }
}
