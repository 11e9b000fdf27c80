//! # weavestep: a deterministic, checkpointed workflow execution engine
//!
//! `weavestep` runs a workflow graph step by step — dispatch, merge, route,
//! commit — persisting a checkpoint after every step so a run can resume
//! exactly where it left off, or replay byte-for-byte against its recorded
//! external I/O and seeded randomness.
//!
//! ## Core concepts
//!
//! - **State**: a single opaque, caller-owned value `S`, folded across steps
//!   by a pure [`state::Reducer`]
//! - **Graph**: nodes and predicated edges, compiled by [`graph::GraphBuilder`]
//! - **Node**: the unit of computation — see [`node::Node`]
//! - **Frontier**: the bounded, deterministically-ordered queue of pending
//!   work — see [`frontier::Frontier`]
//! - **Engine**: the step loop driving a run to completion — see
//!   [`engine::Engine`]
//! - **Store**: durable, append-only checkpoints — see [`store::Store`]
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use weavestep::engine::{Engine, EngineOptions};
//! use weavestep::errors::NodeError;
//! use weavestep::events::NullEmitter;
//! use weavestep::graph::GraphBuilder;
//! use weavestep::node::{Node, NodeContext, NodePolicy, NodeResult};
//! use weavestep::store::memory::InMemoryStore;
//! use weavestep::types::NodeId;
//!
//! struct Increment;
//!
//! #[async_trait]
//! impl Node<i64> for Increment {
//!     async fn run(&self, _ctx: NodeContext, state: i64) -> Result<NodeResult<i64>, NodeError> {
//!         Ok(NodeResult::via_edges(state + 1))
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = GraphBuilder::<i64>::new()
//!     .add("increment", Increment)
//!     .start_at(NodeId::Custom("increment".into()))
//!     .connect_always(NodeId::Custom("increment".into()), NodeId::End)
//!     .build()?;
//!
//! let engine = Engine::new(
//!     graph,
//!     Arc::new(|_current: i64, delta: i64| delta),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(NullEmitter),
//!     EngineOptions::default(),
//! );
//!
//! let result = engine.run("run-1", 0i64).await?;
//! assert_eq!(result, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`types`] — node identifiers
//! - [`state`] — the reducer contract and versioned state
//! - [`order_key`] — deterministic sibling ordering and work items
//! - [`errors`] — the closed error vocabulary
//! - [`io_rng`] — seeded RNG derivation and recorded I/O for replay
//! - [`events`] — structured events, sinks, and metrics
//! - [`node`] — the `Node` trait and execution policy
//! - [`cancellation`] — hierarchical cancellation tokens
//! - [`frontier`] — the bounded, ordered scheduling queue
//! - [`graph`] — graph assembly and compilation
//! - [`store`] — durable checkpointing
//! - [`runtime`] — per-node dispatch: timeout, retry, backoff
//! - [`engine`] — the step loop
//! - [`telemetry`] — tracing setup and event formatting
//! - [`config`] — runtime configuration

pub mod cancellation;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod frontier;
pub mod graph;
pub mod io_rng;
pub mod node;
pub mod order_key;
pub mod runtime;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod types;
