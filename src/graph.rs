//! Graph assembly: nodes, edges, and compilation into an executable [`Graph`].
//!
//! Mirrors the fluent `GraphBuilder` idiom this crate's scheduler builds on,
//! generalized from that version's string-returning routing predicate
//! (`Fn(Snapshot) -> Vec<String>`) to a pure boolean gate per edge
//! (`Predicate<S> = Fn(&S) -> bool`) — the engine decides what to do with a
//! `true` edge (follow it) independently of how many other edges also
//! evaluate `true`, rather than asking the predicate to name its own targets.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::errors::EngineError;
use crate::node::Node;
use crate::types::NodeId;

/// A pure, side-effect-free routing gate evaluated against the current state.
pub type Predicate<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// A directed connection between two nodes, optionally gated.
///
/// `when: None` means unconditional. An edge only matters for implicit
/// routing — a node that returns an explicit [`crate::node::Next`] bypasses
/// edge evaluation entirely.
pub struct Edge<S> {
    pub from: NodeId,
    pub to: NodeId,
    pub when: Option<Predicate<S>>,
}

impl<S> Edge<S> {
    #[must_use]
    pub fn holds(&self, state: &S) -> bool {
        match &self.when {
            Some(pred) => pred(state),
            None => true,
        }
    }
}

struct NodeEntry<S> {
    node: Arc<dyn Node<S> + Send + Sync>,
}

/// Builds a [`Graph`] by fluently registering nodes and edges.
pub struct GraphBuilder<S> {
    nodes: FxHashMap<NodeId, NodeEntry<S>>,
    edges: FxHashMap<NodeId, Vec<Edge<S>>>,
    start_edges: Vec<Edge<S>>,
}

impl<S> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self {
            nodes: FxHashMap::default(),
            edges: FxHashMap::default(),
            start_edges: Vec::new(),
        }
    }
}

impl<S: 'static> GraphBuilder<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node under `node_id`. `node_id` must not be `Start`/`End`
    /// — those are reserved virtual endpoints.
    #[must_use]
    pub fn add(mut self, node_id: impl Into<String>, node: impl Node<S> + 'static) -> Self {
        let id = NodeId::Custom(node_id.into());
        self.nodes.insert(
            id,
            NodeEntry {
                node: Arc::new(node),
            },
        );
        self
    }

    /// Declare an edge `from -> to`, evaluated only when no explicit
    /// `Next` was returned by `from`'s node. `when: None` is unconditional.
    #[must_use]
    pub fn connect(mut self, from: NodeId, to: NodeId, when: Option<Predicate<S>>) -> Self {
        let edge = Edge {
            from: from.clone(),
            to,
            when,
        };
        if from.is_start() {
            self.start_edges.push(edge);
        } else {
            self.edges.entry(from).or_default().push(edge);
        }
        self
    }

    /// Shorthand for an unconditional edge.
    #[must_use]
    pub fn connect_always(self, from: NodeId, to: NodeId) -> Self {
        self.connect(from, to, None)
    }

    /// Declares `node_id` as an entry point: `Start -> node_id`, unconditional.
    #[must_use]
    pub fn start_at(self, node_id: NodeId) -> Self {
        self.connect_always(NodeId::Start, node_id)
    }

    /// Validate and compile into an executable [`Graph`].
    pub fn build(self) -> Result<Graph<S>, EngineError> {
        if self.start_edges.is_empty() {
            return Err(EngineError::NoProgress {
                node_id: NodeId::Start,
            });
        }
        for edges in self.edges.values().chain(std::iter::once(&self.start_edges)) {
            for edge in edges {
                if edge.to.is_custom() && !self.nodes.contains_key(&edge.to) {
                    return Err(EngineError::NodeNotFound(edge.to.clone()));
                }
            }
        }
        Ok(Graph {
            nodes: self.nodes,
            edges: self.edges,
            start_edges: self.start_edges,
        })
    }
}

/// A compiled, immutable workflow graph, ready for [`crate::engine::Engine`].
pub struct Graph<S> {
    nodes: FxHashMap<NodeId, NodeEntry<S>>,
    edges: FxHashMap<NodeId, Vec<Edge<S>>>,
    start_edges: Vec<Edge<S>>,
}

impl<S> Graph<S> {
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&(dyn Node<S> + Send + Sync)> {
        self.nodes.get(id).map(|entry| entry.node.as_ref())
    }

    /// Outgoing edges for `from`, in declaration order. `Start`'s edges are
    /// tracked separately since `Start` is never a registered node.
    #[must_use]
    pub fn outgoing(&self, from: &NodeId) -> &[Edge<S>] {
        if from.is_start() {
            &self.start_edges
        } else {
            self.edges.get(from).map_or(&[], Vec::as_slice)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeContext, NodeResult, Next};
    use async_trait::async_trait;

    struct NoOp;

    #[async_trait]
    impl Node<i64> for NoOp {
        async fn run(
            &self,
            _ctx: NodeContext,
            state: i64,
        ) -> Result<NodeResult<i64>, crate::errors::NodeError> {
            Ok(NodeResult::new(state, Next::Stop))
        }
    }

    #[test]
    fn build_fails_without_a_start_edge() {
        let result = GraphBuilder::<i64>::new().add("a", NoOp).build();
        assert!(result.is_err());
    }

    #[test]
    fn build_fails_on_dangling_edge_target() {
        let result = GraphBuilder::<i64>::new()
            .start_at(NodeId::Custom("missing".into()))
            .build();
        assert!(result.is_err());
    }
}
