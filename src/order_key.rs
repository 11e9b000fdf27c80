//! Deterministic ordering for the scheduling frontier.
//!
//! The frontier must dispatch work items in a stable order that does not
//! depend on wall-clock arrival time, thread scheduling, or hash-map
//! iteration order — otherwise two runs over the same graph with the same
//! input could legitimately diverge, which would make replay meaningless.
//! An [`OrderKey`] gives every work item a position in that ordering,
//! derived only from information already fixed at graph-build time: the
//! parent node and the index of the edge that produced it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::NodeId;

/// A dense, deterministic sort key for frontier ordering.
///
/// Two work items with equal `(parent, edge_index)` always produce the
/// same key, on any machine, in any process. Collisions across distinct
/// `(parent, edge_index)` pairs are possible in principle (it's a 64-bit
/// truncation of a SHA-256 digest) but vanishingly unlikely for the
/// number of edges any real graph has; a tie is broken by falling back to
/// `(parent, edge_index)` lexicographic order, so correctness never rests
/// on the hash alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderKey(pub u64);

/// Derive the order key for an edge leaving `parent_node_id` at position
/// `edge_index` in that node's outgoing edge list.
#[must_use]
pub fn compute_order_key(parent_node_id: &NodeId, edge_index: usize) -> OrderKey {
    let mut hasher = Sha256::new();
    hasher.update(parent_node_id.as_key_bytes());
    hasher.update(b"\0");
    hasher.update(edge_index.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    OrderKey(u64::from_le_bytes(bytes))
}

/// A unit of dispatchable work: one node invocation, positioned in the
/// frontier by `order_key` and tagged with everything needed to locate it
/// again on replay or in a checkpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkItem<S> {
    pub step_id: u64,
    pub order_key: OrderKey,
    pub node_id: NodeId,
    pub state: S,
    pub attempt: u32,
    pub parent_node_id: NodeId,
    pub edge_index: usize,
}

impl<S> WorkItem<S> {
    #[must_use]
    pub fn new(
        step_id: u64,
        node_id: NodeId,
        state: S,
        parent_node_id: NodeId,
        edge_index: usize,
    ) -> Self {
        let order_key = compute_order_key(&parent_node_id, edge_index);
        Self {
            step_id,
            order_key,
            node_id,
            state,
            attempt: 0,
            parent_node_id,
            edge_index,
        }
    }

    /// The stable sort tuple used by the frontier's priority ordering:
    /// `(order_key, node_id)` — the node id is a tie-breaker for the
    /// astronomically unlikely case of an order-key collision.
    #[must_use]
    pub fn sort_key(&self) -> (OrderKey, String) {
        (self.order_key, self.node_id.encode())
    }
}
