//! Property tests for the invariants a deterministic, replayable engine must
//! hold regardless of which specific graph or state shape is driving it.

use proptest::prelude::*;

use weavestep::io_rng::{RngHandle, derive_run_seed};
use weavestep::order_key::compute_order_key;
use weavestep::store::compute_idempotency_key;
use weavestep::types::NodeId;

fn node_id_strategy() -> impl Strategy<Value = NodeId> {
    "[a-z]{1,12}".prop_map(NodeId::Custom)
}

proptest! {
    /// Order keys depend only on `(parent, edge_index)` — never on call
    /// order, wall-clock time, or anything else incidental.
    #[test]
    fn order_key_is_a_pure_function_of_parent_and_edge_index(
        parent in node_id_strategy(),
        edge_index in 0usize..64,
    ) {
        let a = compute_order_key(&parent, edge_index);
        let b = compute_order_key(&parent, edge_index);
        prop_assert_eq!(a, b);
    }

    /// Distinct `(parent, edge_index)` pairs essentially never collide: the
    /// order key is a 64-bit truncation of SHA-256, so for the tiny inputs a
    /// real graph produces, a match should only ever happen for equal inputs.
    #[test]
    fn order_key_distinguishes_different_edges(
        parent_a in node_id_strategy(),
        parent_b in node_id_strategy(),
        edge_a in 0usize..8,
        edge_b in 0usize..8,
    ) {
        prop_assume!(parent_a != parent_b || edge_a != edge_b);
        let key_a = compute_order_key(&parent_a, edge_a);
        let key_b = compute_order_key(&parent_b, edge_b);
        prop_assert_ne!(key_a, key_b);
    }

    /// `NodeId::encode`/`decode` round-trips for every custom id a builder
    /// could register.
    #[test]
    fn node_id_round_trips_through_encode_decode(name in "[a-zA-Z0-9_-]{1,32}") {
        let id = NodeId::Custom(name);
        prop_assert_eq!(NodeId::decode(&id.encode()), id);
    }

    /// A run's seed is a deterministic function of its `run_id` alone, and
    /// distinct run ids get distinct seeds for any pair drawn from a
    /// reasonably sized alphabet (collisions are possible in principle, as
    /// with any hash, but not for the short strings this test samples).
    #[test]
    fn run_seed_is_deterministic_and_varies_with_run_id(
        a in "[a-z0-9-]{1,16}",
        b in "[a-z0-9-]{1,16}",
    ) {
        prop_assume!(a != b);
        prop_assert_eq!(derive_run_seed(&a), derive_run_seed(&a));
        prop_assert_ne!(derive_run_seed(&a), derive_run_seed(&b));
    }

    /// The idempotency key is a pure function of `(run_id, step_id, state,
    /// frontier)` — recomputing it from identical inputs always agrees, and
    /// perturbing any one input changes it.
    #[test]
    fn idempotency_key_is_pure_and_sensitive_to_every_input(
        run_id in "[a-z0-9-]{1,16}",
        step_id in 0u64..1000,
        state in any::<i64>(),
    ) {
        let frontier = vec![];
        let key = compute_idempotency_key(&run_id, step_id, &state, &frontier);
        let again = compute_idempotency_key(&run_id, step_id, &state, &frontier);
        prop_assert_eq!(&key, &again);

        let bumped_step = compute_idempotency_key(&run_id, step_id + 1, &state, &frontier);
        prop_assert_ne!(&key, &bumped_step);

        let bumped_state = compute_idempotency_key(&run_id, step_id, &state.wrapping_add(1), &frontier);
        prop_assert_ne!(key, bumped_state);
    }

    /// Two RNG handles derived from the same `(seed, node, attempt)` always
    /// draw the same sequence; changing the attempt always diverges it
    /// within the first handful of draws.
    #[test]
    fn rng_handle_is_deterministic_per_node_and_attempt(
        seed in any::<i64>(),
        node_name in "[a-z]{1,10}",
        attempt in 0u32..8,
    ) {
        let node = NodeId::Custom(node_name);
        let mut a = RngHandle::derive(seed, &node, attempt);
        let mut b = RngHandle::derive(seed, &node, attempt);
        let draws_a: Vec<u64> = (0..4).map(|_| a.next_u64()).collect();
        let draws_b: Vec<u64> = (0..4).map(|_| b.next_u64()).collect();
        prop_assert_eq!(draws_a, draws_b);

        let mut c = RngHandle::derive(seed, &node, attempt + 1);
        let draws_c: Vec<u64> = (0..4).map(|_| c.next_u64()).collect();
        prop_assert_ne!(draws_a, draws_c);
    }
}
