//! Workflow state folding.
//!
//! A workflow here carries a single opaque state value `S` owned by the
//! caller. Nodes don't mutate `S` directly — they return a *delta* (another
//! `S`) which the engine folds into the running state with the workflow's
//! [`Reducer`].

use std::sync::Arc;

/// Folds two state values — the state before a step and the aggregated
/// deltas produced by the nodes that ran during it — into the next state.
///
/// Must be pure and deterministic: given the same `(current, delta)` pair
/// it always produces the same result, with no hidden reliance on time,
/// randomness, or I/O. The step loop relies on this for replay equivalence.
pub trait Reducer<S>: Fn(S, S) -> S + Send + Sync {}
impl<S, F: Fn(S, S) -> S + Send + Sync> Reducer<S> for F {}

/// A boxed, cloneable handle to a workflow's reducer.
pub type ReducerFn<S> = Arc<dyn Fn(S, S) -> S + Send + Sync>;
