//! Executes a single [`WorkItem`] through its node's timeout/retry/backoff
//! policy, recording and replaying external I/O along the way.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::instrument;

use crate::cancellation::CancellationToken;
use crate::errors::{EngineError, ErrorKind, NodeError};
use crate::events::EventEmitter;
use crate::io_rng::{RecordedIo, RngHandle, lookup_recorded_io};
use crate::node::{Node, NodeContext, NodePolicy, NodeResult};
use crate::order_key::WorkItem;

/// What running one work item (across however many attempts it took)
/// produced: the final `NodeResult`, the item updated with its final
/// attempt number, and any I/O recorded along the way.
pub struct DispatchOutcome<S> {
    pub item: WorkItem<S>,
    pub result: NodeResult<S>,
    pub recorded: Vec<RecordedIo>,
}

fn node_error_to_engine(err: NodeError, node_id: &crate::types::NodeId, attempt: u32) -> EngineError {
    EngineError::NodeError {
        node_id: node_id.clone(),
        attempt,
        code: err.code(),
        message: err.to_string(),
        cause: None,
    }
}

/// Run `node` for `item`, retrying per `policy` until it succeeds, is
/// cancelled, times out fatally, or exhausts its attempt budget.
#[instrument(skip(node, policy, emitter, recorded_ios, cancel), fields(node_id = %item.node_id, step_id = item.step_id))]
#[allow(clippy::too_many_arguments)]
pub async fn dispatch_one<S>(
    node: &(dyn Node<S> + Send + Sync),
    policy: NodePolicy,
    run_id: &str,
    run_seed: i64,
    mut item: WorkItem<S>,
    emitter: Arc<dyn EventEmitter>,
    replay_mode: bool,
    strict_replay: bool,
    recorded_ios: &[RecordedIo],
    cancel: &CancellationToken,
    default_timeout: Option<std::time::Duration>,
) -> Result<DispatchOutcome<S>, EngineError>
where
    S: Clone + Send + Sync + 'static,
{
    let mut attempt = item.attempt;
    let recorder: Arc<Mutex<Vec<RecordedIo>>> = Arc::new(Mutex::new(Vec::new()));

    loop {
        let rng = RngHandle::derive(run_seed, &item.node_id, attempt);
        let recorded = lookup_recorded_io(recorded_ios, &item.node_id, attempt)
            .cloned()
            .map(Arc::new);
        let ctx = NodeContext::new(
            run_id.to_string(),
            item.node_id.clone(),
            item.step_id,
            attempt,
            rng,
            emitter.clone(),
            replay_mode,
            strict_replay,
            recorded.clone(),
            recorder.clone(),
        );

        let timeout = policy.timeout.or(default_timeout);
        let state_for_node = item.state.clone();
        let run_fut = node.run(ctx, state_for_node);

        let outcome: Result<NodeResult<S>, EngineError> = match timeout {
            Some(d) if !d.is_zero() => {
                tokio::select! {
                    res = run_fut => res.map_err(|e| node_error_to_engine(e, &item.node_id, attempt)),
                    () = tokio::time::sleep(d) => Err(EngineError::NodeTimeout { node_id: item.node_id.clone(), attempt }),
                    () = cancel.cancelled() => Err(EngineError::Cancelled),
                }
            }
            _ => {
                tokio::select! {
                    res = run_fut => res.map_err(|e| node_error_to_engine(e, &item.node_id, attempt)),
                    () = cancel.cancelled() => Err(EngineError::Cancelled),
                }
            }
        };

        // Replay-hash verification happens node-side, via `ctx.recorded_io()`
        // and `io_rng::verify_replay_hash` — the runtime doesn't interpose
        // on the node's own request/response shape.
        match outcome {
            Ok(result) => {
                item.attempt = attempt;
                return Ok(DispatchOutcome {
                    item,
                    result,
                    recorded: recorder.lock().clone(),
                });
            }
            Err(engine_err) => {
                let kind = engine_err.kind();
                if matches!(kind, ErrorKind::Cancelled) {
                    return Err(engine_err);
                }
                let retryable = (policy.retryable)(&kind);
                if retryable && attempt + 1 < policy.max_attempts {
                    if !replay_mode {
                        let mut backoff_rng = RngHandle::derive(run_seed, &item.node_id, attempt);
                        let delay = backoff_rng.backoff(policy.backoff_base, attempt);
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = cancel.cancelled() => return Err(EngineError::Cancelled),
                        }
                    }
                    attempt += 1;
                    continue;
                } else if retryable {
                    return Err(EngineError::MaxAttemptsExceeded {
                        node_id: item.node_id.clone(),
                        max_attempts: policy.max_attempts,
                        cause: Box::new(engine_err),
                    });
                } else {
                    return Err(engine_err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::NodeError;
    use crate::events::NullEmitter;
    use crate::node::Next;
    use crate::types::NodeId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyNode {
        fail_until: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Node<i64> for FlakyNode {
        async fn run(&self, ctx: NodeContext, state: i64) -> Result<NodeResult<i64>, NodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ctx.attempt < self.fail_until {
                return Err(NodeError::Failed {
                    code: "flaky".into(),
                    message: "not yet".into(),
                });
            }
            Ok(NodeResult::new(state + 1, Next::Stop))
        }

        fn policy(&self) -> NodePolicy {
            NodePolicy::default()
                .with_max_attempts(5)
                .with_backoff_base(std::time::Duration::from_millis(1))
        }
    }

    #[tokio::test]
    async fn retries_until_success_within_attempt_budget() {
        let node = FlakyNode {
            fail_until: 2,
            calls: AtomicU32::new(0),
        };
        let item = WorkItem::new(1, NodeId::Custom("flaky".into()), 0i64, NodeId::Start, 0);
        let cancel = CancellationToken::new();
        let outcome = dispatch_one(
            &node,
            node.policy(),
            "run-1",
            42,
            item,
            Arc::new(NullEmitter),
            false,
            false,
            &[],
            &cancel,
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome.result.delta, 1);
        assert_eq!(node.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausting_attempts_surfaces_max_attempts_exceeded() {
        let node = FlakyNode {
            fail_until: 99,
            calls: AtomicU32::new(0),
        };
        let item = WorkItem::new(1, NodeId::Custom("flaky".into()), 0i64, NodeId::Start, 0);
        let cancel = CancellationToken::new();
        let result = dispatch_one(
            &node,
            node.policy(),
            "run-1",
            42,
            item,
            Arc::new(NullEmitter),
            false,
            false,
            &[],
            &cancel,
            None,
        )
        .await;
        assert!(matches!(
            result,
            Err(EngineError::MaxAttemptsExceeded { .. })
        ));
    }
}
