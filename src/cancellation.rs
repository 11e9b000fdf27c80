//! Hierarchical cancellation: run ⊇ step ⊇ node.
//!
//! Cancelling a token cancels every token derived from it via
//! [`CancellationToken::child`]. There's no tokio-util dependency here —
//! just a `watch<bool>` pair, which is all a one-shot "has this been
//! cancelled yet" signal needs; child tokens additionally watch their
//! parent so a run-level cancellation reaches every node-level token
//! without the engine having to track all of them itself.

use tokio::sync::watch;

/// A cancellation signal that can be watched and cheaply cloned.
#[derive(Clone)]
pub struct CancellationToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
    parent: Option<Box<CancellationToken>>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx,
            rx,
            parent: None,
        }
    }

    /// Derive a child token: cancelling the child has no effect on the
    /// parent, but cancelling the parent (or any ancestor) always shows up
    /// as cancelled on the child.
    #[must_use]
    pub fn child(&self) -> Self {
        let mut token = Self::new();
        token.parent = Some(Box::new(self.clone()));
        token
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Resolves once this token or any ancestor is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut rx = self.rx.clone();
        match &self.parent {
            None => {
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            }
            Some(parent) => {
                tokio::select! {
                    _ = async { let _ = rx.wait_for(|cancelled| *cancelled).await; } => {}
                    () = parent.cancelled() => {}
                }
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelling_parent_cancels_child() {
        let parent = CancellationToken::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_on_parent_cancel() {
        let parent = CancellationToken::new();
        let child = parent.child();
        let waited = tokio::spawn(async move {
            child.cancelled().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        parent.cancel();
        tokio::time::timeout(Duration::from_millis(100), waited)
            .await
            .expect("cancellation should be observed promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelling_child_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
    }
}
