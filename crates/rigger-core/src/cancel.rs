//! Cancellation and deadlines for one reconcile
//!
//! An [`OperationContext`] is shared by the reconciler and every
//! collaborator it calls. Clones observe the same cancellation flag.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why an operation stopped before completing
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interruption {
    #[error("operation was cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone)]
pub struct OperationContext {
    cancel: Arc<watch::Sender<bool>>,
    deadline: Option<Instant>,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationContext {
    /// A context with no deadline
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            cancel: Arc::new(cancel),
            deadline: None,
        }
    }

    /// A context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every clone of it
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// The interruption in effect right now, if any
    pub fn interruption(&self) -> Option<Interruption> {
        if *self.cancel.borrow() {
            return Some(Interruption::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interruption::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn check(&self) -> Result<(), Interruption> {
        match self.interruption() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn interrupted(&self) -> Interruption {
        let mut rx = self.cancel.subscribe();
        let cancelled = async move {
            // The sender lives in `self`, so the channel cannot close here.
            let _ = rx.wait_for(|cancelled| *cancelled).await;
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = cancelled => Interruption::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Interruption::DeadlineExceeded,
            },
            None => {
                cancelled.await;
                Interruption::Cancelled
            }
        }
    }

    /// Run `fut` unless the context is interrupted first
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Interruption>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            reason = self.interrupted() => Err(reason),
            output = fut => Ok(output),
        }
    }
}
