use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::TransportError;

/// Cancellation and deadline attached to a request.
///
/// The deadline becomes the per-request transport timeout and also bounds
/// retry backoff: once the context is done no further attempt is started.
#[derive(Clone, Debug, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every [`Context`] cloned from the one returned alongside it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Context {
    /// A context that never expires and cannot be cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// Tightens the deadline to at most `timeout` from now.
    ///
    /// A timeout too large to represent as an instant leaves the deadline
    /// unchanged.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Tightens the deadline to at most `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Makes the context cancellable through the returned handle.
    pub fn with_cancel(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancel = Some(rx);
        (self, CancelHandle { tx })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<TransportError> {
        if self.is_cancelled() {
            return Some(TransportError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(TransportError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a background context.
    pub async fn done(&self) -> TransportError {
        let mut cancel = self.cancel.clone();
        let cancelled = async {
            if let Some(rx) = cancel.as_mut() {
                // A dropped handle can no longer cancel.
                if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                    return;
                }
            }
            std::future::pending::<()>().await
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancelled => TransportError::Cancelled,
            _ = expired => TransportError::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Context;
    use crate::TransportError;
    use std::time::Duration;

    #[test]
    fn background_context_is_live() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.remaining().is_none());
    }

    #[tokio::test]
    async fn cancel_handle_cancels_clones() {
        let (ctx, handle) = Context::background().with_cancel();
        let clone = ctx.clone();
        handle.cancel();

        assert!(matches!(clone.err(), Some(TransportError::Cancelled)));
        assert!(matches!(clone.done().await, TransportError::Cancelled));
    }

    #[tokio::test]
    async fn deadline_resolves_done() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        assert!(matches!(ctx.done().await, TransportError::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(TransportError::DeadlineExceeded)));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn deadlines_only_tighten() {
        let ctx = Context::background()
            .with_timeout(Duration::from_millis(50))
            .with_timeout(Duration::from_secs(60));
        let remaining = ctx.remaining().expect("deadline set");
        assert!(remaining <= Duration::from_millis(50));
    }

    #[test]
    fn unrepresentable_timeout_keeps_deadline() {
        assert!(Context::background()
            .with_timeout(Duration::MAX)
            .deadline()
            .is_none());

        let bounded = Context::background().with_timeout(Duration::from_secs(5));
        let deadline = bounded.deadline();
        assert_eq!(bounded.with_timeout(Duration::MAX).deadline(), deadline);
    }
}
