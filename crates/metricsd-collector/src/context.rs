use crate::error::{CollectError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation shared by every source during one cycle.
#[derive(Debug, Clone)]
pub struct CollectContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl CollectContext {
    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    /// A context that expires `budget` from now and is never cancelled.
    pub fn with_budget(budget: Duration) -> Self {
        Self::new(deadline_after(budget), CancellationToken::new())
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs `fut` until it completes, `timeout` elapses, the cycle deadline
    /// passes or the context is cancelled, whichever happens first.
    pub async fn bounded<F, T>(&self, timeout: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let limit = deadline_after(timeout).min(self.deadline);
        let budget = limit.saturating_duration_since(Instant::now());
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(CollectError::Cancelled),
            res = tokio::time::timeout_at(limit, fut) => res.map_err(|_| CollectError::Timeout(budget)),
        }
    }

    /// Same as [`bounded`](Self::bounded) with only the cycle deadline.
    pub async fn within_deadline<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let budget = self.deadline.saturating_duration_since(Instant::now());
        self.bounded(budget, fut).await
    }
}

/// `now + budget`, saturating far in the future instead of overflowing.
fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365))
}
