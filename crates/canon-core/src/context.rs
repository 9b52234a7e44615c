//! Cancellation and deadline context for long-running operations.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CanonError, CanonResult};

/// Carries the caller's cancellation token and optional deadline.
///
/// Cloning is cheap; clones share the token. Collaborator calls made through
/// [`OperationContext::call`] are bounded by the smaller of their own limit
/// and the time left before the deadline.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OperationContext {
    /// A context with no deadline and a fresh token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing token, typically one shared with a signal handler.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Expire `timeout` from now. An earlier existing deadline is kept.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Expire at `deadline`. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// A context cancelled with this one, but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn deadline_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Whether the caller no longer wants a result.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.deadline_expired()
    }

    /// Fail fast when cancelled or past the deadline.
    pub fn check(&self) -> CanonResult<()> {
        if self.is_cancelled() {
            return Err(CanonError::Cancelled);
        }
        if self.deadline_expired() {
            return Err(CanonError::Timeout("operation deadline exceeded".to_string()));
        }
        Ok(())
    }

    /// Run `fut` until it finishes, the token fires or the deadline passes.
    pub async fn run<F, T>(&self, fut: F) -> CanonResult<T>
    where
        F: Future<Output = CanonResult<T>>,
    {
        self.check()?;
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(CanonError::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => Err(CanonError::Timeout(
                        "operation deadline exceeded".to_string(),
                    )),
                    result = fut => result,
                }
            }
            None => {
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(CanonError::Cancelled),
                    result = fut => result,
                }
            }
        }
    }

    /// Run a collaborator call bounded by `min(limit, remaining deadline)`.
    ///
    /// Expiry yields [`CanonError::Timeout`] naming `label`; use
    /// [`OperationContext::is_done`] to tell a caller deadline from the
    /// per-call limit.
    pub async fn call<F, T>(&self, label: &str, limit: Duration, fut: F) -> CanonResult<T>
    where
        F: Future<Output = CanonResult<T>>,
    {
        self.check()?;
        let bound = match self.remaining() {
            Some(remaining) => remaining.min(limit),
            None => limit,
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CanonError::Cancelled),
            _ = tokio::time::sleep(bound) => Err(CanonError::Timeout(format!(
                "{} did not answer within {}ms",
                label,
                bound.as_millis()
            ))),
            result = fut => result,
        }
    }
}
