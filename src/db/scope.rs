//! Request scopes.
//!
//! A `RequestScope` is the cancellation and deadline source a session is bound
//! to. Every blocking session operation runs under its scope and is abandoned
//! when the scope is cancelled or its deadline passes.

use crate::error::{SessionError, SessionResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RequestScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestScope {
    /// A cancellable scope without a deadline.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// A scope that is never cancelled by anyone else.
    ///
    /// Nothing outside the returned value holds its token, so only an explicit
    /// `cancel()` on it (or a clone) can fire it.
    pub fn detached() -> Self {
        Self::new()
    }

    /// A scope cancelled together with this one, optionally with a tighter deadline.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let deadline = match (self.deadline, timeout) {
            (Some(parent), Some(t)) => Some(parent.min(Instant::now() + t)),
            (None, Some(t)) => Some(Instant::now() + t),
            (parent, None) => parent,
        };
        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// True once the scope is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// Fail fast if the scope already ended.
    pub fn check(&self) -> SessionResult<()> {
        if self.token.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(SessionError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Resolves when the scope is cancelled or its deadline passes.
    pub async fn done(&self) -> SessionError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => SessionError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => SessionError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                SessionError::Cancelled
            }
        }
    }

    /// Run `fut` under this scope.
    ///
    /// Fails without polling `fut` if the scope already ended, and drops `fut`
    /// as soon as the scope fires while it is pending.
    pub async fn run<T, E, F>(&self, fut: F) -> SessionResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<SessionError>,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            res = fut => res.map_err(Into::into),
        }
    }
}
