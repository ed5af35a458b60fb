//! Operation context carrying cancellation and an optional deadline
//!
//! Every lifecycle call (`start`, `stop`, health checks, capability waits)
//! receives a [`ServiceContext`]. Derived contexts share the parent's
//! cancellation token and can only tighten its deadline.

use crate::{Error, Result};
use async_runtime_compat::{sleep, CancellationToken};
use futures::future::{select, Either};
use std::future::Future;
use std::time::{Duration, Instant};

/// Cancellation and deadline scope for one operation
#[derive(Debug, Clone, Default)]
pub struct ServiceContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ServiceContext {
    /// A context that is never done unless cancelled explicitly
    pub fn background() -> Self {
        Self::default()
    }

    /// Wrap an existing cancellation token
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a context whose deadline is at most `timeout` from now
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.clone(),
            deadline: Some(deadline),
        }
    }

    /// The cancellation token shared by this context
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this context and every context derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Time left before the deadline, if any
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether the context is cancelled or past its deadline
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.remaining() == Some(Duration::ZERO)
    }

    /// Resolve once the context is cancelled or expired, yielding the reason
    pub async fn done(&self) -> Error {
        if self.token.is_cancelled() {
            return Error::Cancelled;
        }

        let cancelled = std::pin::pin!(self.token.cancelled());
        match self.remaining() {
            Some(left) => {
                let expired = std::pin::pin!(sleep(left));
                match select(cancelled, expired).await {
                    Either::Left(_) => Error::Cancelled,
                    Either::Right(_) => Error::Timeout(format!("deadline of {:?} exceeded", left)),
                }
            }
            None => {
                cancelled.await;
                Error::Cancelled
            }
        }
    }

    /// Run `future` within this context
    ///
    /// Returns `Err(Cancelled)` or `Err(Timeout)` if the context finishes
    /// first; the future is dropped in that case.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output> {
        if let Some(err) = self.early_exit() {
            return Err(err);
        }

        let future = std::pin::pin!(future);
        let done = std::pin::pin!(self.done());
        match select(future, done).await {
            Either::Left((output, _)) => Ok(output),
            Either::Right((err, _)) => Err(err),
        }
    }

    fn early_exit(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            Some(Error::Cancelled)
        } else if self.remaining() == Some(Duration::ZERO) {
            Some(Error::Timeout("deadline already exceeded".to_string()))
        } else {
            None
        }
    }
}
