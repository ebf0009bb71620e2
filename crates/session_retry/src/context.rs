// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::pin::pin;
use std::time::{Duration, Instant};

use futures_util::future::{Either, select};
use thiserror::Error;
use tick::Clock;
use tokio_util::sync::CancellationToken;

/// Why an [`ExecutionContext`] stopped accepting work.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cancellation {
    /// The context's cancellation token was cancelled.
    #[error("cancelled by caller")]
    Caller,
    /// The context's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Ambient state of a retry loop: its clock, cancellation token and optional deadline.
///
/// Every suspension point of a retry loop (session acquisition, the operation body and the
/// backoff sleep) is raced against the context, so cancelling the token or reaching the deadline
/// ends the loop promptly.
///
/// Cloning a context shares its token: cancelling a clone cancels the original. Use
/// [`child`][Self::child] for a scope that can be cancelled on its own.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use session_retry::{Cancellation, ExecutionContext};
/// use tick::Clock;
///
/// let clock = Clock::new_frozen();
/// let ctx = ExecutionContext::new(&clock).with_timeout(Duration::from_secs(5));
/// let scope = ctx.child();
///
/// scope.cancel();
///
/// assert_eq!(scope.cancellation(), Some(Cancellation::Caller));
/// assert!(!ctx.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    clock: Clock,
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecutionContext {
    /// Creates a context without a deadline and with a fresh cancellation token.
    #[must_use]
    pub fn new(clock: &Clock) -> Self {
        Self {
            clock: clock.clone(),
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Replaces the cancellation token, so that an existing token controls this context.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Sets a deadline `timeout` from now. An earlier existing deadline is kept.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let Some(deadline) = self.clock.instant().checked_add(timeout) {
            self.deadline = Some(self.deadline.map_or(deadline, |current| current.min(deadline)));
        }

        self
    }

    /// Creates a context whose token is cancelled with this one, but can also be cancelled alone.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            clock: self.clock.clone(),
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Returns the clock used for delays and deadlines.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Returns the cancellation token of this context.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left until the deadline, or `None` if there is no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(self.clock.instant()))
    }

    /// Cancels this context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns why the context is cancelled, or `None` if it is still live.
    #[must_use]
    pub fn cancellation(&self) -> Option<Cancellation> {
        if self.token.is_cancelled() {
            return Some(Cancellation::Caller);
        }

        match self.remaining() {
            Some(remaining) if remaining.is_zero() => Some(Cancellation::DeadlineExceeded),
            _ => None,
        }
    }

    /// Returns `true` if the token was cancelled or the deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation().is_some()
    }

    /// Completes once the context is cancelled, with the reason.
    pub async fn cancelled(&self) -> Cancellation {
        let token = pin!(self.token.cancelled());

        match self.remaining() {
            None => {
                token.await;
                Cancellation::Caller
            }
            Some(remaining) => match select(token, self.clock.delay(remaining)).await {
                Either::Left(_) => Cancellation::Caller,
                Either::Right(_) => Cancellation::DeadlineExceeded,
            },
        }
    }

    /// Drives `future` to completion unless the context is cancelled first.
    ///
    /// The future is polled before the cancellation check on every wake-up, so a future that is
    /// ready wins over a cancellation that happens at the same time.
    ///
    /// # Errors
    ///
    /// Returns the cancellation reason if the context was cancelled before the future completed.
    /// The future is dropped in that case.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, Cancellation> {
        if let Some(reason) = self.cancellation() {
            return Err(reason);
        }

        let future = pin!(future);
        let cancelled = pin!(self.cancelled());

        match select(future, cancelled).await {
            Either::Left((output, _)) => Ok(output),
            Either::Right((reason, _)) => Err(reason),
        }
    }

    /// Sleeps for `duration` unless the context is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns the cancellation reason if the context was cancelled during the sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancellation> {
        self.run(self.clock.delay(duration)).await
    }
}
