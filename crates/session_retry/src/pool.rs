// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use crate::{AttemptError, ExecutionContext};

/// A pool of backend sessions that a [`Retrier`][crate::Retrier] draws from.
///
/// The retrier acquires one session before every attempt and hands it back exactly once after
/// the attempt: through [`release`][Self::release] when the session is still usable, or through
/// [`discard`][Self::discard] when the failure left it invalid or in an unknown state. A session
/// held by an attempt whose loop future is dropped is discarded.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// use session_retry::{AttemptError, ExecutionContext, SessionPool};
///
/// #[derive(Debug, Default)]
/// struct Counter(AtomicU64);
///
/// impl SessionPool for Counter {
///     type Session = u64;
///
///     async fn acquire(&self, _ctx: &ExecutionContext) -> Result<u64, AttemptError> {
///         Ok(self.0.fetch_add(1, Ordering::Relaxed))
///     }
///
///     fn release(&self, _session: u64) {}
///
///     fn discard(&self, _session: u64) {}
/// }
/// ```
pub trait SessionPool: Send + Sync {
    /// Handle to a pooled session.
    ///
    /// The operation body receives a clone of the handle; the retrier keeps the original to
    /// return it to the pool.
    type Session: Clone + Send + Sync;

    /// Acquires a session for the next attempt.
    ///
    /// Failures are classified and retried like failures of the operation itself.
    fn acquire(&self, ctx: &ExecutionContext) -> impl Future<Output = Result<Self::Session, AttemptError>> + Send;

    /// Returns a healthy session to the pool.
    fn release(&self, session: Self::Session);

    /// Destroys a session that must not be reused.
    fn discard(&self, session: Self::Session);
}

impl<P: SessionPool> SessionPool for Arc<P> {
    type Session = P::Session;

    fn acquire(&self, ctx: &ExecutionContext) -> impl Future<Output = Result<Self::Session, AttemptError>> + Send {
        (**self).acquire(ctx)
    }

    fn release(&self, session: Self::Session) {
        (**self).release(session);
    }

    fn discard(&self, session: Self::Session) {
        (**self).discard(session);
    }
}
