// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use tick::Stopwatch;

use crate::observer::LoopObservers;
use crate::{
    AttemptError, AttemptInfo, Cancellation, Classification, Decision, ErrorClassifier, ExecutionContext, Exhaustion, LoopDoneInfo, LoopId,
    LoopStartInfo, Observer, ObserverHandle, Observers, RetryError, RetryOptions, RetryPolicy, SessionPool, StopReason,
};

/// Runs operations against a [`SessionPool`], retrying transient failures.
///
/// Every call to [`run`][Self::run] is an independent retry loop. Before each attempt the loop
/// acquires a session, then invokes the operation with it. Failures are classified by the
/// [`ErrorClassifier`] and the [`RetryPolicy`] decides whether another attempt follows and after
/// which delay. Sessions left invalid by a failure are discarded, all others are released.
///
/// Observers registered with the retrier see the lifecycle of every loop; attach a
/// [`StructuredLogger`][crate::StructuredLogger] to log it.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// use session_retry::{
///     AttemptError, BackendError, ExecutionContext, Retrier, RetryOptions, SessionPool, StatusCode, StructuredLogger,
/// };
/// use tick::ClockControl;
///
/// #[derive(Debug)]
/// struct Pool;
///
/// impl SessionPool for Pool {
///     type Session = u32;
///
///     async fn acquire(&self, _ctx: &ExecutionContext) -> Result<u32, AttemptError> {
///         Ok(7)
///     }
///
///     fn release(&self, _session: u32) {}
///
///     fn discard(&self, _session: u32) {}
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let clock = ClockControl::new().auto_advance_timers(true).to_clock();
/// let retrier = Retrier::new(Pool, &RetryOptions::new()).observer(StructuredLogger::new());
/// let ctx = ExecutionContext::new(&clock);
/// let calls = &AtomicU32::new(0);
///
/// let rows = retrier
///     .run(&ctx, true, move |_ctx, _session| async move {
///         if calls.fetch_add(1, Ordering::Relaxed) == 0 {
///             Err(AttemptError::from(BackendError::status(StatusCode::Overloaded, "busy")))
///         } else {
///             Ok(42)
///         }
///     })
///     .await
///     .unwrap();
///
/// assert_eq!(rows, 42);
/// assert_eq!(calls.load(Ordering::Relaxed), 2);
/// # }
/// ```
#[derive(Debug)]
pub struct Retrier<P> {
    pool: P,
    policy: RetryPolicy,
    classifier: ErrorClassifier,
    observers: Observers,
}

#[derive(Debug)]
struct Failure {
    error: AttemptError,
    classification: Classification,
}

impl<P: SessionPool> Retrier<P> {
    /// Creates a retrier drawing sessions from `pool`.
    #[must_use]
    pub fn new(pool: P, options: &RetryOptions) -> Self {
        let overrides = options
            .get_retryable_status_overrides()
            .iter()
            .map(|(code, retryable)| (*code, *retryable));

        Self {
            pool,
            policy: RetryPolicy::new(options),
            classifier: ErrorClassifier::new().status_overrides(overrides),
            observers: Observers::new(),
        }
    }

    /// Marks local failures accepted by `predicate` as retryable.
    ///
    /// See [`ErrorClassifier::retry_local_when`].
    #[must_use]
    pub fn retry_local_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.classifier = self.classifier.retry_local_when(predicate);
        self
    }

    /// Attaches an observer for the lifetime of the retrier.
    #[must_use]
    pub fn observer(self, observer: impl Observer + 'static) -> Self {
        self.observers.register(Arc::new(observer));
        self
    }

    /// Attaches an observer that can later be detached through the returned handle.
    ///
    /// Loops that are already running do not see the new observer.
    pub fn register_observer(&self, observer: Arc<dyn Observer>) -> ObserverHandle {
        self.observers.register(observer)
    }

    /// Returns the number of attached observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Returns the session pool.
    #[must_use]
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns the error classifier.
    #[must_use]
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Runs `operation` until it succeeds or the retry loop ends.
    ///
    /// `operation` is invoked once per attempt with a clone of the context and a session from the
    /// pool. `idempotent` declares whether repeating an operation whose effect is uncertain is
    /// safe; failures that may have been applied partially are only retried when it is `true`.
    ///
    /// Session acquisition, the operation and the backoff sleep are all raced against `ctx`. An
    /// operation interrupted by cancellation is dropped and its session discarded.
    ///
    /// Observers see one start event, one event per attempt and one done event. Dropping the
    /// returned future before completion counts as cancellation by the caller: the session held
    /// by an in-flight attempt is discarded and the done event reports
    /// [`RetryError::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns a [`RetryError`] describing why the loop gave up; see
    /// [`RetryErrorKind`][crate::RetryErrorKind] for the possible kinds.
    pub async fn run<T, F, Fut>(&self, ctx: &ExecutionContext, idempotent: bool, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut(ExecutionContext, P::Session) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut scope = LoopScope::start(self.observers.snapshot(), idempotent, ctx.clock().stopwatch());

        let result = self.execute(ctx, idempotent, &mut scope, &mut operation).await;
        scope.finish(result.as_ref().err());

        result
    }

    #[cfg_attr(test, mutants::skip)] // some mutations loop forever
    async fn execute<T, F, Fut>(&self, ctx: &ExecutionContext, idempotent: bool, scope: &mut LoopScope, operation: &mut F) -> Result<T, RetryError>
    where
        F: FnMut(ExecutionContext, P::Session) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut attempt: u32 = 0;
        let mut previous: Option<AttemptError> = None;

        loop {
            attempt = attempt.saturating_add(1);
            scope.attempts = attempt;
            let attempt_stopwatch = ctx.clock().stopwatch();

            let outcome = self.attempt(ctx, idempotent, operation).await;
            let latency = attempt_stopwatch.elapsed();
            let elapsed = scope.stopwatch.elapsed();

            let Failure { error, classification } = match outcome {
                Ok(value) => {
                    scope.observers.attempt(&AttemptInfo {
                        id: scope.id,
                        attempt,
                        error: None,
                        classification: None,
                        latency,
                        elapsed,
                    });
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            scope.observers.attempt(&AttemptInfo {
                id: scope.id,
                attempt,
                error: Some(&error),
                classification: Some(classification),
                latency,
                elapsed,
            });

            if let AttemptError::Cancelled(reason) = error {
                return Err(RetryError::Cancelled {
                    reason,
                    attempts: attempt,
                    last_error: previous,
                });
            }

            let decision = self.policy.should_continue(
                &classification,
                idempotent,
                attempt,
                scope.stopwatch.elapsed(),
                ctx.is_cancelled(),
            );

            let delay = match decision {
                Decision::Retry { delay } => delay,
                Decision::Stop(reason) => return Err(terminal_error(ctx, reason, error, classification, attempt)),
            };

            if let Err(reason) = ctx.sleep(delay).await {
                return Err(RetryError::Cancelled {
                    reason,
                    attempts: attempt,
                    last_error: Some(error),
                });
            }

            previous = Some(error);
        }
    }

    async fn attempt<T, F, Fut>(&self, ctx: &ExecutionContext, idempotent: bool, operation: &mut F) -> Result<T, Failure>
    where
        F: FnMut(ExecutionContext, P::Session) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let session = match ctx.run(self.pool.acquire(ctx)).await {
            Ok(Ok(session)) => session,
            Ok(Err(error)) => return Err(self.failure(error, idempotent)),
            Err(reason) => return Err(self.failure(AttemptError::Cancelled(reason), idempotent)),
        };

        let handle = session.clone();
        let session = SessionGuard::new(&self.pool, session);

        match ctx.run(operation(ctx.clone(), handle)).await {
            Ok(Ok(value)) => {
                session.release();
                Ok(value)
            }
            Ok(Err(error)) => {
                let failure = self.failure(error, idempotent);

                // A session whose operation observed cancellation is in an unknown state.
                if failure.classification.must_discard_session() || matches!(failure.error, AttemptError::Cancelled(_)) {
                    session.discard();
                } else {
                    session.release();
                }

                Err(failure)
            }
            Err(reason) => {
                session.discard();
                Err(self.failure(AttemptError::Cancelled(reason), idempotent))
            }
        }
    }

    fn failure(&self, error: AttemptError, idempotent: bool) -> Failure {
        let classification = self.classifier.classify(&error, idempotent);
        Failure { error, classification }
    }
}

/// Emits the done event of a loop exactly once, including when the loop future is dropped.
struct LoopScope {
    id: LoopId,
    observers: LoopObservers,
    stopwatch: Stopwatch,
    attempts: u32,
    finished: bool,
}

impl LoopScope {
    fn start(observers: LoopObservers, idempotent: bool, stopwatch: Stopwatch) -> Self {
        let id = LoopId::new();
        observers.loop_start(&LoopStartInfo { id, idempotent });

        Self {
            id,
            observers,
            stopwatch,
            attempts: 0,
            finished: false,
        }
    }

    fn finish(&mut self, error: Option<&RetryError>) {
        self.finished = true;
        self.observers.loop_done(&LoopDoneInfo {
            id: self.id,
            error,
            attempts: self.attempts,
            latency: self.stopwatch.elapsed(),
        });
    }
}

impl Drop for LoopScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let error = RetryError::Cancelled {
            reason: Cancellation::Caller,
            attempts: self.attempts,
            last_error: None,
        };
        self.finish(Some(&error));
    }
}

/// Hands a session back to its pool exactly once. A session still held on drop is discarded.
struct SessionGuard<'a, P: SessionPool> {
    pool: &'a P,
    session: Option<P::Session>,
}

impl<'a, P: SessionPool> SessionGuard<'a, P> {
    fn new(pool: &'a P, session: P::Session) -> Self {
        Self {
            pool,
            session: Some(session),
        }
    }

    fn release(mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }

    fn discard(mut self) {
        if let Some(session) = self.session.take() {
            self.pool.discard(session);
        }
    }
}

impl<P: SessionPool> Drop for SessionGuard<'_, P> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.discard(session);
        }
    }
}

fn terminal_error(ctx: &ExecutionContext, reason: StopReason, source: AttemptError, classification: Classification, attempts: u32) -> RetryError {
    match reason {
        StopReason::Cancelled => RetryError::Cancelled {
            reason: ctx.cancellation().unwrap_or(Cancellation::Caller),
            attempts,
            last_error: Some(source),
        },
        StopReason::NotRetryable => RetryError::Permanent {
            source,
            classification,
            attempts,
        },
        StopReason::NotIdempotent => RetryError::NotIdempotent {
            source,
            classification,
            attempts,
        },
        StopReason::AttemptsExhausted => RetryError::Exhausted {
            source,
            classification,
            attempts,
            reason: Exhaustion::Attempts,
        },
        StopReason::TimeBudgetExhausted => RetryError::Exhausted {
            source,
            classification,
            attempts,
            reason: Exhaustion::TimeBudget,
        },
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tick::{Clock, ClockControl};

    use super::*;
    use crate::{BackendError, RetryErrorKind, StatusCode};

    #[derive(Debug, Default)]
    struct Pool {
        released: AtomicU32,
        discarded: AtomicU32,
    }

    impl SessionPool for Pool {
        type Session = ();

        async fn acquire(&self, _ctx: &ExecutionContext) -> Result<(), AttemptError> {
            Ok(())
        }

        fn release(&self, _session: ()) {
            self.released.fetch_add(1, Ordering::Relaxed);
        }

        fn discard(&self, _session: ()) {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn clock() -> Clock {
        ClockControl::new().auto_advance_timers(true).to_clock()
    }

    #[test]
    fn options_flow_into_policy_and_classifier() {
        let options = RetryOptions::new().max_attempts(9).retryable_status(StatusCode::NotFound, true);
        let retrier = Retrier::new(Pool::default(), &options);

        assert_eq!(retrier.policy().max_attempts(), 9);

        let error = AttemptError::from(BackendError::status(StatusCode::NotFound, "missing"));
        assert!(retrier.classifier().classify(&error, false).is_retryable());
    }

    #[test]
    fn session_guard_returns_session_once() {
        let pool = Pool::default();

        SessionGuard::new(&pool, ()).release();
        SessionGuard::new(&pool, ()).discard();
        drop(SessionGuard::new(&pool, ()));

        assert_eq!(pool.released.load(Ordering::Relaxed), 1);
        assert_eq!(pool.discarded.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn success_releases_session() {
        let retrier = Retrier::new(Pool::default(), &RetryOptions::new());
        let ctx = ExecutionContext::new(&clock());

        let value = retrier.run(&ctx, false, |_, ()| async { Ok::<_, AttemptError>("done") }).await.unwrap();

        assert_eq!(value, "done");
        assert_eq!(retrier.pool().released.load(Ordering::Relaxed), 1);
        assert_eq!(retrier.pool().discarded.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn cancellation_reported_by_operation_ends_loop() {
        let retrier = Retrier::new(Pool::default(), &RetryOptions::new());
        let ctx = ExecutionContext::new(&clock());
        let calls = &AtomicU32::new(0);

        let error = retrier
            .run(&ctx, true, move |_, ()| async move {
                calls.fetch_add(1, Ordering::Relaxed);
                Err::<(), _>(AttemptError::Cancelled(Cancellation::DeadlineExceeded))
            })
            .await
            .unwrap_err();

        assert_eq!(error.kind(), RetryErrorKind::Cancelled);
        assert_eq!(error.attempts(), 1);
        assert!(error.last_error().is_none());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(retrier.pool().discarded.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn time_budget_exhausts_loop() {
        let options = RetryOptions::new()
            .max_attempts(100)
            .base_backoff(Duration::from_millis(100))
            .max_elapsed(Duration::from_millis(250));
        let retrier = Retrier::new(Pool::default(), &options);
        let ctx = ExecutionContext::new(&clock());

        let error = retrier
            .run(&ctx, true, |_, ()| async {
                Err::<(), AttemptError>(BackendError::status(StatusCode::Overloaded, "busy").into())
            })
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            RetryError::Exhausted {
                reason: Exhaustion::TimeBudget,
                ..
            }
        ));
        assert!(error.attempts() >= 2);
        assert!(error.attempts() < 100);
    }
}
