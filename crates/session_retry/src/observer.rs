// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::fmt::{Debug, Display, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::{AttemptError, BoxError, Classification, RetryError};

/// Identifies one invocation of [`Retrier::run`][crate::Retrier::run].
///
/// Every event of a loop carries the same id, so observers can correlate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(Uuid);

impl LoopId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Display for LoopId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Describes a retry loop that is about to make its first attempt.
#[derive(Debug, Clone, Copy)]
pub struct LoopStartInfo {
    pub(crate) id: LoopId,
    pub(crate) idempotent: bool,
}

impl LoopStartInfo {
    /// Returns the id of the loop.
    #[must_use]
    pub fn id(&self) -> LoopId {
        self.id
    }

    /// Returns `true` if the operation was declared idempotent.
    #[must_use]
    pub fn idempotent(&self) -> bool {
        self.idempotent
    }
}

/// Describes the outcome of one attempt.
#[derive(Debug, Clone, Copy)]
pub struct AttemptInfo<'a> {
    pub(crate) id: LoopId,
    pub(crate) attempt: u32,
    pub(crate) error: Option<&'a AttemptError>,
    pub(crate) classification: Option<Classification>,
    pub(crate) latency: Duration,
    pub(crate) elapsed: Duration,
}

impl AttemptInfo<'_> {
    /// Returns the id of the loop.
    #[must_use]
    pub fn id(&self) -> LoopId {
        self.id
    }

    /// Returns the 1-based number of the attempt.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the failure of the attempt, or `None` if it succeeded.
    #[must_use]
    pub fn error(&self) -> Option<&AttemptError> {
        self.error
    }

    /// Returns the classification of the failure, or `None` if the attempt succeeded.
    #[must_use]
    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    /// Returns how long the attempt took, session acquisition included.
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Returns the time since the loop started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Returns `true` if the attempt succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Describes a finished retry loop.
#[derive(Debug, Clone, Copy)]
pub struct LoopDoneInfo<'a> {
    pub(crate) id: LoopId,
    pub(crate) error: Option<&'a RetryError>,
    pub(crate) attempts: u32,
    pub(crate) latency: Duration,
}

impl LoopDoneInfo<'_> {
    /// Returns the id of the loop.
    #[must_use]
    pub fn id(&self) -> LoopId {
        self.id
    }

    /// Returns the terminal error, or `None` if the loop succeeded.
    #[must_use]
    pub fn error(&self) -> Option<&RetryError> {
        self.error
    }

    /// Returns the number of times the operation body was invoked or a session acquisition failed.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the total duration of the loop.
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Returns `true` if the loop succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Failure reported by an [`Observer`]. It is logged and otherwise ignored.
pub type ObserverError = BoxError;

/// Watches the lifecycle of retry loops.
///
/// For every loop an observer sees exactly one [`on_loop_start`][Self::on_loop_start], then one
/// [`on_attempt`][Self::on_attempt] per attempt in attempt order, then exactly one
/// [`on_loop_done`][Self::on_loop_done].
///
/// Observers are called synchronously from the loop, so they should return quickly. A failing
/// or panicking observer does not affect the loop or other observers; the failure is logged as a
/// `session_retry.observer_failed` warning.
pub trait Observer: Debug + Send + Sync {
    /// Called before the first attempt of a loop.
    ///
    /// # Errors
    ///
    /// Errors are logged and ignored.
    fn on_loop_start(&self, info: &LoopStartInfo) -> Result<(), ObserverError> {
        let _ = info;
        Ok(())
    }

    /// Called after every attempt.
    ///
    /// # Errors
    ///
    /// Errors are logged and ignored.
    fn on_attempt(&self, info: &AttemptInfo<'_>) -> Result<(), ObserverError> {
        let _ = info;
        Ok(())
    }

    /// Called once the loop has a result.
    ///
    /// # Errors
    ///
    /// Errors are logged and ignored.
    fn on_loop_done(&self, info: &LoopDoneInfo<'_>) -> Result<(), ObserverError> {
        let _ = info;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Registry {
    next_key: u64,
    entries: Vec<(u64, Arc<dyn Observer>)>,
}

/// The observers attached to a [`Retrier`][crate::Retrier].
///
/// Observers can be attached and detached while loops are running. Each loop takes a snapshot
/// of the list when it starts, so a loop keeps notifying the observers it started with.
#[derive(Debug, Clone, Default)]
pub struct Observers {
    registry: Arc<RwLock<Registry>>,
}

impl Observers {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an observer. Dropping the returned handle keeps the observer attached.
    pub fn register(&self, observer: Arc<dyn Observer>) -> ObserverHandle {
        let mut registry = self.registry.write();
        let key = registry.next_key;
        registry.next_key = registry.next_key.wrapping_add(1);
        registry.entries.push((key, observer));

        ObserverHandle {
            key,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Returns the number of attached observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.read().entries.len()
    }

    /// Returns `true` if no observer is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.read().entries.is_empty()
    }

    pub(crate) fn snapshot(&self) -> LoopObservers {
        LoopObservers(
            self.registry
                .read()
                .entries
                .iter()
                .map(|(_, observer)| Arc::clone(observer))
                .collect(),
        )
    }
}

/// Detaches an observer registered with [`Observers::register`].
#[derive(Debug)]
pub struct ObserverHandle {
    key: u64,
    registry: Weak<RwLock<Registry>>,
}

impl ObserverHandle {
    /// Detaches the observer. Loops that already started keep notifying it.
    ///
    /// Returns `false` if the observer was already gone together with its retrier.
    pub fn detach(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };

        let mut registry = registry.write();
        let before = registry.entries.len();
        registry.entries.retain(|(key, _)| *key != self.key);
        registry.entries.len() != before
    }
}

/// The observers notified by a single loop.
#[derive(Debug)]
pub(crate) struct LoopObservers(Vec<Arc<dyn Observer>>);

impl LoopObservers {
    pub fn loop_start(&self, info: &LoopStartInfo) {
        for observer in &self.0 {
            notify(observer.as_ref(), "loop_start", info.id, || observer.on_loop_start(info));
        }
    }

    pub fn attempt(&self, info: &AttemptInfo<'_>) {
        for observer in &self.0 {
            notify(observer.as_ref(), "attempt", info.id, || observer.on_attempt(info));
        }
    }

    pub fn loop_done(&self, info: &LoopDoneInfo<'_>) {
        for observer in &self.0 {
            notify(observer.as_ref(), "loop_done", info.id, || observer.on_loop_done(info));
        }
    }
}

fn notify(observer: &dyn Observer, event: &'static str, id: LoopId, call: impl FnOnce() -> Result<(), ObserverError>) {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            tracing::event!(
                name: "session_retry.observer_failed",
                tracing::Level::WARN,
                retry.id = %id,
                observer = ?observer,
                event,
                error = %error,
                "observer returned an error"
            );
        }
        Err(panic) => {
            tracing::event!(
                name: "session_retry.observer_failed",
                tracing::Level::WARN,
                retry.id = %id,
                observer = ?observer,
                event,
                panic = panic_message(panic.as_ref()),
                "observer panicked"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
