// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;

use tracing::Level;

use crate::constants::DEFAULT_LOGGER_NAME;
use crate::{AttemptInfo, Classification, LoopDoneInfo, LoopStartInfo, Observer, ObserverError, RetryErrorKind};

/// Selects which retry events [`StructuredLogger`] emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Verbosity {
    /// Only failed attempts and failed loops.
    #[default]
    Failures,
    /// Failures plus `TRACE` events for loop start, successful attempts and successful loops.
    Lifecycle,
}

// Failures caused by the backend are errors worth an operator's attention, everything else is
// the caller's business and goes to DEBUG.
macro_rules! failure_event {
    ($backend:expr, $name:literal, $($rest:tt)+) => {
        if $backend {
            tracing::event!(name: $name, Level::ERROR, $($rest)+);
        } else {
            tracing::event!(name: $name, Level::DEBUG, $($rest)+);
        }
    };
}

/// An [`Observer`] that renders retry loops as structured `tracing` events.
///
/// | Event | Level | Name |
/// |---|---|---|
/// | loop started | `TRACE` (lifecycle only) | `session_retry.start` |
/// | attempt succeeded | `TRACE` (lifecycle only) | `session_retry.attempt` |
/// | attempt failed | `ERROR` for backend failures, `DEBUG` otherwise | `session_retry.attempt_failed` |
/// | loop succeeded | `TRACE` (lifecycle only) | `session_retry.done` |
/// | loop failed | `ERROR` for backend failures, `DEBUG` for cancellation and local failures | `session_retry.failed` |
///
/// Failure events carry the status code, whether the failure was retryable and whether the
/// session was discarded.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use session_retry::{StructuredLogger, Verbosity};
///
/// let logger = StructuredLogger::new().name("orders").verbosity(Verbosity::Lifecycle);
///
/// assert_eq!(logger.get_name(), "orders");
/// # let _ = Arc::new(logger);
/// ```
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    name: Cow<'static, str>,
    verbosity: Verbosity,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self {
            name: Cow::Borrowed(DEFAULT_LOGGER_NAME),
            verbosity: Verbosity::default(),
        }
    }
}

impl StructuredLogger {
    /// Creates a logger named `retry` that logs failures only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name attached to every event as `retry.name`.
    #[must_use]
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets which events are emitted.
    #[must_use]
    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Returns the logger name.
    #[must_use]
    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Returns the verbosity.
    #[must_use]
    pub fn get_verbosity(&self) -> Verbosity {
        self.verbosity
    }

    fn lifecycle(&self) -> bool {
        self.verbosity == Verbosity::Lifecycle
    }
}

impl Observer for StructuredLogger {
    fn on_loop_start(&self, info: &LoopStartInfo) -> Result<(), ObserverError> {
        if self.lifecycle() {
            tracing::event!(
                name: "session_retry.start",
                Level::TRACE,
                retry.name = %self.name,
                retry.id = %info.id(),
                idempotent = info.idempotent(),
                "retry loop started"
            );
        }

        Ok(())
    }

    fn on_attempt(&self, info: &AttemptInfo<'_>) -> Result<(), ObserverError> {
        let Some(error) = info.error() else {
            if self.lifecycle() {
                tracing::event!(
                    name: "session_retry.attempt",
                    Level::TRACE,
                    retry.name = %self.name,
                    retry.id = %info.id(),
                    attempt = info.attempt(),
                    latency = ?info.latency(),
                    "retry attempt succeeded"
                );
            }

            return Ok(());
        };

        let classification = info.classification();
        failure_event!(
            classification.is_some_and(Classification::is_backend_error),
            "session_retry.attempt_failed",
            retry.name = %self.name,
            retry.id = %info.id(),
            attempt = info.attempt(),
            latency = ?info.latency(),
            elapsed = ?info.elapsed(),
            error = %error,
            retryable = classification.map(Classification::is_retryable),
            code = classification.and_then(Classification::status_code),
            discard_session = classification.map(Classification::must_discard_session),
            "retry attempt failed"
        );

        Ok(())
    }

    fn on_loop_done(&self, info: &LoopDoneInfo<'_>) -> Result<(), ObserverError> {
        let Some(error) = info.error() else {
            if self.lifecycle() {
                tracing::event!(
                    name: "session_retry.done",
                    Level::TRACE,
                    retry.name = %self.name,
                    retry.id = %info.id(),
                    attempts = info.attempts(),
                    latency = ?info.latency(),
                    "retry loop succeeded"
                );
            }

            return Ok(());
        };

        // A cancelled loop ended because of its caller, even when the last attempt hit the backend.
        let classification = error.classification();
        failure_event!(
            error.is_backend() && error.kind() != RetryErrorKind::Cancelled,
            "session_retry.failed",
            retry.name = %self.name,
            retry.id = %info.id(),
            attempts = info.attempts(),
            latency = ?info.latency(),
            kind = ?error.kind(),
            error = %error,
            retryable = classification.map(Classification::is_retryable),
            code = classification.and_then(Classification::status_code),
            discard_session = classification.map(Classification::must_discard_session),
            "retry loop failed"
        );

        Ok(())
    }
}
