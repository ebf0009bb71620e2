// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Retry execution for operations against session-based backends.
//!
//! Operations against a transactional backend fail transiently all the time: sessions expire,
//! connections drop, transactions conflict. This crate wraps such operations in a retry loop that
//! acquires a pooled session for every attempt, classifies failures, backs off between attempts
//! and honors an explicit idempotency contract, so that requests whose effect is uncertain are
//! only repeated when repeating them is safe.
//!
//! # Core Types
//!
//! - [`Retrier`]: Runs an operation in a retry loop against a [`SessionPool`].
//! - [`ErrorClassifier`]: Maps an [`AttemptError`] to a [`Classification`].
//! - [`RetryPolicy`]: Decides whether to retry and computes the [`Backoff`] delay.
//! - [`ExecutionContext`]: Carries the clock, cancellation token and deadline of a loop.
//! - [`Observer`]: Sees the lifecycle of every loop; [`StructuredLogger`] logs it with `tracing`.
//! - [`RetryError`]: The terminal failure of a loop.
//!
//! # Quick Start
//!
//! ```
//! use session_retry::{
//!     AttemptError, BackendError, ExecutionContext, Retrier, RetryErrorKind, RetryOptions, SessionPool, StatusCode,
//!     StructuredLogger,
//! };
//! use tick::ClockControl;
//!
//! #[derive(Debug)]
//! struct Pool;
//!
//! impl SessionPool for Pool {
//!     type Session = u32;
//!
//!     async fn acquire(&self, _ctx: &ExecutionContext) -> Result<u32, AttemptError> {
//!         Ok(1)
//!     }
//!
//!     fn release(&self, _session: u32) {}
//!
//!     fn discard(&self, _session: u32) {}
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let clock = ClockControl::new().auto_advance_timers(true).to_clock();
//! let retrier = Retrier::new(Pool, &RetryOptions::new()).observer(StructuredLogger::new());
//! let ctx = ExecutionContext::new(&clock);
//!
//! // Not idempotent: a failure with an uncertain outcome is not retried.
//! let error = retrier
//!     .run(&ctx, false, |_ctx, _session| async {
//!         Err::<(), _>(AttemptError::from(BackendError::status(StatusCode::Undetermined, "commit state unknown")))
//!     })
//!     .await
//!     .unwrap_err();
//!
//! assert_eq!(error.kind(), RetryErrorKind::NotIdempotent);
//! assert_eq!(error.attempts(), 1);
//! # }
//! ```
//!
//! # Observability
//!
//! The retrier never logs by itself. Attach a [`StructuredLogger`] to emit `tracing` events for
//! failed attempts and failed loops, or implement [`Observer`] to feed metrics or traces. Observer
//! failures are isolated from the loop and reported as `session_retry.observer_failed` warnings.
//!
//! # Interoperability
//!
//! [`BackendError`], [`AttemptError`] and [`RetryError`] implement [`Recovery`], so their results
//! compose with other resilience middleware built on the `recoverable` crate.
//!
//! # Features
//!
//! - `serde`: Serialization of [`RetryOptions`], [`StatusCode`] and [`Verbosity`].

pub use recoverable::{Recovery, RecoveryInfo, RecoveryKind};

mod backoff;
mod classify;
mod constants;
mod context;
mod error;
mod logger;
mod observer;
mod options;
mod policy;
mod pool;
mod retrier;
mod jitter;

pub use backoff::Backoff;
pub use classify::{Classification, ErrorClassifier, Retryability};
pub use context::{Cancellation, ExecutionContext};
pub use error::{AttemptError, BackendError, BoxError, Exhaustion, RetryError, RetryErrorKind, StatusCode, TransportKind};
pub use logger::{StructuredLogger, Verbosity};
pub use observer::{AttemptInfo, LoopDoneInfo, LoopId, LoopStartInfo, Observer, ObserverError, ObserverHandle, Observers};
pub use options::RetryOptions;
pub use policy::{Decision, RetryPolicy, StopReason};
pub use pool::SessionPool;
pub use retrier::Retrier;

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod testing;
