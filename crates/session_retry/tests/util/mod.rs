// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(dead_code, reason = "each test binary uses a different subset of the helpers")]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use session_retry::{
    AttemptError, AttemptInfo, BackendError, ExecutionContext, LoopDoneInfo, LoopId, LoopStartInfo, Observer, ObserverError,
    RetryErrorKind, SessionPool, StatusCode,
};
use tick::{Clock, ClockControl};

/// A clock whose timers fire as soon as they are registered.
pub fn auto_clock() -> Clock {
    ClockControl::new().auto_advance_timers(true).to_clock()
}

pub fn status(status: StatusCode) -> AttemptError {
    BackendError::status(status, format!("{status} injected")).into()
}

/// Hands out numbered sessions and remembers what happened to each of them.
#[derive(Debug, Default)]
pub struct FakePool {
    next: AtomicU64,
    acquire_failures: Mutex<VecDeque<AttemptError>>,
    released: Mutex<Vec<u64>>,
    discarded: Mutex<Vec<u64>>,
}

impl FakePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next acquisitions fail with these errors, in order.
    pub fn fail_acquire(self, errors: impl IntoIterator<Item = AttemptError>) -> Self {
        self.acquire_failures.lock().unwrap().extend(errors);
        self
    }

    pub fn acquired(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> Vec<u64> {
        self.released.lock().unwrap().clone()
    }

    pub fn discarded(&self) -> Vec<u64> {
        self.discarded.lock().unwrap().clone()
    }
}

impl SessionPool for FakePool {
    type Session = u64;

    async fn acquire(&self, _ctx: &ExecutionContext) -> Result<u64, AttemptError> {
        if let Some(error) = self.acquire_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        Ok(self.next.fetch_add(1, Ordering::Relaxed))
    }

    fn release(&self, session: u64) {
        self.released.lock().unwrap().push(session);
    }

    fn discard(&self, session: u64) {
        self.discarded.lock().unwrap().push(session);
    }
}

/// Outcomes returned by successive invocations of an operation body.
///
/// Once the scripted outcomes run out, every further invocation repeats `fallback`.
#[derive(Debug)]
pub struct Script {
    outcomes: Mutex<VecDeque<Result<u32, AttemptError>>>,
    fallback: Option<StatusCode>,
    calls: AtomicU32,
    sessions: Mutex<Vec<u64>>,
}

impl Script {
    pub fn new(outcomes: impl IntoIterator<Item = Result<u32, AttemptError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            fallback: None,
            calls: AtomicU32::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Fails every invocation with `status`.
    pub fn failing(status: StatusCode) -> Self {
        Self {
            fallback: Some(status),
            ..Self::new([])
        }
    }

    pub fn next(&self, session: u64) -> Result<u32, AttemptError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().unwrap().push(session);

        match self.outcomes.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => match self.fallback {
                Some(code) => Err(status(code)),
                None => Ok(0),
            },
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn sessions(&self) -> Vec<u64> {
        self.sessions.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start {
        id: LoopId,
        idempotent: bool,
    },
    Attempt {
        id: LoopId,
        attempt: u32,
        success: bool,
        code: Option<u32>,
        retryable: Option<bool>,
        discard: Option<bool>,
        elapsed: Duration,
    },
    Done {
        id: LoopId,
        attempts: u32,
        kind: Option<RetryErrorKind>,
    },
}

impl Event {
    pub fn id(&self) -> LoopId {
        match self {
            Self::Start { id, .. } | Self::Attempt { id, .. } | Self::Done { id, .. } => *id,
        }
    }
}

/// Records every event it observes.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn attempt_elapsed(&self) -> Vec<Duration> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Attempt { elapsed, .. } => Some(elapsed),
                _ => None,
            })
            .collect()
    }

    pub fn done(&self) -> Vec<(u32, Option<RetryErrorKind>)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Done { attempts, kind, .. } => Some((attempts, kind)),
                _ => None,
            })
            .collect()
    }
}

impl Observer for Recorder {
    fn on_loop_start(&self, info: &LoopStartInfo) -> Result<(), ObserverError> {
        self.events.lock().unwrap().push(Event::Start {
            id: info.id(),
            idempotent: info.idempotent(),
        });
        Ok(())
    }

    fn on_attempt(&self, info: &AttemptInfo<'_>) -> Result<(), ObserverError> {
        let classification = info.classification();
        self.events.lock().unwrap().push(Event::Attempt {
            id: info.id(),
            attempt: info.attempt(),
            success: info.is_success(),
            code: classification.and_then(|c| c.status_code()),
            retryable: classification.map(|c| c.is_retryable()),
            discard: classification.map(|c| c.must_discard_session()),
            elapsed: info.elapsed(),
        });
        Ok(())
    }

    fn on_loop_done(&self, info: &LoopDoneInfo<'_>) -> Result<(), ObserverError> {
        self.events.lock().unwrap().push(Event::Done {
            id: info.id(),
            attempts: info.attempts(),
            kind: info.error().map(|e| e.kind()),
        });
        Ok(())
    }
}
