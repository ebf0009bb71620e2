// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Lifecycle notifications of retry loops.

mod util;

use std::sync::Arc;

use session_retry::{
    ExecutionContext, LoopStartInfo, Observer, ObserverError, Retrier, RetryErrorKind, RetryOptions, StatusCode, StructuredLogger,
    Verbosity,
};
use util::{Event, FakePool, Recorder, Script, auto_clock, status};

#[derive(Debug)]
struct Broken;

impl Observer for Broken {
    fn on_loop_start(&self, _info: &LoopStartInfo) -> Result<(), ObserverError> {
        Err("metrics sink is down".into())
    }

    fn on_attempt(&self, _info: &session_retry::AttemptInfo<'_>) -> Result<(), ObserverError> {
        Err("metrics sink is down".into())
    }
}

#[derive(Debug)]
struct Panicking;

impl Observer for Panicking {
    fn on_attempt(&self, _info: &session_retry::AttemptInfo<'_>) -> Result<(), ObserverError> {
        panic!("observer bug");
    }

    fn on_loop_done(&self, _info: &session_retry::LoopDoneInfo<'_>) -> Result<(), ObserverError> {
        panic!("observer bug");
    }
}

#[tokio::test]
async fn events_arrive_in_lifecycle_order() {
    let recorder = Arc::new(Recorder::default());
    let retrier = Retrier::new(FakePool::new(), &RetryOptions::new());
    retrier.register_observer(Arc::clone(&recorder) as _);
    let ctx = ExecutionContext::new(&auto_clock());
    let script = &Script::new([Err(status(StatusCode::Overloaded)), Err(status(StatusCode::SessionExpired)), Ok(9)]);

    retrier
        .run(&ctx, false, move |_, session| {
            let outcome = script.next(session);
            async move { outcome }
        })
        .await
        .unwrap();

    let events = recorder.events();
    assert_eq!(events.len(), 5, "{events:#?}");

    let id = events[0].id();
    assert!(events.iter().all(|event| event.id() == id));
    assert_eq!(events[0], Event::Start { id, idempotent: false });

    let attempts: Vec<_> = events[1..4]
        .iter()
        .map(|event| match event {
            Event::Attempt {
                attempt,
                success,
                code,
                retryable,
                discard,
                ..
            } => (*attempt, *success, *code, *retryable, *discard),
            other => panic!("expected attempt event, got {other:?}"),
        })
        .collect();
    assert_eq!(
        attempts,
        vec![
            (1, false, Some(1030), Some(true), Some(false)),
            (2, false, Some(1050), Some(true), Some(true)),
            (3, true, None, None, None),
        ]
    );

    assert_eq!(
        events[4],
        Event::Done {
            id,
            attempts: 3,
            kind: None
        }
    );
}

#[tokio::test]
async fn failed_loop_reports_terminal_kind() {
    let recorder = Arc::new(Recorder::default());
    let retrier = Retrier::new(FakePool::new(), &RetryOptions::new().max_attempts(3));
    retrier.register_observer(Arc::clone(&recorder) as _);
    let ctx = ExecutionContext::new(&auto_clock());
    let script = &Script::failing(StatusCode::Unavailable);

    let error = retrier
        .run(&ctx, true, move |_, session| {
            let outcome = script.next(session);
            async move { outcome }
        })
        .await
        .unwrap_err();

    assert_eq!(recorder.done(), vec![(error.attempts(), Some(RetryErrorKind::Exhausted))]);
    assert_eq!(error.attempts(), script.calls());
}

#[tokio::test]
async fn misbehaving_observers_are_isolated() {
    let recorder = Arc::new(Recorder::default());
    let retrier = Retrier::new(FakePool::new(), &RetryOptions::new())
        .observer(Broken)
        .observer(Panicking)
        .observer(StructuredLogger::new().verbosity(Verbosity::Lifecycle));
    retrier.register_observer(Arc::clone(&recorder) as _);
    let ctx = ExecutionContext::new(&auto_clock());
    let script = &Script::new([Err(status(StatusCode::Aborted)), Ok(4)]);

    let value = retrier
        .run(&ctx, true, move |_, session| {
            let outcome = script.next(session);
            async move { outcome }
        })
        .await
        .unwrap();

    assert_eq!(value, 4);
    assert_eq!(retrier.observer_count(), 4);
    assert_eq!(recorder.events().len(), 4);
    assert_eq!(recorder.done(), vec![(2, None)]);
}

#[tokio::test]
async fn detached_observer_misses_later_loops() {
    let recorder = Arc::new(Recorder::default());
    let retrier = Retrier::new(FakePool::new(), &RetryOptions::new());
    let handle = retrier.register_observer(Arc::clone(&recorder) as _);
    let ctx = ExecutionContext::new(&auto_clock());
    let script = &Script::new([]);

    for _ in 0..2 {
        retrier
            .run(&ctx, true, move |_, session| {
                let outcome = script.next(session);
                async move { outcome }
            })
            .await
            .unwrap();
    }
    assert_eq!(recorder.done().len(), 2);

    assert!(handle.detach());
    assert_eq!(retrier.observer_count(), 0);

    retrier
        .run(&ctx, true, move |_, session| {
            let outcome = script.next(session);
            async move { outcome }
        })
        .await
        .unwrap();
    assert_eq!(recorder.done().len(), 2);
    assert_eq!(script.calls(), 3);
}

#[tokio::test]
async fn every_loop_gets_its_own_id() {
    let recorder = Arc::new(Recorder::default());
    let retrier = Retrier::new(FakePool::new(), &RetryOptions::new());
    retrier.register_observer(Arc::clone(&recorder) as _);
    let ctx = ExecutionContext::new(&auto_clock());
    let script = &Script::new([]);

    for _ in 0..3 {
        retrier
            .run(&ctx, true, move |_, session| {
                let outcome = script.next(session);
                async move { outcome }
            })
            .await
            .unwrap();
    }

    let ids: std::collections::HashSet<_> = recorder.events().iter().map(Event::id).collect();
    assert_eq!(ids.len(), 3);
}
