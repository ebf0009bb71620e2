// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Runs the workflow of a TV series catalog against an in-memory backend that injects transient
//! failures: describe table options, create tables, fill them, select a series, scan seasons,
//! describe a table and read a table. Every step is wrapped in a retry loop.
//!
//! Run with `cargo run --example series` to see the retry lifecycle logged at `TRACE` level.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use session_retry::{
    AttemptError, BackendError, ExecutionContext, Retrier, RetryOptions, SessionPool, StatusCode, StructuredLogger, TransportKind,
    Verbosity,
};
use tick::Clock;
use tracing::Level;

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<&'static str>,
    primary_key: Vec<&'static str>,
    rows: BTreeMap<Vec<u64>, Vec<String>>,
}

/// The backend: a set of tables plus a fault injector.
#[derive(Debug, Default)]
struct Backend {
    tables: Mutex<BTreeMap<String, Table>>,
    requests: AtomicU64,
}

impl Backend {
    /// Every third request fails with the next transient fault.
    fn inject_fault(&self) -> Result<(), BackendError> {
        let request = self.requests.fetch_add(1, Ordering::Relaxed);
        if request % 3 != 1 {
            return Ok(());
        }

        Err(match (request / 3) % 4 {
            0 => BackendError::status(StatusCode::Overloaded, "too many requests"),
            1 => BackendError::status(StatusCode::SessionExpired, "session lifetime exceeded"),
            2 => BackendError::transport(TransportKind::ConnectionLost, "connection reset by peer"),
            _ => BackendError::status(StatusCode::Aborted, "transaction locks invalidated"),
        })
    }
}

#[derive(Debug)]
struct SessionState {
    id: u64,
    alive: AtomicBool,
}

type Session = Arc<SessionState>;

#[derive(Debug)]
struct Pool {
    backend: Arc<Backend>,
    idle: Mutex<Vec<Session>>,
    next_id: AtomicU64,
}

impl Pool {
    fn new(backend: Arc<Backend>) -> Self {
        Self {
            backend,
            idle: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Runs a request on the backend, failing if the session is dead or a fault is injected.
    fn execute<T>(&self, session: &Session, request: impl FnOnce(&mut BTreeMap<String, Table>) -> Result<T, BackendError>) -> Result<T, AttemptError> {
        if !session.alive.load(Ordering::Relaxed) {
            return Err(BackendError::status(StatusCode::BadSession, format!("session {} is closed", session.id)).into());
        }

        self.backend.inject_fault()?;
        Ok(request(&mut self.backend.tables.lock())?)
    }
}

impl SessionPool for Pool {
    type Session = Session;

    async fn acquire(&self, _ctx: &ExecutionContext) -> Result<Session, AttemptError> {
        if let Some(session) = self.idle.lock().pop() {
            return Ok(session);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(session.id = id, "opened session");

        Ok(Arc::new(SessionState {
            id,
            alive: AtomicBool::new(true),
        }))
    }

    fn release(&self, session: Session) {
        self.idle.lock().push(session);
    }

    fn discard(&self, session: Session) {
        session.alive.store(false, Ordering::Relaxed);
        tracing::info!(session.id = session.id, "discarded session");
    }
}

/// Table option presets advertised by the backend, as `(kind, name)`.
const TABLE_OPTION_PRESETS: &[(&str, &str)] = &[
    ("table_profile", "default"),
    ("storage_policy", "default"),
    ("compaction_policy", "default"),
    ("partitioning_policy", "default"),
    ("execution_policy", "default"),
    ("replication_policy", "default"),
    ("caching_policy", "default"),
];

const SERIES: &[(u64, &str, &str)] = &[
    (1, "IT Crowd", "The IT Crowd is a British sitcom."),
    (2, "Silicon Valley", "Silicon Valley is an American comedy television series."),
];

const SEASONS: &[(u64, u64, &str)] = &[
    (1, 1, "Season 1"),
    (1, 2, "Season 2"),
    (2, 1, "Season 1"),
    (2, 2, "Season 2"),
];

const EPISODES: &[(u64, u64, u64, &str)] = &[
    (1, 1, 1, "Yesterday's Jam"),
    (1, 1, 2, "Calamity Jen"),
    (2, 1, 1, "Minimum Viable Product"),
    (2, 2, 1, "Sand Hill Shuffle"),
];

fn table_schema(name: &str) -> (Vec<&'static str>, Vec<&'static str>) {
    match name {
        "series" => (vec!["series_id", "title", "series_info"], vec!["series_id"]),
        "seasons" => (vec!["series_id", "season_id", "title"], vec!["series_id", "season_id"]),
        _ => (vec!["series_id", "season_id", "episode_id", "title"], vec!["series_id", "season_id", "episode_id"]),
    }
}

fn missing(table: &str) -> BackendError {
    BackendError::status(StatusCode::SchemeError, format!("table {table} does not exist"))
}

async fn describe_table_options(retrier: &Retrier<Pool>, ctx: &ExecutionContext) -> Result<(), Box<dyn std::error::Error>> {
    let presets = retrier
        .run(ctx, false, |_ctx, session| async move {
            retrier.pool().execute(&session, |_tables| Ok(TABLE_OPTION_PRESETS.to_vec()))
        })
        .await?;

    let total = presets.len();
    for (index, (kind, name)) in presets.into_iter().enumerate() {
        tracing::info!(preset = index + 1, total, kind, name, "table option preset");
    }

    Ok(())
}

async fn create_tables(retrier: &Retrier<Pool>, ctx: &ExecutionContext) -> Result<(), Box<dyn std::error::Error>> {
    for name in ["series", "seasons", "episodes"] {
        retrier
            .run(ctx, false, |_ctx, session| async move {
                retrier.pool().execute(&session, |tables| {
                    if tables.contains_key(name) {
                        return Err(BackendError::status(StatusCode::AlreadyExists, format!("table {name} exists")));
                    }

                    let (columns, primary_key) = table_schema(name);
                    tables.insert(
                        name.to_string(),
                        Table {
                            columns,
                            primary_key,
                            rows: BTreeMap::new(),
                        },
                    );
                    Ok(())
                })
            })
            .await?;
    }

    Ok(())
}

async fn fill_tables(retrier: &Retrier<Pool>, ctx: &ExecutionContext) -> Result<(), Box<dyn std::error::Error>> {
    // Upserts replace rows by key, so repeating the write is harmless.
    retrier
        .run(ctx, true, |_ctx, session| async move {
            retrier.pool().execute(&session, |tables| {
                let mut upsert = |name: &str, key: Vec<u64>, values: Vec<String>| -> Result<(), BackendError> {
                    tables.get_mut(name).ok_or_else(|| missing(name))?.rows.insert(key, values);
                    Ok(())
                };

                for &(series, title, info) in SERIES {
                    upsert("series", vec![series], vec![series.to_string(), title.to_string(), info.to_string()])?;
                }
                for &(series, season, title) in SEASONS {
                    upsert("seasons", vec![series, season], vec![series.to_string(), season.to_string(), title.to_string()])?;
                }
                for &(series, season, episode, title) in EPISODES {
                    upsert(
                        "episodes",
                        vec![series, season, episode],
                        vec![series.to_string(), season.to_string(), episode.to_string(), title.to_string()],
                    )?;
                }

                Ok(())
            })
        })
        .await?;

    Ok(())
}

async fn select_simple(retrier: &Retrier<Pool>, ctx: &ExecutionContext) -> Result<(), Box<dyn std::error::Error>> {
    let title = retrier
        .run(ctx, true, |_ctx, session| async move {
            retrier.pool().execute(&session, |tables| {
                let series = tables.get("series").ok_or_else(|| missing("series"))?;
                Ok(series.rows.get([1_u64].as_slice()).and_then(|row| row.get(1)).cloned())
            })
        })
        .await?;

    tracing::info!(series.id = 1, title = title.as_deref().unwrap_or("<none>"), "selected series");
    Ok(())
}

async fn scan_query_select(retrier: &Retrier<Pool>, ctx: &ExecutionContext, series_ids: &[u64]) -> Result<(), Box<dyn std::error::Error>> {
    let seasons = retrier
        .run(ctx, false, |_ctx, session| async move {
            retrier.pool().execute(&session, |tables| {
                let seasons = tables.get("seasons").ok_or_else(|| missing("seasons"))?;
                Ok(seasons
                    .rows
                    .iter()
                    .filter(|(key, _)| key.first().is_some_and(|series| series_ids.contains(series)))
                    .map(|(_, row)| row.clone())
                    .collect::<Vec<_>>())
            })
        })
        .await?;

    for row in seasons {
        tracing::info!(?row, "scanned season");
    }

    Ok(())
}

async fn describe_table(retrier: &Retrier<Pool>, ctx: &ExecutionContext, name: &'static str) -> Result<(), Box<dyn std::error::Error>> {
    let (columns, primary_key) = retrier
        .run(ctx, true, |_ctx, session| async move {
            retrier.pool().execute(&session, |tables| {
                let table = tables.get(name).ok_or_else(|| missing(name))?;
                Ok((table.columns.clone(), table.primary_key.clone()))
            })
        })
        .await?;

    tracing::info!(table = name, ?columns, ?primary_key, "described table");
    Ok(())
}

async fn read_table(retrier: &Retrier<Pool>, ctx: &ExecutionContext, name: &'static str) -> Result<(), Box<dyn std::error::Error>> {
    let rows = retrier
        .run(ctx, true, |_ctx, session| async move {
            retrier.pool().execute(&session, |tables| {
                let table = tables.get(name).ok_or_else(|| missing(name))?;
                Ok(table.rows.values().cloned().collect::<Vec<_>>())
            })
        })
        .await?;

    for row in rows {
        tracing::info!(table = name, ?row, "read row");
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(Level::TRACE).init();

    let clock = Clock::new_tokio();
    let retrier = Retrier::new(Pool::new(Arc::new(Backend::default())), &RetryOptions::new().max_attempts(5))
        .observer(StructuredLogger::new().name("series").verbosity(Verbosity::Lifecycle));
    let ctx = ExecutionContext::new(&clock);

    describe_table_options(&retrier, &ctx).await?;
    create_tables(&retrier, &ctx).await?;
    fill_tables(&retrier, &ctx).await?;
    select_simple(&retrier, &ctx).await?;
    scan_query_select(&retrier, &ctx, &[1, 10]).await?;
    describe_table(&retrier, &ctx, "seasons").await?;
    read_table(&retrier, &ctx, "episodes").await?;

    Ok(())
}
