// Observability infrastructure for indexperf
// Structured logging via tracing plus a handful of global run counters that
// the ingest, reopen, and search threads bump from hot paths.

use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Global atomic counters, updated with Relaxed ordering from hot paths.
static DOCS_INGESTED: AtomicU64 = AtomicU64::new(0);
static BYTES_INGESTED: AtomicU64 = AtomicU64::new(0);
static REFRESH_ATTEMPTS: AtomicU64 = AtomicU64::new(0);
static REFRESHES_PUBLISHED: AtomicU64 = AtomicU64::new(0);
static TASKS_EXECUTED: AtomicU64 = AtomicU64::new(0);
static TASK_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Initialize the logging infrastructure with default verbosity.
/// This should be called once at startup.
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity.
///
/// Quiet takes precedence over RUST_LOG so that `--quiet` always suppresses
/// everything except errors; otherwise RUST_LOG overrides the flag defaults.
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    let filter_level = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("indexperf=debug,info")
    } else {
        EnvFilter::new("indexperf=info,warn")
    };

    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_thread_names(!quiet)
        .with_ansi(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if !quiet {
                info!("indexperf observability initialized");
            }
            Ok(())
        }
        Err(_) => {
            // Already initialized, which is fine in test environments
            Ok(())
        }
    }
}

/// Run counters bumped by the worker threads.
#[derive(Debug, Clone, Copy)]
pub enum Counter {
    DocsIngested,
    BytesIngested,
    RefreshAttempts,
    RefreshesPublished,
    TasksExecuted,
    TaskFailures,
}

fn cell(counter: Counter) -> &'static AtomicU64 {
    match counter {
        Counter::DocsIngested => &DOCS_INGESTED,
        Counter::BytesIngested => &BYTES_INGESTED,
        Counter::RefreshAttempts => &REFRESH_ATTEMPTS,
        Counter::RefreshesPublished => &REFRESHES_PUBLISHED,
        Counter::TasksExecuted => &TASKS_EXECUTED,
        Counter::TaskFailures => &TASK_FAILURES,
    }
}

/// Add `delta` to a run counter.
pub fn bump(counter: Counter, delta: u64) {
    cell(counter).fetch_add(delta, Ordering::Relaxed);
}

/// Read the current value of a run counter.
pub fn counter_value(counter: Counter) -> u64 {
    cell(counter).load(Ordering::Relaxed)
}

/// Snapshot of all run counters as JSON, for the end-of-run report.
pub fn metrics_snapshot() -> serde_json::Value {
    serde_json::json!({
        "ingest": {
            "docs": DOCS_INGESTED.load(Ordering::Relaxed),
            "bytes": BYTES_INGESTED.load(Ordering::Relaxed),
        },
        "reopen": {
            "attempts": REFRESH_ATTEMPTS.load(Ordering::Relaxed),
            "published": REFRESHES_PUBLISHED.load(Ordering::Relaxed),
        },
        "tasks": {
            "executed": TASKS_EXECUTED.load(Ordering::Relaxed),
            "failures": TASK_FAILURES.load(Ordering::Relaxed),
        },
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Scope timer that logs its elapsed time on drop.
pub struct PerfTimer {
    name: String,
    start: Instant,
}

impl PerfTimer {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!("timer started: {}", name);
        Self {
            name,
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        info!(elapsed_ms = self.elapsed_ms(), "timer completed: {}", self.name);
    }
}
