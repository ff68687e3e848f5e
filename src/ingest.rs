// Ingestion worker pool
// N independent workers pull records from one shared feed (mutually
// exclusive per record) and apply them to the store, each pacing itself
// against its own rate schedule. A malformed record is fatal for the run;
// silently skipping would corrupt the throughput numbers the harness exists
// to measure.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::contracts::{DocContext, RecordSource, StoreWriter};

/// Per-worker pacing against a target documents/second rate.
///
/// The schedule is anchored at construction: after the n-th document the
/// earliest time the budget permits the next one is `anchor + n / rate`.
/// Computing from the anchor rather than from "now" keeps the long-run rate
/// accurate under scheduling jitter. A non-positive rate disables pacing.
pub struct RateLimiter {
    anchor: Instant,
    per_doc: Option<Duration>,
}

impl RateLimiter {
    pub fn new(docs_per_sec: f64) -> Self {
        let per_doc = if docs_per_sec > 0.0 {
            Some(Duration::from_secs_f64(1.0 / docs_per_sec))
        } else {
            None
        };
        Self {
            anchor: Instant::now(),
            per_doc,
        }
    }

    /// Sleep until the schedule permits the next document, given `done`
    /// documents already applied.
    pub fn pace(&self, done: u64) {
        let Some(per_doc) = self.per_doc else { return };
        let next_allowed = self.anchor + per_doc.mul_f64(done as f64);
        let now = Instant::now();
        if next_allowed > now {
            std::thread::sleep(next_allowed - now);
        }
    }

    pub fn is_limited(&self) -> bool {
        self.per_doc.is_some()
    }
}

/// Configuration for the ingest pool.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub thread_count: usize,
    /// Target rate per worker; <= 0 runs at full speed.
    pub docs_per_sec_per_thread: f64,
    /// Pool-wide document budget; `None` runs until the feed is exhausted.
    pub max_docs: Option<u64>,
}

/// Fixed pool of ingestion workers mutating the store.
pub struct IngestWorkerPool {
    workers: Vec<JoinHandle<Result<u64>>>,
    stop: Arc<AtomicBool>,
    consumed: Arc<AtomicU64>,
}

impl IngestWorkerPool {
    /// Launch the pool. Workers run until the budget is consumed, the feed
    /// is exhausted, or [`IngestWorkerPool::stop`] is signalled.
    pub fn start(
        source: Arc<dyn RecordSource>,
        writer: Arc<dyn StoreWriter>,
        config: IngestConfig,
    ) -> Result<Self> {
        crate::contracts::validation::validate_thread_count("index", config.thread_count)?;
        let stop = Arc::new(AtomicBool::new(false));
        let consumed = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(config.thread_count);
        for at in 0..config.thread_count {
            let source = Arc::clone(&source);
            let writer = Arc::clone(&writer);
            let stop = Arc::clone(&stop);
            let consumed = Arc::clone(&consumed);
            let rate = config.docs_per_sec_per_thread;
            let max_docs = config.max_docs;
            let worker = std::thread::Builder::new()
                .name(format!("ingest-{at}"))
                .spawn(move || {
                    run_worker(at, &*source, &*writer, rate, max_docs, &stop, &consumed)
                })
                .context("failed to spawn ingest worker")?;
            workers.push(worker);
        }
        info!(
            threads = config.thread_count,
            rate = config.docs_per_sec_per_thread,
            "ingest pool started"
        );
        Ok(Self {
            workers,
            stop,
            consumed,
        })
    }

    /// Documents applied so far across the pool.
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    /// Signal workers to stop after their current record.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Join all workers, returning the total documents applied. The first
    /// worker failure fails the pool.
    pub fn finish(self) -> Result<u64> {
        let mut total = 0;
        let mut first_error: Option<anyhow::Error> = None;
        for worker in self.workers {
            match worker.join() {
                Ok(Ok(done)) => total += done,
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(_) => {
                    if first_error.is_none() {
                        first_error = Some(anyhow!("ingest worker panicked"));
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(total),
        }
    }
}

fn run_worker(
    at: usize,
    source: &dyn RecordSource,
    writer: &dyn StoreWriter,
    docs_per_sec: f64,
    max_docs: Option<u64>,
    stop: &AtomicBool,
    consumed: &AtomicU64,
) -> Result<u64> {
    // Each worker owns its schedule and its scratch context; neither is
    // shared across the pool.
    let limiter = RateLimiter::new(docs_per_sec);
    let mut ctx = DocContext::default();
    let mut done: u64 = 0;

    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        if let Some(budget) = max_docs {
            // Claim a slot in the pool-wide budget before pulling.
            let claimed = consumed.fetch_add(1, Ordering::AcqRel);
            if claimed >= budget {
                consumed.fetch_sub(1, Ordering::AcqRel);
                break;
            }
        } else {
            consumed.fetch_add(1, Ordering::AcqRel);
        }

        let record = match source.next_record(&mut ctx) {
            Ok(Some(record)) => record,
            Ok(None) => {
                consumed.fetch_sub(1, Ordering::AcqRel);
                break;
            }
            Err(err) => {
                consumed.fetch_sub(1, Ordering::AcqRel);
                // Malformed records are fatal, not skipped.
                return Err(err.context(format!("ingest worker {at} failed to read record")));
            }
        };

        writer
            .add_document(&record)
            .with_context(|| format!("ingest worker {at} failed to apply doc {}", record.pk))?;
        done += 1;
        limiter.pace(done);
    }

    debug!(worker = at, done, "ingest worker stopped");
    Ok(done)
}
