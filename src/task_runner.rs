// TaskRunner: the search worker pool
// Each worker loops pull -> acquire -> execute -> release -> record. The
// acquire/release pair is a scope: the guard drops (and the view releases)
// before the completed task is recorded, and the checksum is already final
// inside that scope. End-of-stream stops a worker cleanly; a failed remote
// pull stops only that worker.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use crate::observability::{bump, Counter};
use crate::state::IndexState;
use crate::task::CompletedTask;
use crate::task_source::TaskSource;

/// Fixed pool of search worker threads.
pub struct TaskRunner {
    workers: Vec<JoinHandle<Result<Vec<CompletedTask>>>>,
}

impl TaskRunner {
    /// Launch `thread_count` workers pulling from `source`.
    pub fn start(
        source: Arc<dyn TaskSource>,
        state: Arc<IndexState>,
        thread_count: usize,
    ) -> Result<Self> {
        crate::contracts::validation::validate_thread_count("search", thread_count)?;
        let mut workers = Vec::with_capacity(thread_count);
        for at in 0..thread_count {
            let source = Arc::clone(&source);
            let state = Arc::clone(&state);
            let worker = std::thread::Builder::new()
                .name(format!("search-{at}"))
                .spawn(move || run_worker(at, &*source, &state))
                .context("failed to spawn search worker")?;
            workers.push(worker);
        }
        info!(threads = thread_count, "task runner started");
        Ok(Self { workers })
    }

    /// Block until every worker has observed end-of-stream, returning all
    /// completed tasks. The first worker error (if any) fails the run, but
    /// only after every thread has been joined.
    pub fn finish(self) -> Result<Vec<CompletedTask>> {
        let mut completed = Vec::new();
        let mut first_error: Option<anyhow::Error> = None;
        for worker in self.workers {
            match worker.join() {
                Ok(Ok(mut tasks)) => completed.append(&mut tasks),
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(_) => {
                    if first_error.is_none() {
                        first_error = Some(anyhow!("search worker panicked"));
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(completed),
        }
    }
}

fn run_worker(
    at: usize,
    source: &dyn TaskSource,
    state: &IndexState,
) -> Result<Vec<CompletedTask>> {
    let mut completed = Vec::new();
    loop {
        let task = match source.next(at) {
            Ok(Some(task)) => task,
            Ok(None) => break,
            Err(err) => {
                // Per-connection failure: this worker's stream is over, the
                // rest of the pool keeps running.
                warn!(worker = at, "task stream ended with error: {err:#}");
                break;
            }
        };

        let started = Instant::now();
        let result = {
            let view = state.handle.acquire()?;
            // Checksum is final before the guard drops; nothing below reads
            // the view.
            task.execute(&view, state)
        };
        let elapsed = started.elapsed();

        match result {
            Ok(outcome) => {
                bump(Counter::TasksExecuted, 1);
                completed.push(CompletedTask {
                    task,
                    checksum: outcome.checksum,
                    elapsed,
                    thread: at,
                    summary: outcome.summary,
                });
            }
            Err(err) => {
                bump(Counter::TaskFailures, 1);
                return Err(err.context(format!("task failed on worker {at}: {task}")));
            }
        }
    }
    debug!(worker = at, completed = completed.len(), "worker drained");
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::contracts::{DocRecord, StoreWriter};
    use crate::linedocs::int_to_pk;
    use crate::memstore::MemStore;
    use crate::query::CountSimilarity;
    use crate::resource::ResourceHandle;
    use crate::task::{Task, TaskOp};
    use parking_lot::Mutex;

    struct ListSource {
        tasks: Mutex<Vec<Arc<Task>>>,
    }

    impl ListSource {
        fn of(tasks: Vec<Task>) -> Self {
            Self {
                tasks: Mutex::new(tasks.into_iter().map(Arc::new).rev().collect()),
            }
        }
    }

    impl TaskSource for ListSource {
        fn next(&self, _worker: usize) -> Result<Option<Arc<Task>>> {
            Ok(self.tasks.lock().pop())
        }
        fn all_tasks(&self) -> Option<Vec<Arc<Task>>> {
            None
        }
    }

    fn seeded_state() -> Arc<IndexState> {
        let store = Arc::new(MemStore::new(Arc::new(StandardAnalyzer), None));
        for ord in 0..4u64 {
            store
                .add_document(&DocRecord {
                    pk: int_to_pk(ord),
                    ord,
                    title: format!("doc {ord}"),
                    date: String::new(),
                    date_msec: 0,
                    time_sec: 0,
                    body: "united states history".to_string(),
                    facet_paths: Vec::new(),
                })
                .unwrap();
        }
        let handle = Arc::new(ResourceHandle::new(Box::new(store)).unwrap());
        Arc::new(IndexState::new(handle, "body", Arc::new(CountSimilarity), &[]).unwrap())
    }

    fn pk_task(ord: u64) -> Task {
        Task::new(
            "PKLookup",
            TaskOp::PkLookup {
                keys: vec![int_to_pk(ord)],
            },
        )
    }

    #[test]
    fn test_runs_all_tasks_and_releases_views() {
        let state = seeded_state();
        let source = Arc::new(ListSource::of(vec![pk_task(0), pk_task(1), pk_task(2)]));
        let runner = TaskRunner::start(source, Arc::clone(&state), 2).unwrap();
        let completed = runner.finish().unwrap();

        assert_eq!(completed.len(), 3);
        assert!(completed.iter().all(|t| t.thread < 2));
        // Every acquire was released.
        assert_eq!(state.handle.outstanding(), 0);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let state = seeded_state();
        let source = Arc::new(ListSource::of(vec![]));
        assert!(TaskRunner::start(source, state, 0).is_err());
    }

    #[test]
    fn test_source_error_ends_only_that_worker() {
        struct FailingSource {
            remaining: Mutex<Vec<Arc<Task>>>,
        }
        impl TaskSource for FailingSource {
            fn next(&self, worker: usize) -> Result<Option<Arc<Task>>> {
                if worker == 0 {
                    anyhow::bail!("connection reset");
                }
                Ok(self.remaining.lock().pop())
            }
            fn all_tasks(&self) -> Option<Vec<Arc<Task>>> {
                None
            }
        }

        let state = seeded_state();
        let source = Arc::new(FailingSource {
            remaining: Mutex::new(vec![Arc::new(pk_task(1))]),
        });
        let runner = TaskRunner::start(source, Arc::clone(&state), 2).unwrap();
        // Worker 0's stream error is not fatal; worker 1 drains its task.
        let completed = runner.finish().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].thread, 1);
    }
}
