// Task sources: where benchmark work comes from
// Local: a task file is materialized up front — per-category selection and
// PK-lookup synthesis driven by the static seed, replication, then a shuffle
// driven by the independent run seed — and retained for post-run auditing.
// Remote: a TCP listener hands one connection to each search worker and
// streams one task per line; nothing is retained.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::linedocs::int_to_pk;
use crate::task::{Task, TaskOp};
use crate::task_parser::{TaskParser, PK_CATEGORY};

/// A provider of benchmark tasks.
///
/// # Contract
/// - `next` is safe to call concurrently from all workers; every returned
///   task goes to exactly one caller
/// - `Ok(None)` ends the calling worker's stream
/// - an `Err` from a remote connection ends only that worker's stream
pub trait TaskSource: Send + Sync {
    fn next(&self, worker: usize) -> Result<Option<Arc<Task>>>;

    /// The full materialized task list, for post-run auditing. `None` for
    /// sources that do not retain tasks.
    fn all_tasks(&self) -> Option<Vec<Arc<Task>>>;
}

/// Knobs for synthesizing PK-lookup tasks from corpus identifiers.
#[derive(Debug, Clone, Copy)]
pub struct PkLookupSpec {
    /// Corpus size the keys are drawn from (ordinals 0..doc_count).
    pub doc_count: u64,
    pub keys_per_task: usize,
}

/// Pre-materialized, seeded, shuffled task list.
pub struct LocalTaskSource {
    tasks: Vec<Arc<Task>>,
    cursor: AtomicUsize,
}

impl LocalTaskSource {
    /// Load and materialize the task sequence from a file.
    ///
    /// The static seed drives category selection and PK synthesis; the run
    /// seed independently drives the final shuffle. Identical inputs and
    /// seeds produce an identical sequence.
    pub fn load(
        parser: &TaskParser,
        path: impl AsRef<Path>,
        static_seed: u64,
        run_seed: u64,
        tasks_per_cat: usize,
        task_repeat_count: usize,
        pk_lookups: Option<PkLookupSpec>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read task file: {}", path.display()))?;
        ensure!(tasks_per_cat > 0, "tasks_per_cat must be positive");
        ensure!(task_repeat_count > 0, "task_repeat_count must be positive");

        let mut by_category: BTreeMap<String, Vec<Arc<Task>>> = BTreeMap::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let task = Arc::new(parser.parse_line(trimmed)?);
            by_category
                .entry(task.category.clone())
                .or_default()
                .push(task);
        }
        ensure!(
            !by_category.is_empty(),
            "task file {} contains no tasks",
            path.display()
        );

        let mut static_rng = StdRng::seed_from_u64(static_seed);
        let mut selected: Vec<Arc<Task>> = Vec::new();
        for (category, tasks) in &by_category {
            if tasks.len() <= tasks_per_cat {
                selected.extend(tasks.iter().cloned());
                continue;
            }
            // Draw distinct indices until the category quota is filled.
            let mut chosen = BTreeSet::new();
            while chosen.len() < tasks_per_cat {
                chosen.insert(static_rng.gen_range(0..tasks.len()));
            }
            debug!(
                category = %category,
                picked = chosen.len(),
                from = tasks.len(),
                "selected tasks"
            );
            selected.extend(chosen.into_iter().map(|at| tasks[at].clone()));
        }

        if let Some(spec) = pk_lookups {
            if spec.doc_count > 0 && spec.keys_per_task > 0 {
                for _ in 0..tasks_per_cat {
                    let keys = (0..spec.keys_per_task)
                        .map(|_| int_to_pk(static_rng.gen_range(0..spec.doc_count)))
                        .collect();
                    selected.push(Arc::new(Task::new(PK_CATEGORY, TaskOp::PkLookup { keys })));
                }
            }
        }

        let mut tasks: Vec<Arc<Task>> = Vec::with_capacity(selected.len() * task_repeat_count);
        for _ in 0..task_repeat_count {
            tasks.extend(selected.iter().cloned());
        }

        let mut run_rng = StdRng::seed_from_u64(run_seed);
        tasks.shuffle(&mut run_rng);

        info!(
            categories = by_category.len(),
            selected = selected.len(),
            total = tasks.len(),
            "materialized local task sequence"
        );
        Ok(Self {
            tasks,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl TaskSource for LocalTaskSource {
    fn next(&self, _worker: usize) -> Result<Option<Arc<Task>>> {
        let at = self.cursor.fetch_add(1, Ordering::AcqRel);
        Ok(self.tasks.get(at).cloned())
    }

    fn all_tasks(&self) -> Option<Vec<Arc<Task>>> {
        Some(self.tasks.clone())
    }
}

struct Connection {
    reader: BufReader<TcpStream>,
    served: u64,
    done: bool,
}

/// Socket-fed task stream: one accepted connection per search worker.
pub struct RemoteTaskSource {
    connections: Vec<Mutex<Connection>>,
    parser: TaskParser,
    /// Per-connection task budget; `None` is unbounded.
    tasks_per_connection: Option<u64>,
}

impl RemoteTaskSource {
    /// Bind `interface:port` and accept exactly `worker_count` connections.
    ///
    /// Blocks until every worker's producer has connected; each worker then
    /// owns connection `worker`.
    pub fn bind(
        interface: &str,
        port: u16,
        worker_count: usize,
        parser: TaskParser,
        tasks_per_connection: Option<u64>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((interface, port))
            .with_context(|| format!("failed to bind task listener on {interface}:{port}"))?;
        Self::accept_on(listener, worker_count, parser, tasks_per_connection)
    }

    /// Accept exactly `worker_count` connections on an already-bound
    /// listener. Split out so callers can bind an ephemeral port and learn
    /// the address before producers connect.
    pub fn accept_on(
        listener: TcpListener,
        worker_count: usize,
        parser: TaskParser,
        tasks_per_connection: Option<u64>,
    ) -> Result<Self> {
        ensure!(worker_count > 0, "remote task source needs at least one worker");
        info!(
            addr = %listener.local_addr()?,
            connections = worker_count,
            "remote task source listening"
        );

        let mut connections = Vec::with_capacity(worker_count);
        for at in 0..worker_count {
            let (stream, peer) = listener
                .accept()
                .context("failed to accept task producer connection")?;
            info!(%peer, connection = at, "task producer connected");
            connections.push(Mutex::new(Connection {
                reader: BufReader::new(stream),
                served: 0,
                done: false,
            }));
        }
        Ok(Self {
            connections,
            parser,
            tasks_per_connection,
        })
    }
}

impl TaskSource for RemoteTaskSource {
    fn next(&self, worker: usize) -> Result<Option<Arc<Task>>> {
        let connection = self
            .connections
            .get(worker)
            .with_context(|| format!("no connection for worker {worker}"))?;
        let mut connection = connection.lock();
        if connection.done {
            return Ok(None);
        }
        if let Some(budget) = self.tasks_per_connection {
            if connection.served >= budget {
                connection.done = true;
                return Ok(None);
            }
        }

        let mut line = String::new();
        let read = connection
            .reader
            .read_line(&mut line)
            .with_context(|| format!("socket read failed on connection {worker}"))?;
        if read == 0 {
            connection.done = true;
            return Ok(None);
        }
        let task = self.parser.parse_line(line.trim_end_matches(['\r', '\n']))?;
        connection.served += 1;
        Ok(Some(Arc::new(task)))
    }

    fn all_tasks(&self) -> Option<Vec<Arc<Task>>> {
        // Remote tasks are not retained, so there is nothing to audit.
        None
    }
}

/// Parse a `server:interface:port` task-source selector.
pub fn parse_server_spec(spec: &str) -> Result<(String, u16)> {
    let rest = spec
        .strip_prefix("server:")
        .with_context(|| format!("not a server spec: {spec}"))?;
    let Some((interface, port)) = rest.rsplit_once(':') else {
        anyhow::bail!("server spec is missing the port; expected server:interface:port, got: {spec}");
    };
    ensure!(!interface.is_empty(), "server spec has an empty interface: {spec}");
    let port: u16 = port
        .parse()
        .with_context(|| format!("bad port in server spec: {spec}"))?;
    Ok((interface.to_string(), port))
}
