// Tasks: one unit of benchmark work
// A task is an immutable descriptor (category + operation) with a structural
// identity used to group duplicates, and an execution that produces a
// checksum over its result content. Identical tasks must produce identical
// checksums; that is the invariant the verifier enforces.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::memstore::StoreView;
use crate::query::Query;
use crate::state::IndexState;

/// Hits retained (and checksummed) per search.
pub const TOP_HITS: usize = 10;

/// The operation a task performs against an acquired view.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOp {
    Search { text: String, query: Query },
    PkLookup { keys: Vec<String> },
    Respell { term: String },
}

impl TaskOp {
    /// Canonical key for structural identity: normalized parameters, never
    /// results.
    fn identity_key(&self) -> String {
        match self {
            TaskOp::Search { query, .. } => format!("search:{}", query.canonical()),
            TaskOp::PkLookup { keys } => format!("pk:{}", keys.join(",")),
            TaskOp::Respell { term } => format!("respell:{term}"),
        }
    }
}

/// An immutable task descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub category: String,
    pub op: TaskOp,
}

impl Task {
    pub fn new(category: impl Into<String>, op: TaskOp) -> Self {
        Self {
            category: category.into(),
            op,
        }
    }

    /// Structural identity: category plus normalized parameters. Two tasks
    /// with equal identity are "the same" for checksum verification.
    pub fn identity(&self) -> TaskIdentity {
        TaskIdentity {
            category: self.category.clone(),
            op_key: self.op.identity_key(),
        }
    }

    /// Execute against an acquired view. The returned checksum is fully
    /// computed from the result content before this returns, so it never
    /// depends on the view after release.
    pub fn execute(&self, view: &StoreView, state: &IndexState) -> Result<TaskResult> {
        let mut checksum = ChecksumBuilder::new();
        let summary = match &self.op {
            TaskOp::Search { query, .. } => {
                let top = view.search(query, state.similarity.as_ref(), TOP_HITS);
                checksum.push_u64(top.total_hits);
                for hit in &top.hits {
                    checksum.push_u64(u64::from(hit.doc));
                }
                for (group, taxonomy) in &state.taxonomies {
                    for (path, count) in taxonomy.count_hits(view, &top.hits) {
                        checksum.push_str(group);
                        checksum.push_str(&path);
                        checksum.push_u64(count);
                    }
                }
                format!("{} total hits", top.total_hits)
            }
            TaskOp::PkLookup { keys } => {
                let mut found = 0u64;
                for key in keys {
                    match view
                        .lookup_pk(key)
                        .with_context(|| format!("pk lookup of {key}"))?
                    {
                        Some(doc) => {
                            found += 1;
                            checksum.push_u64(u64::from(doc));
                        }
                        None => checksum.push_u64(u64::MAX),
                    }
                }
                format!("{found}/{} keys found", keys.len())
            }
            TaskOp::Respell { term } => {
                let suggestions = state.spell.suggest(view, term);
                for suggestion in &suggestions {
                    checksum.push_str(&suggestion.term);
                    checksum.push_u64(u64::from(suggestion.distance));
                }
                match suggestions.first() {
                    Some(best) => format!("{} suggestions, best '{}'", suggestions.len(), best.term),
                    None => "0 suggestions".to_string(),
                }
            }
        };
        Ok(TaskResult {
            checksum: checksum.finish(),
            summary,
        })
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            TaskOp::Search { text, .. } => write!(f, "{}: {}", self.category, text),
            TaskOp::PkLookup { keys } => {
                write!(f, "{}: {} keys", self.category, keys.len())
            }
            TaskOp::Respell { term } => write!(f, "{}: {}", self.category, term),
        }
    }
}

/// Structural identity of a task (category + normalized parameters).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskIdentity {
    pub category: String,
    pub op_key: String,
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.op_key)
    }
}

/// Result of one execution: the checksum plus a human summary for the log.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub checksum: u32,
    pub summary: String,
}

/// crc32c accumulator over result content in a fixed order.
pub struct ChecksumBuilder(u32);

impl ChecksumBuilder {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn push_u64(&mut self, value: u64) {
        self.0 = crc32c::crc32c_append(self.0, &value.to_le_bytes());
    }

    pub fn push_str(&mut self, value: &str) {
        self.0 = crc32c::crc32c_append(self.0, value.as_bytes());
    }

    pub fn finish(self) -> u32 {
        self.0
    }
}

impl Default for ChecksumBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A task after execution: timing, executing thread, checksum, summary.
#[derive(Debug, Clone)]
pub struct CompletedTask {
    pub task: Arc<Task>,
    pub checksum: u32,
    pub elapsed: Duration,
    pub thread: usize,
    pub summary: String,
}

impl CompletedTask {
    /// Full diagnostic line used when a consistency violation is reported.
    pub fn diagnostic(&self) -> String {
        format!(
            "{} [checksum={:#010x} thread={} elapsed={:.3}ms] {}",
            self.task,
            self.checksum,
            self.thread,
            self.elapsed.as_secs_f64() * 1000.0,
            self.summary
        )
    }
}
