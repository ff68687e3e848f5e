// Resolved run configuration
// The core consumes these values; producing them (CLI parsing) is the
// binary's job. The builder validates at build time so every configuration
// error fires before a single thread is spawned.

use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use serde::Serialize;

use crate::contracts::validation;
use crate::task_source::parse_server_spec;

/// Where tasks come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TaskFeed {
    /// Local task file, materialized up front.
    File(PathBuf),
    /// Remote producer: listen on `interface:port`.
    Server { interface: String, port: u16 },
}

impl TaskFeed {
    /// Parse the task-source selector: either `server:interface:port` or a
    /// file path.
    pub fn parse(spec: &str) -> Result<Self> {
        if spec.starts_with("server:") {
            let (interface, port) = parse_server_spec(spec)?;
            Ok(TaskFeed::Server { interface, port })
        } else {
            ensure!(!spec.is_empty(), "task source cannot be empty");
            Ok(TaskFeed::File(PathBuf::from(spec)))
        }
    }
}

/// Fully resolved configuration for one benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub store: String,
    pub analyzer: String,
    pub similarity: String,
    pub field: String,
    pub task_feed: TaskFeed,
    pub search_thread_count: usize,
    pub index_thread_count: usize,
    pub docs_per_sec_per_thread: f64,
    pub reopen_every_sec: f64,
    pub static_seed: u64,
    pub run_seed: u64,
    pub task_repeat_count: usize,
    pub tasks_per_cat: usize,
    pub pk_keys_per_task: usize,
    /// Near-real-time mode: ingest + reopen run during the benchmark.
    pub nrt: bool,
    pub line_docs_file: Option<PathBuf>,
    /// Documents ingested synchronously before the run starts.
    pub preload_docs: u64,
    pub max_ingest_docs: Option<u64>,
    pub repeat_docs: bool,
    pub facet_groups: Vec<String>,
    pub tasks_per_connection: Option<u64>,
    pub verify_checksums: bool,
    pub print_heap: bool,
    pub verbose: bool,
    pub quiet: bool,
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }
}

/// Builder with defaults matching a small local smoke run.
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    store: String,
    analyzer: String,
    similarity: String,
    field: String,
    task_feed: Option<TaskFeed>,
    search_thread_count: usize,
    index_thread_count: usize,
    docs_per_sec_per_thread: f64,
    reopen_every_sec: f64,
    static_seed: u64,
    run_seed: u64,
    task_repeat_count: usize,
    tasks_per_cat: usize,
    pk_keys_per_task: usize,
    nrt: bool,
    line_docs_file: Option<PathBuf>,
    preload_docs: u64,
    max_ingest_docs: Option<u64>,
    repeat_docs: bool,
    facet_groups: Vec<String>,
    tasks_per_connection: Option<u64>,
    verify_checksums: bool,
    print_heap: bool,
    verbose: bool,
    quiet: bool,
}

impl Default for RunConfigBuilder {
    fn default() -> Self {
        Self {
            store: "memory".to_string(),
            analyzer: "standard".to_string(),
            similarity: "bm25".to_string(),
            field: "body".to_string(),
            task_feed: None,
            search_thread_count: 2,
            index_thread_count: 1,
            docs_per_sec_per_thread: -1.0,
            reopen_every_sec: 1.0,
            static_seed: 17,
            run_seed: 0,
            task_repeat_count: 1,
            tasks_per_cat: 5,
            pk_keys_per_task: 4,
            nrt: false,
            line_docs_file: None,
            preload_docs: 0,
            max_ingest_docs: None,
            repeat_docs: false,
            facet_groups: Vec::new(),
            tasks_per_connection: None,
            verify_checksums: true,
            print_heap: false,
            verbose: false,
            quiet: false,
        }
    }
}

impl RunConfigBuilder {
    pub fn store(mut self, name: impl Into<String>) -> Self {
        self.store = name.into();
        self
    }

    pub fn analyzer(mut self, name: impl Into<String>) -> Self {
        self.analyzer = name.into();
        self
    }

    pub fn similarity(mut self, name: impl Into<String>) -> Self {
        self.similarity = name.into();
        self
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.field = name.into();
        self
    }

    pub fn task_feed(mut self, feed: TaskFeed) -> Self {
        self.task_feed = Some(feed);
        self
    }

    pub fn search_threads(mut self, count: usize) -> Self {
        self.search_thread_count = count;
        self
    }

    pub fn index_threads(mut self, count: usize) -> Self {
        self.index_thread_count = count;
        self
    }

    pub fn docs_per_sec_per_thread(mut self, rate: f64) -> Self {
        self.docs_per_sec_per_thread = rate;
        self
    }

    pub fn reopen_every_sec(mut self, seconds: f64) -> Self {
        self.reopen_every_sec = seconds;
        self
    }

    pub fn seeds(mut self, static_seed: u64, run_seed: u64) -> Self {
        self.static_seed = static_seed;
        self.run_seed = run_seed;
        self
    }

    pub fn task_repeat_count(mut self, count: usize) -> Self {
        self.task_repeat_count = count;
        self
    }

    pub fn tasks_per_cat(mut self, count: usize) -> Self {
        self.tasks_per_cat = count;
        self
    }

    pub fn pk_keys_per_task(mut self, count: usize) -> Self {
        self.pk_keys_per_task = count;
        self
    }

    pub fn nrt(mut self, enabled: bool) -> Self {
        self.nrt = enabled;
        self
    }

    pub fn line_docs_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.line_docs_file = Some(path.into());
        self
    }

    pub fn preload_docs(mut self, count: u64) -> Self {
        self.preload_docs = count;
        self
    }

    pub fn max_ingest_docs(mut self, count: Option<u64>) -> Self {
        self.max_ingest_docs = count;
        self
    }

    pub fn repeat_docs(mut self, enabled: bool) -> Self {
        self.repeat_docs = enabled;
        self
    }

    pub fn facet_groups(mut self, groups: Vec<String>) -> Self {
        self.facet_groups = groups;
        self
    }

    pub fn tasks_per_connection(mut self, budget: Option<u64>) -> Self {
        self.tasks_per_connection = budget;
        self
    }

    pub fn verify_checksums(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    pub fn print_heap(mut self, enabled: bool) -> Self {
        self.print_heap = enabled;
        self
    }

    pub fn log_level(mut self, verbose: bool, quiet: bool) -> Self {
        self.verbose = verbose;
        self.quiet = quiet;
        self
    }

    /// Validate and build. Every violation here is a configuration error
    /// raised before any thread exists.
    pub fn build(self) -> Result<RunConfig> {
        let task_feed = self.task_feed.context("a task source is required")?;
        validation::validate_thread_count("search", self.search_thread_count)?;
        validation::validate_thread_count("index", self.index_thread_count)?;
        validation::validate_field_name(&self.field)?;
        validation::validate_reopen_cadence(self.reopen_every_sec)?;
        ensure!(self.task_repeat_count > 0, "task_repeat_count must be positive");
        ensure!(self.tasks_per_cat > 0, "tasks_per_cat must be positive");
        ensure!(
            !(self.verbose && self.quiet),
            "verbose and quiet are mutually exclusive"
        );
        if self.nrt {
            ensure!(
                self.line_docs_file.is_some(),
                "near-real-time mode requires a line docs file"
            );
        }
        if let TaskFeed::File(path) = &task_feed {
            ensure!(
                path.exists(),
                "task file does not exist: {}",
                path.display()
            );
        }

        Ok(RunConfig {
            store: self.store,
            analyzer: self.analyzer,
            similarity: self.similarity,
            field: self.field,
            task_feed,
            search_thread_count: self.search_thread_count,
            index_thread_count: self.index_thread_count,
            docs_per_sec_per_thread: self.docs_per_sec_per_thread,
            reopen_every_sec: self.reopen_every_sec,
            static_seed: self.static_seed,
            run_seed: self.run_seed,
            task_repeat_count: self.task_repeat_count,
            tasks_per_cat: self.tasks_per_cat,
            pk_keys_per_task: self.pk_keys_per_task,
            nrt: self.nrt,
            line_docs_file: self.line_docs_file,
            preload_docs: self.preload_docs,
            max_ingest_docs: self.max_ingest_docs,
            repeat_docs: self.repeat_docs,
            facet_groups: self.facet_groups,
            tasks_per_connection: self.tasks_per_connection,
            verify_checksums: self.verify_checksums,
            print_heap: self.print_heap,
            verbose: self.verbose,
            quiet: self.quiet,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_feed_parsing() {
        assert_eq!(
            TaskFeed::parse("server:0.0.0.0:7777").unwrap(),
            TaskFeed::Server {
                interface: "0.0.0.0".to_string(),
                port: 7777,
            }
        );
        assert_eq!(
            TaskFeed::parse("tasks.txt").unwrap(),
            TaskFeed::File(PathBuf::from("tasks.txt"))
        );
        assert!(TaskFeed::parse("server:nope").is_err());
    }

    #[test]
    fn test_build_requires_task_feed() {
        assert!(RunConfig::builder().build().is_err());
    }

    #[test]
    fn test_build_validates_before_threads() {
        let feed = TaskFeed::Server {
            interface: "127.0.0.1".to_string(),
            port: 0,
        };
        assert!(RunConfig::builder()
            .task_feed(feed.clone())
            .search_threads(0)
            .build()
            .is_err());
        assert!(RunConfig::builder()
            .task_feed(feed.clone())
            .nrt(true)
            .build()
            .is_err());
        assert!(RunConfig::builder()
            .task_feed(feed.clone())
            .reopen_every_sec(0.0)
            .build()
            .is_err());
        assert!(RunConfig::builder().task_feed(feed).build().is_ok());
    }

    #[test]
    fn test_missing_task_file_is_config_error() {
        let feed = TaskFeed::File(PathBuf::from("/definitely/not/here.txt"));
        assert!(RunConfig::builder().task_feed(feed).build().is_err());
    }
}
