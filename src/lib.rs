// indexperf - load generation and correctness verification for a
// concurrently-read index
// Root library module

pub mod observability;
pub mod contracts;
pub mod analysis;
pub mod query;
pub mod memstore;
pub mod linedocs;
pub mod registry;
pub mod resource;
pub mod reopen;
pub mod ingest;
pub mod spell;
pub mod facets;
pub mod state;
pub mod task;
pub mod task_parser;
pub mod task_source;
pub mod task_runner;
pub mod verify;
pub mod config;
pub mod report;

// Re-export key types
pub use observability::{
    bump, counter_value, init_logging, init_logging_with_level, metrics_snapshot, Counter,
    PerfTimer,
};

pub use contracts::{
    DocContext, DocRecord, RecordSource, StaticRefresher, StoreWriter, ViewInfo, ViewRefresher,
};

pub use resource::{ResourceHandle, ViewGuard};

pub use reopen::ReopenLoop;

pub use ingest::{IngestConfig, IngestWorkerPool, RateLimiter};

pub use linedocs::{int_to_pk, pk_to_int, LineDocSource};

pub use memstore::{DocMeta, Hit, MemStore, StoreView, TopHits};

pub use analysis::Analyzer;
pub use query::{parse_query, Query, Similarity};

pub use registry::{analyzers, similarities, stores, Registry, StoreFlavor};

pub use spell::{SpellChecker, Suggestion};

pub use facets::TaxonomyReader;

pub use state::IndexState;

pub use task::{ChecksumBuilder, CompletedTask, Task, TaskIdentity, TaskOp, TaskResult};

pub use task_parser::TaskParser;

pub use task_source::{LocalTaskSource, PkLookupSpec, RemoteTaskSource, TaskSource};

pub use task_runner::TaskRunner;

pub use verify::{verify_checksums, ConsistencyError};

pub use config::{RunConfig, RunConfigBuilder, TaskFeed};

pub use report::{write_heap_usage, write_results};
