// indexperf CLI - drive a benchmark run end to end
use anyhow::{ensure, Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexperf::{
    analyzers, init_logging_with_level, metrics_snapshot, similarities, stores, verify_checksums,
    DocContext, IndexState, IngestConfig, IngestWorkerPool, LineDocSource, LocalTaskSource,
    MemStore, PkLookupSpec, RecordSource, RemoteTaskSource, ReopenLoop, ResourceHandle, RunConfig,
    StaticRefresher, StoreView, StoreWriter, TaskFeed, TaskParser, TaskRunner, TaskSource,
    ViewInfo,
};
use tracing::{debug, info};

/// Load-generation and correctness-verification harness for a
/// concurrently-read in-memory index.
#[derive(Parser, Debug)]
#[command(name = "indexperf", version, about)]
struct Cli {
    /// Task source: a task file path, or server:interface:port
    #[arg(long = "tasks")]
    tasks: String,

    /// Store flavor
    #[arg(long, default_value = "memory")]
    store: String,

    /// Analyzer applied at ingest and query-parse time
    #[arg(long, default_value = "standard")]
    analyzer: String,

    /// Ranking strategy for search tasks
    #[arg(long, default_value = "bm25")]
    similarity: String,

    /// Primary indexed field name
    #[arg(long, default_value = "body")]
    field: String,

    /// Search worker threads
    #[arg(long = "search-threads", default_value_t = default_search_threads())]
    search_threads: usize,

    /// Ingest worker threads (near-real-time mode)
    #[arg(long = "index-threads", default_value_t = 1)]
    index_threads: usize,

    /// Per-ingest-thread rate target; <= 0 runs unthrottled
    #[arg(
        long = "docs-per-sec-per-thread",
        default_value_t = -1.0,
        allow_negative_numbers = true
    )]
    docs_per_sec_per_thread: f64,

    /// Seconds between view refreshes (near-real-time mode)
    #[arg(long = "reopen-every-sec", default_value_t = 1.0)]
    reopen_every_sec: f64,

    /// Seed for task selection and PK-lookup synthesis
    #[arg(long = "static-seed", default_value_t = 17)]
    static_seed: u64,

    /// Seed for the final task shuffle
    #[arg(long = "seed", default_value_t = 0)]
    run_seed: u64,

    /// Times the selected task set is replicated
    #[arg(long = "task-repeat-count", default_value_t = 1)]
    task_repeat_count: usize,

    /// Tasks picked per category
    #[arg(long = "tasks-per-cat", default_value_t = 5)]
    tasks_per_cat: usize,

    /// Keys per synthesized PK-lookup task; 0 disables synthesis
    #[arg(long = "pk-keys-per-task", default_value_t = 4)]
    pk_keys_per_task: usize,

    /// Near-real-time mode: ingest and reopen run during the benchmark
    #[arg(long)]
    nrt: bool,

    /// Line docs file feeding ingestion and preload
    #[arg(long = "line-docs-file")]
    line_docs_file: Option<std::path::PathBuf>,

    /// Documents ingested synchronously before the run starts
    #[arg(long = "preload-docs", default_value_t = 0)]
    preload_docs: u64,

    /// Pool-wide ingest document budget
    #[arg(long = "max-ingest-docs")]
    max_ingest_docs: Option<u64>,

    /// Restart the line docs file from the top when exhausted
    #[arg(long = "repeat-docs")]
    repeat_docs: bool,

    /// Facet taxonomy groups counted during search tasks
    #[arg(long = "facet-group")]
    facet_groups: Vec<String>,

    /// Per-connection task budget for remote sources
    #[arg(long = "tasks-per-connection")]
    tasks_per_connection: Option<u64>,

    /// Skip end-of-run checksum verification
    #[arg(long = "no-verify")]
    no_verify: bool,

    /// Print resident-set usage at the end of the run
    #[arg(long = "print-heap")]
    print_heap: bool,

    /// Debug-level logging
    #[arg(long, conflicts_with = "quiet")]
    verbose: bool,

    /// Errors only
    #[arg(long)]
    quiet: bool,
}

fn default_search_threads() -> usize {
    num_cpus::get().clamp(1, 8)
}

fn resolve_config(cli: &Cli) -> Result<RunConfig> {
    let mut builder = RunConfig::builder()
        .store(&cli.store)
        .analyzer(&cli.analyzer)
        .similarity(&cli.similarity)
        .field(&cli.field)
        .task_feed(TaskFeed::parse(&cli.tasks)?)
        .search_threads(cli.search_threads)
        .index_threads(cli.index_threads)
        .docs_per_sec_per_thread(cli.docs_per_sec_per_thread)
        .reopen_every_sec(cli.reopen_every_sec)
        .seeds(cli.static_seed, cli.run_seed)
        .task_repeat_count(cli.task_repeat_count)
        .tasks_per_cat(cli.tasks_per_cat)
        .pk_keys_per_task(cli.pk_keys_per_task)
        .nrt(cli.nrt)
        .max_ingest_docs(cli.max_ingest_docs)
        .repeat_docs(cli.repeat_docs)
        .preload_docs(cli.preload_docs)
        .facet_groups(cli.facet_groups.clone())
        .tasks_per_connection(cli.tasks_per_connection)
        .verify_checksums(!cli.no_verify)
        .print_heap(cli.print_heap)
        .log_level(cli.verbose, cli.quiet);
    if let Some(path) = &cli.line_docs_file {
        builder = builder.line_docs_file(path);
    }
    builder.build()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging_with_level(cli.verbose, cli.quiet)?;
    let config = resolve_config(&cli)?;
    run(&config)
}

fn run(config: &RunConfig) -> Result<()> {
    debug!(config = %serde_json::to_string(config)?, "resolved configuration");

    // Resolve every selector up front: an unknown name dies here, before a
    // single thread is spawned.
    let analyzer = analyzers().resolve(&config.analyzer)?;
    let similarity = similarities().resolve(&config.similarity)?;
    let flavor = stores().resolve(&config.store)?;

    let store = Arc::new(MemStore::new(Arc::clone(&analyzer), flavor.merge_factor));

    let doc_source: Option<Arc<LineDocSource>> = match &config.line_docs_file {
        Some(path) => Some(Arc::new(LineDocSource::open(
            path,
            config.repeat_docs,
            !config.facet_groups.is_empty(),
        )?)),
        None => None,
    };

    if config.preload_docs > 0 {
        let source = doc_source
            .as_deref()
            .context("preloading documents requires a line docs file")?;
        preload(source, store.as_ref(), config.preload_docs)?;
    }

    let handle: Arc<ResourceHandle<StoreView>> = if config.nrt {
        Arc::new(ResourceHandle::new(Box::new(Arc::clone(&store)))?)
    } else {
        Arc::new(ResourceHandle::new(Box::new(StaticRefresher(Arc::clone(
            &store,
        ))))?)
    };
    let corpus_docs = handle.acquire()?.doc_count();
    info!(docs = corpus_docs, nrt = config.nrt, "index opened");

    let state = Arc::new(IndexState::new(
        Arc::clone(&handle),
        &config.field,
        similarity,
        &config.facet_groups,
    )?);

    let (reopen, ingest) = if config.nrt {
        let source = doc_source
            .clone()
            .context("near-real-time mode requires a line docs file")?;
        let ingest = IngestWorkerPool::start(
            source as Arc<dyn RecordSource>,
            Arc::clone(&store) as Arc<dyn StoreWriter>,
            IngestConfig {
                thread_count: config.index_thread_count,
                docs_per_sec_per_thread: config.docs_per_sec_per_thread,
                max_docs: config.max_ingest_docs,
            },
        )?;
        let reopen = ReopenLoop::start(
            Arc::clone(&handle),
            Duration::from_secs_f64(config.reopen_every_sec),
        )?;
        (Some(reopen), Some(ingest))
    } else {
        (None, None)
    };

    let parser = TaskParser::new(Arc::clone(&analyzer));
    let source: Arc<dyn TaskSource> = match &config.task_feed {
        TaskFeed::File(path) => {
            let pk_lookups = (config.pk_keys_per_task > 0 && corpus_docs > 0).then(|| {
                PkLookupSpec {
                    doc_count: corpus_docs,
                    keys_per_task: config.pk_keys_per_task,
                }
            });
            Arc::new(LocalTaskSource::load(
                &parser,
                path,
                config.static_seed,
                config.run_seed,
                config.tasks_per_cat,
                config.task_repeat_count,
                pk_lookups,
            )?)
        }
        TaskFeed::Server { interface, port } => Arc::new(RemoteTaskSource::bind(
            interface,
            *port,
            config.search_thread_count,
            parser,
            config.tasks_per_connection,
        )?),
    };

    let started = Instant::now();
    let runner = TaskRunner::start(
        Arc::clone(&source),
        Arc::clone(&state),
        config.search_thread_count,
    )?;
    let completed = runner.finish()?;
    let wall_time = started.elapsed();

    if let Some(pool) = ingest {
        pool.stop();
        let ingested = pool.finish()?;
        info!(ingested, "ingest pool drained");
    }
    if let Some(reopen) = reopen {
        reopen.stop();
    }

    let mut out = std::io::stdout().lock();
    indexperf::write_results(&mut out, &completed, wall_time)?;

    if config.verify_checksums {
        if source.all_tasks().is_some() {
            // Strictly after every worker joined; never overlapped with them.
            verify_checksums(&completed)?;
        } else {
            info!("remote task source retains no tasks; skipping verification");
        }
    }

    debug!(metrics = %metrics_snapshot(), "run counters");
    if config.print_heap {
        indexperf::write_heap_usage(&mut out)?;
    }
    out.flush()?;

    state.close();
    Ok(())
}

fn preload(source: &LineDocSource, store: &MemStore, count: u64) -> Result<()> {
    let _timer = indexperf::PerfTimer::new("preload");
    let mut ctx = DocContext::default();
    for at in 0..count {
        match source.next_record(&mut ctx)? {
            Some(record) => store.add_document(&record)?,
            None => {
                ensure!(
                    at > 0,
                    "line docs file was empty; nothing to preload"
                );
                break;
            }
        }
    }
    info!(docs = source.read_count(), "preload complete");
    Ok(())
}
