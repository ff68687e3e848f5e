// Near-real-time concurrency: ingest, reopen, and search running together
// Verifies the three thread groups coexist safely: readers never block on
// refresh, every acquire is released, and the view only advances through
// published snapshots.

use anyhow::Result;
use indexperf::*;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

fn line_docs(count: usize) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    for at in 0..count {
        writeln!(
            file,
            "Title {at}\t13-OCT-2006 10:04:32\tunited states history volume {at}"
        )?;
    }
    file.flush()?;
    Ok(file)
}

#[test]
fn test_ingest_reopen_search_run_concurrently() -> Result<()> {
    let docs = line_docs(500)?;
    let store = Arc::new(MemStore::new(Arc::new(analysis::StandardAnalyzer), Some(4)));
    let feed = Arc::new(LineDocSource::open(docs.path(), true, false)?);

    let handle = Arc::new(ResourceHandle::new(Box::new(Arc::clone(&store)))?);
    let state = Arc::new(IndexState::new(
        Arc::clone(&handle),
        "body",
        similarities().resolve("bm25")?,
        &[],
    )?);

    let ingest = IngestWorkerPool::start(
        Arc::clone(&feed) as Arc<dyn RecordSource>,
        Arc::clone(&store) as Arc<dyn StoreWriter>,
        IngestConfig {
            thread_count: 2,
            docs_per_sec_per_thread: 400.0,
            max_docs: None,
        },
    )?;
    let reopen = ReopenLoop::start(Arc::clone(&handle), Duration::from_millis(150))?;

    // Search workers hammer the live view while it is being republished.
    let task_file = {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "High: united")?;
        writeln!(file, "High: states")?;
        writeln!(file, "Phrase: \"united states\"")?;
        file.flush()?;
        file
    };
    let parser = TaskParser::new(analyzers().resolve("standard")?);
    let source = Arc::new(LocalTaskSource::load(
        &parser,
        task_file.path(),
        17,
        42,
        3,
        200,
        None,
    )?);

    let runner = TaskRunner::start(
        Arc::clone(&source) as Arc<dyn TaskSource>,
        Arc::clone(&state),
        3,
    )?;
    let completed = runner.finish()?;
    assert_eq!(completed.len(), 600);

    ingest.stop();
    let ingested = ingest.finish()?;
    assert!(ingested > 0, "ingest made no progress during the run");
    reopen.stop();

    // A final explicit refresh publishes everything that was applied.
    handle.refresh()?;
    let view = handle.acquire()?;
    assert_eq!(view.doc_count(), ingested);
    drop(view);

    assert_eq!(handle.outstanding(), 0);
    assert!(handle.generation() >= 2, "reopen never published");

    state.close();
    Ok(())
}

#[test]
fn test_reader_holds_old_view_across_publishes() -> Result<()> {
    let docs = line_docs(50)?;
    let store = Arc::new(MemStore::new(Arc::new(analysis::StandardAnalyzer), None));
    let feed = LineDocSource::open(docs.path(), false, false)?;

    let mut ctx = DocContext::default();
    for _ in 0..10 {
        let record = feed.next_record(&mut ctx)?.unwrap();
        store.add_document(&record)?;
    }
    let handle: Arc<ResourceHandle<StoreView>> =
        Arc::new(ResourceHandle::new(Box::new(Arc::clone(&store)))?);

    let old = handle.acquire()?;
    assert_eq!(old.doc_count(), 10);

    for _ in 0..10 {
        let record = feed.next_record(&mut ctx)?.unwrap();
        store.add_document(&record)?;
    }
    assert!(handle.refresh()?);

    // The held guard still reads the superseded snapshot.
    assert_eq!(old.doc_count(), 10);
    assert_eq!(handle.acquire()?.doc_count(), 20);
    drop(old);

    handle.close();
    Ok(())
}

#[test]
fn test_rate_limited_pool_tracks_target() -> Result<()> {
    let docs = line_docs(100)?;
    let store = Arc::new(MemStore::new(Arc::new(analysis::StandardAnalyzer), None));
    let feed = Arc::new(LineDocSource::open(docs.path(), true, false)?);

    let rate = 100.0;
    let pool = IngestWorkerPool::start(
        feed as Arc<dyn RecordSource>,
        Arc::clone(&store) as Arc<dyn StoreWriter>,
        IngestConfig {
            thread_count: 1,
            docs_per_sec_per_thread: rate,
            max_docs: None,
        },
    )?;
    let duration = Duration::from_millis(1200);
    std::thread::sleep(duration);
    pool.stop();
    let total = pool.finish()? as f64;

    let expected = rate * duration.as_secs_f64();
    assert!(
        total > expected * 0.5 && total < expected * 1.5,
        "expected about {expected} docs at {rate}/sec, got {total}"
    );
    Ok(())
}
