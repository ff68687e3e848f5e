// ReopenLoop: background thread that republishes the read view on a fixed
// cadence. Wake times are computed from the loop start (start + k * cadence),
// not from the previous wake, so scheduling jitter never accumulates.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::contracts::ViewInfo;
use crate::observability::{bump, Counter};
use crate::resource::ResourceHandle;

/// Minimum sleep between ticks; keeps a tiny cadence from busy-spinning.
const MIN_SLEEP: Duration = Duration::from_millis(100);

/// Handle to the running reopen thread.
///
/// The loop only reads and publishes, never mutates business data, so run
/// correctness does not depend on stopping it; `stop` exists so the binary
/// and tests can join cleanly.
pub struct ReopenLoop {
    stop: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl ReopenLoop {
    /// Start the loop over `handle`, refreshing every `cadence`.
    pub fn start<V>(handle: Arc<ResourceHandle<V>>, cadence: Duration) -> Result<Self>
    where
        V: ViewInfo + Send + Sync + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU64::new(0));
        let thread = {
            let stop = Arc::clone(&stop);
            let ticks = Arc::clone(&ticks);
            std::thread::Builder::new()
                .name("reopen".into())
                .spawn(move || run_loop(&handle, cadence, &stop, &ticks))
                .context("failed to spawn reopen thread")?
        };
        info!(cadence_sec = cadence.as_secs_f64(), "reopen loop started");
        Ok(Self {
            stop,
            ticks,
            thread: Some(thread),
        })
    }

    /// Refresh attempts made so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Signal the loop to stop and join it.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ReopenLoop {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_loop<V>(
    handle: &ResourceHandle<V>,
    cadence: Duration,
    stop: &AtomicBool,
    ticks: &AtomicU64,
) where
    V: ViewInfo + Send + Sync + 'static,
{
    let start = Instant::now();
    let mut tick: u32 = 1;
    loop {
        // Absolute schedule: the k-th wake aims at start + k * cadence.
        let next = start + cadence * tick;
        let sleep = next.saturating_duration_since(Instant::now()).max(MIN_SLEEP);
        std::thread::sleep(sleep);
        if stop.load(Ordering::Acquire) {
            break;
        }

        ticks.fetch_add(1, Ordering::AcqRel);
        bump(Counter::RefreshAttempts, 1);
        match handle.refresh() {
            Ok(published) => {
                if published {
                    bump(Counter::RefreshesPublished, 1);
                }
                match handle.acquire() {
                    Ok(view) => info!(
                        t_sec = start.elapsed().as_secs_f64(),
                        docs = view.doc_count(),
                        bytes = view.size_bytes(),
                        published,
                        "reopen tick"
                    ),
                    Err(_) => break,
                }
            }
            Err(err) => {
                // The previously published view keeps serving; report and
                // keep the cadence going.
                warn!("refresh failed, keeping current view: {:#}", err);
            }
        }
        tick += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ViewRefresher;
    use parking_lot::Mutex;

    struct TickView(u64);

    impl ViewInfo for TickView {
        fn doc_count(&self) -> u64 {
            self.0
        }
        fn size_bytes(&self) -> u64 {
            self.0 * 100
        }
    }

    struct TickRefresher(Arc<Mutex<u64>>);

    impl ViewRefresher<TickView> for TickRefresher {
        fn open(&self) -> Result<TickView> {
            Ok(TickView(*self.0.lock()))
        }
        fn refresh(&self, current: &TickView) -> Result<Option<TickView>> {
            let now = *self.0.lock();
            if now == current.0 {
                Ok(None)
            } else {
                Ok(Some(TickView(now)))
            }
        }
    }

    #[test]
    fn test_tick_count_tracks_cadence() {
        let value = Arc::new(Mutex::new(0u64));
        let handle = Arc::new(
            ResourceHandle::new(Box::new(TickRefresher(Arc::clone(&value)))).unwrap(),
        );
        let cadence = Duration::from_millis(120);
        let reopen = ReopenLoop::start(Arc::clone(&handle), cadence).unwrap();

        // Over ~4 cadences the loop must fire floor(D/C) times, within one
        // tick of slack for scheduling noise on a loaded host.
        std::thread::sleep(cadence * 4 + Duration::from_millis(30));
        let ticks = reopen.ticks();
        reopen.stop();
        assert!(
            (3..=5).contains(&ticks),
            "expected about 4 ticks, got {ticks}"
        );
    }

    #[test]
    fn test_tick_publishes_after_mutation() {
        let value = Arc::new(Mutex::new(0u64));
        let handle = Arc::new(
            ResourceHandle::new(Box::new(TickRefresher(Arc::clone(&value)))).unwrap(),
        );
        let reopen = ReopenLoop::start(Arc::clone(&handle), Duration::from_millis(110)).unwrap();

        *value.lock() = 42;
        std::thread::sleep(Duration::from_millis(400));
        reopen.stop();

        assert_eq!(handle.acquire().unwrap().doc_count(), 42);
        assert!(handle.generation() >= 2);
    }
}
