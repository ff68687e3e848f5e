// ResourceHandle: acquire/release-counted holder of the current read view
// Readers acquire the published view without blocking behind each other or
// behind refresh; refresh atomically swaps in a new view and the superseded
// one tears down when its last holder drops it.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::debug;

use crate::contracts::ViewRefresher;

/// Reference-counted holder of the current version of a read-only view.
///
/// # Contract
/// - `acquire` never blocks the caller behind another acquirer and observes
///   every `refresh` that completed before it started
/// - release is exactly-once on every exit path: it happens in
///   [`ViewGuard::drop`], including during panics
/// - a superseded view is dropped only after its last outstanding guard is
///   gone (the `Arc` inside the guard owns it)
/// - `close` is idempotent, waits for outstanding guards to settle to zero,
///   and then drops the final view
pub struct ResourceHandle<V: Send + Sync + 'static> {
    current: ArcSwapOption<V>,
    refresher: Box<dyn ViewRefresher<V>>,
    // Serializes refresh/close against each other; acquire never takes it.
    swap_lock: Mutex<()>,
    outstanding: Arc<AtomicUsize>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl<V: Send + Sync + 'static> ResourceHandle<V> {
    /// Build the handle and publish the initial view from `refresher`.
    pub fn new(refresher: Box<dyn ViewRefresher<V>>) -> Result<Self> {
        let initial = refresher.open().context("failed to open initial view")?;
        Ok(Self {
            current: ArcSwapOption::from(Some(Arc::new(initial))),
            refresher,
            swap_lock: Mutex::new(()),
            outstanding: Arc::new(AtomicUsize::new(0)),
            generation: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Acquire the current view.
    ///
    /// The returned guard releases on drop; callers never release manually.
    pub fn acquire(&self) -> Result<ViewGuard<V>> {
        // Count first so a concurrent close() observes this acquire.
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        match self.current.load_full() {
            Some(view) => Ok(ViewGuard {
                view,
                outstanding: Arc::clone(&self.outstanding),
            }),
            None => {
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
                bail!("resource handle is closed; acquire after close is a contract violation");
            }
        }
    }

    /// Attempt to publish a new view. Returns whether one was published.
    ///
    /// On refresher failure the currently published view stays untouched and
    /// keeps serving readers; the error propagates to the caller.
    pub fn refresh(&self) -> Result<bool> {
        let _guard = self.swap_lock.lock();
        if self.closed.load(Ordering::Acquire) {
            bail!("resource handle is closed; refusing to refresh");
        }
        let current = self
            .current
            .load_full()
            .expect("open handle always has a published view");
        match self.refresher.refresh(&current)? {
            Some(next) => {
                self.current.store(Some(Arc::new(next)));
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(generation, "published new view");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Generation of the currently published view; bumps on every publish.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of guards currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Close the handle: idempotent, waits for outstanding guards to drain,
    /// then drops the final view. Subsequent acquires fail.
    pub fn close(&self) {
        {
            let _guard = self.swap_lock.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            self.current.store(None);
        }
        while self.outstanding.load(Ordering::Acquire) > 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        debug!("resource handle closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<V: Send + Sync + 'static> Drop for ResourceHandle<V> {
    fn drop(&mut self) {
        // Guards hold their own Arc<V>, so dropping the handle early never
        // invalidates a view a reader still holds.
        self.closed.store(true, Ordering::Release);
    }
}

/// RAII guard over an acquired view. Dereferences to the view; releases the
/// acquire on drop, exactly once, on every exit path.
pub struct ViewGuard<V> {
    view: Arc<V>,
    outstanding: Arc<AtomicUsize>,
}

impl<V> Deref for ViewGuard<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.view
    }
}

impl<V> Drop for ViewGuard<V> {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}
