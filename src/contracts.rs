// Contracts for the benchmark core
// The narrow interfaces the concurrent engine calls through: producing and
// refreshing read views, feeding raw records, and applying mutations. The
// engine never sees past these traits; the default collaborators live in
// `memstore` and `linedocs`.

use anyhow::{ensure, Result};

/// Produces read views of the underlying mutable store.
///
/// Two implementations exist by construction rather than by override
/// dispatch: a live one backed by the store, and [`StaticRefresher`] whose
/// refresh is a no-op for runs against a frozen index.
pub trait ViewRefresher<V>: Send + Sync {
    /// Build the initial view.
    ///
    /// # Postconditions
    /// - The returned view reflects every mutation applied before the call
    fn open(&self) -> Result<V>;

    /// Attempt to build a view newer than `current`.
    ///
    /// Returns `Ok(None)` when nothing changed since `current` was built.
    /// On error the caller must keep serving `current`.
    fn refresh(&self, current: &V) -> Result<Option<V>>;
}

impl<V, T: ViewRefresher<V> + ?Sized> ViewRefresher<V> for std::sync::Arc<T> {
    fn open(&self) -> Result<V> {
        (**self).open()
    }

    fn refresh(&self, current: &V) -> Result<Option<V>> {
        (**self).refresh(current)
    }
}

/// Wraps any refresher and pins the initial view forever.
///
/// Used for runs against an index that is not being mutated; `refresh` is
/// always a no-op so the reopen cadence (if one is running) publishes
/// nothing.
pub struct StaticRefresher<R>(pub R);

impl<V, R: ViewRefresher<V>> ViewRefresher<V> for StaticRefresher<R> {
    fn open(&self) -> Result<V> {
        self.0.open()
    }

    fn refresh(&self, _current: &V) -> Result<Option<V>> {
        Ok(None)
    }
}

/// Size and population facts a view can report about itself, logged by the
/// reopen loop after each publish.
pub trait ViewInfo {
    fn doc_count(&self) -> u64;
    fn size_bytes(&self) -> u64;
}

/// One raw record pulled from a document feed, ready to be applied to the
/// store. Field population happens in the feed, not in the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DocRecord {
    /// Primary key, base-36, fixed width.
    pub pk: String,
    /// Ordinal assigned by the feed in hand-out order.
    pub ord: u64,
    pub title: String,
    pub date: String,
    /// Milliseconds since epoch parsed from `date`.
    pub date_msec: i64,
    /// Seconds since local midnight parsed from `date`.
    pub time_sec: u32,
    pub body: String,
    /// Taxonomy paths, e.g. `["Date", "2006", "10", "13"]`.
    pub facet_paths: Vec<Vec<String>>,
}

/// Per-worker scratch state for record parsing.
///
/// Passed explicitly into every `next_record` call; never shared across
/// workers, so the feed needs no thread-local lookup.
#[derive(Debug, Default)]
pub struct DocContext {
    /// Reusable buffer for facet path segments.
    pub path_buf: Vec<String>,
    /// Records parsed through this context.
    pub parsed: u64,
}

/// A shared feed of raw records.
///
/// # Contract
/// - Safe to call from many ingest workers concurrently
/// - Every record is handed to exactly one caller
/// - `Ok(None)` means the feed is exhausted (repeat mode off)
/// - A malformed record is an error, never silently skipped
pub trait RecordSource: Send + Sync {
    fn next_record(&self, ctx: &mut DocContext) -> Result<Option<DocRecord>>;

    /// Total raw bytes handed out so far.
    fn bytes_read(&self) -> u64;
}

/// The mutable side of the store, written by ingest workers.
///
/// # Contract
/// - `add_document` may be called from many workers concurrently
/// - Mutations never become visible to readers until the next published view
pub trait StoreWriter: Send + Sync {
    fn add_document(&self, record: &DocRecord) -> Result<()>;
}

/// Runtime validation helpers for the resolved configuration surface.
pub mod validation {
    use super::*;

    pub fn validate_thread_count(what: &str, count: usize) -> Result<()> {
        ensure!(count > 0, "{} thread count must be positive, got {}", what, count);
        ensure!(count <= 4096, "{} thread count {} is unreasonably large", what, count);
        Ok(())
    }

    pub fn validate_reopen_cadence(seconds: f64) -> Result<()> {
        ensure!(
            seconds.is_finite() && seconds > 0.0,
            "reopen cadence must be a positive number of seconds, got {}",
            seconds
        );
        Ok(())
    }

    pub fn validate_field_name(field: &str) -> Result<()> {
        ensure!(!field.is_empty(), "field name cannot be empty");
        ensure!(
            field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
            "field name '{}' contains invalid characters",
            field
        );
        Ok(())
    }
}
