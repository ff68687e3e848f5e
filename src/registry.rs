// Strategy registries
// Explicit name -> factory maps for the swappable pieces (analyzer,
// similarity, store flavor), resolved once at startup. An unknown key is a
// configuration error carrying the known names, raised before any thread is
// spawned.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::analysis::{Analyzer, LowercaseAnalyzer, StandardAnalyzer, WhitespaceAnalyzer};
use crate::memstore::DEFAULT_MERGE_FACTOR;
use crate::query::{Bm25Similarity, CountSimilarity, Similarity, TfIdfSimilarity};

/// Name -> factory map with config-error lookups.
pub struct Registry<T> {
    what: &'static str,
    entries: BTreeMap<&'static str, fn() -> T>,
}

impl<T> Registry<T> {
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            entries: BTreeMap::new(),
        }
    }

    pub fn register(mut self, name: &'static str, factory: fn() -> T) -> Self {
        self.entries.insert(name, factory);
        self
    }

    /// Resolve a name to a constructed value.
    pub fn resolve(&self, name: &str) -> Result<T> {
        self.entries.get(name).map(|factory| factory()).ok_or_else(|| {
            anyhow!(
                "unknown {} '{}'; known: {}",
                self.what,
                name,
                self.entries.keys().copied().collect::<Vec<_>>().join(", ")
            )
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

/// Analyzers selectable from configuration.
pub fn analyzers() -> Registry<Arc<dyn Analyzer>> {
    Registry::new("analyzer")
        .register("standard", || Arc::new(StandardAnalyzer) as Arc<dyn Analyzer>)
        .register("whitespace", || Arc::new(WhitespaceAnalyzer) as Arc<dyn Analyzer>)
        .register("lowercase", || Arc::new(LowercaseAnalyzer) as Arc<dyn Analyzer>)
}

/// Similarities selectable from configuration.
pub fn similarities() -> Registry<Arc<dyn Similarity>> {
    Registry::new("similarity")
        .register("bm25", || Arc::new(Bm25Similarity::default()) as Arc<dyn Similarity>)
        .register("tfidf", || Arc::new(TfIdfSimilarity) as Arc<dyn Similarity>)
        .register("count", || Arc::new(CountSimilarity) as Arc<dyn Similarity>)
}

/// Store flavors selectable from configuration. The flavor fixes the
/// merge policy applied when views are republished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreFlavor {
    pub merge_factor: Option<usize>,
}

pub fn stores() -> Registry<StoreFlavor> {
    Registry::new("store")
        .register("memory", || StoreFlavor {
            merge_factor: Some(DEFAULT_MERGE_FACTOR),
        })
        .register("memory-nomerge", || StoreFlavor { merge_factor: None })
}
