// IndexState: the immutable bundle of collaborators handed to every task
// Built once per run, shared read-only by all search workers, torn down at
// run end (taxonomy readers first, then the resource handle).

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;

use crate::contracts::validation;
use crate::facets::TaxonomyReader;
use crate::memstore::StoreView;
use crate::query::Similarity;
use crate::resource::ResourceHandle;
use crate::spell::SpellChecker;

/// Immutable aggregate injected into every task at execution time.
pub struct IndexState {
    pub handle: Arc<ResourceHandle<StoreView>>,
    /// Primary indexed field name, carried for reporting.
    pub field: String,
    pub similarity: Arc<dyn Similarity>,
    pub spell: SpellChecker,
    /// Taxonomy readers keyed by group name.
    pub taxonomies: BTreeMap<String, TaxonomyReader>,
}

impl IndexState {
    pub fn new(
        handle: Arc<ResourceHandle<StoreView>>,
        field: impl Into<String>,
        similarity: Arc<dyn Similarity>,
        facet_groups: &[String],
    ) -> Result<Self> {
        let field = field.into();
        validation::validate_field_name(&field)?;
        let taxonomies = facet_groups
            .iter()
            .map(|group| (group.clone(), TaxonomyReader::new(group.clone())))
            .collect();
        Ok(Self {
            handle,
            field,
            similarity,
            spell: SpellChecker::default(),
            taxonomies,
        })
    }

    /// Tear down the run's read side: taxonomy readers, then the handle
    /// (which waits for outstanding acquires to settle).
    pub fn close(&self) {
        for taxonomy in self.taxonomies.values() {
            taxonomy.close();
        }
        self.handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::memstore::MemStore;
    use crate::query::CountSimilarity;

    fn state_over_empty_store(field: &str) -> Result<IndexState> {
        let store = MemStore::new(Arc::new(StandardAnalyzer), None);
        let handle = Arc::new(ResourceHandle::new(Box::new(store))?);
        IndexState::new(handle, field, Arc::new(CountSimilarity), &[])
    }

    #[test]
    fn test_invalid_field_rejected() {
        assert!(state_over_empty_store("").is_err());
        assert!(state_over_empty_store("bo dy").is_err());
    }

    #[test]
    fn test_close_drains_handle() {
        let state = state_over_empty_store("body").unwrap();
        let guard = state.handle.acquire().unwrap();
        drop(guard);
        state.close();
        assert!(state.handle.acquire().is_err());
    }

    #[test]
    fn test_taxonomies_keyed_by_group() {
        let store = MemStore::new(Arc::new(StandardAnalyzer), None);
        let handle = Arc::new(ResourceHandle::new(Box::new(store)).unwrap());
        let state = IndexState::new(
            handle,
            "body",
            Arc::new(CountSimilarity),
            &["Date".to_string()],
        )
        .unwrap();
        assert!(state.taxonomies.contains_key("Date"));
        assert_eq!(state.taxonomies["Date"].group(), "Date");
    }
}
