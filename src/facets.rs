// Facet taxonomy collaborator
// Counts taxonomy paths over the hits of a search, per configured group.
// Deterministic output ordering (BTreeMap over joined paths) so facet counts
// can feed the task checksum.

use std::collections::BTreeMap;

use crate::memstore::{Hit, StoreView};

/// Reads one taxonomy group (the leading path segment, e.g. `Date`) out of
/// the facet paths attached to documents at ingest time.
pub struct TaxonomyReader {
    group: String,
}

impl TaxonomyReader {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Count the facet paths of `hits` belonging to this group, keyed by the
    /// path below the group segment joined with `/`.
    pub fn count_hits(&self, view: &StoreView, hits: &[Hit]) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for hit in hits {
            let Some(doc) = view.doc(hit.doc) else { continue };
            for path in &doc.facet_paths {
                if path.first().map(String::as_str) == Some(self.group.as_str()) {
                    let key = path[1..].join("/");
                    *counts.entry(key).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    /// Nothing to release for the in-memory taxonomy; kept so IndexState can
    /// tear readers down uniformly.
    pub fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::contracts::{DocRecord, StoreWriter, ViewRefresher};
    use crate::linedocs::int_to_pk;
    use crate::memstore::MemStore;
    use std::sync::Arc;

    #[test]
    fn test_counts_group_paths_over_hits() {
        let store = MemStore::new(Arc::new(StandardAnalyzer), None);
        for (ord, day) in ["13", "13", "14"].iter().enumerate() {
            store
                .add_document(&DocRecord {
                    pk: int_to_pk(ord as u64),
                    ord: ord as u64,
                    title: String::new(),
                    date: String::new(),
                    date_msec: 0,
                    time_sec: 0,
                    body: "common".to_string(),
                    facet_paths: vec![vec![
                        "Date".to_string(),
                        "2006".to_string(),
                        "10".to_string(),
                        day.to_string(),
                    ]],
                })
                .unwrap();
        }
        let view = store.open().unwrap();
        let hits: Vec<Hit> = (0..3).map(|doc| Hit { doc, score: 1.0 }).collect();

        let reader = TaxonomyReader::new("Date");
        let counts = reader.count_hits(&view, &hits);
        assert_eq!(counts.get("2006/10/13"), Some(&2));
        assert_eq!(counts.get("2006/10/14"), Some(&1));

        // A different group sees nothing.
        let other = TaxonomyReader::new("Author");
        assert!(other.count_hits(&view, &hits).is_empty());
    }
}
