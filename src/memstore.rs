// In-memory segmented store
// The default mutable store behind the harness: ingest workers append into an
// active segment under a lock; refresh seals the active segment and publishes
// an immutable view over the sealed list. Readers holding older views keep
// their segments alive through the Arcs inside the view.

use std::collections::HashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use tracing::debug;

use crate::analysis::Analyzer;
use crate::contracts::{DocRecord, StoreWriter, ViewInfo, ViewRefresher};
use crate::observability::{bump, Counter};
use crate::query::{Query, Similarity};

/// Sealed segments are merged into one whenever their count reaches this,
/// keeping per-query segment fan-out bounded during long NRT runs.
pub const DEFAULT_MERGE_FACTOR: usize = 10;

/// Per-document metadata retained in a segment.
#[derive(Debug, Clone)]
pub struct DocMeta {
    pub pk: String,
    pub ord: u64,
    pub title: String,
    pub date_msec: i64,
    pub time_sec: u32,
    pub facet_paths: Vec<Vec<String>>,
    /// Token count of the indexed field.
    pub len: u32,
}

#[derive(Debug, Clone)]
struct Posting {
    doc: u32,
    positions: Vec<u32>,
}

/// One immutable segment: local doc ids 0..docs.len(), global ids offset by
/// `base`.
pub struct Segment {
    base: u32,
    postings: BTreeMap<String, Vec<Posting>>,
    pks: HashMap<String, u32>,
    docs: Vec<DocMeta>,
    bytes: u64,
    tokens: u64,
}

impl Segment {
    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }
}

/// A hit returned by a view search.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub doc: u32,
    pub score: f32,
}

/// Search result: total match count plus the top hits in score order.
#[derive(Debug, Clone, Default)]
pub struct TopHits {
    pub total_hits: u64,
    pub hits: Vec<Hit>,
}

/// Immutable snapshot of the store, safe for concurrent reads while ingest
/// keeps mutating the store behind it.
pub struct StoreView {
    segments: Vec<Arc<Segment>>,
    generation: u64,
    total_docs: u64,
    total_tokens: u64,
    total_bytes: u64,
}

impl StoreView {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn avg_doc_len(&self) -> f32 {
        if self.total_docs == 0 {
            0.0
        } else {
            self.total_tokens as f32 / self.total_docs as f32
        }
    }

    /// Document frequency of a term across all segments.
    fn doc_freq(&self, term: &str) -> u64 {
        self.segments
            .iter()
            .map(|s| s.postings.get(term).map_or(0, |p| p.len() as u64))
            .sum()
    }

    /// Execute a query, returning the top `limit` hits ordered by
    /// (score desc, doc id asc). Deterministic for a fixed view.
    pub fn search(&self, query: &Query, sim: &dyn Similarity, limit: usize) -> TopHits {
        let mut scores: HashMap<u32, f32> = HashMap::new();
        self.collect(query, sim, &mut scores);

        let mut hits: Vec<Hit> = scores
            .into_iter()
            .map(|(doc, score)| Hit { doc, score })
            .collect();
        let total_hits = hits.len() as u64;
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc.cmp(&b.doc))
        });
        hits.truncate(limit);
        TopHits { total_hits, hits }
    }

    fn collect(&self, query: &Query, sim: &dyn Similarity, scores: &mut HashMap<u32, f32>) {
        match query {
            Query::Term(term) => {
                let df = self.doc_freq(term);
                for segment in &self.segments {
                    if let Some(postings) = segment.postings.get(term) {
                        for posting in postings {
                            let doc = segment.base + posting.doc;
                            let dl = segment.docs[posting.doc as usize].len as f32;
                            let score = sim.score(
                                posting.positions.len() as f32,
                                dl,
                                self.avg_doc_len(),
                                df,
                                self.total_docs,
                            );
                            *scores.entry(doc).or_insert(0.0) += score;
                        }
                    }
                }
            }
            Query::Prefix(prefix) => {
                // Expand against each segment's sorted term dictionary.
                let mut expanded: Vec<String> = Vec::new();
                for segment in &self.segments {
                    for term in segment
                        .postings
                        .range(prefix.clone()..)
                        .map(|(t, _)| t)
                        .take_while(|t| t.starts_with(prefix.as_str()))
                    {
                        if !expanded.iter().any(|t| t == term) {
                            expanded.push(term.clone());
                        }
                    }
                }
                for term in expanded {
                    self.collect(&Query::Term(term), sim, scores);
                }
            }
            Query::Phrase(terms) => {
                let df: u64 = terms.iter().map(|t| self.doc_freq(t)).min().unwrap_or(0);
                for segment in &self.segments {
                    segment.collect_phrase(terms, |doc, tf| {
                        let dl = segment.docs[doc as usize].len as f32;
                        let score = sim.score(
                            tf as f32,
                            dl,
                            self.avg_doc_len(),
                            df,
                            self.total_docs,
                        );
                        *scores.entry(segment.base + doc).or_insert(0.0) += score;
                    });
                }
            }
            Query::Or(clauses) => {
                for clause in clauses {
                    self.collect(clause, sim, scores);
                }
            }
            Query::And(clauses) => {
                let mut merged: Option<HashMap<u32, f32>> = None;
                for clause in clauses {
                    let mut clause_scores = HashMap::new();
                    self.collect(clause, sim, &mut clause_scores);
                    merged = Some(match merged {
                        None => clause_scores,
                        Some(prev) => prev
                            .into_iter()
                            .filter_map(|(doc, score)| {
                                clause_scores.get(&doc).map(|s| (doc, score + s))
                            })
                            .collect(),
                    });
                }
                for (doc, score) in merged.unwrap_or_default() {
                    *scores.entry(doc).or_insert(0.0) += score;
                }
            }
        }
    }

    /// Look up a primary key. Returns the global doc id, `None` on a miss.
    ///
    /// A key present in more than one segment means the store broke its
    /// append-only contract, which is exactly the kind of concurrency bug
    /// this harness exists to catch.
    pub fn lookup_pk(&self, pk: &str) -> Result<Option<u32>> {
        let mut found: Option<u32> = None;
        for segment in &self.segments {
            if let Some(&local) = segment.pks.get(pk) {
                if let Some(prev) = found {
                    bail!(
                        "primary key {pk} found in more than one segment (docs {prev} and {})",
                        segment.base + local
                    );
                }
                found = Some(segment.base + local);
            }
        }
        Ok(found)
    }

    /// Metadata for a global doc id.
    pub fn doc(&self, doc: u32) -> Option<&DocMeta> {
        for segment in &self.segments {
            let local = doc.wrapping_sub(segment.base);
            if (local as usize) < segment.docs.len() && doc >= segment.base {
                return Some(&segment.docs[local as usize]);
            }
        }
        None
    }

    /// Aggregated document frequency per term, in term order. Feeds the
    /// spell checker's candidate scan.
    pub fn term_doc_freqs(&self) -> BTreeMap<&str, u64> {
        let mut freqs: BTreeMap<&str, u64> = BTreeMap::new();
        for segment in &self.segments {
            for (term, postings) in &segment.postings {
                *freqs.entry(term.as_str()).or_insert(0) += postings.len() as u64;
            }
        }
        freqs
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl ViewInfo for StoreView {
    fn doc_count(&self) -> u64 {
        self.total_docs
    }

    fn size_bytes(&self) -> u64 {
        self.total_bytes
    }
}

impl Segment {
    fn collect_phrase(&self, terms: &[String], mut on_match: impl FnMut(u32, u32)) {
        if terms.is_empty() {
            return;
        }
        let per_term: Option<Vec<&Vec<Posting>>> =
            terms.iter().map(|t| self.postings.get(t)).collect();
        let Some(per_term) = per_term else { return };

        // Walk candidate docs from the rarest-first term's postings.
        for first in per_term[0] {
            let doc = first.doc;
            let rest: Option<Vec<&Posting>> = per_term[1..]
                .iter()
                .map(|ps| ps.iter().find(|p| p.doc == doc))
                .collect();
            let Some(rest) = rest else { continue };

            let mut tf = 0u32;
            for &start in &first.positions {
                let sequential = rest
                    .iter()
                    .enumerate()
                    .all(|(i, p)| p.positions.contains(&(start + 1 + i as u32)));
                if sequential {
                    tf += 1;
                }
            }
            if tf > 0 {
                on_match(doc, tf);
            }
        }
    }
}

struct SegmentBuilder {
    postings: BTreeMap<String, Vec<Posting>>,
    pks: HashMap<String, u32>,
    docs: Vec<DocMeta>,
    bytes: u64,
    tokens: u64,
}

impl SegmentBuilder {
    fn new() -> Self {
        Self {
            postings: BTreeMap::new(),
            pks: HashMap::new(),
            docs: Vec::new(),
            bytes: 0,
            tokens: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn add(&mut self, record: &DocRecord, terms: Vec<String>) -> Result<()> {
        let local = self.docs.len() as u32;
        if self.pks.insert(record.pk.clone(), local).is_some() {
            bail!("duplicate primary key within one segment: {}", record.pk);
        }
        for (position, term) in terms.iter().enumerate() {
            let postings = self.postings.entry(term.clone()).or_default();
            match postings.last_mut() {
                Some(last) if last.doc == local => last.positions.push(position as u32),
                _ => postings.push(Posting {
                    doc: local,
                    positions: vec![position as u32],
                }),
            }
        }
        self.bytes += (record.title.len() + record.body.len()) as u64;
        self.tokens += terms.len() as u64;
        self.docs.push(DocMeta {
            pk: record.pk.clone(),
            ord: record.ord,
            title: record.title.clone(),
            date_msec: record.date_msec,
            time_sec: record.time_sec,
            facet_paths: record.facet_paths.clone(),
            len: terms.len() as u32,
        });
        Ok(())
    }

    fn seal(&mut self, base: u32) -> Segment {
        let built = std::mem::replace(self, SegmentBuilder::new());
        Segment {
            base,
            postings: built.postings,
            pks: built.pks,
            docs: built.docs,
            bytes: built.bytes,
            tokens: built.tokens,
        }
    }
}

struct StoreInner {
    sealed: Vec<Arc<Segment>>,
    active: SegmentBuilder,
    generation: u64,
    docs_sealed: u64,
}

/// The mutable store: concurrent appends, snapshot views on demand.
pub struct MemStore {
    analyzer: Arc<dyn Analyzer>,
    merge_factor: Option<usize>,
    inner: Mutex<StoreInner>,
}

impl MemStore {
    pub fn new(analyzer: Arc<dyn Analyzer>, merge_factor: Option<usize>) -> Self {
        Self {
            analyzer,
            merge_factor,
            inner: Mutex::new(StoreInner {
                sealed: Vec::new(),
                active: SegmentBuilder::new(),
                generation: 0,
                docs_sealed: 0,
            }),
        }
    }

    pub fn analyzer(&self) -> &dyn Analyzer {
        self.analyzer.as_ref()
    }

    /// Seal pending docs (if any), maybe merge, and build a view.
    fn snapshot(&self) -> StoreView {
        let mut inner = self.inner.lock();
        if !inner.active.is_empty() {
            let base = inner.docs_sealed as u32;
            let segment = inner.active.seal(base);
            inner.docs_sealed += segment.doc_count() as u64;
            inner.sealed.push(Arc::new(segment));
            inner.generation += 1;

            if let Some(factor) = self.merge_factor {
                if inner.sealed.len() >= factor {
                    let merged = merge_segments(&inner.sealed);
                    debug!(
                        segments = inner.sealed.len(),
                        docs = merged.doc_count(),
                        "merged sealed segments"
                    );
                    inner.sealed = vec![Arc::new(merged)];
                    inner.generation += 1;
                }
            }
        }
        build_view(&inner)
    }
}

fn build_view(inner: &StoreInner) -> StoreView {
    StoreView {
        segments: inner.sealed.clone(),
        generation: inner.generation,
        total_docs: inner.docs_sealed,
        total_tokens: inner.sealed.iter().map(|s| s.tokens).sum(),
        total_bytes: inner.sealed.iter().map(|s| s.bytes).sum(),
    }
}

fn merge_segments(sealed: &[Arc<Segment>]) -> Segment {
    let base = sealed.first().map_or(0, |s| s.base);
    let mut postings: BTreeMap<String, Vec<Posting>> = BTreeMap::new();
    let mut pks = HashMap::new();
    let mut docs = Vec::new();
    let mut bytes = 0;
    let mut tokens = 0;

    for segment in sealed {
        let offset = segment.base - base;
        for (term, term_postings) in &segment.postings {
            let merged = postings.entry(term.clone()).or_default();
            merged.extend(term_postings.iter().map(|p| Posting {
                doc: p.doc + offset,
                positions: p.positions.clone(),
            }));
        }
        for (pk, &local) in &segment.pks {
            pks.insert(pk.clone(), local + offset);
        }
        docs.extend(segment.docs.iter().cloned());
        bytes += segment.bytes;
        tokens += segment.tokens;
    }

    Segment {
        base,
        postings,
        pks,
        docs,
        bytes,
        tokens,
    }
}

impl StoreWriter for MemStore {
    fn add_document(&self, record: &DocRecord) -> Result<()> {
        // Tokenize outside the lock; only the append itself serializes.
        let terms = self.analyzer.analyze(&record.body);
        let mut inner = self.inner.lock();
        inner.active.add(record, terms)?;
        drop(inner);
        bump(Counter::DocsIngested, 1);
        Ok(())
    }
}

impl ViewRefresher<StoreView> for MemStore {
    fn open(&self) -> Result<StoreView> {
        Ok(self.snapshot())
    }

    fn refresh(&self, current: &StoreView) -> Result<Option<StoreView>> {
        {
            let inner = self.inner.lock();
            if inner.active.is_empty() && inner.generation == current.generation() {
                return Ok(None);
            }
        }
        Ok(Some(self.snapshot()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::linedocs::int_to_pk;
    use crate::query::{parse_query, CountSimilarity};

    fn record(ord: u64, title: &str, body: &str) -> DocRecord {
        DocRecord {
            pk: int_to_pk(ord),
            ord,
            title: title.to_string(),
            date: "13-OCT-2006 10:04:32".to_string(),
            date_msec: 0,
            time_sec: 0,
            body: body.to_string(),
            facet_paths: Vec::new(),
        }
    }

    fn store() -> MemStore {
        MemStore::new(Arc::new(StandardAnalyzer), Some(DEFAULT_MERGE_FACTOR))
    }

    #[test]
    fn test_docs_invisible_until_snapshot() {
        let store = store();
        let empty = store.open().unwrap();
        store.add_document(&record(0, "a", "hello world")).unwrap();
        assert_eq!(empty.doc_count(), 0);

        let refreshed = store.refresh(&empty).unwrap().unwrap();
        assert_eq!(refreshed.doc_count(), 1);
    }

    #[test]
    fn test_refresh_noop_without_changes() {
        let store = store();
        store.add_document(&record(0, "a", "hello")).unwrap();
        let view = store.open().unwrap();
        assert!(store.refresh(&view).unwrap().is_none());
    }

    #[test]
    fn test_term_search_across_segments() {
        let store = store();
        store.add_document(&record(0, "a", "hello world")).unwrap();
        let v1 = store.open().unwrap();
        store.add_document(&record(1, "b", "hello again")).unwrap();
        let v2 = store.refresh(&v1).unwrap().unwrap();
        assert_eq!(v2.segment_count(), 2);

        let query = parse_query("hello", &StandardAnalyzer).unwrap();
        let hits = v2.search(&query, &CountSimilarity, 10);
        assert_eq!(hits.total_hits, 2);
        assert_eq!(hits.hits.len(), 2);

        // Old view still sees one segment, one doc.
        let old_hits = v1.search(&query, &CountSimilarity, 10);
        assert_eq!(old_hits.total_hits, 1);
    }

    #[test]
    fn test_phrase_and_prefix() {
        let store = store();
        store
            .add_document(&record(0, "a", "united states of america"))
            .unwrap();
        store
            .add_document(&record(1, "b", "states united by treaty"))
            .unwrap();
        let view = store.open().unwrap();

        let phrase = parse_query("\"united states\"", &StandardAnalyzer).unwrap();
        let hits = view.search(&phrase, &CountSimilarity, 10);
        assert_eq!(hits.total_hits, 1);
        assert_eq!(hits.hits[0].doc, 0);

        let prefix = parse_query("unit*", &StandardAnalyzer).unwrap();
        let hits = view.search(&prefix, &CountSimilarity, 10);
        assert_eq!(hits.total_hits, 2);
    }

    #[test]
    fn test_and_requires_all_clauses() {
        let store = store();
        store.add_document(&record(0, "a", "red green")).unwrap();
        store.add_document(&record(1, "b", "red blue")).unwrap();
        let view = store.open().unwrap();

        let q = parse_query("+red +blue", &StandardAnalyzer).unwrap();
        let hits = view.search(&q, &CountSimilarity, 10);
        assert_eq!(hits.total_hits, 1);
        assert_eq!(hits.hits[0].doc, 1);
    }

    #[test]
    fn test_pk_lookup() {
        let store = store();
        store.add_document(&record(0, "a", "x")).unwrap();
        store.add_document(&record(1, "b", "y")).unwrap();
        let view = store.open().unwrap();

        assert_eq!(view.lookup_pk(&int_to_pk(1)).unwrap(), Some(1));
        assert_eq!(view.lookup_pk("zzzzzz").unwrap(), None);
    }

    #[test]
    fn test_merge_preserves_global_ids() {
        let store = MemStore::new(Arc::new(StandardAnalyzer), Some(2));
        store.add_document(&record(0, "a", "alpha")).unwrap();
        let v1 = store.open().unwrap();
        store.add_document(&record(1, "b", "beta")).unwrap();
        // Second seal reaches the merge factor and collapses to one segment.
        let v2 = store.refresh(&v1).unwrap().unwrap();
        assert_eq!(v2.segment_count(), 1);
        assert_eq!(v2.doc_count(), 2);
        assert_eq!(v2.lookup_pk(&int_to_pk(0)).unwrap(), Some(0));
        assert_eq!(v2.lookup_pk(&int_to_pk(1)).unwrap(), Some(1));
        assert_eq!(v2.doc(1).unwrap().title, "b");
    }
}
