// Structured queries and the narrow query-string grammar
// The engine only ever sees the parsed `Query`; the textual grammar here is
// the external-collaborator surface shared by local task files and the
// remote socket protocol.

use anyhow::{ensure, Result};

use crate::analysis::Analyzer;

/// A parsed, structured query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Single term match.
    Term(String),
    /// All terms adjacent, in order.
    Phrase(Vec<String>),
    /// Any term starting with the prefix.
    Prefix(String),
    /// Disjunction: any clause may match; scores sum.
    Or(Vec<Query>),
    /// Conjunction: every clause must match; scores sum.
    And(Vec<Query>),
}

impl Query {
    /// Canonical text form, used for structural task identity.
    pub fn canonical(&self) -> String {
        match self {
            Query::Term(t) => t.clone(),
            Query::Phrase(terms) => format!("\"{}\"", terms.join(" ")),
            Query::Prefix(p) => format!("{p}*"),
            Query::Or(clauses) => clauses
                .iter()
                .map(Query::canonical)
                .collect::<Vec<_>>()
                .join(" "),
            Query::And(clauses) => clauses
                .iter()
                .map(|c| format!("+{}", c.canonical()))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Parse free text into a [`Query`].
///
/// Grammar:
/// - `"a b c"` is a phrase
/// - a token with a trailing `*` is a prefix
/// - tokens all prefixed `+` form a conjunction
/// - otherwise tokens form a disjunction; a single token is a bare term
pub fn parse_query(text: &str, analyzer: &dyn Analyzer) -> Result<Query> {
    let trimmed = text.trim();
    ensure!(!trimmed.is_empty(), "query text cannot be empty");

    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        let terms = analyzer.analyze(&trimmed[1..trimmed.len() - 1]);
        ensure!(!terms.is_empty(), "phrase query '{}' has no terms", trimmed);
        return Ok(Query::Phrase(terms));
    }

    let raw: Vec<&str> = trimmed.split_whitespace().collect();
    let conjunction = raw.iter().all(|t| t.starts_with('+')) && !raw.is_empty();

    let mut clauses = Vec::with_capacity(raw.len());
    for token in raw {
        let token = token.strip_prefix('+').unwrap_or(token);
        if let Some(prefix) = token.strip_suffix('*') {
            let analyzed = analyzer.analyze(prefix);
            ensure!(
                analyzed.len() == 1,
                "prefix query '{}' must analyze to one term",
                token
            );
            clauses.push(Query::Prefix(analyzed.into_iter().next().unwrap()));
        } else {
            for term in analyzer.analyze(token) {
                clauses.push(Query::Term(term));
            }
        }
    }
    ensure!(!clauses.is_empty(), "query '{}' has no terms", trimmed);

    Ok(if clauses.len() == 1 {
        clauses.into_iter().next().unwrap()
    } else if conjunction {
        Query::And(clauses)
    } else {
        Query::Or(clauses)
    })
}

/// Ranking strategy for search hits. Implementations are selected by name
/// through the registry at startup.
pub trait Similarity: Send + Sync {
    /// Score one term's contribution to one document.
    fn score(&self, tf: f32, doc_len: f32, avg_doc_len: f32, doc_freq: u64, doc_count: u64)
        -> f32;

    fn name(&self) -> &'static str;
}

/// Raw term-frequency scoring.
pub struct CountSimilarity;

impl Similarity for CountSimilarity {
    fn score(&self, tf: f32, _dl: f32, _avg: f32, _df: u64, _n: u64) -> f32 {
        tf
    }

    fn name(&self) -> &'static str {
        "count"
    }
}

/// Classic tf-idf.
pub struct TfIdfSimilarity;

impl Similarity for TfIdfSimilarity {
    fn score(&self, tf: f32, _dl: f32, _avg: f32, doc_freq: u64, doc_count: u64) -> f32 {
        let idf = ((1.0 + doc_count as f32) / (1.0 + doc_freq as f32)).ln() + 1.0;
        tf.sqrt() * idf
    }

    fn name(&self) -> &'static str {
        "tfidf"
    }
}

/// BM25 with the standard k1/b defaults.
pub struct Bm25Similarity {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Similarity {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl Similarity for Bm25Similarity {
    fn score(&self, tf: f32, doc_len: f32, avg_doc_len: f32, doc_freq: u64, doc_count: u64) -> f32 {
        let n = doc_count as f32;
        let df = doc_freq as f32;
        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
        let avg = if avg_doc_len > 0.0 { avg_doc_len } else { 1.0 };
        let norm = self.k1 * (1.0 - self.b + self.b * doc_len / avg);
        idf * tf * (self.k1 + 1.0) / (tf + norm)
    }

    fn name(&self) -> &'static str {
        "bm25"
    }
}
