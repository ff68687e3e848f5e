// Spell-check collaborator
// Direct edit-distance respelling against a view's term dictionary. Ranking
// is fully ordered (distance, then frequency, then term) so repeated respell
// tasks checksum identically on the same view.

use crate::memstore::StoreView;

/// A respell candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub term: String,
    pub distance: u32,
    pub doc_freq: u64,
}

/// Edit-distance spell checker over the indexed terms.
pub struct SpellChecker {
    pub max_distance: u32,
    pub max_suggestions: usize,
    /// Candidates must share this many leading chars with the input.
    pub min_prefix: usize,
}

impl Default for SpellChecker {
    fn default() -> Self {
        Self {
            max_distance: 2,
            max_suggestions: 5,
            min_prefix: 1,
        }
    }
}

impl SpellChecker {
    /// Suggest respellings of `input` from the view's term dictionary.
    pub fn suggest(&self, view: &StoreView, input: &str) -> Vec<Suggestion> {
        let prefix: String = input.chars().take(self.min_prefix).collect();
        let mut candidates: Vec<Suggestion> = Vec::new();

        for (term, doc_freq) in view.term_doc_freqs() {
            if term == input || !term.starts_with(&prefix) {
                continue;
            }
            // Cheap length gate before the DP.
            let len_delta = term.len().abs_diff(input.len());
            if len_delta > self.max_distance as usize {
                continue;
            }
            let distance = levenshtein(input, term);
            if distance <= self.max_distance {
                candidates.push(Suggestion {
                    term: term.to_string(),
                    distance,
                    doc_freq,
                });
            }
        }

        candidates.sort_by(|a, b| {
            a.distance
                .cmp(&b.distance)
                .then_with(|| b.doc_freq.cmp(&a.doc_freq))
                .then_with(|| a.term.cmp(&b.term))
        });
        candidates.truncate(self.max_suggestions);
        candidates
    }
}

fn levenshtein(a: &str, b: &str) -> u32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<u32> = (0..=b.len() as u32).collect();
    let mut row = vec![0u32; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        row[0] = i as u32 + 1;
        for (j, &cb) in b.iter().enumerate() {
            let subst = prev[j] + u32::from(ca != cb);
            row[j + 1] = subst.min(prev[j + 1] + 1).min(row[j] + 1);
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}
