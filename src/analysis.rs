// Analyzers: text -> index terms
// Selected by name through the registry; the same analyzer instance is used
// at ingest time and at query-parse time so terms line up.

/// Tokenizes text into index terms.
pub trait Analyzer: Send + Sync + std::fmt::Debug {
    fn analyze(&self, text: &str) -> Vec<String>;

    fn name(&self) -> &'static str;
}

/// Splits on non-alphanumeric boundaries and lowercases.
#[derive(Debug)]
pub struct StandardAnalyzer;

impl Analyzer for StandardAnalyzer {
    fn analyze(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }

    fn name(&self) -> &'static str {
        "standard"
    }
}

/// Splits on whitespace only; preserves case.
#[derive(Debug)]
pub struct WhitespaceAnalyzer;

impl Analyzer for WhitespaceAnalyzer {
    fn analyze(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(|t| t.to_string()).collect()
    }

    fn name(&self) -> &'static str {
        "whitespace"
    }
}

/// Whitespace split plus lowercasing.
#[derive(Debug)]
pub struct LowercaseAnalyzer;

impl Analyzer for LowercaseAnalyzer {
    fn analyze(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(|t| t.to_lowercase()).collect()
    }

    fn name(&self) -> &'static str {
        "lowercase"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_splits_punctuation() {
        let terms = StandardAnalyzer.analyze("United-States, of America!");
        assert_eq!(terms, vec!["united", "states", "of", "america"]);
    }

    #[test]
    fn test_whitespace_preserves_case() {
        let terms = WhitespaceAnalyzer.analyze("United States");
        assert_eq!(terms, vec!["United", "States"]);
    }

    #[test]
    fn test_lowercase_folds_only_case() {
        let terms = LowercaseAnalyzer.analyze("United-States RULE");
        assert_eq!(terms, vec!["united-states", "rule"]);
    }
}
