// Task line grammar
// One task per line, `Category: body`, shared by the local task file and the
// remote socket protocol. Two category names are structural: `PKLookup`
// bodies are primary keys, `Respell` bodies are a single term; anything else
// is a search whose body goes through the query grammar.

use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};

use crate::analysis::Analyzer;
use crate::linedocs::pk_to_int;
use crate::query::parse_query;
use crate::task::{Task, TaskOp};

pub const PK_CATEGORY: &str = "PKLookup";
pub const RESPELL_CATEGORY: &str = "Respell";

/// Parses task descriptor lines into [`Task`] values.
pub struct TaskParser {
    analyzer: Arc<dyn Analyzer>,
}

impl TaskParser {
    pub fn new(analyzer: Arc<dyn Analyzer>) -> Self {
        Self { analyzer }
    }

    /// Parse exactly one task from one line.
    ///
    /// A line missing the category delimiter or with an empty body is a
    /// malformed-input error, never skipped.
    pub fn parse_line(&self, line: &str) -> Result<Task> {
        let line = line.trim();
        let Some((category, body)) = line.split_once(':') else {
            bail!("task line is missing the 'Category:' delimiter: [{line}]");
        };
        let category = category.trim();
        let body = body.trim();
        ensure!(!category.is_empty(), "task line has an empty category: [{line}]");
        ensure!(!body.is_empty(), "task line has an empty body: [{line}]");

        let op = match category {
            PK_CATEGORY => {
                let keys: Vec<String> = body.split_whitespace().map(str::to_string).collect();
                for key in &keys {
                    pk_to_int(key)
                        .with_context(|| format!("bad primary key in task line: [{line}]"))?;
                }
                TaskOp::PkLookup { keys }
            }
            RESPELL_CATEGORY => {
                let terms = self.analyzer.analyze(body);
                ensure!(
                    terms.len() == 1,
                    "respell task must name exactly one term: [{line}]"
                );
                TaskOp::Respell {
                    term: terms.into_iter().next().unwrap(),
                }
            }
            _ => TaskOp::Search {
                text: body.to_string(),
                query: parse_query(body, self.analyzer.as_ref())
                    .with_context(|| format!("bad query in task line: [{line}]"))?,
            },
        };
        Ok(Task::new(category, op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::linedocs::int_to_pk;
    use crate::query::Query;

    fn parser() -> TaskParser {
        TaskParser::new(Arc::new(StandardAnalyzer))
    }

    #[test]
    fn test_search_line() {
        let task = parser().parse_line("HighTerm: united").unwrap();
        assert_eq!(task.category, "HighTerm");
        assert_eq!(
            task.op,
            TaskOp::Search {
                text: "united".to_string(),
                query: Query::Term("united".to_string()),
            }
        );
    }

    #[test]
    fn test_phrase_line() {
        let task = parser().parse_line("Phrase: \"united states\"").unwrap();
        match task.op {
            TaskOp::Search { query, .. } => {
                assert_eq!(query, Query::Phrase(vec!["united".into(), "states".into()]));
            }
            other => panic!("expected search, got {other:?}"),
        }
    }

    #[test]
    fn test_pk_lookup_line() {
        let line = format!("PKLookup: {} {}", int_to_pk(17), int_to_pk(42));
        let task = parser().parse_line(&line).unwrap();
        assert_eq!(
            task.op,
            TaskOp::PkLookup {
                keys: vec![int_to_pk(17), int_to_pk(42)],
            }
        );
    }

    #[test]
    fn test_bad_pk_is_fatal() {
        assert!(parser().parse_line("PKLookup: NOT-A-KEY").is_err());
    }

    #[test]
    fn test_respell_line() {
        let task = parser().parse_line("Respell: Untied").unwrap();
        assert_eq!(
            task.op,
            TaskOp::Respell {
                term: "untied".to_string()
            }
        );
    }

    #[test]
    fn test_missing_delimiter_is_fatal() {
        assert!(parser().parse_line("no delimiter here").is_err());
        assert!(parser().parse_line("Category:   ").is_err());
        assert!(parser().parse_line(": body").is_err());
    }
}
