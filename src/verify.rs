// Checksum cross-verification
// Runs strictly after every search worker has been joined; tasks sharing a
// structural identity must have produced identical checksums. A mismatch
// means a concurrency bug in the store, a nondeterministic task
// implementation, or view-visibility staleness — fatal either way.

use std::collections::HashMap;

use anyhow::Result;
use thiserror::Error;
use tracing::info;

use crate::task::{CompletedTask, TaskIdentity};

/// Fatal consistency violation: two structurally identical tasks produced
/// different checksums.
#[derive(Debug, Error)]
#[error(
    "task checksums diverged for identity {identity}:\nTASK:  {first}\nOTHER: {second}"
)]
pub struct ConsistencyError {
    pub identity: String,
    pub first: String,
    pub second: String,
}

/// Verify that every pair of identical tasks checksummed identically.
///
/// Single-threaded by design: callers must have joined all workers first,
/// and this must never be overlapped with still-running workers.
pub fn verify_checksums(completed: &[CompletedTask]) -> Result<()> {
    let mut seen: HashMap<TaskIdentity, &CompletedTask> = HashMap::new();
    let mut duplicates = 0usize;

    for task in completed {
        let identity = task.task.identity();
        match seen.get(&identity) {
            Some(other) => {
                duplicates += 1;
                if other.checksum != task.checksum {
                    return Err(ConsistencyError {
                        identity: identity.to_string(),
                        first: task.diagnostic(),
                        second: other.diagnostic(),
                    }
                    .into());
                }
            }
            None => {
                seen.insert(identity, task);
            }
        }
    }

    info!(
        tasks = completed.len(),
        identities = seen.len(),
        duplicates,
        "checksum verification passed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskOp};
    use std::sync::Arc;
    use std::time::Duration;

    fn completed(category: &str, term: &str, checksum: u32) -> CompletedTask {
        CompletedTask {
            task: Arc::new(Task::new(
                category,
                TaskOp::Respell {
                    term: term.to_string(),
                },
            )),
            checksum,
            elapsed: Duration::from_millis(1),
            thread: 0,
            summary: String::new(),
        }
    }

    #[test]
    fn test_matching_duplicates_pass() {
        let tasks = vec![
            completed("Respell", "untied", 7),
            completed("Respell", "untied", 7),
            completed("Respell", "other", 9),
        ];
        assert!(verify_checksums(&tasks).is_ok());
    }

    #[test]
    fn test_mismatch_is_fatal_with_both_diagnostics() {
        let tasks = vec![
            completed("Respell", "untied", 7),
            completed("Respell", "untied", 8),
        ];
        let err = verify_checksums(&tasks).unwrap_err();
        assert!(err.downcast_ref::<ConsistencyError>().is_some());
        let message = format!("{err}");
        assert!(message.contains("TASK:"));
        assert!(message.contains("OTHER:"));
    }

    #[test]
    fn test_distinct_identities_never_compared() {
        let tasks = vec![
            completed("Respell", "alpha", 1),
            completed("Respell", "beta", 2),
        ];
        assert!(verify_checksums(&tasks).is_ok());
    }
}
