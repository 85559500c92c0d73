//! Correlator: matches a freshly spawned assistant to its on-disk session
//! file.
//!
//! Structurally the same bounded-retry shape as the teacher's
//! `ReconnectBackoff`, pinned down to the exact schedule the pipeline
//! needs: 500 ms initial delay, doubling, capped at 32 s, 8 attempts — and
//! deliberately *no* jitter, since there is exactly one correlator waiting
//! per spawn, not a reconnect storm to spread out.

use std::path::PathBuf;
use std::time::Duration;

use cm_domain::model::FileSnapshot;

use crate::snapshot::{self, PathTemplate};

#[derive(Debug, Clone)]
pub struct CorrelatorPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for CorrelatorPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 32_000,
            max_attempts: 8,
        }
    }
}

impl CorrelatorPolicy {
    /// Delay before attempt `attempt` (0-indexed), doubling from
    /// `initial_delay_ms` and capped at `max_delay_ms`. No jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = (self.initial_delay_ms as u128) << attempt.min(32);
        Duration::from_millis(raw.min(self.max_delay_ms as u128) as u64)
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

#[derive(Debug, Clone)]
pub enum CorrelationOutcome {
    Matched { agent_session_id: String, file: PathBuf },
    Failed { attempts: u32 },
}

/// One correlation attempt: diff `after` against `before` and decide
/// whether a single new matching file appeared. Multiple new files are
/// treated as ambiguous and reported as no match this attempt — the caller
/// retries, since assistants sometimes write a placeholder file before the
/// real one.
pub fn attempt(
    before: &FileSnapshot,
    after: &FileSnapshot,
    parser: &dyn crate::parser::AssistantLogParser,
) -> Option<(String, PathBuf)> {
    let new_files: Vec<PathBuf> = after.diff_new_since(before).into_iter().map(|f| PathBuf::from(&f.path)).collect();
    let candidate = snapshot::single_new_file(&new_files)?;
    let agent_session_id = parser.extract_session_id(candidate)?;
    Some((agent_session_id, candidate.clone()))
}

/// Capture a fresh snapshot of `base_dir` against `template`, used for both
/// the pre-spawn and each post-spawn poll.
pub fn snapshot_now(base_dir: &std::path::Path, template: &PathTemplate) -> FileSnapshot {
    snapshot::snapshot(base_dir, template)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_matches_pinned_values() {
        let policy = CorrelatorPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(32_000));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(32_000));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = CorrelatorPolicy::default();
        assert!(!policy.should_give_up(7));
        assert!(policy.should_give_up(8));
    }

    #[test]
    fn single_new_file_is_a_match() {
        use cm_domain::model::SnapshotFile;
        let tmp = tempfile::tempdir().unwrap();
        let session_path = tmp.path().join("s1.jsonl");
        std::fs::write(&session_path, r#"{"sessionId":"agent-xyz"}"#).unwrap();

        let before = FileSnapshot::empty();
        let after = FileSnapshot {
            files: vec![SnapshotFile { path: session_path.to_string_lossy().into_owned(), size: 1, mtime_ms: 0 }],
            captured_at: chrono::Utc::now(),
        };

        let parser = crate::parser::dialect_a::DialectAParser::default();
        let result = attempt(&before, &after, &parser);
        assert_eq!(result.unwrap().0, "agent-xyz");
    }

    #[test]
    fn multiple_new_files_are_ambiguous() {
        use cm_domain::model::SnapshotFile;
        let before = FileSnapshot::empty();
        let after = FileSnapshot {
            files: vec![
                SnapshotFile { path: "a.jsonl".into(), size: 1, mtime_ms: 0 },
                SnapshotFile { path: "b.jsonl".into(), size: 1, mtime_ms: 0 },
            ],
            captured_at: chrono::Utc::now(),
        };
        let parser = crate::parser::dialect_a::DialectAParser::default();
        assert!(attempt(&before, &after, &parser).is_none());
    }
}
