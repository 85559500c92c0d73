//! Core data model: one per entity in the spec's data model section.
//!
//! These types are the shared vocabulary between the metrics pipeline, the
//! proxy, and the lifecycle controller. None of them own their own
//! persistence — that's the job of the Session Store, Delta Store, and
//! Sync-State Manager in `cm-metrics`.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Correlation progress for a [`MetricsSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationStatus {
    Pending,
    Matched,
    Failed,
}

/// Correlation state embedded in a [`MetricsSession`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correlation {
    pub status: CorrelationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_session_file: Option<String>,
    pub retry_count: u32,
}

impl Default for Correlation {
    fn default() -> Self {
        Self {
            status: CorrelationStatus::Pending,
            agent_session_id: None,
            agent_session_file: None,
            retry_count: 0,
        }
    }
}

/// Which scheme a dialect's parser uses to remember its read position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Watermark {
    Hash { value: String },
    Line { value: u64 },
    RecordIds { ids: Vec<String> },
}

impl Default for Watermark {
    fn default() -> Self {
        Watermark::Line { value: 0 }
    }
}

/// Monitoring/watcher state embedded in a [`MetricsSession`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Monitoring {
    pub is_active: bool,
    pub change_count: u64,
}

/// Overall lifecycle status of an assistant invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Recovered,
}

/// One per assistant invocation. Created before spawn, persisted as a JSON
/// document at a well-known path keyed by `session_id`.
///
/// Invariant: once `correlation.status == Matched`, `agent_session_file`
/// (inside `correlation`) is immutable for the life of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSession {
    pub session_id: String,
    pub agent_name: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub start_time: DateTime<Utc>,
    pub working_directory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    pub status: SessionStatus,
    pub correlation: Correlation,
    pub watermark: Watermark,
    pub monitoring: Monitoring,
}

impl MetricsSession {
    pub fn new(agent_name: impl Into<String>, provider: impl Into<String>, working_directory: impl Into<String>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            agent_name: agent_name.into(),
            provider: provider.into(),
            project: None,
            start_time: Utc::now(),
            working_directory: working_directory.into(),
            git_branch: None,
            status: SessionStatus::Active,
            correlation: Correlation::default(),
            watermark: Watermark::default(),
            monitoring: Monitoring::default(),
        }
    }
}

/// A single file operation observed inside an assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperationType {
    Read,
    Write,
    Edit,
    Delete,
    Grep,
    Glob,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOperation {
    #[serde(rename = "type")]
    pub kind: FileOperationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines_added: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines_removed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines_modified: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: u64,
    pub failure: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPrompt {
    pub count: u64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

/// One per observable increment inside an assistant session.
///
/// Invariant: for a given session, `record_id` is unique; re-processing an
/// already-recorded `record_id` is a no-op. Invariant: the sum of
/// `tokens.input` across all deltas of a session equals the cumulative
/// input token count reported by a full re-parse of the session file
/// (likewise output, cache_read, cache_creation, and tool-call counts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDelta {
    pub record_id: String,
    pub session_id: String,
    pub agent_session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    pub tokens: TokenCounts,
    pub tools: BTreeMap<String, u64>,
    pub tool_status: BTreeMap<String, ToolOutcome>,
    pub file_operations: Vec<FileOperation>,
    pub user_prompts: Vec<UserPrompt>,
    pub models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_error_message: Option<String>,
    pub sync_status: SyncStatus,
    pub sync_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
}

impl MetricDelta {
    /// A fresh delta with empty collections and `sync_status = pending`,
    /// the state the Collector Loop appends with.
    pub fn new(record_id: impl Into<String>, session_id: impl Into<String>, agent_session_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            session_id: session_id.into(),
            agent_session_id: agent_session_id.into(),
            timestamp: Utc::now(),
            git_branch: None,
            tokens: TokenCounts::default(),
            tools: BTreeMap::new(),
            tool_status: BTreeMap::new(),
            file_operations: Vec::new(),
            user_prompts: Vec::new(),
            models: Vec::new(),
            api_error_message: None,
            sync_status: SyncStatus::Pending,
            sync_attempts: 0,
            synced_at: None,
            sync_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStateStatus {
    Active,
    Completed,
    Failed,
}

/// Mirrors which deltas have been consumed, one per session.
///
/// Invariant: `processed_record_ids` is monotonically growing within a
/// session's life. Invariant: a user-prompt text appears in
/// `attached_user_prompt_texts` iff it has been attached to exactly one
/// delta within this session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub session_id: String,
    pub agent_session_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
    pub processed_record_ids: std::collections::HashSet<String>,
    pub attached_user_prompt_texts: std::collections::HashSet<String>,
    pub total_deltas: u64,
    pub status: SyncStateStatus,
}

impl SyncState {
    pub fn new(session_id: impl Into<String>, agent_session_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            agent_session_id: agent_session_id.into(),
            start_time,
            last_line: None,
            last_hash: None,
            last_processed_at: None,
            processed_record_ids: std::collections::HashSet::new(),
            attached_user_prompt_texts: std::collections::HashSet::new(),
            total_deltas: 0,
            status: SyncStateStatus::Active,
        }
    }
}

/// One entry in a directory snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub path: String,
    pub size: u64,
    /// Milliseconds since epoch; chosen over `SystemTime` so the type is
    /// trivially (de)serializable and comparable across snapshots.
    pub mtime_ms: i64,
}

/// Immutable after capture: `{files, captured_at}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub files: Vec<SnapshotFile>,
    pub captured_at: DateTime<Utc>,
}

impl FileSnapshot {
    pub fn empty() -> Self {
        Self {
            files: Vec::new(),
            captured_at: Utc::now(),
        }
    }

    /// Files present in `self` but not in `before` (by path).
    pub fn diff_new_since<'a>(&'a self, before: &FileSnapshot) -> Vec<&'a SnapshotFile> {
        let before_paths: std::collections::HashSet<&str> =
            before.files.iter().map(|f| f.path.as_str()).collect();
        self.files
            .iter()
            .filter(|f| !before_paths.contains(f.path.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatedMetricName {
    SessionTotal,
    UsageTotal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Started,
    Completed,
    Failed,
    Interrupted,
}

/// Emission unit: one record per (session, git_branch) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedMetric {
    pub name: AggregatedMetricName,
    pub attributes: AggregatedMetricAttributes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedMetricAttributes {
    pub agent: String,
    pub agent_version: String,
    pub llm_model: String,
    pub repository: String,
    pub session_id: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    pub total_user_prompts: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cache_read_input_tokens: u64,
    pub total_cache_creation_tokens: u64,
    pub total_tool_calls: u64,
    pub successful_tool_calls: u64,
    pub failed_tool_calls: u64,
    pub files_created: u64,
    pub files_modified: u64,
    pub files_deleted: u64,
    pub total_lines_added: u64,
    pub total_lines_removed: u64,

    pub session_duration_ms: u64,
    pub had_errors: bool,
    pub status: LifecycleStatus,
    pub count: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<HashMap<String, Vec<String>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_diff_is_new_files_only() {
        let before = FileSnapshot {
            files: vec![SnapshotFile { path: "a.jsonl".into(), size: 1, mtime_ms: 0 }],
            captured_at: Utc::now(),
        };
        let after = FileSnapshot {
            files: vec![
                SnapshotFile { path: "a.jsonl".into(), size: 2, mtime_ms: 1 },
                SnapshotFile { path: "b.jsonl".into(), size: 3, mtime_ms: 2 },
            ],
            captured_at: Utc::now(),
        };
        let diff = after.diff_new_since(&before);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].path, "b.jsonl");
    }

    #[test]
    fn metrics_session_starts_pending_active() {
        let session = MetricsSession::new("claude-code", "sso", "/tmp/proj");
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.correlation.status, CorrelationStatus::Pending);
        assert_eq!(session.correlation.retry_count, 0);
    }

    #[test]
    fn delta_defaults_to_pending_sync() {
        let delta = MetricDelta::new("r1", "s1", "a1");
        assert_eq!(delta.sync_status, SyncStatus::Pending);
        assert_eq!(delta.sync_attempts, 0);
        assert!(delta.tools.is_empty());
    }
}
