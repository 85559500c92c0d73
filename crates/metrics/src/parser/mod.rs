//! Assistant Log Parser: one capability set, several dialects.
//!
//! Variants recognized by the core: [`dialect_a`] (hash-watermarked,
//! sidechain-aware), [`dialect_b`] (line-appended, date-partitioned,
//! cumulative totals), [`dialect_c`] (single JSON document with a separate
//! user-prompt log). [`common`] holds primitives shared by all three:
//! tool-call pairing, user-prompt attachment bookkeeping, and delta
//! construction.

pub mod common;
pub mod dialect_a;
pub mod dialect_b;
pub mod dialect_c;

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use cm_domain::model::{MetricDelta, UserPrompt};

use crate::snapshot::PathTemplate;

/// A full re-parse of a session file, used on first discovery and by the
/// delta-sum identity property tests.
#[derive(Debug, Clone, Default)]
pub struct FullParse {
    pub deltas: Vec<MetricDelta>,
}

/// Result of an incremental parse: new deltas plus the watermark to persist
/// and any user-prompt texts newly attached during this call.
#[derive(Debug, Clone, Default)]
pub struct IncrementalParse {
    pub deltas: Vec<MetricDelta>,
    pub last_line: Option<u64>,
    pub newly_attached_prompts: Vec<String>,
    /// Set by hash-watermarked dialects (dialect A); the Collector Loop
    /// persists this into `SyncState`/`Watermark::Hash` instead of `last_line`.
    pub file_hash: Option<String>,
}

/// How a dialect's parser remembers how far it has read a session file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkStrategy {
    Hash,
    Line,
    Object,
}

/// Capability set implemented once per assistant log dialect.
///
/// Stateless between calls: all position-tracking state lives in the
/// caller-supplied `SyncState`, not in the parser itself.
pub trait AssistantLogParser: Send + Sync {
    /// The sessions-directory path template for this dialect (e.g.
    /// `projects/{hash}/session.jsonl`), used by the Snapshotter.
    fn sessions_template(&self) -> PathTemplate;

    /// True if `path` is plausibly this dialect's session file, optionally
    /// further filtered by files modified no earlier than `date_filter`.
    fn matches_session_pattern(&self, path: &Path, date_filter: Option<DateTime<Utc>>) -> bool;

    /// Extract the assistant's own session id from the file, if present.
    fn extract_session_id(&self, path: &Path) -> Option<String>;

    /// Parse the entire file from the start, yielding every delta it would
    /// ever produce. Used by property tests and first-time discovery.
    fn parse_full(&self, path: &Path) -> FullParse;

    /// Parse only the portion of the file not yet reflected in
    /// `processed_record_ids`/`attached_prompt_texts`.
    fn parse_incremental(
        &self,
        path: &Path,
        processed_record_ids: &HashSet<String>,
        attached_prompt_texts: &HashSet<String>,
    ) -> IncrementalParse;

    /// User prompts recorded for `agent_session_id`, optionally bounded by
    /// a timestamp range.
    fn get_user_prompts(
        &self,
        path: &Path,
        agent_session_id: &str,
        from_ts: Option<DateTime<Utc>>,
        to_ts: Option<DateTime<Utc>>,
    ) -> Vec<UserPrompt>;

    fn watermark_strategy(&self) -> WatermarkStrategy;

    /// Milliseconds to wait after spawn before the first correlation
    /// attempt — dialects that flush their session file lazily need a
    /// longer init delay than those that write eagerly.
    fn init_delay_ms(&self) -> u64;

    /// Name of the dialect, used for `agents.<name>` config lookups and
    /// log fields.
    fn dialect_name(&self) -> &'static str;
}

/// Resolve a parser by agent name (dispatch at spawn time, per the design
/// notes' polymorphism-over-dialects guidance).
pub fn parser_for_agent(agent_name: &str) -> Box<dyn AssistantLogParser> {
    match agent_name {
        "claude-code" | "claude" => Box::new(dialect_a::DialectAParser::default()),
        "gemini-cli" | "gemini" => Box::new(dialect_b::DialectBParser::default()),
        "codex" | "openai-codex" => Box::new(dialect_c::DialectCParser::default()),
        _ => Box::new(dialect_a::DialectAParser::default()),
    }
}

/// Default sessions directory the assistant itself writes its native log
/// tree under, keyed by dialect (`getDataPaths().sessionsDir`). Config can
/// always override this per agent; this is only the out-of-the-box guess.
pub fn default_sessions_base_dir(dialect_name: &str) -> std::path::PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
    match dialect_name {
        "dialect_b" => home.join(".gemini"),
        "dialect_c" => home.join(".codex"),
        _ => home.join(".claude"),
    }
}
