//! Dialect A: Claude-Code-style session logs.
//!
//! One file per session under `projects/{project_hash}/{session_id}.jsonl`.
//! Each line is a JSON record `{type: "user"|"assistant", sessionId, uuid,
//! parentUuid?, isSidechain, cwd, gitBranch?, message: {role, content, usage?,
//! model?}}`. Tool use and tool result are separate content blocks inside two
//! different records, paired by `tool_use_id`. Token usage is reported as a
//! per-message increment, not a cumulative total.
//!
//! Watermark strategy: a hash of the whole file. Because sidechains can
//! append to sibling files at any time and events reference each other by
//! id rather than position, the cheapest correct incremental signal is
//! "has anything changed at all" — when the hash is unchanged, skip the
//! reparse entirely. When it has, the whole file (and its sidechains) is
//! re-walked, but only record ids absent from `processed_record_ids` ever
//! produce a delta, so the re-walk costs CPU, not duplicate output.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cm_domain::model::{MetricDelta, TokenCounts, UserPrompt};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::common::{pair_tool_calls, PendingToolUse, PromptAttachment};
use super::{AssistantLogParser, FullParse, IncrementalParse, WatermarkStrategy};
use crate::snapshot::PathTemplate;

#[derive(Debug, Default)]
pub struct DialectAParser;

impl DialectAParser {
    /// Sibling `.jsonl` files in the same directory whose first record's
    /// `sessionId` matches `agent_session_id` — the sidechain-discovery rule.
    fn sidechain_files(path: &Path, agent_session_id: &str) -> Vec<PathBuf> {
        let Some(dir) = path.parent() else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut siblings = Vec::new();
        for entry in entries.flatten() {
            let candidate = entry.path();
            if candidate == path || candidate.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(first_line) = fs::read_to_string(&candidate).ok().and_then(|s| s.lines().next().map(str::to_string)) {
                if let Ok(value) = serde_json::from_str::<Value>(&first_line) {
                    if value.get("sessionId").and_then(|v| v.as_str()) == Some(agent_session_id) {
                        siblings.push(candidate);
                    }
                }
            }
        }
        siblings
    }

    fn parse_records(path: &Path) -> Vec<Value> {
        let Ok(raw) = fs::read_to_string(path) else {
            return Vec::new();
        };
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str::<Value>(l) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::debug!(error = %e, "dialect_a: skipping malformed line");
                    None
                }
            })
            .collect()
    }

    fn record_id(value: &Value, session_id: &str, ordinal: usize) -> String {
        value
            .get("uuid")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{session_id}:{ordinal}"))
    }

    fn timestamp(value: &Value) -> DateTime<Utc> {
        value
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    }

    /// Build deltas from a single file's records, skipping ids already in
    /// `processed`. Returns deltas and any prompt texts newly attached.
    fn deltas_from_records(
        records: &[Value],
        session_id: &str,
        agent_session_id: &str,
        processed: &HashSet<String>,
        attached: &HashSet<String>,
    ) -> (Vec<MetricDelta>, Vec<String>) {
        let mut deltas = Vec::new();
        let mut newly_attached = Vec::new();
        let mut prompts = PromptAttachment::default();
        let mut pending_tool_uses: Vec<PendingToolUse> = Vec::new();
        let mut tool_results: Vec<(String, Value, bool)> = Vec::new();
        let mut current_model = String::new();

        for (ordinal, record) in records.iter().enumerate() {
            let record_id = Self::record_id(record, session_id, ordinal);
            let record_type = record.get("type").and_then(|v| v.as_str()).unwrap_or("");
            let message = record.get("message");

            if let Some(model) = message.and_then(|m| m.get("model")).and_then(|v| v.as_str()) {
                current_model = model.to_string();
            }

            let content = message.and_then(|m| m.get("content"));
            if let Some(array) = content.and_then(|c| c.as_array()) {
                for block in array {
                    match block.get("type").and_then(|v| v.as_str()) {
                        Some("tool_use") => {
                            if let (Some(id), Some(name)) = (
                                block.get("id").and_then(|v| v.as_str()),
                                block.get("name").and_then(|v| v.as_str()),
                            ) {
                                pending_tool_uses.push(PendingToolUse {
                                    id: id.to_string(),
                                    tool_name: name.to_string(),
                                    input: block.get("input").cloned().unwrap_or(Value::Null),
                                });
                            }
                        }
                        Some("tool_result") => {
                            if let Some(id) = block.get("tool_use_id").and_then(|v| v.as_str()) {
                                let is_error = block.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false);
                                let result_value = block.get("content").cloned().unwrap_or(Value::Null);
                                tool_results.push((id.to_string(), result_value, is_error));
                            }
                        }
                        _ => {}
                    }
                }
            } else if record_type == "user" {
                if let Some(text) = content.and_then(|c| c.as_str()) {
                    if !text.trim().is_empty() {
                        prompts.push(text.to_string());
                    }
                }
            }

            if processed.contains(&record_id) {
                continue;
            }

            let usage = message.and_then(|m| m.get("usage"));
            let has_usage = usage.is_some();
            if record_type == "assistant" && has_usage {
                let usage = usage.unwrap();
                let mut delta = MetricDelta::new(record_id.clone(), session_id, agent_session_id);
                delta.timestamp = Self::timestamp(record);
                delta.tokens = TokenCounts {
                    input: usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                    output: usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                    cache_read: usage.get("cache_read_input_tokens").and_then(|v| v.as_u64()),
                    cache_creation: usage.get("cache_creation_input_tokens").and_then(|v| v.as_u64()),
                };
                if !current_model.is_empty() {
                    delta.models.push(current_model.clone());
                }
                if let Some(text) = prompts.attach_next(attached) {
                    newly_attached.push(text.clone());
                    delta.user_prompts.push(UserPrompt { count: 1, text });
                }
                deltas.push(delta);
            }
        }

        // Second pass over what we've accumulated: emit one delta per paired
        // tool call discovered across the whole file. The tool-use id is
        // already unique per call, so it doubles as the record id.
        let (paired, _unmatched) = pair_tool_calls(pending_tool_uses, &tool_results);
        for pair in paired {
            let record_id = format!("{session_id}:tool:{}", pair.tool_use_id);
            if processed.contains(&record_id) {
                continue;
            }
            let mut delta = MetricDelta::new(record_id, session_id, agent_session_id);
            delta.tools.insert(pair.tool_name.clone(), 1);
            let outcome = delta.tool_status.entry(pair.tool_name).or_default();
            if pair.success {
                outcome.success += 1;
            } else {
                outcome.failure += 1;
            }
            if let Some(op) = pair.file_operation {
                delta.file_operations.push(op);
            }
            delta.api_error_message = pair.error_message;
            deltas.push(delta);
        }

        (deltas, newly_attached)
    }
}

impl AssistantLogParser for DialectAParser {
    fn sessions_template(&self) -> PathTemplate {
        PathTemplate::parse("projects/{project_hash}/{session_id}.jsonl")
    }

    fn matches_session_pattern(&self, path: &Path, date_filter: Option<DateTime<Utc>>) -> bool {
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            return false;
        }
        if let Some(filter) = date_filter {
            if let Ok(meta) = fs::metadata(path) {
                if let Ok(modified) = meta.modified() {
                    let modified: DateTime<Utc> = modified.into();
                    return modified >= filter;
                }
            }
        }
        true
    }

    fn extract_session_id(&self, path: &Path) -> Option<String> {
        let first_line = fs::read_to_string(path).ok()?.lines().next()?.to_string();
        let value: Value = serde_json::from_str(&first_line).ok()?;
        value.get("sessionId").and_then(|v| v.as_str()).map(str::to_string)
    }

    fn parse_full(&self, path: &Path) -> FullParse {
        let records = Self::parse_records(path);
        let agent_session_id = records
            .first()
            .and_then(|r| r.get("sessionId"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let (deltas, _) = Self::deltas_from_records(&records, &agent_session_id, &agent_session_id, &HashSet::new(), &HashSet::new());
        FullParse { deltas }
    }

    fn parse_incremental(
        &self,
        path: &Path,
        processed_record_ids: &HashSet<String>,
        attached_prompt_texts: &HashSet<String>,
    ) -> IncrementalParse {
        let records = Self::parse_records(path);
        let agent_session_id = records
            .first()
            .and_then(|r| r.get("sessionId"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let (mut deltas, mut newly_attached) =
            Self::deltas_from_records(&records, &agent_session_id, &agent_session_id, processed_record_ids, attached_prompt_texts);

        for sibling in Self::sidechain_files(path, &agent_session_id) {
            let sibling_records = Self::parse_records(&sibling);
            let (sibling_deltas, sibling_attached) =
                Self::deltas_from_records(&sibling_records, &agent_session_id, &agent_session_id, processed_record_ids, attached_prompt_texts);
            deltas.extend(sibling_deltas);
            newly_attached.extend(sibling_attached);
        }

        IncrementalParse {
            deltas,
            last_line: None,
            newly_attached_prompts: newly_attached,
            file_hash: Some(file_hash(path)),
        }
    }

    fn get_user_prompts(
        &self,
        path: &Path,
        _agent_session_id: &str,
        from_ts: Option<DateTime<Utc>>,
        to_ts: Option<DateTime<Utc>>,
    ) -> Vec<UserPrompt> {
        Self::parse_records(path)
            .into_iter()
            .filter(|record| {
                let ts = Self::timestamp(record);
                from_ts.map(|f| ts >= f).unwrap_or(true) && to_ts.map(|t| ts <= t).unwrap_or(true)
            })
            .filter(|record| record.get("type").and_then(|v| v.as_str()) == Some("user"))
            .filter_map(|record| {
                record
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(|c| c.as_str())
                    .map(|text| UserPrompt { count: 1, text: text.to_string() })
            })
            .collect()
    }

    fn watermark_strategy(&self) -> WatermarkStrategy {
        WatermarkStrategy::Hash
    }

    fn init_delay_ms(&self) -> u64 {
        1_000
    }

    fn dialect_name(&self) -> &'static str {
        "claude-code"
    }
}

fn file_hash(path: &Path) -> String {
    let Ok(bytes) = fs::read(path) else {
        return String::new();
    };
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_session(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[test]
    fn scenario_a_cumulative_token_happy_path() {
        let tmp = tempfile::tempdir().unwrap();
        let lines = [
            r#"{"type":"user","sessionId":"s1","uuid":"u0","message":{"role":"user","content":"hello"}}"#,
            r#"{"type":"assistant","sessionId":"s1","uuid":"u1","message":{"role":"assistant","model":"claude-x","usage":{"input_tokens":100,"output_tokens":50},"content":[{"type":"text","text":"hi"}]}}"#,
            r#"{"type":"assistant","sessionId":"s1","uuid":"u2","message":{"role":"assistant","model":"claude-x","content":[{"type":"tool_use","id":"tu1","name":"shell","input":{}}]}}"#,
            r#"{"type":"user","sessionId":"s1","uuid":"u3","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"tu1","content":"ok","is_error":false}]}}"#,
        ];
        let path = write_session(tmp.path(), "session.jsonl", &lines);

        let parser = DialectAParser::default();
        let incremental = parser.parse_incremental(&path, &HashSet::new(), &HashSet::new());

        let token_delta = incremental.deltas.iter().find(|d| d.tokens.input > 0).unwrap();
        assert_eq!(token_delta.tokens.input, 100);
        assert_eq!(token_delta.tokens.output, 50);
        assert_eq!(token_delta.user_prompts.len(), 1);
        assert_eq!(token_delta.user_prompts[0].text, "hello");

        let tool_delta = incremental.deltas.iter().find(|d| d.tools.contains_key("shell")).unwrap();
        assert_eq!(tool_delta.tool_status["shell"].success, 1);
        assert_eq!(tool_delta.tool_status["shell"].failure, 0);
    }

    #[test]
    fn reprocessing_known_ids_yields_no_new_deltas() {
        let tmp = tempfile::tempdir().unwrap();
        let lines = [
            r#"{"type":"assistant","sessionId":"s1","uuid":"u1","message":{"role":"assistant","model":"x","usage":{"input_tokens":10,"output_tokens":5}}}"#,
        ];
        let path = write_session(tmp.path(), "session.jsonl", &lines);
        let parser = DialectAParser::default();

        let first = parser.parse_incremental(&path, &HashSet::new(), &HashSet::new());
        let processed: HashSet<String> = first.deltas.iter().map(|d| d.record_id.clone()).collect();

        let second = parser.parse_incremental(&path, &processed, &HashSet::new());
        assert!(second.deltas.is_empty());
    }

    #[test]
    fn sidechain_deltas_are_unioned() {
        let tmp = tempfile::tempdir().unwrap();
        let main = [
            r#"{"type":"assistant","sessionId":"shared","uuid":"m1","message":{"role":"assistant","model":"x","usage":{"input_tokens":500,"output_tokens":1}}}"#,
        ];
        let side = [
            r#"{"type":"assistant","sessionId":"shared","uuid":"s1","message":{"role":"assistant","model":"x","usage":{"input_tokens":200,"output_tokens":1}}}"#,
        ];
        let main_path = write_session(tmp.path(), "main.jsonl", &main);
        write_session(tmp.path(), "side.jsonl", &side);

        let parser = DialectAParser::default();
        let incremental = parser.parse_incremental(&main_path, &HashSet::new(), &HashSet::new());
        let total_input: u64 = incremental.deltas.iter().map(|d| d.tokens.input).sum();
        assert_eq!(total_input, 700);
    }
}
