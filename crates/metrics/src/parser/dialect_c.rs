//! Dialect C: Codex-style sessions.
//!
//! The whole session lives in one JSON document, `{session_id, messages:
//! [...]}`, rewritten in full on every flush rather than appended to — so
//! there is no stable line number or byte range to resume from. User
//! prompts are not inlined in `messages` at all; they live in a sibling
//! `{session_id}.prompts.jsonl` log, one prompt per line.
//!
//! Watermark strategy: the record-id set. Every message in the document
//! carries a `ts`-stamped ordinal, and since the document may be rewritten
//! (not just appended to) between parses, the only safe incremental story
//! is "diff the full message list against what's already processed", which
//! the shared `processed_record_ids` set already gives us for free.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cm_domain::model::{MetricDelta, TokenCounts, UserPrompt};
use serde_json::Value;

use super::common::{pair_tool_calls, PendingToolUse};
use super::{AssistantLogParser, FullParse, IncrementalParse, WatermarkStrategy};
use crate::snapshot::PathTemplate;

#[derive(Debug, Default)]
pub struct DialectCParser;

impl DialectCParser {
    fn document(path: &Path) -> Option<Value> {
        let raw = fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn prompts_path(path: &Path) -> PathBuf {
        path.with_extension("prompts.jsonl")
    }

    fn timestamp(value: &Value) -> DateTime<Utc> {
        value
            .get("ts")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    }

    fn messages(document: &Value) -> Vec<&Value> {
        document
            .get("messages")
            .and_then(|m| m.as_array())
            .map(|arr| arr.iter().collect())
            .unwrap_or_default()
    }

    fn build_deltas(document: &Value, session_id: &str, agent_session_id: &str, processed: &HashSet<String>) -> Vec<MetricDelta> {
        let mut deltas = Vec::new();
        let mut pending_tool_uses: Vec<PendingToolUse> = Vec::new();
        let mut tool_results: Vec<(String, Value, bool)> = Vec::new();
        let mut current_model = String::new();

        for message in Self::messages(document) {
            let record_id = message
                .get("id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("{session_id}:{}", Self::timestamp(message).timestamp_nanos_opt().unwrap_or(0)));

            if let Some(model) = message.get("model").and_then(|v| v.as_str()) {
                current_model = model.to_string();
            }

            let kind = message.get("kind").and_then(|v| v.as_str()).unwrap_or("");
            match kind {
                "tool_call" => {
                    if let (Some(id), Some(name)) = (message.get("call_id").and_then(|v| v.as_str()), message.get("tool").and_then(|v| v.as_str())) {
                        pending_tool_uses.push(PendingToolUse {
                            id: id.to_string(),
                            tool_name: name.to_string(),
                            input: message.get("arguments").cloned().unwrap_or(Value::Null),
                        });
                    }
                }
                "tool_result" => {
                    if let Some(id) = message.get("call_id").and_then(|v| v.as_str()) {
                        let is_error = message.get("error").map(|v| !v.is_null()).unwrap_or(false);
                        let result_value = message.get("output").cloned().unwrap_or(Value::Null);
                        tool_results.push((id.to_string(), result_value, is_error));
                    }
                }
                "usage" if !processed.contains(&record_id) => {
                    let mut delta = MetricDelta::new(record_id, session_id, agent_session_id);
                    delta.timestamp = Self::timestamp(message);
                    delta.tokens = TokenCounts {
                        input: message.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                        output: message.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                        cache_read: message.get("cached_input_tokens").and_then(|v| v.as_u64()),
                        cache_creation: None,
                    };
                    if !current_model.is_empty() {
                        delta.models.push(current_model.clone());
                    }
                    deltas.push(delta);
                }
                _ => {}
            }
        }

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

        deltas
    }

    fn prompt_deltas(path: &Path, session_id: &str, agent_session_id: &str, processed: &HashSet<String>, attached: &HashSet<String>) -> (Vec<MetricDelta>, Vec<String>) {
        let prompts_path = Self::prompts_path(path);
        let Ok(raw) = fs::read_to_string(&prompts_path) else {
            return (Vec::new(), Vec::new());
        };

        let mut deltas = Vec::new();
        let mut newly_attached = Vec::new();
        for (line_no, line) in raw.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            let Ok(value) = serde_json::from_str::<Value>(line) else {
                tracing::debug!(line = line_no, "dialect_c: skipping malformed prompt line");
                continue;
            };
            let record_id = format!("{session_id}:prompt:{line_no}");
            if processed.contains(&record_id) {
                continue;
            }
            let Some(text) = value.get("prompt").and_then(|v| v.as_str()) else {
                continue;
            };
            if attached.contains(text) {
                continue;
            }
            let mut delta = MetricDelta::new(record_id, session_id, agent_session_id);
            delta.timestamp = Self::timestamp(&value);
            delta.user_prompts.push(UserPrompt { count: 1, text: text.to_string() });
            newly_attached.push(text.to_string());
            deltas.push(delta);
        }
        (deltas, newly_attached)
    }
}

impl AssistantLogParser for DialectCParser {
    fn sessions_template(&self) -> PathTemplate {
        PathTemplate::parse("sessions/{session_id}.json")
    }

    fn matches_session_pattern(&self, path: &Path, date_filter: Option<DateTime<Utc>>) -> bool {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            return false;
        }
        if path.to_string_lossy().ends_with(".prompts.jsonl") {
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
        let document = Self::document(path)?;
        document
            .get("session_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
    }

    fn parse_full(&self, path: &Path) -> FullParse {
        let Some(document) = Self::document(path) else {
            return FullParse::default();
        };
        let session_id = self.extract_session_id(path).unwrap_or_default();
        let mut deltas = Self::build_deltas(&document, &session_id, &session_id, &HashSet::new());
        let (prompt_deltas, _) = Self::prompt_deltas(path, &session_id, &session_id, &HashSet::new(), &HashSet::new());
        deltas.extend(prompt_deltas);
        FullParse { deltas }
    }

    fn parse_incremental(
        &self,
        path: &Path,
        processed_record_ids: &HashSet<String>,
        attached_prompt_texts: &HashSet<String>,
    ) -> IncrementalParse {
        let Some(document) = Self::document(path) else {
            return IncrementalParse::default();
        };
        let session_id = self.extract_session_id(path).unwrap_or_default();

        let mut deltas = Self::build_deltas(&document, &session_id, &session_id, processed_record_ids);
        let (prompt_deltas, newly_attached) = Self::prompt_deltas(path, &session_id, &session_id, processed_record_ids, attached_prompt_texts);
        deltas.extend(prompt_deltas);

        IncrementalParse {
            deltas,
            last_line: None,
            newly_attached_prompts: newly_attached,
            file_hash: None,
        }
    }

    fn get_user_prompts(
        &self,
        path: &Path,
        _agent_session_id: &str,
        from_ts: Option<DateTime<Utc>>,
        to_ts: Option<DateTime<Utc>>,
    ) -> Vec<UserPrompt> {
        let prompts_path = Self::prompts_path(path);
        let Ok(raw) = fs::read_to_string(&prompts_path) else {
            return Vec::new();
        };
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str::<Value>(l).ok())
            .filter(|v| {
                let ts = Self::timestamp(v);
                from_ts.map(|f| ts >= f).unwrap_or(true) && to_ts.map(|t| ts <= t).unwrap_or(true)
            })
            .filter_map(|v| v.get("prompt").and_then(|p| p.as_str()).map(|text| UserPrompt { count: 1, text: text.to_string() }))
            .collect()
    }

    fn watermark_strategy(&self) -> WatermarkStrategy {
        WatermarkStrategy::Object
    }

    fn init_delay_ms(&self) -> u64 {
        750
    }

    fn dialect_name(&self) -> &'static str {
        "codex"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_document(dir: &Path, name: &str, json: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn document_usage_and_paired_tool_calls_produce_deltas() {
        let tmp = tempfile::tempdir().unwrap();
        let doc = r#"{
            "session_id": "sess1",
            "messages": [
                {"id": "m1", "kind": "usage", "ts": "2026-01-01T00:00:00Z", "model": "o1", "input_tokens": 40, "output_tokens": 20},
                {"id": "m2", "kind": "tool_call", "call_id": "c1", "tool": "shell", "arguments": {}},
                {"id": "m3", "kind": "tool_result", "call_id": "c1", "output": "done", "error": null}
            ]
        }"#;
        let path = write_document(tmp.path(), "sess1.json", doc);

        let parser = DialectCParser::default();
        let result = parser.parse_incremental(&path, &HashSet::new(), &HashSet::new());

        let token_delta = result.deltas.iter().find(|d| d.tokens.input > 0).unwrap();
        assert_eq!(token_delta.tokens.input, 40);
        assert_eq!(token_delta.tokens.output, 20);

        let tool_delta = result.deltas.iter().find(|d| d.tools.contains_key("shell")).unwrap();
        assert_eq!(tool_delta.tool_status["shell"].success, 1);
    }

    #[test]
    fn prompts_come_from_sibling_log_not_the_document() {
        let tmp = tempfile::tempdir().unwrap();
        let doc = r#"{"session_id": "sess1", "messages": []}"#;
        let path = write_document(tmp.path(), "sess1.json", doc);
        fs::write(tmp.path().join("sess1.prompts.jsonl"), r#"{"ts":"2026-01-01T00:00:00Z","prompt":"do the thing"}"#).unwrap();

        let parser = DialectCParser::default();
        let result = parser.parse_incremental(&path, &HashSet::new(), &HashSet::new());
        assert_eq!(result.deltas.len(), 1);
        assert_eq!(result.deltas[0].user_prompts[0].text, "do the thing");
    }

    #[test]
    fn rewritten_document_with_known_ids_yields_no_duplicate_deltas() {
        let tmp = tempfile::tempdir().unwrap();
        let doc = r#"{"session_id": "sess1", "messages": [
            {"id": "m1", "kind": "usage", "ts": "2026-01-01T00:00:00Z", "input_tokens": 10, "output_tokens": 5}
        ]}"#;
        let path = write_document(tmp.path(), "sess1.json", doc);
        let parser = DialectCParser::default();

        let first = parser.parse_incremental(&path, &HashSet::new(), &HashSet::new());
        let processed: HashSet<String> = first.deltas.iter().map(|d| d.record_id.clone()).collect();

        // Document rewritten (e.g. reformatted) but message set unchanged.
        let second = parser.parse_incremental(&path, &processed, &HashSet::new());
        assert!(second.deltas.is_empty());
    }
}
