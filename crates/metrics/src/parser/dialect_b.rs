//! Dialect B: line-appended, date-partitioned session logs with cumulative
//! token totals.
//!
//! Files live under `sessions/{date}/{session_id}.log`, one JSON object per
//! line, appended only. A `token_usage` line carries the *cumulative* totals
//! seen so far this session — the parser must diff against the previous
//! cumulative figure, never trust the line as a per-event increment. Tool
//! calls are reported as a single already-paired event (`type: "tool_call"`)
//! carrying its own exit code, so no two-pass pairing is needed here.
//!
//! Watermark strategy: line number. Re-reading from `processed` is not
//! enough on its own for this dialect because the cumulative totals need
//! the previous cumulative value to diff against — the caller is expected
//! to re-supply all lines up to `last_line` so that value can be recovered;
//! in practice the Collector Loop always calls with the full file and lets
//! `processed_record_ids` do the skip, exactly like the other dialects.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use cm_domain::model::{FileOperation, FileOperationType, MetricDelta, TokenCounts, ToolOutcome, UserPrompt};
use serde_json::Value;

use super::common::cumulative_delta;
use super::{AssistantLogParser, FullParse, IncrementalParse, WatermarkStrategy};
use crate::snapshot::PathTemplate;

#[derive(Debug, Default)]
pub struct DialectBParser;

impl DialectBParser {
    fn read_lines(path: &Path) -> Vec<(u64, Value)> {
        let Ok(raw) = fs::read_to_string(path) else {
            return Vec::new();
        };
        raw.lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .filter_map(|(i, l)| match serde_json::from_str::<Value>(l) {
                Ok(v) => Some((i as u64 + 1, v)),
                Err(e) => {
                    tracing::debug!(error = %e, line = i, "dialect_b: skipping malformed line");
                    None
                }
            })
            .collect()
    }

    fn timestamp(value: &Value) -> DateTime<Utc> {
        value
            .get("ts")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    }

    fn file_operation_type(tool_name: &str) -> Option<FileOperationType> {
        match tool_name.to_ascii_lowercase().as_str() {
            "read_file" => Some(FileOperationType::Read),
            "write_file" => Some(FileOperationType::Write),
            "edit_file" => Some(FileOperationType::Edit),
            "delete_file" => Some(FileOperationType::Delete),
            "grep" => Some(FileOperationType::Grep),
            "glob" => Some(FileOperationType::Glob),
            _ => None,
        }
    }

    fn build_deltas(lines: &[(u64, Value)], session_id: &str, agent_session_id: &str, processed: &HashSet<String>, attached: &HashSet<String>) -> (Vec<MetricDelta>, Vec<String>) {
        let mut deltas = Vec::new();
        let mut newly_attached = Vec::new();
        let mut prev_input = 0u64;
        let mut prev_output = 0u64;
        let mut prev_cache_read = 0u64;
        let mut prev_cache_creation = 0u64;
        let mut current_model = String::new();

        for (line_no, value) in lines {
            let event_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
            let record_id = format!("{session_id}:{line_no}");

            match event_type {
                "token_usage" => {
                    let cumulative_input = value.get("cumulative_input").and_then(|v| v.as_u64()).unwrap_or(0);
                    let cumulative_output = value.get("cumulative_output").and_then(|v| v.as_u64()).unwrap_or(0);
                    let cumulative_cache_read = value.get("cumulative_cache_read").and_then(|v| v.as_u64()).unwrap_or(0);
                    let cumulative_cache_creation = value.get("cumulative_cache_creation").and_then(|v| v.as_u64()).unwrap_or(0);
                    if let Some(model) = value.get("model").and_then(|v| v.as_str()) {
                        current_model = model.to_string();
                    }

                    if !processed.contains(&record_id) {
                        let mut delta = MetricDelta::new(record_id.clone(), session_id, agent_session_id);
                        delta.timestamp = Self::timestamp(value);
                        delta.tokens = TokenCounts {
                            input: cumulative_delta(cumulative_input, prev_input),
                            output: cumulative_delta(cumulative_output, prev_output),
                            cache_read: Some(cumulative_delta(cumulative_cache_read, prev_cache_read)),
                            cache_creation: Some(cumulative_delta(cumulative_cache_creation, prev_cache_creation)),
                        };
                        if !current_model.is_empty() {
                            delta.models.push(current_model.clone());
                        }
                        deltas.push(delta);
                    }

                    // Cumulative bookkeeping advances regardless of whether this
                    // line produced a delta, so re-parses stay consistent.
                    prev_input = cumulative_input;
                    prev_output = cumulative_output;
                    prev_cache_read = cumulative_cache_read;
                    prev_cache_creation = cumulative_cache_creation;
                }
                "tool_call" if !processed.contains(&record_id) => {
                    let tool_name = value.get("tool_name").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
                    let exit_code = value.get("exit_code").and_then(|v| v.as_i64()).unwrap_or(0);
                    let mut delta = MetricDelta::new(record_id, session_id, agent_session_id);
                    delta.timestamp = Self::timestamp(value);
                    delta.tools.insert(tool_name.clone(), 1);
                    let outcome = delta.tool_status.entry(tool_name.clone()).or_insert(ToolOutcome::default());
                    if exit_code == 0 {
                        outcome.success += 1;
                    } else {
                        outcome.failure += 1;
                        delta.api_error_message = value.get("error").and_then(|v| v.as_str()).map(str::to_string);
                    }
                    if let Some(kind) = Self::file_operation_type(&tool_name) {
                        delta.file_operations.push(FileOperation {
                            kind,
                            path: value.get("path").and_then(|v| v.as_str()).map(str::to_string),
                            language: None,
                            format: None,
                            lines_added: value.get("lines_added").and_then(|v| v.as_u64()),
                            lines_removed: value.get("lines_removed").and_then(|v| v.as_u64()),
                            lines_modified: None,
                            duration_ms: value.get("duration_ms").and_then(|v| v.as_u64()),
                        });
                    }
                    deltas.push(delta);
                }
                "user_prompt" if !processed.contains(&record_id) => {
                    if let Some(text) = value.get("prompt").and_then(|v| v.as_str()) {
                        if !attached.contains(text) {
                            let mut delta = MetricDelta::new(record_id, session_id, agent_session_id);
                            delta.timestamp = Self::timestamp(value);
                            delta.user_prompts.push(UserPrompt { count: 1, text: text.to_string() });
                            newly_attached.push(text.to_string());
                            deltas.push(delta);
                        }
                    }
                }
                _ => {}
            }
        }

        (deltas, newly_attached)
    }
}

impl AssistantLogParser for DialectBParser {
    fn sessions_template(&self) -> PathTemplate {
        PathTemplate::parse("sessions/{date}/{session_id}.log")
    }

    fn matches_session_pattern(&self, path: &Path, date_filter: Option<DateTime<Utc>>) -> bool {
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
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
        path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
    }

    fn parse_full(&self, path: &Path) -> FullParse {
        let lines = Self::read_lines(path);
        let session_id = self.extract_session_id(path).unwrap_or_default();
        let (deltas, _) = Self::build_deltas(&lines, &session_id, &session_id, &HashSet::new(), &HashSet::new());
        FullParse { deltas }
    }

    fn parse_incremental(
        &self,
        path: &Path,
        processed_record_ids: &HashSet<String>,
        attached_prompt_texts: &HashSet<String>,
    ) -> IncrementalParse {
        let lines = Self::read_lines(path);
        let last_line = lines.last().map(|(n, _)| *n);
        let session_id = self.extract_session_id(path).unwrap_or_default();
        let (deltas, newly_attached) = Self::build_deltas(&lines, &session_id, &session_id, processed_record_ids, attached_prompt_texts);
        IncrementalParse {
            deltas,
            last_line,
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
        Self::read_lines(path)
            .into_iter()
            .filter(|(_, v)| v.get("type").and_then(|t| t.as_str()) == Some("user_prompt"))
            .filter(|(_, v)| {
                let ts = Self::timestamp(v);
                from_ts.map(|f| ts >= f).unwrap_or(true) && to_ts.map(|t| ts <= t).unwrap_or(true)
            })
            .filter_map(|(_, v)| v.get("prompt").and_then(|p| p.as_str()).map(|text| UserPrompt { count: 1, text: text.to_string() }))
            .collect()
    }

    fn watermark_strategy(&self) -> WatermarkStrategy {
        WatermarkStrategy::Line
    }

    fn init_delay_ms(&self) -> u64 {
        500
    }

    fn dialect_name(&self) -> &'static str {
        "gemini-cli"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_log(dir: &Path, name: &str, lines: &[&str]) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[test]
    fn cumulative_totals_become_per_event_deltas() {
        let tmp = tempfile::tempdir().unwrap();
        let lines = [
            r#"{"type":"token_usage","ts":"2026-01-01T00:00:00Z","cumulative_input":100,"cumulative_output":50,"model":"gemini-pro"}"#,
            r#"{"type":"token_usage","ts":"2026-01-01T00:01:00Z","cumulative_input":250,"cumulative_output":110}"#,
            r#"{"type":"token_usage","ts":"2026-01-01T00:02:00Z","cumulative_input":400,"cumulative_output":200}"#,
        ];
        let path = write_log(tmp.path(), "session.log", &lines);

        let parser = DialectBParser::default();
        let result = parser.parse_incremental(&path, &HashSet::new(), &HashSet::new());
        let inputs: Vec<u64> = result.deltas.iter().map(|d| d.tokens.input).collect();
        assert_eq!(inputs, vec![100, 150, 150]);
        let outputs: Vec<u64> = result.deltas.iter().map(|d| d.tokens.output).collect();
        assert_eq!(outputs, vec![50, 60, 90]);
        assert_eq!(result.last_line, Some(3));
    }

    #[test]
    fn tool_call_with_nonzero_exit_is_a_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let lines = [r#"{"type":"tool_call","ts":"2026-01-01T00:00:00Z","tool_name":"shell","exit_code":1,"error":"boom"}"#];
        let path = write_log(tmp.path(), "session.log", &lines);

        let parser = DialectBParser::default();
        let result = parser.parse_incremental(&path, &HashSet::new(), &HashSet::new());
        assert_eq!(result.deltas.len(), 1);
        assert_eq!(result.deltas[0].tool_status["shell"].failure, 1);
        assert_eq!(result.deltas[0].api_error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn repeated_parse_with_processed_ids_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let lines = [r#"{"type":"token_usage","ts":"2026-01-01T00:00:00Z","cumulative_input":10,"cumulative_output":5}"#];
        let path = write_log(tmp.path(), "session.log", &lines);
        let parser = DialectBParser::default();

        let first = parser.parse_incremental(&path, &HashSet::new(), &HashSet::new());
        let processed: HashSet<String> = first.deltas.iter().map(|d| d.record_id.clone()).collect();
        let second = parser.parse_incremental(&path, &processed, &HashSet::new());
        assert!(second.deltas.is_empty());
    }
}
