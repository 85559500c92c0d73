//! Primitives shared by every dialect parser: tool-call pairing, the
//! cumulative-vs-incremental token math, and user-prompt attachment
//! bookkeeping.

use std::collections::{HashMap, HashSet, VecDeque};

use cm_domain::model::{FileOperation, FileOperationType};
use serde_json::Value;

/// A tool-use event seen in a first pass over the file, waiting for its
/// matching tool-result.
#[derive(Debug, Clone)]
pub struct PendingToolUse {
    pub id: String,
    pub tool_name: String,
    pub input: Value,
}

/// A tool-use/tool-result pair ready to fold into a delta.
#[derive(Debug, Clone)]
pub struct PairedToolCall {
    pub tool_use_id: String,
    pub tool_name: String,
    pub success: bool,
    pub file_operation: Option<FileOperation>,
    pub error_message: Option<String>,
}

/// Two-pass tool-call pairing: build a map of tool-use id to its request
/// from `tool_uses`, then walk `tool_results` in order, emitting a pair for
/// every id that has both. Tool-uses with no matching result are returned
/// unmatched so the caller can reconsider them on the next parse.
pub fn pair_tool_calls(
    tool_uses: Vec<PendingToolUse>,
    tool_results: &[(String, Value, bool)],
) -> (Vec<PairedToolCall>, Vec<PendingToolUse>) {
    let mut by_id: HashMap<String, PendingToolUse> =
        tool_uses.into_iter().map(|u| (u.id.clone(), u)).collect();

    let mut paired = Vec::new();
    for (id, result_value, is_error) in tool_results {
        let Some(use_event) = by_id.remove(id) else {
            continue;
        };
        let file_operation = file_operation_for_tool(&use_event.tool_name, &use_event.input, result_value);
        let error_message = if *is_error {
            extract_error_message(result_value)
        } else {
            None
        };
        paired.push(PairedToolCall {
            tool_use_id: id.clone(),
            tool_name: use_event.tool_name,
            success: !is_error,
            file_operation,
            error_message,
        });
    }

    let unmatched = by_id.into_values().collect();
    (paired, unmatched)
}

fn extract_error_message(result_value: &Value) -> Option<String> {
    result_value
        .as_str()
        .map(|s| s.to_string())
        .or_else(|| result_value.get("message").and_then(|v| v.as_str()).map(str::to_string))
        .or_else(|| Some(result_value.to_string()))
}

/// Map a tool name to a file-operation type through a small fixed table.
/// Unknown tool names never produce a file operation.
fn file_operation_for_tool(tool_name: &str, input: &Value, result: &Value) -> Option<FileOperation> {
    let kind = match tool_name.to_ascii_lowercase().as_str() {
        "read" | "view" => FileOperationType::Read,
        "write" | "create" => FileOperationType::Write,
        "edit" | "str_replace" | "str_replace_editor" => FileOperationType::Edit,
        "delete" | "remove" => FileOperationType::Delete,
        "grep" | "search" => FileOperationType::Grep,
        "glob" | "find" => FileOperationType::Glob,
        _ => return None,
    };

    let path = input
        .get("file_path")
        .or_else(|| input.get("path"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let (lines_added, lines_removed, lines_modified) = diff_line_counts(input, result);

    Some(FileOperation {
        kind,
        path,
        language: path_language(input),
        format: None,
        lines_added,
        lines_removed,
        lines_modified,
        duration_ms: result.get("duration_ms").and_then(|v| v.as_u64()),
    })
}

fn path_language(input: &Value) -> Option<String> {
    input
        .get("file_path")
        .or_else(|| input.get("path"))
        .and_then(|v| v.as_str())
        .and_then(|p| p.rsplit('.').next())
        .map(str::to_string)
}

/// Line counts from a structured diff when present; otherwise counted from
/// the newline characters in the supplied content.
fn diff_line_counts(input: &Value, result: &Value) -> (Option<u64>, Option<u64>, Option<u64>) {
    if let Some(diff) = result.get("structured_patch").or_else(|| result.get("diff")) {
        let added = diff.get("lines_added").and_then(|v| v.as_u64());
        let removed = diff.get("lines_removed").and_then(|v| v.as_u64());
        if added.is_some() || removed.is_some() {
            return (added, removed, None);
        }
    }
    if let Some(content) = input.get("content").and_then(|v| v.as_str()) {
        let count = content.matches('\n').count() as u64 + if content.is_empty() { 0 } else { 1 };
        return (Some(count), None, None);
    }
    if let Some(new_text) = input.get("new_string").and_then(|v| v.as_str()) {
        let count = new_text.matches('\n').count() as u64 + if new_text.is_empty() { 0 } else { 1 };
        return (None, None, Some(count));
    }
    (None, None, None)
}

/// Per-event deltas from cumulative totals: the parser MUST compute
/// `max(0, current - previous)` rather than trusting monotonicity.
pub fn cumulative_delta(current: u64, previous: u64) -> u64 {
    current.saturating_sub(previous)
}

/// A queue of user-prompt texts awaiting attachment to the next assistant
/// delta that hasn't already processed them, plus the set of texts already
/// attached this session (to enforce at-most-once attachment).
#[derive(Debug, Default)]
pub struct PromptAttachment {
    pending: VecDeque<String>,
}

impl PromptAttachment {
    pub fn push(&mut self, text: String) {
        self.pending.push_back(text);
    }

    /// Attach the oldest pending prompt not already in `attached`, if any.
    pub fn attach_next(&mut self, attached: &HashSet<String>) -> Option<String> {
        while let Some(text) = self.pending.pop_front() {
            if !attached.contains(&text) {
                return Some(text);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cumulative_delta_never_goes_negative() {
        assert_eq!(cumulative_delta(50, 100), 0);
        assert_eq!(cumulative_delta(150, 100), 50);
    }

    #[test]
    fn pairing_skips_unmatched_tool_use() {
        let uses = vec![PendingToolUse {
            id: "tu_1".into(),
            tool_name: "shell".into(),
            input: serde_json::json!({}),
        }];
        let (paired, unmatched) = pair_tool_calls(uses, &[]);
        assert!(paired.is_empty());
        assert_eq!(unmatched.len(), 1);
    }

    #[test]
    fn pairing_matches_by_id() {
        let uses = vec![PendingToolUse {
            id: "tu_1".into(),
            tool_name: "Read".into(),
            input: serde_json::json!({"file_path": "a.rs"}),
        }];
        let results = vec![("tu_1".to_string(), serde_json::json!("ok"), false)];
        let (paired, unmatched) = pair_tool_calls(uses, &results);
        assert_eq!(paired.len(), 1);
        assert!(unmatched.is_empty());
        assert!(paired[0].success);
        assert_eq!(paired[0].file_operation.as_ref().unwrap().path.as_deref(), Some("a.rs"));
    }

    #[test]
    fn prompt_attaches_once() {
        let mut queue = PromptAttachment::default();
        queue.push("hello".into());
        let mut attached = HashSet::new();
        let first = queue.attach_next(&attached).unwrap();
        assert_eq!(first, "hello");
        attached.insert(first);

        queue.push("hello".into());
        assert!(queue.attach_next(&attached).is_none());
    }
}
