//! Aggregator: folds a session's [`MetricDelta`] records into one
//! [`AggregatedMetric`] per git branch touched during the session.

use std::collections::HashMap;

use cm_domain::model::{
    AggregatedMetric, AggregatedMetricAttributes, AggregatedMetricName, LifecycleStatus, MetricDelta, MetricsSession,
};
use regex::Regex;
use std::sync::OnceLock;

const ERROR_TRUNCATE_LEN: usize = 1000;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

fn ansi_escape() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid ANSI regex"))
}

/// Derive the repository attribute from a working directory: the last two
/// non-empty path segments, joined with `/`. A path with fewer than two
/// segments falls back to whatever it has.
pub fn derive_repository(working_directory: &str) -> String {
    let segments: Vec<&str> = working_directory.split(['/', '\\']).filter(|s| !s.is_empty()).collect();
    match segments.len() {
        0 => String::new(),
        1 => segments[0].to_string(),
        _ => segments[segments.len() - 2..].join("/"),
    }
}

/// Most-frequent model across a session's deltas; ties broken by whichever
/// model was first seen.
pub fn derive_llm_model(deltas: &[MetricDelta]) -> String {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    let mut first_seen: Vec<&str> = Vec::new();
    for delta in deltas {
        for model in &delta.models {
            if !counts.contains_key(model.as_str()) {
                first_seen.push(model.as_str());
            }
            *counts.entry(model.as_str()).or_insert(0) += 1;
        }
    }
    first_seen
        .into_iter()
        .max_by_key(|m| counts.get(m).copied().unwrap_or(0))
        .unwrap_or_default()
        .to_string()
}

/// Strip ANSI escape sequences, escape literal newlines, and cap at
/// [`ERROR_TRUNCATE_LEN`] characters with a `...[truncated]` suffix.
pub fn sanitize_error(raw: &str) -> String {
    let stripped = ansi_escape().replace_all(raw, "");
    let escaped = stripped.replace('\n', "\\n").replace('\r', "\\r");
    if escaped.chars().count() <= ERROR_TRUNCATE_LEN {
        escaped
    } else {
        let truncated: String = escaped.chars().take(ERROR_TRUNCATE_LEN).collect();
        format!("{truncated}{TRUNCATE_SUFFIX}")
    }
}

/// Group `deltas` by branch (falling back to `session.git_branch`, then
/// `"unknown"`) and fold each group into one [`AggregatedMetric`].
pub fn aggregate(
    session: &MetricsSession,
    deltas: &[MetricDelta],
    status: LifecycleStatus,
    session_duration_ms: u64,
    error_excluded_tools: &[String],
) -> Vec<AggregatedMetric> {
    let mut by_branch: HashMap<String, Vec<&MetricDelta>> = HashMap::new();
    for delta in deltas {
        let branch = delta
            .git_branch
            .clone()
            .or_else(|| session.git_branch.clone())
            .unwrap_or_else(|| "unknown".to_string());
        by_branch.entry(branch).or_default().push(delta);
    }

    let repository = derive_repository(&session.working_directory);

    by_branch
        .into_iter()
        .map(|(branch, group)| {
            let llm_model = derive_llm_model(&group.iter().map(|d| (*d).clone()).collect::<Vec<_>>());

            let mut attrs = AggregatedMetricAttributes {
                agent: session.agent_name.clone(),
                agent_version: String::new(),
                llm_model,
                repository: repository.clone(),
                session_id: session.session_id.clone(),
                branch,
                project: session.project.clone(),
                total_user_prompts: 0,
                total_input_tokens: 0,
                total_output_tokens: 0,
                total_cache_read_input_tokens: 0,
                total_cache_creation_tokens: 0,
                total_tool_calls: 0,
                successful_tool_calls: 0,
                failed_tool_calls: 0,
                files_created: 0,
                files_modified: 0,
                files_deleted: 0,
                total_lines_added: 0,
                total_lines_removed: 0,
                session_duration_ms,
                had_errors: false,
                status,
                count: group.len() as u64,
                errors: None,
            };

            let mut errors: HashMap<String, Vec<String>> = HashMap::new();

            for delta in &group {
                attrs.total_input_tokens += delta.tokens.input;
                attrs.total_output_tokens += delta.tokens.output;
                attrs.total_cache_read_input_tokens += delta.tokens.cache_read.unwrap_or(0);
                attrs.total_cache_creation_tokens += delta.tokens.cache_creation.unwrap_or(0);
                attrs.total_user_prompts += delta.user_prompts.iter().map(|p| p.count).sum::<u64>();

                for (tool, count) in &delta.tools {
                    attrs.total_tool_calls += count;
                    if let Some(outcome) = delta.tool_status.get(tool) {
                        attrs.successful_tool_calls += outcome.success;
                        attrs.failed_tool_calls += outcome.failure;
                        if outcome.failure > 0 && !error_excluded_tools.iter().any(|t| t == tool) {
                            attrs.had_errors = true;
                            if let Some(message) = &delta.api_error_message {
                                errors.entry(tool.clone()).or_default().push(sanitize_error(message));
                            }
                        }
                    }
                }

                for op in &delta.file_operations {
                    use cm_domain::model::FileOperationType::*;
                    match op.kind {
                        Write => attrs.files_created += 1,
                        Edit => attrs.files_modified += 1,
                        Delete => attrs.files_deleted += 1,
                        _ => {}
                    }
                    attrs.total_lines_added += op.lines_added.unwrap_or(0);
                    attrs.total_lines_removed += op.lines_removed.unwrap_or(0);
                }

                if delta.api_error_message.is_some() && delta.tools.is_empty() {
                    attrs.had_errors = true;
                }
            }

            if !errors.is_empty() {
                attrs.errors = Some(errors);
            }

            AggregatedMetric {
                name: AggregatedMetricName::SessionTotal,
                attributes: attrs,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_domain::model::{FileOperation, FileOperationType, SessionStatus, ToolOutcome};

    fn sample_session() -> MetricsSession {
        let mut session = MetricsSession::new("claude-code", "sso", "/home/user/work/my-repo");
        session.status = SessionStatus::Completed;
        session
    }

    #[test]
    fn repository_is_last_two_path_segments() {
        assert_eq!(derive_repository("/home/user/work/my-repo"), "work/my-repo");
        assert_eq!(derive_repository("solo"), "solo");
        assert_eq!(derive_repository(""), "");
    }

    #[test]
    fn most_frequent_model_wins_ties_broken_by_first_seen() {
        let mut d1 = MetricDelta::new("r1", "s1", "a1");
        d1.models.push("model-a".into());
        let mut d2 = MetricDelta::new("r2", "s1", "a1");
        d2.models.push("model-b".into());
        let mut d3 = MetricDelta::new("r3", "s1", "a1");
        d3.models.push("model-b".into());

        assert_eq!(derive_llm_model(&[d1, d2, d3]), "model-b");
    }

    #[test]
    fn sanitize_error_strips_ansi_and_truncates() {
        let raw = "\x1b[31mfailed\x1b[0m\nsecond line";
        assert_eq!(sanitize_error(raw), "failed\\nsecond line");

        let long = "x".repeat(2000);
        let sanitized = sanitize_error(&long);
        assert!(sanitized.ends_with("...[truncated]"));
        assert_eq!(sanitized.chars().count(), ERROR_TRUNCATE_LEN + TRUNCATE_SUFFIX.chars().count());
    }

    #[test]
    fn aggregate_groups_by_branch_and_sums_tokens() {
        let session = sample_session();
        let mut d1 = MetricDelta::new("r1", &session.session_id, "a1");
        d1.git_branch = Some("main".into());
        d1.tokens.input = 100;
        d1.tokens.output = 50;

        let mut d2 = MetricDelta::new("r2", &session.session_id, "a1");
        d2.git_branch = Some("main".into());
        d2.tokens.input = 25;
        d2.tokens.output = 10;

        let mut d3 = MetricDelta::new("r3", &session.session_id, "a1");
        d3.git_branch = Some("feature/x".into());
        d3.tokens.input = 5;
        d3.tokens.output = 5;

        let metrics = aggregate(&session, &[d1, d2, d3], LifecycleStatus::Completed, 1000, &[]);
        assert_eq!(metrics.len(), 2);

        let main = metrics.iter().find(|m| m.attributes.branch == "main").unwrap();
        assert_eq!(main.attributes.total_input_tokens, 125);
        assert_eq!(main.attributes.total_output_tokens, 60);
        assert_eq!(main.attributes.repository, "work/my-repo");
    }

    #[test]
    fn excluded_tool_failures_do_not_set_had_errors() {
        let session = sample_session();
        let mut delta = MetricDelta::new("r1", &session.session_id, "a1");
        delta.git_branch = Some("main".into());
        delta.tools.insert("shell".into(), 1);
        delta.tool_status.insert("shell".into(), ToolOutcome { success: 0, failure: 1 });
        delta.api_error_message = Some("boom".into());

        let metrics = aggregate(&session, &[delta], LifecycleStatus::Completed, 500, &["shell".to_string()]);
        assert!(!metrics[0].attributes.had_errors);
        assert!(metrics[0].attributes.errors.is_none());
    }

    #[test]
    fn file_operations_are_tallied_by_kind() {
        let session = sample_session();
        let mut delta = MetricDelta::new("r1", &session.session_id, "a1");
        delta.git_branch = Some("main".into());
        delta.file_operations.push(FileOperation {
            kind: FileOperationType::Write,
            path: Some("a.rs".into()),
            language: None,
            format: None,
            lines_added: Some(10),
            lines_removed: None,
            lines_modified: None,
            duration_ms: None,
        });

        let metrics = aggregate(&session, &[delta], LifecycleStatus::Completed, 500, &[]);
        assert_eq!(metrics[0].attributes.files_created, 1);
        assert_eq!(metrics[0].attributes.total_lines_added, 10);
    }
}
