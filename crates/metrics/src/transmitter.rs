//! Metrics Transmitter: best-effort delivery of session-start, session-end,
//! and aggregated-usage metrics to the remote collector.
//!
//! Failures never propagate to the user-facing exit status — they're
//! recorded on the originating delta's `sync_status` (by the caller) or
//! just logged. Dry-run mode substitutes a log line for every send, the
//! same escape hatch the router gives operators for LLM calls gone wrong.

use std::time::Duration;

use cm_domain::model::{AggregatedMetric, LifecycleStatus, MetricsSession};
use serde::Serialize;

const DEFAULT_RETRY_BASE_MS: u64 = 500;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MetricPayload<'a> {
    SessionStart {
        session_id: &'a str,
        agent_name: &'a str,
        provider: &'a str,
        status: LifecycleStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<&'a str>,
    },
    SessionEnd {
        session_id: &'a str,
        status: LifecycleStatus,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<&'a str>,
    },
    AggregatedUsage {
        #[serde(flatten)]
        metric: &'a AggregatedMetric,
    },
}

pub struct MetricsTransmitter {
    client: reqwest::Client,
    endpoint: String,
    dry_run: bool,
    max_attempts: u32,
    retry_base_ms: u64,
}

impl MetricsTransmitter {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, dry_run: bool) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            dry_run,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
        }
    }

    pub fn with_retry_policy(mut self, max_attempts: u32, retry_base_ms: u64) -> Self {
        self.max_attempts = max_attempts;
        self.retry_base_ms = retry_base_ms;
        self
    }

    /// `status` is restricted to `Started`/`Failed` per the spec's
    /// session-start contract; the caller decides which applies.
    pub async fn send_session_start(&self, session: &MetricsSession, status: LifecycleStatus, error: Option<&str>) -> bool {
        let payload = MetricPayload::SessionStart {
            session_id: &session.session_id,
            agent_name: &session.agent_name,
            provider: &session.provider,
            status,
            error,
        };
        self.send("session_start", &session.session_id, &payload).await
    }

    /// `status` is restricted to `Completed`/`Failed`/`Interrupted` per the
    /// spec's session-end contract.
    pub async fn send_session_end(&self, session: &MetricsSession, status: LifecycleStatus, duration_ms: u64, error: Option<&str>) -> bool {
        let payload = MetricPayload::SessionEnd {
            session_id: &session.session_id,
            status,
            duration_ms,
            error,
        };
        self.send("session_end", &session.session_id, &payload).await
    }

    pub async fn send_aggregated_metric(&self, session_id: &str, metric: &AggregatedMetric) -> bool {
        let payload = MetricPayload::AggregatedUsage { metric };
        self.send("aggregated_usage", session_id, &payload).await
    }

    async fn send(&self, kind: &str, session_id: &str, payload: &impl Serialize) -> bool {
        if self.dry_run {
            let json = serde_json::to_string(payload).unwrap_or_default();
            tracing::info!(metric = kind, session_id, payload = %json, "dry-run: metric not sent");
            return true;
        }

        for attempt in 0..self.max_attempts {
            match self.client.post(&self.endpoint).json(payload).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        cm_domain::trace::TraceEvent::MetricsSent {
                            metric: kind.to_string(),
                            session_id: session_id.to_string(),
                        }
                        .emit();
                        return true;
                    }
                    if status.as_u16() == 401 || status.as_u16() == 403 {
                        Self::log_failure(kind, session_id, "authentication rejected, not retrying");
                        return false;
                    }
                    if status.as_u16() == 404 {
                        tracing::debug!(metric = kind, session_id, "collector endpoint not found, dropping");
                        return false;
                    }
                    tracing::warn!(metric = kind, session_id, status = %status, attempt, "metrics send failed, will retry");
                }
                Err(e) => {
                    tracing::warn!(metric = kind, session_id, error = %e, attempt, "metrics send errored, will retry");
                }
            }

            if attempt + 1 < self.max_attempts {
                let delay = self.retry_base_ms * (1u64 << attempt);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Self::log_failure(kind, session_id, "exhausted retry attempts");
        false
    }

    fn log_failure(kind: &str, session_id: &str, reason: &str) {
        cm_domain::trace::TraceEvent::MetricsSendFailed {
            metric: kind.to_string(),
            session_id: session_id.to_string(),
            reason: reason.to_string(),
        }
        .emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_never_hits_network_and_reports_success() {
        let client = reqwest::Client::new();
        let transmitter = MetricsTransmitter::new(client, "http://127.0.0.1:1/v1/metrics", true);
        let session = MetricsSession::new("claude-code", "sso", "/tmp/proj");
        assert!(transmitter.send_session_start(&session, LifecycleStatus::Started, None).await);
    }

    #[tokio::test]
    async fn unreachable_endpoint_exhausts_retries_and_reports_failure() {
        let client = reqwest::Client::new();
        let transmitter = MetricsTransmitter::new(client, "http://127.0.0.1:9/v1/metrics", false).with_retry_policy(2, 1);
        let session = MetricsSession::new("claude-code", "sso", "/tmp/proj");
        assert!(!transmitter.send_session_start(&session, LifecycleStatus::Started, None).await);
    }
}
