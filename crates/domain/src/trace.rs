use serde::Serialize;

/// Structured trace events emitted across every `cm-*` crate.
///
/// One variant per pipeline/proxy/lifecycle milestone. Emitted as a single
/// JSON line tagged `cm_event` so the debug log file can be grepped or
/// shipped without a schema registry.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        session_id: String,
        agent_name: String,
        provider: String,
    },
    CorrelationAttempt {
        session_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    CorrelationMatched {
        session_id: String,
        agent_session_id: String,
        agent_session_file: String,
        attempt: u32,
    },
    CorrelationFailed {
        session_id: String,
        attempts: u32,
    },
    DeltaAppended {
        session_id: String,
        record_id: String,
    },
    SyncStateUpdated {
        session_id: String,
        total_deltas: u64,
    },
    AggregatedMetricEmitted {
        session_id: String,
        branch: String,
        total_input_tokens: u64,
        total_output_tokens: u64,
    },
    MetricsSent {
        metric: String,
        session_id: String,
    },
    MetricsSendFailed {
        metric: String,
        session_id: String,
        reason: String,
    },
    ProxyStarted {
        url: String,
    },
    ProxyStopped,
    ProxyRequestBlocked {
        request_id: String,
        path: String,
    },
    ProxyRequestForwarded {
        request_id: String,
        target_url: String,
        status: u16,
        duration_ms: u64,
    },
    SsoCredentialLoaded {
        base_url_hash: String,
    },
    SsoCredentialExpired {
        base_url_hash: String,
    },
    ChildSpawned {
        session_id: String,
        pid: u32,
    },
    ChildSignalForwarded {
        session_id: String,
        signal: String,
    },
    ChildExited {
        session_id: String,
        exit_code: Option<i32>,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cm_event");
    }
}
