//! Metrics Orchestrator: wires together the Correlator, Snapshotter,
//! Collector Loop, Sync-State Manager, Delta Store, Aggregator, and
//! Transmitter around one assistant invocation, on the Lifecycle
//! Controller's behalf.
//!
//! Mirrors the shape of `MetricsSyncInterceptor::harvest` for the
//! aggregate-then-transmit-then-mark-synced sequence, but runs it once at
//! session start (correlation) and once at session end (final flush)
//! rather than on a timer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cm_domain::config::{AgentConfig, MetricsConfig};
use cm_domain::error::Result;
use cm_domain::model::{CorrelationStatus, FileSnapshot, LifecycleStatus, MetricsSession, SessionStatus, SyncStatus};
use cm_domain::trace::TraceEvent;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use cm_metrics::aggregator;
use cm_metrics::collector::CollectorLoop;
use cm_metrics::correlator::{self, CorrelatorPolicy};
use cm_metrics::delta_store::DeltaStore;
use cm_metrics::git::BranchCache;
use cm_metrics::parser::{self, AssistantLogParser};
use cm_metrics::session_store::SessionStore;
use cm_metrics::sync_state::SyncStateManager;
use cm_metrics::transmitter::MetricsTransmitter;

pub struct MetricsOrchestrator {
    session_id: String,
    agent_name: String,
    working_directory: String,
    sessions_dir: PathBuf,
    sessions_base_dir: PathBuf,
    session_store: Arc<SessionStore>,
    transmitter: Arc<MetricsTransmitter>,
    branch_cache: Arc<BranchCache>,
    correlator_policy: CorrelatorPolicy,
    collector_debounce_ms: u64,
    delta_store_rotation_bytes: u64,
    delta_store_max_rotations: u32,
    error_excluded_tools: Vec<String>,
    delta_store: Arc<DeltaStore>,
    pre_snapshot: AsyncMutex<Option<FileSnapshot>>,
    collector: AsyncMutex<Option<Arc<CollectorLoop>>>,
    collector_handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl MetricsOrchestrator {
    pub fn new(
        session: &MetricsSession,
        sessions_dir: PathBuf,
        session_store: Arc<SessionStore>,
        transmitter: Arc<MetricsTransmitter>,
        branch_cache: Arc<BranchCache>,
        agent_config: &AgentConfig,
        metrics_config: &MetricsConfig,
    ) -> Self {
        let parser = parser::parser_for_agent(&session.agent_name);
        let sessions_base_dir = agent_config
            .sessions_base_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| parser::default_sessions_base_dir(parser.dialect_name()));

        let delta_store = Arc::new(DeltaStore::new(
            &sessions_dir,
            &session.session_id,
            metrics_config.delta_store_rotation_bytes,
            metrics_config.delta_store_max_rotations,
        ));

        Self {
            session_id: session.session_id.clone(),
            agent_name: session.agent_name.clone(),
            working_directory: session.working_directory.clone(),
            sessions_dir,
            sessions_base_dir,
            session_store,
            transmitter,
            branch_cache,
            correlator_policy: CorrelatorPolicy {
                initial_delay_ms: metrics_config.correlator_initial_delay_ms,
                max_delay_ms: metrics_config.correlator_max_delay_ms,
                max_attempts: metrics_config.correlator_max_attempts,
            },
            collector_debounce_ms: metrics_config.collector_debounce_ms,
            delta_store_rotation_bytes: metrics_config.delta_store_rotation_bytes,
            delta_store_max_rotations: metrics_config.delta_store_max_rotations,
            error_excluded_tools: agent_config.error_excluded_tools.clone(),
            delta_store,
            pre_snapshot: AsyncMutex::new(None),
            collector: AsyncMutex::new(None),
            collector_handle: AsyncMutex::new(None),
        }
    }

    /// The session's Delta Store, shared with the proxy's Metrics-Sync
    /// interceptor so both sides observe the same append log.
    pub fn delta_store(&self) -> Arc<DeltaStore> {
        self.delta_store.clone()
    }

    fn parser(&self) -> Box<dyn AssistantLogParser> {
        parser::parser_for_agent(&self.agent_name)
    }

    /// Snapshot the assistant's session directory before spawn, so the
    /// Correlator can diff it against the post-spawn snapshots.
    pub async fn before_agent_spawn(&self) {
        let parser = self.parser();
        let snapshot = correlator::snapshot_now(&self.sessions_base_dir, &parser.sessions_template());
        *self.pre_snapshot.lock().await = Some(snapshot);
    }

    /// Correlate the spawned assistant to its session file, then start
    /// collecting from it. Runs the full bounded-retry schedule; on success
    /// the Collector Loop is already running in the background by the time
    /// this returns.
    pub async fn after_agent_spawn(&self) -> Result<()> {
        let parser = self.parser();
        tokio::time::sleep(Duration::from_millis(parser.init_delay_ms())).await;

        let before = self.pre_snapshot.lock().await.clone().unwrap_or_else(FileSnapshot::empty);

        let mut attempt_no = 0u32;
        loop {
            let delay = self.correlator_policy.delay_for_attempt(attempt_no);
            TraceEvent::CorrelationAttempt {
                session_id: self.session_id.clone(),
                attempt: attempt_no,
                delay_ms: delay.as_millis() as u64,
            }
            .emit();

            let after = correlator::snapshot_now(&self.sessions_base_dir, &parser.sessions_template());
            if let Some((agent_session_id, file)) = correlator::attempt(&before, &after, parser.as_ref()) {
                TraceEvent::CorrelationMatched {
                    session_id: self.session_id.clone(),
                    agent_session_id: agent_session_id.clone(),
                    agent_session_file: file.to_string_lossy().into_owned(),
                    attempt: attempt_no,
                }
                .emit();
                self.session_store.update_correlation(
                    &self.session_id,
                    CorrelationStatus::Matched,
                    Some(agent_session_id.clone()),
                    Some(file.to_string_lossy().into_owned()),
                    attempt_no,
                )?;
                self.start_collector(agent_session_id, file).await?;
                return Ok(());
            }

            attempt_no += 1;
            if self.correlator_policy.should_give_up(attempt_no) {
                TraceEvent::CorrelationFailed {
                    session_id: self.session_id.clone(),
                    attempts: attempt_no,
                }
                .emit();
                self.session_store.update_correlation(&self.session_id, CorrelationStatus::Failed, None, None, attempt_no)?;
                return Ok(());
            }

            tokio::time::sleep(delay).await;
        }
    }

    async fn start_collector(&self, agent_session_id: String, file: PathBuf) -> Result<()> {
        let sync_state = Arc::new(SyncStateManager::new(&self.sessions_dir, &self.session_id));
        sync_state.initialize(&self.session_id, &agent_session_id, chrono::Utc::now())?;

        // DeltaStore carries no state beyond a path, so building a second,
        // owned instance for the collector (which takes it by value) is
        // cheap and leaves `self.delta_store` free for the proxy and the
        // final flush to share.
        let collector = Arc::new(CollectorLoop::new(
            self.session_id.clone(),
            agent_session_id,
            file,
            self.parser(),
            DeltaStore::new(&self.sessions_dir, &self.session_id, self.delta_store_rotation_bytes, self.delta_store_max_rotations),
            sync_state,
        ));

        if let Err(e) = collector.collect_once() {
            tracing::warn!(session_id = %self.session_id, error = %e, "initial collect after correlation failed");
        }
        self.session_store.set_monitoring_active(&self.session_id, true)?;

        let running = collector.clone();
        let poll_interval = Duration::from_millis((self.collector_debounce_ms / 2).max(250));
        let debounce = Duration::from_millis(self.collector_debounce_ms);
        let handle = tokio::spawn(async move { running.run(poll_interval, debounce).await });

        *self.collector.lock().await = Some(collector);
        *self.collector_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the Collector Loop (if running), run one final collect, and
    /// flush any pending deltas to the remote collector. Call once the
    /// child has exited and the grace period has elapsed.
    pub async fn on_agent_exit(&self, status: LifecycleStatus, error: Option<&str>) -> Result<()> {
        if let Some(collector) = self.collector.lock().await.as_ref() {
            if let Err(e) = collector.finalize().await {
                tracing::warn!(session_id = %self.session_id, error = %e, "final collect before shutdown failed");
            }
        }
        if let Some(handle) = self.collector_handle.lock().await.take() {
            handle.abort();
        }
        self.session_store.set_monitoring_active(&self.session_id, false)?;

        let branch = self.branch_cache.branch_for(&self.working_directory).await;
        self.session_store.set_git_branch(&self.session_id, branch)?;

        let session_status = match status {
            LifecycleStatus::Completed => SessionStatus::Completed,
            _ => SessionStatus::Failed,
        };
        self.session_store.update_status(&self.session_id, session_status)?;

        self.flush_and_send(status, error).await?;
        Ok(())
    }

    async fn flush_and_send(&self, status: LifecycleStatus, error: Option<&str>) -> Result<()> {
        let Some(session) = self.session_store.load(&self.session_id)? else {
            return Ok(());
        };

        let duration_ms = (chrono::Utc::now() - session.start_time).num_milliseconds().max(0) as u64;
        let pending = self.delta_store.filter_by_status(SyncStatus::Pending)?;
        if !pending.is_empty() {
            let metrics = aggregator::aggregate(&session, &pending, status, duration_ms, &self.error_excluded_tools);
            for metric in &metrics {
                let sent = self.transmitter.send_aggregated_metric(&self.session_id, metric).await;
                TraceEvent::AggregatedMetricEmitted {
                    session_id: self.session_id.clone(),
                    branch: metric.attributes.branch.clone(),
                    total_input_tokens: metric.attributes.total_input_tokens,
                    total_output_tokens: metric.attributes.total_output_tokens,
                }
                .emit();
                let ids: Vec<&str> = pending
                    .iter()
                    .filter(|d| {
                        d.git_branch.as_deref() == Some(metric.attributes.branch.as_str())
                            || (d.git_branch.is_none() && metric.attributes.branch == "unknown")
                    })
                    .map(|d| d.record_id.as_str())
                    .collect();
                for id in ids {
                    let sync_status = if sent { SyncStatus::Synced } else { SyncStatus::Failed };
                    let sync_error = if sent { None } else { Some("transmission failed".to_string()) };
                    self.delta_store.update_sync_status(id, sync_status, sync_error)?;
                }
            }
        }

        self.transmitter.send_session_end(&session, status, duration_ms, error).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transmitter() -> Arc<MetricsTransmitter> {
        Arc::new(MetricsTransmitter::new(reqwest::Client::new(), "http://127.0.0.1:1/v1/metrics", true))
    }

    #[tokio::test]
    async fn on_agent_exit_without_correlation_still_sends_session_end() {
        let tmp = tempfile::tempdir().unwrap();
        let session_store = Arc::new(SessionStore::new(tmp.path()));
        let session = MetricsSession::new("claude-code", "sso", tmp.path().to_string_lossy().into_owned());
        session_store.create(&session).unwrap();

        let orchestrator = MetricsOrchestrator::new(
            &session,
            tmp.path().to_path_buf(),
            session_store,
            transmitter(),
            Arc::new(BranchCache::new()),
            &AgentConfig::default(),
            &MetricsConfig::default(),
        );

        orchestrator.on_agent_exit(LifecycleStatus::Completed, None).await.unwrap();
    }
}
