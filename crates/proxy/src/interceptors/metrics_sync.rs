//! Metrics-Sync interceptor: runs last in the chain. Piggybacks on proxy
//! traffic as a cheap periodic trigger — on every response, once
//! `sync_interval` has elapsed since the last harvest, it pulls pending
//! deltas, re-aggregates the session, and hands the result to the
//! Transmitter, marking each delta synced/failed according to the result.
//!
//! A session that never sends another request after its last delta still
//! gets flushed at shutdown by the Lifecycle Controller's own final sync;
//! this interceptor only covers the common case of a long-running session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use cm_domain::model::{LifecycleStatus, SyncStatus};
use cm_metrics::aggregator;
use cm_metrics::delta_store::DeltaStore;
use cm_metrics::session_store::SessionStore;
use cm_metrics::transmitter::MetricsTransmitter;

use crate::context::ProxyContext;

use super::Interceptor;

pub struct MetricsSyncInterceptor {
    session_id: String,
    session_store: Arc<SessionStore>,
    delta_store: Arc<DeltaStore>,
    transmitter: Arc<MetricsTransmitter>,
    error_excluded_tools: Vec<String>,
    sync_interval: Duration,
    last_sync: Mutex<Instant>,
}

impl MetricsSyncInterceptor {
    pub fn new(
        session_id: String,
        session_store: Arc<SessionStore>,
        delta_store: Arc<DeltaStore>,
        transmitter: Arc<MetricsTransmitter>,
        error_excluded_tools: Vec<String>,
        sync_interval: Duration,
    ) -> Self {
        Self {
            session_id,
            session_store,
            delta_store,
            transmitter,
            error_excluded_tools,
            sync_interval,
            last_sync: Mutex::new(Instant::now() - sync_interval),
        }
    }

    async fn due(&self) -> bool {
        let mut last = self.last_sync.lock().await;
        if last.elapsed() >= self.sync_interval {
            *last = Instant::now();
            true
        } else {
            false
        }
    }

    async fn harvest(&self) {
        let pending = match self.delta_store.filter_by_status(SyncStatus::Pending) {
            Ok(deltas) if !deltas.is_empty() => deltas,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(error = %e, session_id = %self.session_id, "metrics sync: failed reading pending deltas");
                return;
            }
        };

        let session = match self.session_store.load(&self.session_id) {
            Ok(Some(session)) => session,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, session_id = %self.session_id, "metrics sync: failed loading session");
                return;
            }
        };

        let duration_ms = (chrono::Utc::now() - session.start_time).num_milliseconds().max(0) as u64;
        let metrics = aggregator::aggregate(&session, &pending, LifecycleStatus::Started, duration_ms, &self.error_excluded_tools);

        for metric in &metrics {
            let sent = self.transmitter.send_aggregated_metric(&self.session_id, metric).await;
            let ids: Vec<&str> = pending
                .iter()
                .filter(|d| d.git_branch.as_deref() == Some(metric.attributes.branch.as_str()) || (d.git_branch.is_none() && metric.attributes.branch == "unknown"))
                .map(|d| d.record_id.as_str())
                .collect();
            for id in ids {
                let status = if sent { SyncStatus::Synced } else { SyncStatus::Failed };
                let error = if sent { None } else { Some("transmission failed".to_string()) };
                if let Err(e) = self.delta_store.update_sync_status(id, status, error) {
                    tracing::warn!(error = %e, record_id = id, "metrics sync: failed updating delta sync status");
                }
            }
        }
    }
}

#[async_trait]
impl Interceptor for MetricsSyncInterceptor {
    async fn on_response(&self, _ctx: &mut ProxyContext) {
        if self.due().await {
            self.harvest().await;
        }
    }

    fn name(&self) -> &'static str {
        "metrics_sync"
    }
}
