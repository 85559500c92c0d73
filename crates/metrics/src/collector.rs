//! Watcher + Collector Loop: drives a session's parser against its
//! correlated file, debounced on file-change, single-flight per session.
//!
//! No filesystem-event crate sits in this workspace's dependency stack, so
//! the watcher polls (size, mtime) rather than subscribing to OS events —
//! cheap enough at a sub-second interval for a single file per session, and
//! it keeps the dependency footprint aligned with what this crate already
//! pulls in for everything else.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cm_domain::error::Result;
use cm_domain::model::SyncStateStatus;
use cm_domain::trace::TraceEvent;
use tokio::sync::{Notify, Mutex as AsyncMutex};

use crate::parser::AssistantLogParser;
use crate::{delta_store::DeltaStore, sync_state::SyncStateManager};

fn file_signature(path: &Path) -> (u64, i64) {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let mtime_ms = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            (meta.len(), mtime_ms)
        }
        Err(_) => (0, 0),
    }
}

/// Poll `path` until its signature differs from `baseline`, then wait a
/// quiet period with no further change before returning the settled
/// signature. Returns `None` if `shutdown` fires before a settled change is
/// observed.
async fn wait_for_settled_change(path: &Path, mut baseline: (u64, i64), poll_interval: Duration, debounce: Duration, shutdown: &Notify) -> Option<(u64, i64)> {
    loop {
        tokio::select! {
            _ = shutdown.notified() => return None,
            _ = tokio::time::sleep(poll_interval) => {}
        }

        let current = file_signature(path);
        if current == baseline {
            continue;
        }

        let mut candidate = current;
        loop {
            tokio::select! {
                _ = shutdown.notified() => return Some(candidate),
                _ = tokio::time::sleep(debounce) => {}
            }
            let recheck = file_signature(path);
            if recheck == candidate {
                return Some(candidate);
            }
            candidate = recheck;
        }
    }
}

pub struct CollectorLoop {
    session_id: String,
    agent_session_id: String,
    file_path: std::path::PathBuf,
    parser: Box<dyn AssistantLogParser>,
    delta_store: DeltaStore,
    sync_state: Arc<SyncStateManager>,
    shutdown: Notify,
    single_flight: AsyncMutex<()>,
}

impl CollectorLoop {
    pub fn new(
        session_id: impl Into<String>,
        agent_session_id: impl Into<String>,
        file_path: std::path::PathBuf,
        parser: Box<dyn AssistantLogParser>,
        delta_store: DeltaStore,
        sync_state: Arc<SyncStateManager>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            agent_session_id: agent_session_id.into(),
            file_path,
            parser,
            delta_store,
            sync_state,
            shutdown: Notify::new(),
            single_flight: AsyncMutex::new(()),
        }
    }

    /// One collection pass: parse what's new, append it, advance sync-state.
    /// Synchronous — the heaviest step is reading a session file from disk,
    /// no different in cost from the rest of this crate's file I/O.
    pub fn collect_once(&self) -> Result<usize> {
        let processed = self.sync_state.processed_record_ids();
        let attached = self.sync_state.attached_user_prompt_texts();
        let parsed = self.parser.parse_incremental(&self.file_path, &processed, &attached);
        let count = parsed.deltas.len();

        let mut ids = Vec::with_capacity(count);
        for delta in &parsed.deltas {
            self.delta_store.append_delta(delta)?;
            ids.push(delta.record_id.clone());
            TraceEvent::DeltaAppended {
                session_id: self.session_id.clone(),
                record_id: delta.record_id.clone(),
            }
            .emit();
        }

        if !ids.is_empty() {
            self.sync_state.add_processed_records(ids)?;
        }
        if !parsed.newly_attached_prompts.is_empty() {
            self.sync_state.add_attached_user_prompts(parsed.newly_attached_prompts)?;
        }
        self.sync_state.update_last_processed(parsed.last_line, parsed.file_hash)?;
        if count > 0 {
            self.sync_state.increment_deltas(count as u64)?;
            TraceEvent::SyncStateUpdated {
                session_id: self.session_id.clone(),
                total_deltas: self.sync_state.current().map(|s| s.total_deltas).unwrap_or(0),
            }
            .emit();
        }

        Ok(count)
    }

    /// Drive collection off debounced file-change notifications until
    /// `shutdown()` is called. Single-flight: a collect already in progress
    /// when a new change settles is allowed to finish; the new change is
    /// simply picked up on the following loop iteration since the baseline
    /// has already moved.
    pub async fn run(self: Arc<Self>, poll_interval: Duration, debounce: Duration) {
        let mut baseline = file_signature(&self.file_path);
        loop {
            match wait_for_settled_change(&self.file_path, baseline, poll_interval, debounce, &self.shutdown).await {
                None => break,
                Some(next) => {
                    baseline = next;
                    if let Ok(_guard) = self.single_flight.try_lock() {
                        if let Err(e) = self.collect_once() {
                            tracing::warn!(session_id = %self.session_id, error = %e, "collector loop: collect_once failed");
                        }
                    }
                }
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// Tear down the watcher, await one final collect, then mark sync-state
    /// completed. Per the lifecycle contract: watcher stops first, then one
    /// last collect runs to catch anything written right before exit.
    pub async fn finalize(&self) -> Result<usize> {
        self.stop();
        let _guard = self.single_flight.lock().await;
        let count = self.collect_once()?;
        self.sync_state.update_status(SyncStateStatus::Completed)?;
        Ok(count)
    }

    pub fn agent_session_id(&self) -> &str {
        &self.agent_session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::dialect_a::DialectAParser;
    use chrono::Utc;

    fn write_session(path: &Path, lines: &[&str]) {
        std::fs::write(path, lines.join("\n")).unwrap();
    }

    fn make_loop(tmp: &std::path::Path, file: std::path::PathBuf) -> CollectorLoop {
        let sync_state = Arc::new(SyncStateManager::new(tmp, "sess1"));
        sync_state.initialize("sess1", "agent1", Utc::now()).unwrap();
        let delta_store = DeltaStore::new(tmp, "sess1", 10 * 1024 * 1024, 3);
        CollectorLoop::new("sess1", "agent1", file, Box::new(DialectAParser::default()), delta_store, sync_state)
    }

    #[test]
    fn collect_once_appends_and_advances_sync_state() {
        let tmp = tempfile::tempdir().unwrap();
        let session_path = tmp.path().join("session.jsonl");
        write_session(
            &session_path,
            &[r#"{"type":"assistant","sessionId":"agent1","uuid":"u1","message":{"role":"assistant","model":"x","usage":{"input_tokens":10,"output_tokens":5}}}"#],
        );
        let collector = make_loop(tmp.path(), session_path);

        let count = collector.collect_once().unwrap();
        assert_eq!(count, 1);
        assert_eq!(collector.sync_state.current().unwrap().total_deltas, 1);

        let second_count = collector.collect_once().unwrap();
        assert_eq!(second_count, 0, "reparse with no new file content yields no new deltas");
    }

    #[tokio::test]
    async fn finalize_marks_sync_state_completed() {
        let tmp = tempfile::tempdir().unwrap();
        let session_path = tmp.path().join("session.jsonl");
        write_session(&session_path, &[]);
        let collector = make_loop(tmp.path(), session_path);

        collector.finalize().await.unwrap();
        assert_eq!(collector.sync_state.current().unwrap().status, SyncStateStatus::Completed);
    }
}
