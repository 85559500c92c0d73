//! Session Store: per-session [`MetricsSession`] documents.
//!
//! One JSON file per session at `metrics/sessions/{session_id}.json`, kept
//! in an in-memory `RwLock<HashMap>` mirror and flushed to disk on every
//! mutation — the same shape as the teacher's gateway session store, scaled
//! down to one file per session rather than one file for all sessions,
//! since `MetricsSession` documents are looked up by id far more often than
//! listed in bulk.

use std::path::{Path, PathBuf};

use cm_domain::error::Result;
use cm_domain::model::{Correlation, CorrelationStatus, MetricsSession, SessionStatus, Watermark};
use parking_lot::RwLock;

pub struct SessionStore {
    sessions_dir: PathBuf,
    cache: RwLock<Option<MetricsSession>>,
}

impl SessionStore {
    pub fn new(sessions_dir: &Path) -> Self {
        Self {
            sessions_dir: sessions_dir.to_path_buf(),
            cache: RwLock::new(None),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.json"))
    }

    /// Persist a brand-new session document.
    pub fn create(&self, session: &MetricsSession) -> Result<()> {
        *self.cache.write() = Some(session.clone());
        self.flush(session)
    }

    pub fn load(&self, session_id: &str) -> Result<Option<MetricsSession>> {
        if let Some(cached) = self.cache.read().as_ref() {
            if cached.session_id == session_id {
                return Ok(Some(cached.clone()));
            }
        }
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let session: MetricsSession = serde_json::from_str(&raw)?;
        *self.cache.write() = Some(session.clone());
        Ok(Some(session))
    }

    pub fn update_correlation(
        &self,
        session_id: &str,
        status: CorrelationStatus,
        agent_session_id: Option<String>,
        agent_session_file: Option<String>,
        retry_count: u32,
    ) -> Result<()> {
        self.mutate(session_id, |session| {
            session.correlation = Correlation {
                status,
                agent_session_id,
                agent_session_file,
                retry_count,
            };
        })
    }

    pub fn update_watermark(&self, session_id: &str, watermark: Watermark) -> Result<()> {
        self.mutate(session_id, |session| session.watermark = watermark)
    }

    pub fn set_monitoring_active(&self, session_id: &str, active: bool) -> Result<()> {
        self.mutate(session_id, |session| session.monitoring.is_active = active)
    }

    pub fn record_change(&self, session_id: &str) -> Result<()> {
        self.mutate(session_id, |session| session.monitoring.change_count += 1)
    }

    pub fn update_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        self.mutate(session_id, |session| session.status = status)
    }

    pub fn set_git_branch(&self, session_id: &str, branch: Option<String>) -> Result<()> {
        self.mutate(session_id, |session| session.git_branch = branch)
    }

    fn mutate(&self, session_id: &str, f: impl FnOnce(&mut MetricsSession)) -> Result<()> {
        let mut session = match self.load(session_id)? {
            Some(s) => s,
            None => return Ok(()),
        };
        f(&mut session);
        *self.cache.write() = Some(session.clone());
        self.flush(&session)
    }

    fn flush(&self, session: &MetricsSession) -> Result<()> {
        std::fs::create_dir_all(&self.sessions_dir)?;
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(self.path_for(&session.session_id), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let session = MetricsSession::new("claude-code", "sso", "/tmp/proj");
        let id = session.session_id.clone();
        store.create(&session).unwrap();

        let other_store = SessionStore::new(tmp.path());
        let loaded = other_store.load(&id).unwrap().unwrap();
        assert_eq!(loaded.session_id, id);
        assert_eq!(loaded.status, SessionStatus::Active);
    }

    #[test]
    fn update_correlation_persists_matched_state() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let session = MetricsSession::new("claude-code", "sso", "/tmp/proj");
        let id = session.session_id.clone();
        store.create(&session).unwrap();

        store
            .update_correlation(&id, CorrelationStatus::Matched, Some("agent1".into()), Some("/tmp/proj/s.jsonl".into()), 2)
            .unwrap();

        let reloaded = SessionStore::new(tmp.path()).load(&id).unwrap().unwrap();
        assert_eq!(reloaded.correlation.status, CorrelationStatus::Matched);
        assert_eq!(reloaded.correlation.retry_count, 2);
    }

    #[test]
    fn load_of_missing_session_is_none_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        assert!(store.load("nonexistent").unwrap().is_none());
    }
}
