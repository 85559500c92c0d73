//! Sync-State Manager: the per-session record of how far the Collector Loop
//! has read an assistant's session file.
//!
//! One JSON document per session at `metrics/sessions/{session_id}_sync.json`,
//! rewritten in full on every mutation — the document is small (a set of
//! record ids and attached prompt texts) so a full rewrite costs nothing
//! next to the durability of never losing a partial write, following the
//! same full-rewrite-on-flush shape as the teacher's session store.
//!
//! Absent document at load time means operations are skipped until
//! `initialize` runs — the Collector Loop is expected to call `initialize`
//! as soon as correlation succeeds, before its first collection pass.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cm_domain::error::Result;
use cm_domain::model::{SyncState, SyncStateStatus};
use parking_lot::RwLock;

pub struct SyncStateManager {
    path: PathBuf,
    state: RwLock<Option<SyncState>>,
}

impl SyncStateManager {
    pub fn new(sessions_dir: &Path, session_id: &str) -> Self {
        Self {
            path: sessions_dir.join(format!("{session_id}_sync.json")),
            state: RwLock::new(None),
        }
    }

    /// Load the document from disk if present, leaving state uninitialized
    /// otherwise.
    pub fn load(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let state: SyncState = serde_json::from_str(&raw)?;
        *self.state.write() = Some(state);
        Ok(())
    }

    /// Create a fresh document for `session_id`/`agent_session_id` and
    /// persist it immediately, overwriting any prior state for this session.
    pub fn initialize(&self, session_id: &str, agent_session_id: &str, start_time: DateTime<Utc>) -> Result<()> {
        let state = SyncState::new(session_id, agent_session_id, start_time);
        *self.state.write() = Some(state);
        self.flush()
    }

    pub fn current(&self) -> Option<SyncState> {
        self.state.read().clone()
    }

    pub fn processed_record_ids(&self) -> HashSet<String> {
        self.state.read().as_ref().map(|s| s.processed_record_ids.clone()).unwrap_or_default()
    }

    pub fn attached_user_prompt_texts(&self) -> HashSet<String> {
        self.state.read().as_ref().map(|s| s.attached_user_prompt_texts.clone()).unwrap_or_default()
    }

    pub fn add_processed_records(&self, ids: impl IntoIterator<Item = String>) -> Result<()> {
        {
            let mut guard = self.state.write();
            let Some(state) = guard.as_mut() else { return Ok(()) };
            state.processed_record_ids.extend(ids);
        }
        self.flush()
    }

    pub fn add_attached_user_prompts(&self, texts: impl IntoIterator<Item = String>) -> Result<()> {
        {
            let mut guard = self.state.write();
            let Some(state) = guard.as_mut() else { return Ok(()) };
            state.attached_user_prompt_texts.extend(texts);
        }
        self.flush()
    }

    pub fn update_last_processed(&self, last_line: Option<u64>, last_hash: Option<String>) -> Result<()> {
        {
            let mut guard = self.state.write();
            let Some(state) = guard.as_mut() else { return Ok(()) };
            if last_line.is_some() {
                state.last_line = last_line;
            }
            if last_hash.is_some() {
                state.last_hash = last_hash;
            }
            state.last_processed_at = Some(Utc::now());
        }
        self.flush()
    }

    pub fn increment_deltas(&self, count: u64) -> Result<()> {
        {
            let mut guard = self.state.write();
            let Some(state) = guard.as_mut() else { return Ok(()) };
            state.total_deltas += count;
        }
        self.flush()
    }

    pub fn update_status(&self, status: SyncStateStatus) -> Result<()> {
        {
            let mut guard = self.state.write();
            let Some(state) = guard.as_mut() else { return Ok(()) };
            state.status = status;
        }
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        let guard = self.state.read();
        let Some(state) = guard.as_ref() else { return Ok(()) };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_before_initialize_are_skipped_not_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SyncStateManager::new(tmp.path(), "sess1");
        manager.add_processed_records(["r1".to_string()]).unwrap();
        assert!(manager.current().is_none());
    }

    #[test]
    fn initialize_then_mutate_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SyncStateManager::new(tmp.path(), "sess1");
        manager.initialize("sess1", "agent1", Utc::now()).unwrap();
        manager.add_processed_records(["r1".to_string(), "r2".to_string()]).unwrap();
        manager.add_attached_user_prompts(["hello".to_string()]).unwrap();
        manager.increment_deltas(2).unwrap();
        manager.update_last_processed(Some(42), None).unwrap();

        let reloaded = SyncStateManager::new(tmp.path(), "sess1");
        reloaded.load().unwrap();
        let state = reloaded.current().unwrap();
        assert_eq!(state.processed_record_ids.len(), 2);
        assert!(state.attached_user_prompt_texts.contains("hello"));
        assert_eq!(state.total_deltas, 2);
        assert_eq!(state.last_line, Some(42));
    }

    #[test]
    fn update_status_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SyncStateManager::new(tmp.path(), "sess1");
        manager.initialize("sess1", "agent1", Utc::now()).unwrap();
        manager.update_status(SyncStateStatus::Completed).unwrap();
        assert_eq!(manager.current().unwrap().status, SyncStateStatus::Completed);
    }
}
