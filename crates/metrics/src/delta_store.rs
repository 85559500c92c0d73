//! Delta Store: append-only JSONL log of [`MetricDelta`] records, one file
//! per session at `metrics/sessions/{session_id}_metrics.jsonl`.
//!
//! Grounded on the ecosystem's usage-metrics collector: append with
//! `OpenOptions::append(true)`, `fsync` after every write, size-based
//! rotation that shifts `.1`/`.2`/`.3` generations before truncating the
//! live file back to zero. `read_all` walks the live file followed by the
//! rotated generations oldest-last-read so a record appears exactly once.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use cm_domain::error::Result;
use cm_domain::model::{MetricDelta, SyncStatus};

pub struct DeltaStore {
    path: PathBuf,
    rotation_bytes: u64,
    max_rotations: u32,
}

impl DeltaStore {
    pub fn new(sessions_dir: &Path, session_id: &str, rotation_bytes: u64, max_rotations: u32) -> Self {
        Self {
            path: sessions_dir.join(format!("{session_id}_metrics.jsonl")),
            rotation_bytes,
            max_rotations,
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn size_on_disk(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Append one delta, creating the parent directory and file as needed.
    /// Rotation is checked first so the delta about to be written never
    /// pushes the live file past the threshold by more than one record.
    pub fn append_delta(&self, delta: &MetricDelta) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed()?;

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let line = serde_json::to_string(delta)?;
        writeln!(file, "{line}")?;
        file.sync_all()?;
        Ok(())
    }

    /// Every record across the live file and its rotated generations,
    /// oldest generation first, live file last.
    pub fn read_all(&self) -> Result<Vec<MetricDelta>> {
        let mut records = Vec::new();
        for generation in (1..=self.max_rotations).rev() {
            let rotated = self.rotated_path(generation);
            if rotated.exists() {
                records.extend(Self::read_file(&rotated)?);
            }
        }
        if self.path.exists() {
            records.extend(Self::read_file(&self.path)?);
        }
        Ok(records)
    }

    pub fn filter_by_status(&self, status: SyncStatus) -> Result<Vec<MetricDelta>> {
        Ok(self.read_all()?.into_iter().filter(|d| d.sync_status == status).collect())
    }

    /// Rewrite every record, updating the one matching `record_id` in place.
    /// Full-rewrite because deltas are keyed by id, not position, and the
    /// store is small relative to session lifetime.
    pub fn update_sync_status(&self, record_id: &str, status: SyncStatus, error: Option<String>) -> Result<()> {
        let mut records = self.read_all()?;
        let Some(record) = records.iter_mut().find(|d| d.record_id == record_id) else {
            return Ok(());
        };
        record.sync_status = status;
        record.sync_attempts += 1;
        record.sync_error = error;
        if status == SyncStatus::Synced {
            record.synced_at = Some(chrono::Utc::now());
        }
        self.rewrite_live_file(&records)
    }

    pub fn get_sync_stats(&self) -> Result<SyncStats> {
        let records = self.read_all()?;
        let mut stats = SyncStats::default();
        for record in &records {
            stats.total += 1;
            match record.sync_status {
                SyncStatus::Pending => stats.pending += 1,
                SyncStatus::Syncing => stats.syncing += 1,
                SyncStatus::Synced => stats.synced += 1,
                SyncStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    fn read_file(path: &Path) -> Result<Vec<MetricDelta>> {
        let raw = fs::read_to_string(path)?;
        let mut records = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MetricDelta>(line) {
                Ok(delta) => records.push(delta),
                Err(e) => tracing::warn!(path = %path.display(), line = line_no, error = %e, "skipping malformed delta record"),
            }
        }
        Ok(records)
    }

    fn rotated_path(&self, generation: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{generation}"));
        PathBuf::from(name)
    }

    fn rotate_if_needed(&self) -> Result<()> {
        if self.size_on_disk() < self.rotation_bytes {
            return Ok(());
        }
        for generation in (1..self.max_rotations).rev() {
            let from = self.rotated_path(generation);
            let to = self.rotated_path(generation + 1);
            if from.exists() {
                let _ = fs::rename(&from, &to);
            }
        }
        if self.path.exists() {
            fs::rename(&self.path, self.rotated_path(1))?;
        }
        Ok(())
    }

    fn rewrite_live_file(&self, records: &[MetricDelta]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&self.path)?;
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{line}")?;
        }
        file.sync_all()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncStats {
    pub total: u64,
    pub pending: u64,
    pub syncing: u64,
    pub synced: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_all_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DeltaStore::new(tmp.path(), "sess1", 10 * 1024 * 1024, 3);
        store.append_delta(&MetricDelta::new("r1", "sess1", "a1")).unwrap();
        store.append_delta(&MetricDelta::new("r2", "sess1", "a1")).unwrap();

        let records = store.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_id, "r1");
    }

    #[test]
    fn update_sync_status_rewrites_matching_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DeltaStore::new(tmp.path(), "sess1", 10 * 1024 * 1024, 3);
        store.append_delta(&MetricDelta::new("r1", "sess1", "a1")).unwrap();

        store.update_sync_status("r1", SyncStatus::Synced, None).unwrap();
        let records = store.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sync_status, SyncStatus::Synced);
        assert_eq!(records[0].sync_attempts, 1);
        assert!(records[0].synced_at.is_some());
    }

    #[test]
    fn rotation_moves_live_file_to_generation_one() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DeltaStore::new(tmp.path(), "sess1", 1, 3);
        store.append_delta(&MetricDelta::new("r1", "sess1", "a1")).unwrap();
        store.append_delta(&MetricDelta::new("r2", "sess1", "a1")).unwrap();

        assert!(store.rotated_path(1).exists());
        let records = store.read_all().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn sync_stats_counts_by_status() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DeltaStore::new(tmp.path(), "sess1", 10 * 1024 * 1024, 3);
        store.append_delta(&MetricDelta::new("r1", "sess1", "a1")).unwrap();
        store.update_sync_status("r1", SyncStatus::Synced, None).unwrap();
        store.append_delta(&MetricDelta::new("r2", "sess1", "a1")).unwrap();

        let stats = store.get_sync_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.pending, 1);
    }
}
