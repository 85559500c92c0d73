//! Git branch detection: a short-lived `git rev-parse` subprocess with a
//! hard timeout, memoized per working directory so the Aggregator and
//! Collector Loop don't fork a process on every delta.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::Command;

const GIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct BranchCache {
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl BranchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current branch for `working_directory`, memoized. `None` covers both
    /// "not a git repository" and "git unavailable/timed out" — the
    /// Aggregator treats all of these the same way (branch falls back to
    /// `"unknown"`).
    pub async fn branch_for(&self, working_directory: &str) -> Option<String> {
        if let Some(cached) = self.cache.lock().get(working_directory).cloned() {
            return cached;
        }
        let branch = detect_branch(working_directory).await;
        self.cache.lock().insert(working_directory.to_string(), branch.clone());
        branch
    }

    pub fn invalidate(&self, working_directory: &str) {
        self.cache.lock().remove(working_directory);
    }
}

async fn detect_branch(working_directory: &str) -> Option<String> {
    if !Path::new(working_directory).is_dir() {
        return None;
    }

    let spawn = Command::new("git")
        .arg("rev-parse")
        .arg("--abbrev-ref")
        .arg("HEAD")
        .current_dir(working_directory)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(GIT_TIMEOUT, spawn).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::debug!(working_directory, error = %e, "git rev-parse failed to spawn");
            return None;
        }
        Err(_) => {
            tracing::debug!(working_directory, "git rev-parse timed out");
            return None;
        }
    };

    if !output.status.success() {
        return None;
    }

    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if branch.is_empty() || branch == "HEAD" {
        None
    } else {
        Some(branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_directory_yields_none_without_spawning() {
        let cache = BranchCache::new();
        assert!(cache.branch_for("/nonexistent/path/xyz").await.is_none());
    }

    #[tokio::test]
    async fn result_is_cached_after_first_lookup() {
        let cache = BranchCache::new();
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_string_lossy().into_owned();

        let first = cache.branch_for(&dir).await;
        assert!(cache.cache.lock().contains_key(&dir));
        let second = cache.branch_for(&dir).await;
        assert_eq!(first, second);
    }
}
