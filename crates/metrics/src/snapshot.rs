//! Directory snapshots over an assistant's sessions template, and the
//! set-diff between two of them (the Correlator's primary tool).

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use cm_domain::model::{FileSnapshot, SnapshotFile};

/// A compiled sessions-directory template: literal segments match exactly
/// (case-insensitive), `{name}` segments match any single directory/file
/// name. Accepts both `/` and `\` as separators at match time.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Placeholder,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Self {
        let segments = template
            .split(['/', '\\'])
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s.starts_with('{') && s.ends_with('}') {
                    Segment::Placeholder
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    fn matches(&self, relative: &Path) -> bool {
        let parts: Vec<&str> = relative
            .iter()
            .map(|c| c.to_str().unwrap_or(""))
            .collect();
        if parts.len() != self.segments.len() {
            return false;
        }
        parts.iter().zip(self.segments.iter()).all(|(part, seg)| match seg {
            Segment::Placeholder => true,
            Segment::Literal(lit) => part.eq_ignore_ascii_case(lit),
        })
    }
}

/// Takes a snapshot of `base_dir`, recursing into nested subdirectories and
/// keeping only files whose path (relative to `base_dir`) matches
/// `template`. A missing `base_dir` yields an empty snapshot, not an error.
pub fn snapshot(base_dir: &Path, template: &PathTemplate) -> FileSnapshot {
    let mut files = Vec::new();
    if base_dir.is_dir() {
        walk(base_dir, base_dir, template, &mut files);
    }
    FileSnapshot {
        files,
        captured_at: chrono::Utc::now(),
    }
}

fn walk(base_dir: &Path, dir: &Path, template: &PathTemplate, out: &mut Vec<SnapshotFile>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
            return;
        }
    };
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        if path.is_dir() {
            walk(base_dir, &path, template, out);
            continue;
        }
        let Ok(relative) = path.strip_prefix(base_dir) else {
            continue;
        };
        if !template.matches(relative) {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "skipping unreadable file metadata");
                continue;
            }
        };
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        out.push(SnapshotFile {
            path: path.to_string_lossy().into_owned(),
            size: meta.len(),
            mtime_ms,
        });
    }
}

/// Resolve a matched file's path relative to the discovered `SnapshotFile`
/// entries, preferring the sole new file when exactly one appears.
pub fn single_new_file(paths: &[PathBuf]) -> Option<&PathBuf> {
    if paths.len() == 1 {
        paths.first()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_matches_placeholder_segment() {
        let template = PathTemplate::parse("projects/{hash}/session.jsonl");
        assert!(template.matches(Path::new("projects/abc123/session.jsonl")));
        assert!(!template.matches(Path::new("projects/abc123/other.jsonl")));
    }

    #[test]
    fn snapshot_of_missing_dir_is_empty() {
        let template = PathTemplate::parse("{name}.jsonl");
        let snap = snapshot(Path::new("/nonexistent/path/xyz"), &template);
        assert!(snap.files.is_empty());
    }

    #[test]
    fn snapshot_finds_nested_matching_files() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("proj1");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("session.jsonl"), "{}").unwrap();
        std::fs::write(sub.join("notes.txt"), "ignored").unwrap();

        let template = PathTemplate::parse("{project}/session.jsonl");
        let snap = snapshot(tmp.path(), &template);
        assert_eq!(snap.files.len(), 1);
        assert!(snap.files[0].path.ends_with("session.jsonl"));
    }
}
