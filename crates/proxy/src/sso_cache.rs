//! SSO credential cache: one JSON file per upstream base URL under
//! `credentials/sso-{hash}.json`, grounded directly in the providers
//! crate's OAuth token store (advisory file locking, `0o600` permissions on
//! Unix, redacting `Debug`).
//!
//! Load-then-delete-on-expiry: a load past `expires_at` deletes the cached
//! file and returns `None` rather than handing back a stale cookie, so the
//! SSO-Auth interceptor always sees either a fresh credential or none at
//! all (§8 Scenario E).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cm_domain::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Clone, Serialize, Deserialize)]
pub struct SsoCredential {
    pub cookie: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for SsoCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsoCredential")
            .field("cookie", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl SsoCredential {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

pub struct SsoCredentialCache {
    credentials_dir: PathBuf,
}

impl SsoCredentialCache {
    pub fn new(data_root: &Path) -> Self {
        Self {
            credentials_dir: data_root.join("credentials"),
        }
    }

    fn base_url_hash(base_url: &str) -> String {
        hex::encode(Sha256::digest(base_url.as_bytes()))
    }

    fn path_for(&self, base_url: &str) -> PathBuf {
        self.credentials_dir.join(format!("sso-{}.json", Self::base_url_hash(base_url)))
    }

    /// Load the credential for `base_url` if present and unexpired. An
    /// expired credential is deleted from disk before returning `None`.
    pub fn load(&self, base_url: &str) -> Result<Option<SsoCredential>> {
        let path = self.path_for(base_url);
        if !path.exists() {
            return Ok(None);
        }

        let file = std::fs::File::open(&path)?;
        fs2::FileExt::lock_shared(&file).map_err(|e| Error::Auth(format!("sso cache lock failed: {e}")))?;
        let raw = std::io::read_to_string(&file)?;
        fs2::FileExt::unlock(&file).map_err(|e| Error::Auth(format!("sso cache unlock failed: {e}")))?;

        let credential: SsoCredential = serde_json::from_str(&raw).map_err(|e| Error::Auth(format!("corrupt sso cache entry: {e}")))?;
        if credential.is_expired() {
            let _ = std::fs::remove_file(&path);
            cm_domain::trace::TraceEvent::SsoCredentialExpired {
                base_url_hash: Self::base_url_hash(base_url),
            }
            .emit();
            return Ok(None);
        }

        cm_domain::trace::TraceEvent::SsoCredentialLoaded {
            base_url_hash: Self::base_url_hash(base_url),
        }
        .emit();
        Ok(Some(credential))
    }

    pub fn save(&self, base_url: &str, credential: &SsoCredential) -> Result<()> {
        std::fs::create_dir_all(&self.credentials_dir)?;
        let path = self.path_for(base_url);
        let json = serde_json::to_string_pretty(credential)?;

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let file = std::fs::OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(&path)?;
            fs2::FileExt::lock_exclusive(&file).map_err(|e| Error::Auth(format!("sso cache lock failed: {e}")))?;
            let mut writer = std::io::BufWriter::new(file);
            writer.write_all(json.as_bytes())?;
        }

        #[cfg(not(unix))]
        {
            use std::io::Write;
            let file = std::fs::OpenOptions::new().write(true).create(true).truncate(true).open(&path)?;
            fs2::FileExt::lock_exclusive(&file).map_err(|e| Error::Auth(format!("sso cache lock failed: {e}")))?;
            let mut writer = std::io::BufWriter::new(file);
            writer.write_all(json.as_bytes())?;
        }

        Ok(())
    }

    pub fn invalidate(&self, base_url: &str) {
        let _ = std::fs::remove_file(self.path_for(base_url));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = SsoCredentialCache::new(tmp.path());
        let credential = SsoCredential { cookie: "session=abc".into(), expires_at: Utc::now() + chrono::Duration::hours(1) };
        cache.save("https://upstream.example.com", &credential).unwrap();

        let loaded = cache.load("https://upstream.example.com").unwrap().unwrap();
        assert_eq!(loaded.cookie, "session=abc");
    }

    #[test]
    fn expired_credential_is_deleted_on_load() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = SsoCredentialCache::new(tmp.path());
        let credential = SsoCredential { cookie: "session=abc".into(), expires_at: Utc::now() - chrono::Duration::hours(1) };
        cache.save("https://upstream.example.com", &credential).unwrap();

        assert!(cache.load("https://upstream.example.com").unwrap().is_none());
        assert!(!cache.path_for("https://upstream.example.com").exists());
    }

    #[test]
    fn missing_credential_is_none_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = SsoCredentialCache::new(tmp.path());
        assert!(cache.load("https://nowhere.example.com").unwrap().is_none());
    }
}
