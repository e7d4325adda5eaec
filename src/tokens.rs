//! Bearer token provider for XOAUTH2 accounts
//!
//! The engine never runs an OAuth flow itself; it consumes an opaque
//! provider keyed on the account email. The shipped implementation reads
//! per-account cache files written by the external authorization tooling,
//! and unlinks a cache file when the server rejects its token so the next
//! run re-authorizes from scratch.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::errors::{SyncError, SyncResult};

/// Source of XOAUTH2 bearer tokens, consulted on every authenticate
pub trait BearerTokenProvider {
    /// Fetch a bearer token for the account.
    ///
    /// # Errors
    ///
    /// Returns `Auth` when no usable token exists (missing cache, expired
    /// token); the engine treats that like any other authentication
    /// failure for the pair.
    fn get(&self, email: &str) -> SyncResult<String>;

    /// Drop any cached token for the account after the server rejected it.
    fn invalidate(&self, email: &str);
}

/// Persisted token set for one account
///
/// `expiry` is an RFC 3339 UTC timestamp after which the access token is
/// no longer presented to the server.
#[derive(Debug, Deserialize)]
struct TokenData {
    access_token: String,
    #[serde(default)]
    expiry: Option<DateTime<Utc>>,
}

/// File-backed token cache, one `token_<sanitized-email>.json` per account
#[derive(Debug, Clone)]
pub struct FileTokenCache {
    dir: PathBuf,
}

impl FileTokenCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache file path for an account email
    pub fn token_path(&self, email: &str) -> PathBuf {
        self.dir.join(cache_file_name(email))
    }

    fn load(&self, email: &str) -> SyncResult<TokenData> {
        let path = self.token_path(email);
        let raw = fs::read_to_string(&path).map_err(|e| {
            SyncError::Auth(format!(
                "no cached token for {email} ({}): {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| SyncError::Auth(format!("malformed token cache for {email}: {e}")))
    }
}

impl BearerTokenProvider for FileTokenCache {
    fn get(&self, email: &str) -> SyncResult<String> {
        let data = self.load(email)?;
        if let Some(expiry) = data.expiry
            && expiry <= Utc::now()
        {
            return Err(SyncError::Auth(format!(
                "cached token for {email} expired at {expiry}"
            )));
        }
        Ok(data.access_token)
    }

    fn invalidate(&self, email: &str) {
        let path = self.token_path(email);
        if let Err(e) = fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), "failed to remove rejected token cache: {e}");
        }
    }
}

/// Reduce an email address to a filesystem-safe cache-file segment
fn sanitize_email(email: &str) -> String {
    email
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Cache file name for an account email
pub fn cache_file_name(email: &str) -> String {
    format!("token_{}.json", sanitize_email(email))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{BearerTokenProvider, FileTokenCache, cache_file_name};

    #[test]
    fn email_sanitization_keeps_dots_and_dashes() {
        assert_eq!(
            cache_file_name("first.last@ex-ample.com"),
            "token_first.last_ex-ample.com.json"
        );
        assert_eq!(cache_file_name("a b+c@x"), "token_a_b_c_x.json");
    }

    #[test]
    fn reads_token_from_cache_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = FileTokenCache::new(dir.path());
        fs::write(
            cache.token_path("user@gmail.com"),
            r#"{"access_token":"ya29.abc"}"#,
        )
        .expect("write cache");

        let token = cache.get("user@gmail.com").expect("token available");
        assert_eq!(token, "ya29.abc");
    }

    #[test]
    fn expired_token_is_an_auth_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = FileTokenCache::new(dir.path());
        fs::write(
            cache.token_path("user@gmail.com"),
            r#"{"access_token":"ya29.abc","expiry":"2020-01-01T00:00:00Z"}"#,
        )
        .expect("write cache");

        let err = cache.get("user@gmail.com").expect_err("must be expired");
        assert!(matches!(err, crate::errors::SyncError::Auth(_)));
    }

    #[test]
    fn invalidate_unlinks_the_cache_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = FileTokenCache::new(dir.path());
        let path = cache.token_path("user@gmail.com");
        fs::write(&path, r#"{"access_token":"ya29.abc"}"#).expect("write cache");

        cache.invalidate("user@gmail.com");
        assert!(!path.exists());

        // Missing file is not an error.
        cache.invalidate("user@gmail.com");
    }

    #[test]
    fn missing_cache_is_an_auth_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = FileTokenCache::new(dir.path());
        assert!(cache.get("nobody@x").is_err());
    }
}
