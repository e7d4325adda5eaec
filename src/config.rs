//! Configuration module for account pairs and engine tuning
//!
//! The migration fleet is described by a `credentials.json` file: an ordered
//! array of `{"src": <cred>, "dst": <cred>}` objects. Order is significant;
//! pairs are migrated strictly in file order. Tuning knobs (timeout, retry
//! attempts, debug, log suppression) come from the command line and are
//! collected into [`Tuning`].

use std::fs;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::errors::{SyncError, SyncResult};

/// Hard ceiling on the socket timeout / reconnect gap, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 300;

/// Default socket timeout / reconnect gap, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of reconnect attempts per suspension point.
pub const DEFAULT_ATTEMPTS: u32 = 5;

/// Connection security mode
///
/// `Plain` and `StartTls` default to port 143, `Ssl` and `OAuth2` to 993.
/// `OAuth2` implies TLS from the first byte plus `AUTHENTICATE XOAUTH2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Security {
    #[serde(rename = "PLAIN")]
    Plain,
    #[serde(rename = "STARTTLS")]
    StartTls,
    #[serde(rename = "SSL")]
    Ssl,
    #[serde(rename = "OAUTH2")]
    OAuth2,
}

impl Security {
    /// Default IMAP port for this mode.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Plain | Self::StartTls => 143,
            Self::Ssl | Self::OAuth2 => 993,
        }
    }
}

/// One side of an account pair
///
/// Passwords are stored using `SecretString` to prevent accidental logging.
/// For `OAUTH2` accounts `password` is absent; the bearer token provider is
/// consulted instead, keyed on `email`.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    /// Login name, also the token-cache key for OAuth accounts
    pub email: String,
    /// Password; absent for `OAUTH2`
    #[serde(default)]
    pub password: Option<SecretString>,
    /// IMAP server hostname
    pub server: String,
    /// IMAP server port; defaults per security mode when absent
    #[serde(default)]
    pub port: Option<u16>,
    /// Connection security mode
    pub security: Security,
}

impl Credential {
    /// Port to connect to, applying the per-mode default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.security.default_port())
    }

    /// Validate the credential before any network I/O.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the email or server is empty, or if a non-OAuth
    /// credential is missing its password.
    pub fn validate(&self) -> SyncResult<()> {
        if self.email.trim().is_empty() {
            return Err(SyncError::Config("credential has empty email".to_owned()));
        }
        if self.server.trim().is_empty() {
            return Err(SyncError::Config(format!(
                "credential for {} has empty server",
                self.email
            )));
        }
        if self.security != Security::OAuth2 && self.password.is_none() {
            return Err(SyncError::Config(format!(
                "credential for {} is missing a password",
                self.email
            )));
        }
        Ok(())
    }
}

/// Source and destination credentials for one migration
#[derive(Debug, Clone, Deserialize)]
pub struct AccountPair {
    pub src: Credential,
    pub dst: Credential,
}

/// Engine tuning collected from the command line
#[derive(Debug, Clone, Copy)]
pub struct Tuning {
    /// Socket timeout and reconnect gap, clamped to [`MAX_TIMEOUT_SECS`]
    pub timeout: Duration,
    /// Reconnect attempts per suspension point
    pub attempts: u32,
    /// Log exception detail
    pub debug: bool,
    /// Suppress the per-run log file
    pub no_logs: bool,
}

impl Tuning {
    /// Build tuning from raw CLI values, applying the 300-second cap.
    pub fn new(timeout_secs: u64, attempts: u32, debug: bool, no_logs: bool) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs.min(MAX_TIMEOUT_SECS)),
            attempts: attempts.max(1),
            debug,
            no_logs,
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECS, DEFAULT_ATTEMPTS, false, false)
    }
}

/// Load and validate the ordered account-pair list
///
/// # Errors
///
/// Returns `Config` if the file is unreadable, is not a JSON array of
/// pairs, is empty, or any credential fails validation. All of this
/// happens before the first connection is attempted.
pub fn load_pairs(path: &Path) -> SyncResult<Vec<AccountPair>> {
    let raw = fs::read_to_string(path).map_err(|e| {
        SyncError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let pairs: Vec<AccountPair> = serde_json::from_str(&raw).map_err(|e| {
        SyncError::Config(format!("cannot parse {}: {e}", path.display()))
    })?;
    if pairs.is_empty() {
        return Err(SyncError::Config(format!(
            "{} contains no account pairs",
            path.display()
        )));
    }
    for pair in &pairs {
        pair.src.validate()?;
        pair.dst.validate()?;
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{AccountPair, Credential, Security, Tuning, load_pairs};

    fn parse_credential(json: &str) -> Credential {
        serde_json::from_str(json).expect("credential parses")
    }

    #[test]
    fn port_defaults_follow_security_mode() {
        let plain = parse_credential(
            r#"{"email":"a@x","password":"pw","server":"mail.x","security":"PLAIN"}"#,
        );
        assert_eq!(plain.effective_port(), 143);

        let ssl = parse_credential(
            r#"{"email":"a@x","password":"pw","server":"mail.x","security":"SSL"}"#,
        );
        assert_eq!(ssl.effective_port(), 993);

        let explicit = parse_credential(
            r#"{"email":"a@x","password":"pw","server":"mail.x","port":1143,"security":"STARTTLS"}"#,
        );
        assert_eq!(explicit.effective_port(), 1143);
    }

    #[test]
    fn oauth_credential_needs_no_password() {
        let cred = parse_credential(
            r#"{"email":"a@gmail.com","server":"imap.gmail.com","security":"OAUTH2"}"#,
        );
        assert!(cred.validate().is_ok());
        assert_eq!(cred.effective_port(), 993);
    }

    #[test]
    fn password_is_required_for_login_modes() {
        let cred =
            parse_credential(r#"{"email":"a@x","server":"mail.x","security":"SSL"}"#);
        assert!(cred.validate().is_err());
    }

    #[test]
    fn unknown_security_mode_is_rejected() {
        let result: Result<Credential, _> = serde_json::from_str(
            r#"{"email":"a@x","password":"pw","server":"mail.x","security":"TLS13"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn pair_order_is_preserved() {
        let raw = r#"[
            {"src":{"email":"one@x","password":"p","server":"s1","security":"SSL"},
             "dst":{"email":"one@y","password":"p","server":"d1","security":"SSL"}},
            {"src":{"email":"two@x","password":"p","server":"s2","security":"SSL"},
             "dst":{"email":"two@y","password":"p","server":"d2","security":"SSL"}}
        ]"#;
        let pairs: Vec<AccountPair> = serde_json::from_str(raw).expect("pairs parse");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].src.email, "one@x");
        assert_eq!(pairs[1].src.email, "two@x");
    }

    #[test]
    fn load_pairs_rejects_empty_fleet() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "[]").expect("write");
        assert!(load_pairs(file.path()).is_err());
    }

    #[test]
    fn timeout_is_capped_at_five_minutes() {
        let tuning = Tuning::new(900, 5, false, false);
        assert_eq!(tuning.timeout.as_secs(), 300);

        let tuning = Tuning::new(30, 0, false, false);
        assert_eq!(tuning.attempts, 1);
    }

    #[test]
    fn security_matches_wire_names() {
        assert_eq!(
            serde_json::from_str::<Security>(r#""STARTTLS""#).expect("parses"),
            Security::StartTls
        );
    }
}
