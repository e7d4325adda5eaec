//! Command-line interface
//!
//! The engine consumes only the four tuning parameters (`debug`,
//! `timeout`, `attempts`, `no_logs`); the rest selects collaborators
//! (credentials file, language, token-only mode).

use std::path::PathBuf;

use clap::Parser;

use crate::config::{DEFAULT_ATTEMPTS, DEFAULT_TIMEOUT_SECS, Tuning};

#[derive(Debug, Parser)]
#[command(name = "mail-imap-migrate-rs", version, about = "Copy every message of one IMAP mailbox into another, folder structure, receipt times, and flags included")]
pub struct Cli {
    /// Path to the account-pair credentials file
    #[arg(long, value_name = "FILE", default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Log exception detail
    #[arg(long)]
    pub debug: bool,

    /// Language code for log messages (e.g. "pt")
    #[arg(long, value_name = "CODE")]
    pub language: Option<String>,

    /// Check OAuth token caches only, no migration
    #[arg(long)]
    pub gen_tokens: bool,

    /// Do not write the per-run log file
    #[arg(long)]
    pub no_logs: bool,

    /// Socket timeout and reconnect gap in seconds (capped at 300)
    #[arg(long, value_name = "N", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Reconnect attempts per operation
    #[arg(long, value_name = "N", default_value_t = DEFAULT_ATTEMPTS)]
    pub attempts: u32,
}

impl Cli {
    pub fn tuning(&self) -> Tuning {
        Tuning::new(self.timeout, self.attempts, self.debug, self.no_logs)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn defaults_match_the_documented_tuning() {
        let cli = Cli::parse_from(["mail-imap-migrate-rs"]);
        let tuning = cli.tuning();
        assert_eq!(tuning.timeout.as_secs(), 30);
        assert_eq!(tuning.attempts, 5);
        assert!(!tuning.debug);
        assert!(!tuning.no_logs);
        assert_eq!(cli.credentials.to_str(), Some("credentials.json"));
    }

    #[test]
    fn timeout_flag_is_capped() {
        let cli = Cli::parse_from(["mail-imap-migrate-rs", "--timeout", "900"]);
        assert_eq!(cli.tuning().timeout.as_secs(), 300);
    }

    #[test]
    fn flags_parse_with_kebab_case_names() {
        let cli = Cli::parse_from([
            "mail-imap-migrate-rs",
            "--debug",
            "--no-logs",
            "--gen-tokens",
            "--language",
            "pt",
            "--attempts",
            "2",
        ]);
        assert!(cli.debug);
        assert!(cli.no_logs);
        assert!(cli.gen_tokens);
        assert_eq!(cli.language.as_deref(), Some("pt"));
        assert_eq!(cli.tuning().attempts, 2);
    }
}
