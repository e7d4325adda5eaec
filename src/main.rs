//! mail-imap-migrate-rs: server-to-server IMAP mailbox migration
//!
//! Copies every message in every folder of a source IMAP mailbox into a
//! destination mailbox, preserving message identity (`Message-ID`),
//! receipt time (`INTERNALDATE`), folder structure across namespace
//! conventions, and per-message flags. Re-running against the same pair
//! is idempotent: the destination itself is the ledger.
//!
//! # Architecture
//!
//! - [`main`]: entry point, signal latch, exit-code mapping
//! - [`cli`]: command-line options
//! - [`config`]: `credentials.json` loading and engine tuning
//! - [`errors`]: typed failure kinds with transient/overquota classification
//! - [`imap`]: transport over the four security modes with timeouts
//! - [`namespace`]: separator/prefix detection and mailbox name mapping
//! - [`message`]: message identity, duplicate probes, date rendering
//! - [`supervisor`]: bounded reconnect/retry around every transport call
//! - [`replicate`]: mailbox iterator and per-message state machine
//! - [`engine`]: sequential account-pair driver
//! - [`i18n`]: localized log-message catalog
//! - [`logfile`]: per-run log file collaborator
//! - [`tokens`]: XOAUTH2 bearer-token provider (file cache)

mod cli;
mod config;
mod engine;
mod errors;
mod i18n;
mod imap;
mod logfile;
mod message;
mod namespace;
mod replicate;
mod supervisor;
mod tokens;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::Security;
use crate::engine::Engine;
use crate::i18n::Catalog;
use crate::logfile::{LogStyle, RunLog};
use crate::tokens::{BearerTokenProvider, FileTokenCache};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Cli::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let tuning = args.tuning();
    let pairs = match config::load_pairs(&args.credentials) {
        Ok(pairs) => pairs,
        Err(err) => {
            error!("{err}");
            return ExitCode::from(1);
        }
    };

    let tokens = FileTokenCache::new(".");

    if args.gen_tokens {
        return check_tokens(&pairs, &tokens);
    }

    let strings = Catalog::for_language(args.language.as_deref());
    let log = if tuning.no_logs {
        RunLog::disabled()
    } else {
        match RunLog::create_in(Path::new("."), LogStyle::Structured) {
            Ok(log) => log,
            Err(err) => {
                error!("cannot create run log: {err}");
                return ExitCode::from(1);
            }
        }
    };
    if let Some(path) = log.path() {
        info!(path = %path.display(), "run log created");
    }

    let cancel = CancellationToken::new();
    let signal_latch = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_latch.cancel();
        }
    });

    let engine = Engine::new(tuning, &pairs, &tokens, &strings, &log, cancel);
    let outcome = engine.run().await;
    ExitCode::from(outcome.exit_code())
}

/// `--gen-tokens`: report the token cache state for every OAuth account
///
/// The acquisition flow itself lives outside this tool; this mode only
/// verifies that each `OAUTH2` credential has a usable cached token.
fn check_tokens(pairs: &[config::AccountPair], tokens: &FileTokenCache) -> ExitCode {
    let mut missing = 0u32;
    for cred in pairs
        .iter()
        .flat_map(|p| [&p.src, &p.dst])
        .filter(|c| c.security == Security::OAuth2)
    {
        match tokens.get(&cred.email) {
            Ok(_) => info!(email = %cred.email, "token cache ok"),
            Err(err) => {
                missing += 1;
                error!(email = %cred.email, "{err}");
            }
        }
    }
    if missing == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
