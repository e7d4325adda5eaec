//! Migration engine: drives the ordered list of account pairs
//!
//! One pair at a time, one folder at a time, one message at a time; IMAP
//! APPEND is rate-limited on most hosts, so parallelism would buy
//! throttling rather than throughput. Each pair gets two fresh sessions,
//! both always disconnected on every exit path. A failed pair never stops
//! the run; only exhausted reconnect attempts or a user interrupt do.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{AccountPair, Credential, Security, Tuning};
use crate::errors::{SyncError, SyncResult};
use crate::i18n::Catalog;
use crate::imap::{self, MailSession};
use crate::logfile::RunLog;
use crate::replicate;
use crate::supervisor::PairSessions;
use crate::tokens::BearerTokenProvider;

/// Final state of a run, mapped onto the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutcome {
    /// Normal completion, even if messages or pairs were skipped
    Completed,
    /// A reconnect loop ran out of attempts; remaining pairs not tried
    RetriesExhausted,
    /// User interrupt; sessions unwound, remaining pairs not tried
    Interrupted,
}

impl EngineOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::RetriesExhausted => 1,
            Self::Interrupted => 130,
        }
    }
}

/// The migration engine and its collaborators
pub struct Engine<'a> {
    tuning: Tuning,
    pairs: &'a [AccountPair],
    tokens: &'a dyn BearerTokenProvider,
    strings: &'a Catalog,
    log: &'a RunLog,
    cancel: CancellationToken,
}

impl<'a> Engine<'a> {
    pub fn new(
        tuning: Tuning,
        pairs: &'a [AccountPair],
        tokens: &'a dyn BearerTokenProvider,
        strings: &'a Catalog,
        log: &'a RunLog,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tuning,
            pairs,
            tokens,
            strings,
            log,
            cancel,
        }
    }

    /// Run every configured pair in order
    pub async fn run(&self) -> EngineOutcome {
        for pair in self.pairs {
            if self.cancel.is_cancelled() {
                self.log.line(self.strings.tr("interrupted"));
                return EngineOutcome::Interrupted;
            }
            match self.run_pair(pair).await {
                Ok(()) => {}
                Err(SyncError::Cancelled) => {
                    self.log.line(self.strings.tr("interrupted"));
                    return EngineOutcome::Interrupted;
                }
                Err(SyncError::RetriesExhausted(_)) => {
                    return EngineOutcome::RetriesExhausted;
                }
                Err(err) => {
                    // Pair-fatal but run-survivable: log and move on.
                    error!(src = %pair.src.email, "pair failed: {err}");
                }
            }
        }
        self.log.line(self.strings.tr("run-complete"));
        EngineOutcome::Completed
    }

    /// Migrate one pair, always disconnecting both sessions on the way out
    async fn run_pair(&self, pair: &AccountPair) -> SyncResult<()> {
        self.log.line(&format!(
            "{}: {} -> {}",
            self.strings.tr("pair-start"),
            pair.src.email,
            pair.dst.email
        ));

        let Some(src) = self
            .open_side(&pair.src, "connect-failed-src", "auth-failed-src")
            .await
        else {
            return Ok(());
        };
        let Some(dst) = self
            .open_side(&pair.dst, "connect-failed-dst", "auth-failed-dst")
            .await
        else {
            let mut src = src;
            let _ = imap::logout(&self.tuning, &mut src).await;
            return Ok(());
        };

        let mut sup = PairSessions::new(
            self.tuning,
            &pair.src,
            &pair.dst,
            self.tokens,
            self.log,
            self.strings,
            self.cancel.clone(),
            src,
            dst,
        );

        let result = replicate::migrate_pair(&mut sup, self.strings, self.log, &pair.dst.server).await;
        sup.disconnect().await;

        match result {
            Ok(summary) => {
                info!(
                    src = %pair.src.email,
                    folders = summary.folders_visited,
                    copied = summary.copied,
                    duplicates = summary.duplicates,
                    skipped = summary.skipped,
                    quota_exhausted = summary.quota_exhausted,
                    "pair finished"
                );
                self.log.line(&format!(
                    "{}: {} ({} copied, {} existing, {} skipped)",
                    self.strings.tr("pair-done"),
                    pair.src.email,
                    summary.copied,
                    summary.duplicates,
                    summary.skipped
                ));
                Ok(())
            }
            Err(err) => {
                // Cancellation and exhausted retries are logged by their
                // own handlers; everything else gets a pair-aborted line.
                if !matches!(err, SyncError::Cancelled | SyncError::RetriesExhausted(_)) {
                    self.log
                        .line(&self.detail(self.strings.tr("pair-aborted"), &err));
                }
                Err(err)
            }
        }
    }

    /// Connect and authenticate one side of a pair
    ///
    /// Returns `None` after logging a fatal connect/auth failure; an
    /// OAuth account whose token was rejected also loses its cache file
    /// so the next run re-authorizes.
    async fn open_side(
        &self,
        cred: &Credential,
        connect_key: &str,
        auth_key: &str,
    ) -> Option<MailSession> {
        match imap::connect_authenticated(&self.tuning, cred, self.tokens).await {
            Ok(session) => Some(session),
            Err(err @ SyncError::Auth(_)) => {
                warn!(email = %cred.email, "authentication failed: {err}");
                if cred.security == Security::OAuth2 {
                    self.tokens.invalidate(&cred.email);
                }
                self.log
                    .line(&self.detail(self.strings.tr(auth_key), &err));
                None
            }
            Err(err) => {
                warn!(email = %cred.email, "connect failed: {err}");
                self.log
                    .line(&self.detail(self.strings.tr(connect_key), &err));
                None
            }
        }
    }

    /// Append exception detail to a log line when `--debug` is set
    fn detail(&self, base: &str, err: &SyncError) -> String {
        if self.tuning.debug {
            format!("{base}: {err}")
        } else {
            base.to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EngineOutcome;

    #[test]
    fn outcomes_map_to_documented_exit_codes() {
        assert_eq!(EngineOutcome::Completed.exit_code(), 0);
        assert_eq!(EngineOutcome::RetriesExhausted.exit_code(), 1);
        assert_eq!(EngineOutcome::Interrupted.exit_code(), 130);
    }
}
