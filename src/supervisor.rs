//! Reconnect supervisor for a source/destination session pair
//!
//! Every transport operation the replicator issues goes through
//! [`PairSessions::run`], which retries transient failures (`Timeout`,
//! `Abort`) by tearing down both sessions, sleeping the configured gap,
//! reconnecting both end to end, and restoring the previously selected
//! folders. The retry loop is an explicit attempt counter, never
//! recursion. Tagged `NO`/`BAD` answers are deliberate server responses
//! and pass through unchanged; a failed re-authentication is fatal for
//! the pair.
//!
//! A user interrupt is latched in the cancellation token; it is observed
//! before every operation, raced against in-flight operations, and
//! honored during the inter-attempt sleep.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{Credential, Security, Tuning};
use crate::errors::{SyncError, SyncResult};
use crate::i18n::Catalog;
use crate::imap::{self, MailSession};
use crate::logfile::RunLog;
use crate::tokens::BearerTokenProvider;

/// The two live sessions of a pair
pub struct Live {
    pub src: MailSession,
    pub dst: MailSession,
}

/// Supervised session pair
///
/// The session slot is nullable so teardown can run at any point of a
/// half-constructed pair; `disconnect` is total over any combination of
/// present and absent sessions.
pub struct PairSessions<'a> {
    tuning: Tuning,
    src_cred: &'a Credential,
    dst_cred: &'a Credential,
    tokens: &'a dyn BearerTokenProvider,
    log: &'a RunLog,
    strings: &'a Catalog,
    cancel: CancellationToken,
    live: Option<Live>,
    src_folder: Option<String>,
    dst_folder: Option<String>,
}

impl<'a> PairSessions<'a> {
    /// Wrap two freshly authenticated sessions under supervision
    ///
    /// The engine opens the initial sessions itself (it needs to know
    /// which side failed); the supervisor owns them from here on and
    /// reopens both on every reconnect.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tuning: Tuning,
        src_cred: &'a Credential,
        dst_cred: &'a Credential,
        tokens: &'a dyn BearerTokenProvider,
        log: &'a RunLog,
        strings: &'a Catalog,
        cancel: CancellationToken,
        src: MailSession,
        dst: MailSession,
    ) -> PairSessions<'a> {
        Self {
            tuning,
            src_cred,
            dst_cred,
            tokens,
            log,
            strings,
            cancel,
            live: Some(Live { src, dst }),
            src_folder: None,
            dst_folder: None,
        }
    }

    /// True once the user interrupt has been latched
    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run one transport operation under the retry policy
    ///
    /// # Errors
    ///
    /// - the operation's own non-transient error, unchanged
    /// - `RetriesExhausted` after the attempt budget is spent
    /// - `Auth` if a reconnect fails to re-authenticate
    /// - `Cancelled` when the user interrupt fires
    pub async fn run<T, F>(&mut self, op: F) -> SyncResult<T>
    where
        F: AsyncFn(&Tuning, &mut Live) -> SyncResult<T>,
    {
        let cancel = self.cancel.clone();
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            if self.live.is_none() {
                match self.reconnect().await {
                    Ok(()) => {}
                    Err(err) if err.is_transient() => {
                        attempt += 1;
                        if attempt >= self.tuning.attempts {
                            self.log.line(self.strings.tr("retries-exhausted"));
                            return Err(SyncError::RetriesExhausted(attempt));
                        }
                        self.sleep_gap(&cancel).await?;
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }
            let Some(live) = self.live.as_mut() else {
                return Err(SyncError::Abort("session slot empty after reconnect".to_owned()));
            };

            let result = tokio::select! {
                () = cancel.cancelled() => Err(SyncError::Cancelled),
                result = op(&self.tuning, live) => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    warn!("transient failure, scheduling reconnect: {err}");
                    self.log.line(self.strings.tr("reconnecting"));
                    self.teardown().await;
                    attempt += 1;
                    if attempt >= self.tuning.attempts {
                        self.log.line(self.strings.tr("retries-exhausted"));
                        return Err(SyncError::RetriesExhausted(attempt));
                    }
                    self.sleep_gap(&cancel).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// SELECT on the source, recorded for restore after reconnects
    pub async fn select_src(&mut self, folder: &str) -> SyncResult<()> {
        self.run(async |tuning, live| imap::select(tuning, &mut live.src, folder).await)
            .await?;
        self.src_folder = Some(folder.to_owned());
        Ok(())
    }

    /// SELECT on the destination, recorded for restore after reconnects
    pub async fn select_dst(&mut self, folder: &str) -> SyncResult<()> {
        self.run(async |tuning, live| imap::select(tuning, &mut live.dst, folder).await)
            .await?;
        self.dst_folder = Some(folder.to_owned());
        Ok(())
    }

    /// LIST both sides of the pair
    pub async fn list_src(&mut self) -> SyncResult<Vec<async_imap::types::Name>> {
        self.run(async |tuning, live| imap::list(tuning, &mut live.src).await)
            .await
    }

    pub async fn list_dst(&mut self) -> SyncResult<Vec<async_imap::types::Name>> {
        self.run(async |tuning, live| imap::list(tuning, &mut live.dst).await)
            .await
    }

    /// SEARCH the selected source folder
    pub async fn search_src(&mut self, query: &str) -> SyncResult<Vec<u32>> {
        self.run(async |tuning, live| imap::search(tuning, &mut live.src, query).await)
            .await
    }

    /// SEARCH the selected destination folder
    pub async fn search_dst(&mut self, query: &str) -> SyncResult<Vec<u32>> {
        self.run(async |tuning, live| imap::search(tuning, &mut live.dst, query).await)
            .await
    }

    /// CREATE a folder on the destination
    pub async fn create_dst(&mut self, folder: &str) -> SyncResult<()> {
        self.run(async |tuning, live| imap::create(tuning, &mut live.dst, folder).await)
            .await
    }

    /// Fetch a source message's header block
    pub async fn fetch_header_src(&mut self, seq: u32) -> SyncResult<Vec<u8>> {
        self.run(async move |tuning, live| imap::fetch_header(tuning, &mut live.src, seq).await)
            .await
    }

    /// Fetch a source message's raw body
    pub async fn fetch_body_src(&mut self, seq: u32) -> SyncResult<Vec<u8>> {
        self.run(async move |tuning, live| imap::fetch_body(tuning, &mut live.src, seq).await)
            .await
    }

    /// Fetch a source message's storable flag set
    pub async fn fetch_flags_src(&mut self, seq: u32) -> SyncResult<Vec<String>> {
        self.run(async move |tuning, live| imap::fetch_flags(tuning, &mut live.src, seq).await)
            .await
    }

    /// APPEND to the destination folder
    pub async fn append_dst(
        &mut self,
        folder: &str,
        internal_date: Option<&str>,
        body: &[u8],
    ) -> SyncResult<()> {
        self.run(async |tuning, live| {
            imap::append(tuning, &mut live.dst, folder, internal_date, body).await
        })
        .await
    }

    /// STORE flags on a destination message
    pub async fn store_flags_dst(&mut self, seq: u32, flags: &[String]) -> SyncResult<()> {
        self.run(async move |tuning, live| {
            imap::store_flags(tuning, &mut live.dst, seq, flags).await
        })
        .await
    }

    /// Graceful end-of-pair shutdown: CLOSE selected folders, then LOGOUT
    ///
    /// Total over any combination of present and absent sessions; every
    /// step is best-effort because the pair may already be half dead.
    pub async fn disconnect(&mut self) {
        let src_selected = self.src_folder.take().is_some();
        let dst_selected = self.dst_folder.take().is_some();
        if let Some(mut live) = self.live.take() {
            if src_selected {
                let _ = imap::close(&self.tuning, &mut live.src).await;
            }
            if dst_selected {
                let _ = imap::close(&self.tuning, &mut live.dst).await;
            }
            let _ = imap::logout(&self.tuning, &mut live.src).await;
            let _ = imap::logout(&self.tuning, &mut live.dst).await;
        }
    }

    /// Drop both sessions without ceremony after a transport failure
    async fn teardown(&mut self) {
        if let Some(mut live) = self.live.take() {
            let _ = imap::logout(&self.tuning, &mut live.src).await;
            let _ = imap::logout(&self.tuning, &mut live.dst).await;
        }
    }

    /// Reopen both sessions and restore the selected folders
    ///
    /// A rejected authentication invalidates the failing side's OAuth2
    /// token cache, exactly like the initial connect: the next run must
    /// re-authorize instead of replaying the rejected token.
    async fn reconnect(&mut self) -> SyncResult<()> {
        debug!("reconnecting both sessions");
        let mut src =
            match imap::connect_authenticated(&self.tuning, self.src_cred, self.tokens).await {
                Ok(session) => session,
                Err(err) => {
                    self.invalidate_on_auth(&err, self.src_cred);
                    return Err(err);
                }
            };
        let mut dst =
            match imap::connect_authenticated(&self.tuning, self.dst_cred, self.tokens).await {
                Ok(session) => session,
                Err(err) => {
                    self.invalidate_on_auth(&err, self.dst_cred);
                    let _ = imap::logout(&self.tuning, &mut src).await;
                    return Err(err);
                }
            };
        if let Some(folder) = &self.src_folder {
            imap::select(&self.tuning, &mut src, folder).await?;
        }
        if let Some(folder) = &self.dst_folder {
            imap::select(&self.tuning, &mut dst, folder).await?;
        }
        self.live = Some(Live { src, dst });
        Ok(())
    }

    /// Drop a cached OAuth2 token the server just rejected
    fn invalidate_on_auth(&self, err: &SyncError, cred: &Credential) {
        if matches!(err, SyncError::Auth(_)) && cred.security == Security::OAuth2 {
            self.tokens.invalidate(&cred.email);
        }
    }

    /// Sleep the reconnect gap, abandoning it on cancellation
    async fn sleep_gap(&self, cancel: &CancellationToken) -> SyncResult<()> {
        tokio::select! {
            () = cancel.cancelled() => Err(SyncError::Cancelled),
            () = tokio::time::sleep(self.tuning.timeout) => Ok(()),
        }
    }
}
