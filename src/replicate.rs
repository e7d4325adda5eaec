//! Mailbox iteration and per-message replication
//!
//! Walks the source mailboxes in server order and, inside each, the
//! messages in ascending sequence order. Each message goes through the
//! same state machine: header fetch, existence probe on the destination,
//! body fetch, APPEND with the preserved INTERNALDATE, then a best-effort
//! flag replay. Errors skip the smallest possible unit (a message, then a
//! folder); only authentication loss, exhausted reconnects, cancellation,
//! and destination quota end the pair early.

use tracing::{debug, info, warn};

use crate::errors::{SyncError, SyncResult};
use crate::i18n::Catalog;
use crate::logfile::RunLog;
use crate::message::{self, MessageIdentity};
use crate::namespace::{self, MailboxEntry};
use crate::supervisor::PairSessions;

/// Counters reported per pair
#[derive(Debug, Clone, Copy, Default)]
pub struct PairSummary {
    pub folders_visited: usize,
    pub copied: u64,
    pub duplicates: u64,
    pub skipped: u64,
    /// Destination reported `[OVERQUOTA]`; the pair stopped early
    pub quota_exhausted: bool,
}

/// Outcome of one message's replication attempt
enum MessageOutcome {
    Copied,
    Duplicate,
    Skipped,
    QuotaExhausted,
}

/// Per-folder counters, folded into the pair summary
#[derive(Default)]
struct FolderStats {
    copied: u64,
    duplicates: u64,
    skipped: u64,
    quota: bool,
}

/// Errors that must end the pair instead of being skipped over
fn is_pair_fatal(err: &SyncError) -> bool {
    matches!(
        err,
        SyncError::Auth(_) | SyncError::RetriesExhausted(_) | SyncError::Cancelled
    )
}

/// Human-readable folder name for log lines (modified UTF-7 decoded)
fn display_name(raw: &str) -> String {
    utf7_imap::decode_utf7_imap(raw.to_owned())
}

/// Migrate every selectable source mailbox of one account pair
///
/// # Errors
///
/// Propagates only pair-fatal failures; per-folder and per-message
/// problems are logged and skipped.
pub async fn migrate_pair(
    sup: &mut PairSessions<'_>,
    strings: &Catalog,
    log: &RunLog,
    dst_host: &str,
) -> SyncResult<PairSummary> {
    let src_entries: Vec<MailboxEntry> = sup
        .list_src()
        .await?
        .iter()
        .map(MailboxEntry::from_name)
        .collect();
    let dst_entries: Vec<MailboxEntry> = sup
        .list_dst()
        .await?
        .iter()
        .map(MailboxEntry::from_name)
        .collect();

    let src_ns = namespace::detect(&src_entries);
    let dst_ns = namespace::detect(&dst_entries);
    debug!(?src_ns, ?dst_ns, "namespaces resolved");

    let mut summary = PairSummary::default();
    for entry in &src_entries {
        if sup.cancelled() {
            return Err(SyncError::Cancelled);
        }
        if namespace::is_skipped(entry) {
            debug!(folder = %entry.name, "skipping unselectable mailbox");
            continue;
        }

        let dest = namespace::map_name(entry, &src_ns, &dst_entries, &dst_ns, dst_host);
        match migrate_folder(sup, strings, log, entry, &dest).await {
            Ok(stats) => {
                summary.folders_visited += 1;
                summary.copied += stats.copied;
                summary.duplicates += stats.duplicates;
                summary.skipped += stats.skipped;
                if stats.quota {
                    summary.quota_exhausted = true;
                    log.line(strings.tr("quota-exceeded"));
                    break;
                }
            }
            Err(err) if is_pair_fatal(&err) => return Err(err),
            Err(err) => {
                warn!(folder = %entry.name, "folder failed: {err}");
                log.line(&format!(
                    "{}: {}",
                    strings.tr("folder-select-failed"),
                    display_name(&entry.name)
                ));
            }
        }
    }
    Ok(summary)
}

/// Replicate one folder's messages
async fn migrate_folder(
    sup: &mut PairSessions<'_>,
    strings: &Catalog,
    log: &RunLog,
    entry: &MailboxEntry,
    dest: &str,
) -> SyncResult<FolderStats> {
    let mut stats = FolderStats::default();
    let display = display_name(&entry.name);
    log.line(&format!("{}: {display}", strings.tr("folder-start")));

    if let Err(err) = sup.select_src(&entry.name).await {
        if is_pair_fatal(&err) {
            return Err(err);
        }
        warn!(folder = %entry.name, "source SELECT failed: {err}");
        log.line(&format!(
            "{}: {display}",
            strings.tr("folder-select-failed")
        ));
        return Ok(stats);
    }

    // Destination readiness: SELECT, CREATE on a tagged NO, SELECT again.
    if !ensure_destination(sup, strings, log, dest).await? {
        return Ok(stats);
    }

    let seqs = sup.search_src("ALL").await?;
    if seqs.is_empty() {
        log.line(&format!("{}: {display}", strings.tr("folder-empty")));
        return Ok(stats);
    }
    info!(folder = %entry.name, count = seqs.len(), "replicating messages");

    for seq in seqs {
        if sup.cancelled() {
            return Err(SyncError::Cancelled);
        }
        match replicate_message(sup, strings, log, &display, dest, seq).await? {
            MessageOutcome::Copied => stats.copied += 1,
            MessageOutcome::Duplicate => stats.duplicates += 1,
            MessageOutcome::Skipped => stats.skipped += 1,
            MessageOutcome::QuotaExhausted => {
                stats.quota = true;
                return Ok(stats);
            }
        }
    }
    Ok(stats)
}

/// Make sure the destination folder exists and is selected
///
/// Returns `false` when the folder had to be skipped (creation refused).
async fn ensure_destination(
    sup: &mut PairSessions<'_>,
    strings: &Catalog,
    log: &RunLog,
    dest: &str,
) -> SyncResult<bool> {
    match sup.select_dst(dest).await {
        Ok(()) => return Ok(true),
        Err(SyncError::TaggedNo(_)) => {}
        Err(err) if is_pair_fatal(&err) => return Err(err),
        Err(err) => {
            warn!(folder = %dest, "destination SELECT failed: {err}");
            log.line(&format!(
                "{}: {}",
                strings.tr("folder-create-failed"),
                display_name(dest)
            ));
            return Ok(false);
        }
    }

    if let Err(err) = sup.create_dst(dest).await {
        if is_pair_fatal(&err) {
            return Err(err);
        }
        warn!(folder = %dest, "destination CREATE failed: {err}");
        log.line(&format!(
            "{}: {}",
            strings.tr("folder-create-failed"),
            display_name(dest)
        ));
        return Ok(false);
    }
    match sup.select_dst(dest).await {
        Ok(()) => Ok(true),
        Err(err) if is_pair_fatal(&err) => Err(err),
        Err(err) => {
            warn!(folder = %dest, "destination SELECT after CREATE failed: {err}");
            log.line(&format!(
                "{}: {}",
                strings.tr("folder-create-failed"),
                display_name(dest)
            ));
            Ok(false)
        }
    }
}

/// The per-message state machine
async fn replicate_message(
    sup: &mut PairSessions<'_>,
    strings: &Catalog,
    log: &RunLog,
    folder_display: &str,
    dest: &str,
    seq: u32,
) -> SyncResult<MessageOutcome> {
    // 1. Header fetch, BODY.PEEK so the source \Seen flag stays untouched.
    let header = match sup.fetch_header_src(seq).await {
        Ok(header) => header,
        Err(err) if is_pair_fatal(&err) => return Err(err),
        Err(err) => {
            warn!(seq, "header fetch failed: {err}");
            log.line(&format!(
                "{} [{folder_display} #{seq}]",
                strings.tr("msg-header-failed")
            ));
            return Ok(MessageOutcome::Skipped);
        }
    };

    // 2. Identity and existence probe against the destination.
    let Some(identity) = message::identity_from_header(&header) else {
        log.line(&format!(
            "{} [{folder_display} #{seq}]",
            strings.tr("msg-no-identity")
        ));
        return Ok(MessageOutcome::Skipped);
    };
    let hits = match sup.search_dst(&identity.search_query()).await {
        Ok(hits) => hits,
        Err(err) if is_pair_fatal(&err) => return Err(err),
        Err(err) => {
            // Without a trustworthy probe the append could duplicate; skip.
            warn!(seq, "duplicate probe failed: {err}");
            log.line(&format!(
                "{} [{folder_display} #{seq}]",
                strings.tr("msg-probe-failed")
            ));
            return Ok(MessageOutcome::Skipped);
        }
    };
    if !hits.is_empty() {
        log.line(&format!(
            "{} [{folder_display}]: {}",
            strings.tr("msg-exists"),
            identity.describe()
        ));
        return Ok(MessageOutcome::Duplicate);
    }

    // 3. Body fetch.
    let body = match sup.fetch_body_src(seq).await {
        Ok(body) => body,
        Err(err) if is_pair_fatal(&err) => return Err(err),
        Err(err) => {
            warn!(seq, "body fetch failed: {err}");
            log.line(&format!(
                "{} [{folder_display} #{seq}]",
                strings.tr("msg-body-failed")
            ));
            return Ok(MessageOutcome::Skipped);
        }
    };

    // 4. APPEND with the Date: header rendered as INTERNALDATE; a message
    //    with an unparseable date is appended undated and the server
    //    stamps its current time.
    let internal_date = message::internal_date_from_header(&header);
    match sup.append_dst(dest, internal_date.as_deref(), &body).await {
        Ok(()) => {}
        Err(err) if err.is_overquota() => {
            warn!(seq, "destination over quota");
            return Ok(MessageOutcome::QuotaExhausted);
        }
        Err(err) if is_pair_fatal(&err) => return Err(err),
        Err(err) => {
            warn!(seq, "append failed: {err}");
            log.line(&format!(
                "{} [{folder_display}]: {}",
                strings.tr("msg-append-failed"),
                identity.describe()
            ));
            return Ok(MessageOutcome::Skipped);
        }
    }
    log.line(&format!(
        "{} [{folder_display}]: {}",
        strings.tr("msg-copied"),
        identity.describe()
    ));

    // 5. Best-effort flag replay; never blocks migration progress.
    if let Err(err) = replay_flags(sup, seq, &identity).await {
        if is_pair_fatal(&err) {
            return Err(err);
        }
        debug!(seq, "flag replay failed: {err}");
        log.line(&format!(
            "{} [{folder_display}]: {}",
            strings.tr("flags-failed"),
            identity.describe()
        ));
    }

    Ok(MessageOutcome::Copied)
}

/// Copy the source flag set (minus `\Recent`) onto the appended message
///
/// The appended copy is located with the same identity probe used for
/// duplicate detection; the most recent hit wins if the probe is
/// ambiguous.
async fn replay_flags(
    sup: &mut PairSessions<'_>,
    seq: u32,
    identity: &MessageIdentity,
) -> SyncResult<()> {
    let flags = sup.fetch_flags_src(seq).await?;
    if flags.is_empty() {
        return Ok(());
    }
    let hits = sup.search_dst(&identity.search_query()).await?;
    let Some(dst_seq) = hits.last().copied() else {
        return Err(SyncError::Protocol(
            "appended message not found on destination".to_owned(),
        ));
    };
    sup.store_flags_dst(dst_seq, &flags).await
}

#[cfg(test)]
mod tests {
    use super::{display_name, is_pair_fatal};
    use crate::errors::SyncError;

    #[test]
    fn auth_retries_and_cancellation_end_the_pair() {
        assert!(is_pair_fatal(&SyncError::Auth("rejected".into())));
        assert!(is_pair_fatal(&SyncError::RetriesExhausted(5)));
        assert!(is_pair_fatal(&SyncError::Cancelled));
    }

    #[test]
    fn per_operation_failures_are_skipped_not_fatal() {
        assert!(!is_pair_fatal(&SyncError::TaggedNo("no such folder".into())));
        assert!(!is_pair_fatal(&SyncError::TaggedBad("bad syntax".into())));
        assert!(!is_pair_fatal(&SyncError::Protocol("short response".into())));
        // Transients belong to the supervisor, not the pair.
        assert!(!is_pair_fatal(&SyncError::Timeout("read".into())));
        assert!(!is_pair_fatal(&SyncError::Abort("reset".into())));
    }

    #[test]
    fn folder_names_are_decoded_for_display() {
        assert_eq!(display_name("INBOX.Sent"), "INBOX.Sent");
        // Modified UTF-7, e.g. a German umlaut folder.
        assert_eq!(display_name("Entw&APw-rfe"), "Entwürfe");
    }
}
