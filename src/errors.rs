//! Application error model
//!
//! Defines a typed error hierarchy using `thiserror`. Every failure the
//! migration engine can observe is expressed as a kind, never as a bare
//! string, so callers branch on variants instead of matching substrings.
//! The two tagged-response variants carry the server's text because quota
//! exhaustion is only visible as `[OVERQUOTA]` inside a tagged `NO`.

use std::io;

use thiserror::Error;

/// Migration error type
///
/// Covers configuration, transport, protocol, and control-flow failures.
/// The [`SyncError::is_transient`] classification drives the reconnect
/// supervisor; everything else is surfaced to the engine unchanged.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid or missing configuration (credentials file, token cache)
    #[error("configuration error: {0}")]
    Config(String),
    /// Hostname did not resolve
    #[error("DNS lookup failed: {0}")]
    Dns(String),
    /// TCP connection refused by the server
    #[error("connection refused: {0}")]
    ConnectRefused(String),
    /// TLS handshake or certificate failure
    #[error("TLS failure: {0}")]
    Tls(String),
    /// Authentication rejected (LOGIN or AUTHENTICATE XOAUTH2)
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Malformed or unexpected protocol data
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Socket-level timeout on a network operation
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Connection dropped mid-operation
    #[error("connection aborted: {0}")]
    Abort(String),
    /// Tagged `NO` completion; carries the server's response text
    #[error("server refused: {0}")]
    TaggedNo(String),
    /// Tagged `BAD` completion; carries the server's response text
    #[error("server rejected command: {0}")]
    TaggedBad(String),
    /// Reconnect supervisor ran out of attempts; fails the whole run
    #[error("reconnection attempts exhausted after {0} tries")]
    RetriesExhausted(u32),
    /// User interrupt latched; the engine unwinds
    #[error("interrupted by user")]
    Cancelled,
}

impl SyncError {
    /// True for failures the reconnect supervisor retries.
    ///
    /// Only disconnects and timeouts qualify; tagged `NO`/`BAD` are
    /// deliberate server answers and must reach the caller unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Abort(_))
    }

    /// True when a tagged `NO` signals destination quota exhaustion.
    pub fn is_overquota(&self) -> bool {
        match self {
            Self::TaggedNo(text) => text.to_ascii_uppercase().contains("[OVERQUOTA]"),
            _ => false,
        }
    }

}

impl From<async_imap::error::Error> for SyncError {
    fn from(err: async_imap::error::Error) -> Self {
        use async_imap::error::Error as Imap;
        match err {
            Imap::No(text) => Self::TaggedNo(text),
            Imap::Bad(text) => Self::TaggedBad(text),
            Imap::ConnectionLost => Self::Abort("connection lost".to_owned()),
            Imap::Io(e) => io_to_sync(e),
            Imap::Parse(e) => Self::Protocol(e.to_string()),
            Imap::Validate(e) => Self::Protocol(e.to_string()),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<io::Error> for SyncError {
    fn from(err: io::Error) -> Self {
        io_to_sync(err)
    }
}

/// Classify an I/O error into a transport kind
///
/// DNS failures surface from `TcpStream::connect` as generic errors whose
/// message mentions the lookup, so the message is inspected last.
fn io_to_sync(err: io::Error) -> SyncError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => SyncError::ConnectRefused(err.to_string()),
        io::ErrorKind::TimedOut => SyncError::Timeout(err.to_string()),
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => SyncError::Abort(err.to_string()),
        _ => {
            let text = err.to_string();
            let lower = text.to_ascii_lowercase();
            if lower.contains("lookup") || lower.contains("resolve") || lower.contains("name") {
                SyncError::Dns(text)
            } else {
                SyncError::Abort(text)
            }
        }
    }
}

/// Type alias for fallible return values
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::SyncError;

    #[test]
    fn timeout_and_abort_are_transient() {
        assert!(SyncError::Timeout("read".into()).is_transient());
        assert!(SyncError::Abort("reset".into()).is_transient());
        assert!(!SyncError::Auth("denied".into()).is_transient());
        assert!(!SyncError::TaggedNo("NO go away".into()).is_transient());
    }

    #[test]
    fn overquota_is_detected_case_insensitively() {
        let err = SyncError::TaggedNo("[OverQuota] mailbox is full".into());
        assert!(err.is_overquota());
        assert!(!SyncError::TaggedNo("mailbox unavailable".into()).is_overquota());
        assert!(!SyncError::TaggedBad("[OVERQUOTA]".into()).is_overquota());
    }

    #[test]
    fn io_errors_map_to_transport_kinds() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            SyncError::from(refused),
            SyncError::ConnectRefused(_)
        ));

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(matches!(SyncError::from(timed_out), SyncError::Timeout(_)));

        let lookup = std::io::Error::other("failed to lookup address information");
        assert!(matches!(SyncError::from(lookup), SyncError::Dns(_)));
    }

    #[test]
    fn tagged_responses_preserve_server_text() {
        let err = SyncError::from(async_imap::error::Error::No("[OVERQUOTA] full".to_owned()));
        assert!(err.is_overquota());
        assert!(matches!(err, SyncError::TaggedNo(text) if text.contains("full")));
    }
}
