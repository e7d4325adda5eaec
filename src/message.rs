//! Per-message identity and date handling
//!
//! A message's migration identity is its `Message-ID` header; when that is
//! absent the identity degrades to `(From, To, SENTON date)`. Both shapes
//! turn into an IMAP SEARCH query used twice per message: once to probe
//! the destination for duplicates before APPEND, once to locate the
//! freshly appended copy for the flag replay.
//!
//! Header parsing is delegated to `mailparse`; dates follow RFC 5322 via
//! `mailparse::dateparse` and are re-rendered in the IMAP forms
//! (`dd-Mon-yyyy` for SENTON, `dd-Mon-yyyy hh:mm:ss +0000` for
//! INTERNALDATE).

use std::sync::LazyLock;

use chrono::DateTime;
use mailparse::{MailHeaderMap, parse_headers};
use regex::Regex;

/// addr-spec inside angle brackets, the canonical `Message-ID` shape
static ANGLE_ADDR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^<>]+)>").expect("angle-addr pattern compiles"));

/// Migration identity of a single message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageIdentity {
    /// `Message-ID` addr-spec, without the surrounding angle brackets
    MessageId(String),
    /// Degraded identity for messages without a `Message-ID`
    Fallback {
        from: String,
        to: String,
        senton: String,
    },
}

impl MessageIdentity {
    /// Destination SEARCH query probing for this identity
    pub fn search_query(&self) -> String {
        match self {
            Self::MessageId(id) => format!("HEADER Message-ID \"<{id}>\""),
            Self::Fallback { from, to, senton } => {
                format!("FROM \"{from}\" TO \"{to}\" SENTON \"{senton}\"")
            }
        }
    }

    /// Short human-readable form for log lines
    pub fn describe(&self) -> String {
        match self {
            Self::MessageId(id) => format!("<{id}>"),
            Self::Fallback { from, to, senton } => {
                format!("{from} -> {to} on {senton}")
            }
        }
    }
}

/// Derive a message's identity from its raw header block
///
/// Prefers the `Message-ID`; falls back to `(From, To, SENTON)` and
/// returns `None` when neither is complete. Callers skip identity-less
/// messages because without a usable existence probe a re-run would
/// duplicate them.
pub fn identity_from_header(header: &[u8]) -> Option<MessageIdentity> {
    let (headers, _) = parse_headers(header).ok()?;

    if let Some(raw_id) = headers.get_first_value("Message-ID")
        && let Some(id) = extract_angle_addr(&raw_id)
    {
        return Some(MessageIdentity::MessageId(id));
    }

    let from = headers
        .get_first_value("From")
        .and_then(|v| first_address(&v))?;
    let to = headers
        .get_first_value("To")
        .and_then(|v| first_address(&v))?;
    let senton = headers
        .get_first_value("Date")
        .and_then(|v| imap_date(&v))?;
    Some(MessageIdentity::Fallback { from, to, senton })
}

/// Render the `Date:` header as an IMAP INTERNALDATE string
///
/// Returns `None` when the header is missing or unparseable; APPEND then
/// omits the date and the server stamps its current time (chronology is
/// lost for that message, a documented limitation).
pub fn internal_date_from_header(header: &[u8]) -> Option<String> {
    let (headers, _) = parse_headers(header).ok()?;
    let raw = headers.get_first_value("Date")?;
    let epoch = mailparse::dateparse(&raw).ok()?;
    let date = DateTime::from_timestamp(epoch, 0)?;
    Some(date.format("%d-%b-%Y %H:%M:%S +0000").to_string())
}

/// Extract the addr-spec from inside `<...>`, tolerating bare values
fn extract_angle_addr(raw: &str) -> Option<String> {
    let inner = ANGLE_ADDR
        .captures(raw)
        .and_then(|c| c.get(1))
        .map_or_else(|| raw.trim(), |m| m.as_str().trim());
    if inner.is_empty() || !inner.contains('@') {
        return None;
    }
    Some(inner.to_owned())
}

/// First address in a `From:`/`To:` header value
fn first_address(raw: &str) -> Option<String> {
    let parsed = mailparse::addrparse(raw).ok()?;
    parsed.iter().find_map(|addr| match addr {
        mailparse::MailAddr::Single(info) => Some(info.addr.clone()),
        mailparse::MailAddr::Group(group) => {
            group.addrs.first().map(|single| single.addr.clone())
        }
    })
}

/// Render an RFC 5322 date as the IMAP `dd-Mon-yyyy` search form
fn imap_date(raw: &str) -> Option<String> {
    let epoch = mailparse::dateparse(raw).ok()?;
    let date = DateTime::from_timestamp(epoch, 0)?;
    Some(date.format("%d-%b-%Y").to_string())
}

#[cfg(test)]
mod tests {
    use super::{MessageIdentity, identity_from_header, internal_date_from_header};

    const FULL: &[u8] = b"From: Alice <a@x>\r\n\
        To: Bob <b@y>\r\n\
        Subject: hello\r\n\
        Date: Mon, 01 Jan 2024 10:00:00 +0000\r\n\
        Message-ID: <a@x>\r\n\r\n";

    const NO_ID: &[u8] = b"From: a@x\r\n\
        To: b@y\r\n\
        Date: Mon, 01 Jan 2024 10:00:00 +0000\r\n\r\n";

    #[test]
    fn message_id_wins_over_fallback() {
        let identity = identity_from_header(FULL).expect("identity");
        assert_eq!(identity, MessageIdentity::MessageId("a@x".to_owned()));
        assert_eq!(identity.search_query(), "HEADER Message-ID \"<a@x>\"");
    }

    #[test]
    fn fallback_identity_uses_from_to_senton() {
        let identity = identity_from_header(NO_ID).expect("identity");
        assert_eq!(
            identity,
            MessageIdentity::Fallback {
                from: "a@x".to_owned(),
                to: "b@y".to_owned(),
                senton: "01-Jan-2024".to_owned(),
            }
        );
        assert_eq!(
            identity.search_query(),
            "FROM \"a@x\" TO \"b@y\" SENTON \"01-Jan-2024\""
        );
    }

    #[test]
    fn bare_message_id_without_brackets_is_accepted() {
        let header = b"Message-ID: abc123@mailer.example\r\n\r\n";
        let identity = identity_from_header(header).expect("identity");
        assert_eq!(
            identity,
            MessageIdentity::MessageId("abc123@mailer.example".to_owned())
        );
    }

    #[test]
    fn header_without_any_identity_yields_none() {
        let header = b"Subject: mystery\r\n\r\n";
        assert_eq!(identity_from_header(header), None);
    }

    #[test]
    fn missing_date_blocks_the_fallback() {
        let header = b"From: a@x\r\nTo: b@y\r\n\r\n";
        assert_eq!(identity_from_header(header), None);
    }

    #[test]
    fn internal_date_preserves_the_header_instant() {
        assert_eq!(
            internal_date_from_header(FULL).as_deref(),
            Some("01-Jan-2024 10:00:00 +0000")
        );
    }

    #[test]
    fn internal_date_normalizes_offsets_to_utc() {
        let header = b"Date: Mon, 01 Jan 2024 12:00:00 +0200\r\n\r\n";
        assert_eq!(
            internal_date_from_header(header).as_deref(),
            Some("01-Jan-2024 10:00:00 +0000")
        );
    }

    #[test]
    fn unparseable_date_yields_none() {
        let header = b"Date: not a date\r\n\r\n";
        assert_eq!(internal_date_from_header(header), None);
    }
}
