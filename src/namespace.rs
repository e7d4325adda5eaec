//! Mailbox namespace resolution
//!
//! IMAP servers disagree on three things this module papers over: the
//! hierarchy delimiter (`/` vs `.`), whether user folders live under an
//! `INBOX.` prefix (Courier/Dovecot style) or alongside `INBOX`
//! (Gmail/Cyrus style), and how special-use folders are labelled
//! (`[Gmail]/Sent Mail` vs a plain `Sent`). A one-pass textual rewrite
//! plus a special-use table maps every source mailbox name to its
//! destination counterpart without probing the target server name by name.
//!
//! The separator and prefix of a session are derived from that session's
//! own LIST output and never assumed.

use async_imap::types::Name;

use crate::imap::attribute_strings;

/// Special-use labels recognized for priority mapping (RFC 6154 names).
const SPECIAL_USE: [&str; 5] = ["Sent", "Drafts", "Junk", "Trash", "Archive"];

/// Attributes that mark a mailbox as not worth visiting.
const SKIP_ATTRIBUTES: [&str; 3] = ["Noselect", "All", "Flagged"];

/// Gmail's virtual roots, stripped when resolving special-use targets.
const GMAIL_ROOTS: [&str; 2] = ["[Gmail]", "[Google Mail]"];

/// One parsed LIST entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxEntry {
    /// Raw (modified UTF-7) mailbox name as the server reported it
    pub name: String,
    /// Hierarchy delimiter for this entry, if the server reported one
    pub delimiter: Option<String>,
    /// Attribute tokens, e.g. `\Noselect`, `\HasChildren`, `\Sent`
    pub attributes: Vec<String>,
}

impl MailboxEntry {
    pub fn from_name(name: &Name) -> Self {
        Self {
            name: name.name().to_owned(),
            delimiter: name.delimiter().map(str::to_owned),
            attributes: attribute_strings(name),
        }
    }

    #[cfg(test)]
    fn new(name: &str, delimiter: &str, attributes: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            delimiter: Some(delimiter.to_owned()),
            attributes: attributes.iter().map(|a| (*a).to_owned()).collect(),
        }
    }

    /// Whole-token attribute test, ignoring the leading backslash and case
    fn has_attribute(&self, token: &str) -> bool {
        self.attributes
            .iter()
            .any(|attr| attr.trim_start_matches('\\').eq_ignore_ascii_case(token))
    }
}

/// Namespace facts for one session, derived from its LIST output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// Hierarchy separator, typically `/` or `.`
    pub separator: char,
    /// `"INBOX."` when user folders live under the inbox, absent otherwise
    pub prefix: Option<String>,
}

/// Derive separator and prefix from a session's LIST entries
///
/// The separator comes from the first entry. The prefix starts as the
/// candidate `INBOX.` and survives only if every non-INBOX entry carries
/// it; Gmail-style trees falsify it on the first `[Gmail]/...` entry.
pub fn detect(entries: &[MailboxEntry]) -> Namespace {
    let separator = entries
        .iter()
        .find_map(|e| e.delimiter.as_ref().and_then(|d| d.chars().next()))
        .unwrap_or('/');

    let mut prefix = Some("INBOX.".to_owned());
    for entry in entries {
        if entry.name == "INBOX" {
            continue;
        }
        if !entry.name.contains("INBOX.") {
            prefix = None;
            break;
        }
    }

    Namespace { separator, prefix }
}

/// True for mailboxes the iterator must not visit
///
/// Matches `\Noselect`, `\All`, and `\Flagged` as whole attribute tokens.
/// (The original implementation used a character class here and skipped
/// every folder whose attributes shared a letter with those names; this
/// matches the intended three only.)
pub fn is_skipped(entry: &MailboxEntry) -> bool {
    SKIP_ATTRIBUTES.iter().any(|token| entry.has_attribute(token))
}

/// Special-use label carried by an entry, from attributes or name segments
fn special_use_label(entry: &MailboxEntry, separator: char) -> Option<&'static str> {
    SPECIAL_USE
        .iter()
        .find(|label| {
            entry.has_attribute(label)
                || entry
                    .name
                    .split(separator)
                    .any(|segment| segment.eq_ignore_ascii_case(label))
        })
        .copied()
}

/// Strip a Gmail virtual root from a destination entry name
fn bare_name(name: &str, separator: char) -> String {
    for root in GMAIL_ROOTS {
        let rooted = format!("{root}{separator}");
        if let Some(rest) = name.strip_prefix(&rooted) {
            return rest.to_owned();
        }
    }
    name.to_owned()
}

/// Map a source mailbox name to its destination name
///
/// Special-use folders are matched by label first, so Gmail's
/// `[Gmail]/Sent Mail` and a generic `Sent` find each other regardless of
/// spelling. Everything else is rewritten textually: prefix stripped or
/// added, separator replaced, then the post-adjustments from observed
/// server quirks.
pub fn map_name(
    src_entry: &MailboxEntry,
    src: &Namespace,
    dst_entries: &[MailboxEntry],
    dst: &Namespace,
    dst_host: &str,
) -> String {
    // 1. Special-use match takes priority over any textual rewrite.
    if let Some(label) = special_use_label(src_entry, src.separator)
        && let Some(target) = dst_entries
            .iter()
            .find(|e| special_use_label(e, dst.separator) == Some(label))
    {
        return bare_name(&target.name, dst.separator);
    }

    // 2. Textual rewrite: prefix, then separator.
    let mut mapped = src_entry.name.clone();
    if mapped != "INBOX" && src.prefix != dst.prefix {
        if let Some(src_prefix) = &src.prefix
            && let Some(rest) = mapped.strip_prefix(src_prefix.as_str())
        {
            mapped = rest.to_owned();
        }
        if let Some(dst_prefix) = &dst.prefix {
            mapped = format!("{dst_prefix}{mapped}");
        }
    }
    if src.separator != dst.separator {
        mapped = mapped.replace(src.separator, &dst.separator.to_string());
    }

    // 3. Post-adjustments.
    if dst.separator == '/'
        && let Some(rest) = mapped.strip_prefix("INBOX/")
    {
        mapped = rest.to_owned();
    }
    if !is_gmail_host(dst_host) {
        for root in GMAIL_ROOTS {
            mapped = mapped.replace(&format!("{root}{}", dst.separator), "");
        }
    }

    mapped
}

fn is_gmail_host(host: &str) -> bool {
    let lower = host.to_ascii_lowercase();
    lower.ends_with("gmail.com") || lower.ends_with("googlemail.com")
}

#[cfg(test)]
mod tests {
    use super::{MailboxEntry, Namespace, detect, is_skipped, map_name};

    fn courier_entries() -> Vec<MailboxEntry> {
        vec![
            MailboxEntry::new("INBOX", ".", &["\\HasChildren"]),
            MailboxEntry::new("INBOX.Sent", ".", &["\\HasNoChildren"]),
            MailboxEntry::new("INBOX.Work.2023", ".", &["\\HasNoChildren"]),
        ]
    }

    fn gmail_entries() -> Vec<MailboxEntry> {
        vec![
            MailboxEntry::new("INBOX", "/", &["\\HasNoChildren"]),
            MailboxEntry::new("[Gmail]", "/", &["\\Noselect", "\\HasChildren"]),
            MailboxEntry::new("[Gmail]/Sent Mail", "/", &["\\HasNoChildren", "\\Sent"]),
            MailboxEntry::new("[Gmail]/All Mail", "/", &["\\HasNoChildren", "\\All"]),
            MailboxEntry::new("[Gmail]/Starred", "/", &["\\HasNoChildren", "\\Flagged"]),
        ]
    }

    #[test]
    fn detects_dot_separator_and_inbox_prefix() {
        let ns = detect(&courier_entries());
        assert_eq!(ns.separator, '.');
        assert_eq!(ns.prefix.as_deref(), Some("INBOX."));
    }

    #[test]
    fn gmail_tree_has_no_prefix() {
        let ns = detect(&gmail_entries());
        assert_eq!(ns.separator, '/');
        assert_eq!(ns.prefix, None);
    }

    #[test]
    fn empty_list_falls_back_to_slash() {
        let ns = detect(&[]);
        assert_eq!(ns.separator, '/');
    }

    #[test]
    fn skip_filter_matches_whole_tokens_only() {
        let noselect = MailboxEntry::new("[Gmail]", "/", &["\\Noselect"]);
        let all = MailboxEntry::new("[Gmail]/All Mail", "/", &["\\All"]);
        let starred = MailboxEntry::new("[Gmail]/Starred", "/", &["\\Flagged"]);
        assert!(is_skipped(&noselect));
        assert!(is_skipped(&all));
        assert!(is_skipped(&starred));

        // These would all have matched the original's character-class regex.
        let haschildren = MailboxEntry::new("INBOX", ".", &["\\HasChildren"]);
        let sent = MailboxEntry::new("INBOX.Sent", ".", &["\\HasNoChildren"]);
        assert!(!is_skipped(&haschildren));
        assert!(!is_skipped(&sent));
    }

    #[test]
    fn maps_courier_tree_onto_gmail() {
        let src_entries = courier_entries();
        let src = detect(&src_entries);
        let dst_entries = gmail_entries();
        let dst = detect(&dst_entries);

        let map = |name: &str| {
            let entry = src_entries.iter().find(|e| e.name == name).unwrap();
            map_name(entry, &src, &dst_entries, &dst, "imap.gmail.com")
        };

        assert_eq!(map("INBOX"), "INBOX");
        assert_eq!(map("INBOX.Sent"), "Sent Mail");
        assert_eq!(map("INBOX.Work.2023"), "Work/2023");
    }

    #[test]
    fn maps_gmail_tree_onto_courier() {
        let src_entries = gmail_entries();
        let src = detect(&src_entries);
        let dst_entries = courier_entries();
        let dst = detect(&dst_entries);

        let sent = src_entries
            .iter()
            .find(|e| e.name == "[Gmail]/Sent Mail")
            .unwrap();
        assert_eq!(
            map_name(sent, &src, &dst_entries, &dst, "mail.example.org"),
            "INBOX.Sent"
        );

        let inbox = src_entries.iter().find(|e| e.name == "INBOX").unwrap();
        assert_eq!(
            map_name(inbox, &src, &dst_entries, &dst, "mail.example.org"),
            "INBOX"
        );
    }

    #[test]
    fn plain_folder_gains_prefix_and_separator() {
        let src_entries = vec![
            MailboxEntry::new("INBOX", "/", &[]),
            MailboxEntry::new("Projects/Alpha", "/", &[]),
        ];
        let src = detect(&src_entries);
        let dst_entries = courier_entries();
        let dst = detect(&dst_entries);

        let entry = &src_entries[1];
        assert_eq!(
            map_name(entry, &src, &dst_entries, &dst, "mail.example.org"),
            "INBOX.Projects.Alpha"
        );
    }

    #[test]
    fn gmail_root_is_stripped_for_non_gmail_destination() {
        let src_entries = gmail_entries();
        let src = detect(&src_entries);
        // Destination with slash separator, no prefix, no special-use labels.
        let dst_entries = vec![
            MailboxEntry::new("INBOX", "/", &[]),
            MailboxEntry::new("Notes", "/", &[]),
        ];
        let dst = detect(&dst_entries);

        let entry = MailboxEntry::new("[Gmail]/Important", "/", &["\\HasNoChildren"]);
        assert_eq!(
            map_name(&entry, &src, &dst_entries, &dst, "mail.example.org"),
            "Important"
        );
    }

    #[test]
    fn special_use_matches_by_name_segment_without_attributes() {
        let src_entries = courier_entries();
        let src = detect(&src_entries);
        let dst_entries = vec![
            MailboxEntry::new("INBOX", "/", &[]),
            MailboxEntry::new("Sent", "/", &[]),
        ];
        let dst = detect(&dst_entries);

        let sent = src_entries.iter().find(|e| e.name == "INBOX.Sent").unwrap();
        assert_eq!(
            map_name(sent, &src, &dst_entries, &dst, "mail.example.org"),
            "Sent"
        );
    }
}
