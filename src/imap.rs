//! IMAP transport and session operations
//!
//! Provides timeout-bounded wrappers around `async-imap` operations for the
//! four connection security modes (plaintext, STARTTLS, implicit TLS, and
//! implicit TLS with XOAUTH2 bearer authentication). Timeouts are derived
//! from the engine tuning; every expiry surfaces as [`SyncError::Timeout`]
//! so the reconnect supervisor can step in.
//!
//! Sequence numbers, not UIDs, identify messages throughout: a migration
//! run walks each mailbox once front to back and never holds identifiers
//! across a reselect.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_imap::types::{Fetch, Flag, Name, NameAttribute};
use async_imap::{Authenticator, Client, Session};
use futures::TryStreamExt;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::config::{Credential, Security, Tuning};
use crate::errors::{SyncError, SyncResult};
use crate::tokens::BearerTokenProvider;

/// Connection stream for any security mode
///
/// `PLAIN` sessions run directly on the TCP stream; the other three modes
/// run on a TLS stream (established either up front or via STARTTLS). The
/// enum lets one session type serve all modes.
#[derive(Debug)]
pub enum ImapStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Type alias for an authenticated IMAP session over any stream mode
pub type MailSession = Session<ImapStream>;

/// XOAUTH2 SASL authenticator
///
/// Wire format (before base64, which the library applies on the wire):
/// `user={email}\x01auth=Bearer {token}\x01\x01`.
pub struct XOAuth2 {
    response: Vec<u8>,
}

impl XOAuth2 {
    pub fn new(email: &str, access_token: &str) -> Self {
        Self {
            response: xoauth2_sasl(email, access_token),
        }
    }
}

impl Authenticator for XOAuth2 {
    type Response = Vec<u8>;

    /// Return the SASL initial response on the first call.
    ///
    /// On a subsequent call (the server sent an error challenge) return an
    /// empty response, which acknowledges the error and lets the server
    /// finish with its tagged `NO`.
    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        std::mem::take(&mut self.response)
    }
}

/// Build the raw XOAUTH2 SASL string for one account
pub fn xoauth2_sasl(email: &str, access_token: &str) -> Vec<u8> {
    format!("user={email}\x01auth=Bearer {access_token}\x01\x01").into_bytes()
}

/// Run a fallible network future under the tuning timeout
async fn bounded<T, E, F>(limit: Duration, what: &str, fut: F) -> SyncResult<T>
where
    F: Future<Output = Result<T, E>>,
    SyncError: From<E>,
{
    match timeout(limit, fut).await {
        Ok(result) => result.map_err(SyncError::from),
        Err(_) => Err(SyncError::Timeout(format!("{what} timed out"))),
    }
}

/// Map a login/authenticate failure onto the auth error kind
///
/// Tagged rejections mean bad credentials; everything else keeps its
/// transport classification so the caller can tell a flaky network from a
/// revoked password.
fn auth_error(err: async_imap::error::Error) -> SyncError {
    use async_imap::error::Error as Imap;
    match err {
        Imap::No(text) | Imap::Bad(text) => SyncError::Auth(text),
        other => SyncError::from(other),
    }
}

/// Build a TLS connector trusting the webpki root set
fn tls_connector() -> tokio_rustls::TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    tokio_rustls::TlsConnector::from(Arc::new(config))
}

/// TLS-handshake an open TCP stream against the credential's server name
async fn handshake(
    tuning: &Tuning,
    cred: &Credential,
    tcp: TcpStream,
) -> SyncResult<tokio_rustls::client::TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(cred.server.clone())
        .map_err(|e| SyncError::Tls(format!("invalid server name {}: {e}", cred.server)))?;
    match timeout(tuning.timeout, tls_connector().connect(server_name, tcp)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(SyncError::Tls(e.to_string())),
        Err(_) => Err(SyncError::Timeout("TLS handshake timed out".to_owned())),
    }
}

/// Read and discard the server greeting
async fn read_greeting<S>(client: &mut Client<S>, limit: Duration) -> SyncResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + std::fmt::Debug,
{
    let greeting = bounded(limit, "greeting", client.read_response()).await?;
    if greeting.is_none() {
        return Err(SyncError::Abort(
            "server closed connection before greeting".to_owned(),
        ));
    }
    Ok(())
}

/// Connect to an IMAP server and authenticate
///
/// Performs the full connection sequence for the credential's security
/// mode: TCP connect, optional TLS (up front or via STARTTLS), greeting,
/// then LOGIN or `AUTHENTICATE XOAUTH2`. The bearer token provider is
/// consulted on every call for OAuth accounts, never cached here.
///
/// # Errors
///
/// - `Dns` / `ConnectRefused` / `Timeout` from the TCP phase
/// - `Tls` from the handshake (including a refused STARTTLS)
/// - `Auth` if the server rejects the credentials
/// - `Abort` / `Protocol` for everything else
pub async fn connect_authenticated(
    tuning: &Tuning,
    cred: &Credential,
    tokens: &dyn BearerTokenProvider,
) -> SyncResult<MailSession> {
    let addr = (cred.server.as_str(), cred.effective_port());
    debug!(server = %cred.server, port = addr.1, mode = ?cred.security, "connecting");

    let tcp = match timeout(tuning.timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(SyncError::from(e)),
        Err(_) => return Err(SyncError::Timeout("TCP connect timed out".to_owned())),
    };

    match cred.security {
        Security::Plain => {
            let mut client = Client::new(ImapStream::Plain(tcp));
            read_greeting(&mut client, tuning.timeout).await?;
            login(tuning, cred, client).await
        }
        Security::StartTls => {
            let mut client = Client::new(tcp);
            read_greeting(&mut client, tuning.timeout).await?;
            match timeout(tuning.timeout, client.run_command_and_check_ok("STARTTLS", None)).await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(SyncError::Tls(format!("STARTTLS refused: {e}"))),
                Err(_) => return Err(SyncError::Timeout("STARTTLS timed out".to_owned())),
            }
            let tls = handshake(tuning, cred, client.into_inner()).await?;
            // No fresh greeting follows a STARTTLS upgrade.
            let client = Client::new(ImapStream::Tls(Box::new(tls)));
            login(tuning, cred, client).await
        }
        Security::Ssl => {
            let tls = handshake(tuning, cred, tcp).await?;
            let mut client = Client::new(ImapStream::Tls(Box::new(tls)));
            read_greeting(&mut client, tuning.timeout).await?;
            login(tuning, cred, client).await
        }
        Security::OAuth2 => {
            let tls = handshake(tuning, cred, tcp).await?;
            let mut client = Client::new(ImapStream::Tls(Box::new(tls)));
            read_greeting(&mut client, tuning.timeout).await?;
            let token = tokens.get(&cred.email)?;
            let authenticator = XOAuth2::new(&cred.email, &token);
            match timeout(tuning.timeout, client.authenticate("XOAUTH2", authenticator)).await {
                Ok(Ok(session)) => Ok(session),
                Ok(Err((e, _client))) => Err(auth_error(e)),
                Err(_) => Err(SyncError::Timeout("AUTHENTICATE timed out".to_owned())),
            }
        }
    }
}

/// LOGIN with the credential's password
async fn login(
    tuning: &Tuning,
    cred: &Credential,
    client: Client<ImapStream>,
) -> SyncResult<MailSession> {
    let password = cred
        .password
        .as_ref()
        .ok_or_else(|| SyncError::Config(format!("no password for {}", cred.email)))?;
    match timeout(
        tuning.timeout,
        client.login(cred.email.as_str(), password.expose_secret()),
    )
    .await
    {
        Ok(Ok(session)) => Ok(session),
        Ok(Err((e, _client))) => Err(auth_error(e)),
        Err(_) => Err(SyncError::Timeout("LOGIN timed out".to_owned())),
    }
}

/// List all mailboxes visible to the session
pub async fn list(tuning: &Tuning, session: &mut MailSession) -> SyncResult<Vec<Name>> {
    let stream = bounded(tuning.timeout, "LIST", session.list(Some(""), Some("*"))).await?;
    bounded(tuning.timeout, "LIST stream", stream.try_collect::<Vec<_>>()).await
}

/// SELECT a mailbox read-write
pub async fn select(tuning: &Tuning, session: &mut MailSession, mailbox: &str) -> SyncResult<()> {
    bounded(tuning.timeout, "SELECT", session.select(mailbox)).await?;
    Ok(())
}

/// CREATE a mailbox on the destination
pub async fn create(tuning: &Tuning, session: &mut MailSession, mailbox: &str) -> SyncResult<()> {
    bounded(tuning.timeout, "CREATE", session.create(mailbox)).await
}

/// SEARCH the selected mailbox, returning sequence numbers in ascending order
pub async fn search(
    tuning: &Tuning,
    session: &mut MailSession,
    query: &str,
) -> SyncResult<Vec<u32>> {
    let set = bounded(tuning.timeout, "SEARCH", session.search(query)).await?;
    let mut seqs: Vec<u32> = set.into_iter().collect();
    seqs.sort_unstable();
    Ok(seqs)
}

/// FETCH a single message with a custom query, returning the first result
async fn fetch_one(
    tuning: &Tuning,
    session: &mut MailSession,
    seq: u32,
    query: &str,
) -> SyncResult<Fetch> {
    let stream = bounded(
        tuning.timeout,
        "FETCH",
        session.fetch(seq.to_string(), query),
    )
    .await?;
    let fetches: Vec<Fetch> =
        bounded(tuning.timeout, "FETCH stream", stream.try_collect()).await?;
    fetches
        .into_iter()
        .next()
        .ok_or_else(|| SyncError::Protocol(format!("no FETCH response for message {seq}")))
}

/// Fetch the RFC 5322 header block without touching `\Seen`
pub async fn fetch_header(
    tuning: &Tuning,
    session: &mut MailSession,
    seq: u32,
) -> SyncResult<Vec<u8>> {
    let fetch = fetch_one(tuning, session, seq, "(BODY.PEEK[HEADER])").await?;
    fetch
        .header()
        .or_else(|| fetch.body())
        .map(<[u8]>::to_vec)
        .ok_or_else(|| SyncError::Protocol(format!("message {seq} returned no header")))
}

/// Fetch the full raw message without touching `\Seen`
pub async fn fetch_body(
    tuning: &Tuning,
    session: &mut MailSession,
    seq: u32,
) -> SyncResult<Vec<u8>> {
    let fetch = fetch_one(tuning, session, seq, "(BODY.PEEK[])").await?;
    fetch
        .body()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| SyncError::Protocol(format!("message {seq} returned no body")))
}

/// Fetch a message's flag set, already filtered for replay via STORE
pub async fn fetch_flags(
    tuning: &Tuning,
    session: &mut MailSession,
    seq: u32,
) -> SyncResult<Vec<String>> {
    let fetch = fetch_one(tuning, session, seq, "(FLAGS)").await?;
    Ok(fetch.flags().filter_map(|f| storable_flag(&f)).collect())
}

/// Render a fetched flag for a `STORE +FLAGS` replay
///
/// `\Recent` is session-scoped and cannot be stored; `\*` (permanent-flag
/// wildcard) never names a real flag.
pub fn storable_flag(flag: &Flag<'_>) -> Option<String> {
    match flag {
        Flag::Seen => Some("\\Seen".to_owned()),
        Flag::Answered => Some("\\Answered".to_owned()),
        Flag::Flagged => Some("\\Flagged".to_owned()),
        Flag::Deleted => Some("\\Deleted".to_owned()),
        Flag::Draft => Some("\\Draft".to_owned()),
        Flag::Recent => None,
        Flag::Custom(name) => Some(name.to_string()),
        _ => None,
    }
}

/// APPEND a raw message, optionally with a preserved INTERNALDATE
///
/// Flags are not set here; the replicator replays them with a follow-up
/// STORE so a failed flag write never loses the message itself.
pub async fn append(
    tuning: &Tuning,
    session: &mut MailSession,
    mailbox: &str,
    internal_date: Option<&str>,
    body: &[u8],
) -> SyncResult<()> {
    bounded(
        tuning.timeout,
        "APPEND",
        session.append(mailbox, None, internal_date, body),
    )
    .await
}

/// STORE additional flags on a message by sequence number
pub async fn store_flags(
    tuning: &Tuning,
    session: &mut MailSession,
    seq: u32,
    flags: &[String],
) -> SyncResult<()> {
    let query = format!("+FLAGS ({})", flags.join(" "));
    let stream = bounded(tuning.timeout, "STORE", session.store(seq.to_string(), &query)).await?;
    let _: Vec<Fetch> = bounded(tuning.timeout, "STORE stream", stream.try_collect()).await?;
    Ok(())
}

/// CLOSE the selected mailbox
pub async fn close(tuning: &Tuning, session: &mut MailSession) -> SyncResult<()> {
    bounded(tuning.timeout, "CLOSE", session.close()).await
}

/// LOGOUT and drop the session
pub async fn logout(tuning: &Tuning, session: &mut MailSession) -> SyncResult<()> {
    bounded(tuning.timeout, "LOGOUT", session.logout()).await
}

/// Render a LIST entry's attributes as IMAP flag tokens
///
/// Known attributes get their RFC 3501 spelling; special-use attributes
/// (RFC 6154) arrive as custom tokens and pass through unchanged.
pub fn attribute_strings(name: &Name) -> Vec<String> {
    name.attributes()
        .iter()
        .map(|attr| match attr {
            NameAttribute::NoSelect => "\\Noselect".to_owned(),
            NameAttribute::NoInferiors => "\\Noinferiors".to_owned(),
            NameAttribute::Marked => "\\Marked".to_owned(),
            NameAttribute::Unmarked => "\\Unmarked".to_owned(),
            NameAttribute::Extension(token) => token.to_string(),
            other => format!("\\{other:?}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use async_imap::types::Flag;

    use super::{storable_flag, xoauth2_sasl};

    #[test]
    fn xoauth2_sasl_matches_the_google_shape() {
        assert_eq!(
            xoauth2_sasl("user@example.com", "ya29.token"),
            b"user=user@example.com\x01auth=Bearer ya29.token\x01\x01"
        );
    }

    #[test]
    fn recent_flag_is_never_stored() {
        assert_eq!(storable_flag(&Flag::Recent), None);
        assert_eq!(storable_flag(&Flag::Seen).as_deref(), Some("\\Seen"));
        assert_eq!(
            storable_flag(&Flag::Custom(Cow::Borrowed("$Forwarded"))).as_deref(),
            Some("$Forwarded")
        );
    }
}
