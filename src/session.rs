//! IMAP session transport and capability surface
//!
//! [`ImapStream`] unifies the TLS and plaintext transports behind one
//! stream type. [`ImapSession`] wraps the authenticated
//! `async-imap` session and exposes exactly the command verbs the rest
//! of the crate uses, each bounded by the configured socket timeout.
//! Server `NO`/`BAD` responses map to [`Error::Operation`]; transport
//! failures and timeouts map to [`Error::Connection`] so callers can
//! mark the connection broken.

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use async_imap::types::{Capabilities, Fetch, Mailbox, Name};
use futures::TryStreamExt;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// A TLS-wrapped or plaintext TCP stream.
#[derive(Debug)]
pub enum ImapStream {
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    Plain(TcpStream),
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Build the TLS connector: WebPKI roots by default, or the
/// accept-all verifier for self-signed servers.
fn tls_connector(accept_invalid_certs: bool) -> TlsConnector {
    let config = if accept_invalid_certs {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };
    TlsConnector::from(Arc::new(config))
}

/// Dial the server: TCP connect bounded by the connect timeout, then
/// an implicit TLS handshake when `use_tls` is set.
pub(crate) async fn open_stream(config: &ConnectionConfig) -> Result<ImapStream> {
    let addr = format!("{}:{}", config.host, config.port);
    debug!("Connecting to IMAP server at {}", addr);

    let tcp = timeout(config.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::Connection(format!("TCP connect to {addr} timed out")))?
        .map_err(|e| Error::Connection(format!("TCP connect to {addr} failed: {e}")))?;

    if !config.use_tls {
        return Ok(ImapStream::Plain(tcp));
    }

    let connector = tls_connector(config.accept_invalid_certs);
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;
    let tls = timeout(config.connect_timeout, connector.connect(server_name, tcp))
        .await
        .map_err(|_| Error::Tls("TLS handshake timed out".into()))?
        .map_err(|e| Error::Tls(e.to_string()))?;

    Ok(ImapStream::Tls(Box::new(tls)))
}

/// Read the greeting and LOGIN, producing the authenticated session.
pub(crate) async fn login(stream: ImapStream, config: &ConnectionConfig) -> Result<ImapSession> {
    let mut client = async_imap::Client::new(stream);

    let greeting = timeout(config.connect_timeout, client.read_response())
        .await
        .map_err(|_| Error::Connection("IMAP greeting timed out".into()))?
        .map_err(|e| Error::Connection(format!("IMAP greeting failed: {e}")))?;
    if greeting.is_none() {
        return Err(Error::Connection(
            "server closed the connection before greeting".into(),
        ));
    }

    let session = timeout(
        config.connect_timeout,
        client.login(&config.username, &config.password),
    )
    .await
    .map_err(|_| Error::Connection("LOGIN timed out".into()))?
    .map_err(|(e, _)| match e {
        // Only a transport failure is retryable; a server rejection
        // of the credentials is terminal.
        async_imap::error::Error::Io(io) => Error::Connection(format!("LOGIN failed: {io}")),
        async_imap::error::Error::ConnectionLost => {
            Error::Connection("LOGIN failed: connection lost".into())
        }
        other => Error::Authentication(other.to_string()),
    })?;

    debug!("Authenticated to {} as {}", config.host, config.username);
    Ok(ImapSession {
        inner: session,
        socket_timeout: config.socket_timeout,
    })
}

/// Map an `async-imap` error: server `NO`/`BAD` stay operation-level,
/// transport problems become connection-level.
fn map_imap_error(operation: &str, error: async_imap::error::Error) -> Error {
    use async_imap::error::Error as Wire;
    match error {
        Wire::No(text) => Error::Operation {
            operation: operation.to_string(),
            reason: format!("NO {text}"),
        },
        Wire::Bad(text) => Error::Operation {
            operation: operation.to_string(),
            reason: format!("BAD {text}"),
        },
        Wire::Io(e) => Error::Connection(format!("{operation}: {e}")),
        Wire::ConnectionLost => Error::Connection(format!("{operation}: connection lost")),
        other => Error::Operation {
            operation: operation.to_string(),
            reason: other.to_string(),
        },
    }
}

/// The authenticated IMAP session, restricted to the verbs the crate
/// actually issues. Exactly one command is in flight at a time; the
/// owning connection serializes access.
#[derive(Debug)]
pub struct ImapSession {
    inner: async_imap::Session<ImapStream>,
    socket_timeout: Duration,
}

macro_rules! bounded {
    ($self:ident, $op:literal, $fut:expr) => {
        timeout($self.socket_timeout, $fut)
            .await
            .map_err(|_| Error::Connection(concat!($op, " timed out").into()))?
            .map_err(|e| map_imap_error($op, e))
    };
}

impl ImapSession {
    /// NOOP liveness probe with an explicit (short) deadline.
    pub async fn noop_within(&mut self, deadline: Duration) -> Result<()> {
        timeout(deadline, self.inner.noop())
            .await
            .map_err(|_| Error::Connection("NOOP timed out".into()))?
            .map_err(|e| map_imap_error("NOOP", e))
    }

    pub async fn check(&mut self) -> Result<()> {
        bounded!(self, "CHECK", self.inner.check())
    }

    pub async fn select(&mut self, mailbox: &str) -> Result<Mailbox> {
        bounded!(self, "SELECT", self.inner.select(mailbox))
    }

    pub async fn close(&mut self) -> Result<()> {
        bounded!(self, "CLOSE", self.inner.close())
    }

    /// EXPUNGE, draining the untagged responses into the set of
    /// removed sequence numbers.
    pub async fn expunge(&mut self) -> Result<Vec<u32>> {
        let stream = bounded!(self, "EXPUNGE", self.inner.expunge())?;
        timeout(self.socket_timeout, stream.try_collect())
            .await
            .map_err(|_| Error::Connection("EXPUNGE stream timed out".into()))?
            .map_err(|e| map_imap_error("EXPUNGE", e))
    }

    pub async fn search(&mut self, query: &str) -> Result<HashSet<u32>> {
        bounded!(self, "SEARCH", self.inner.search(query))
    }

    pub async fn uid_search(&mut self, query: &str) -> Result<HashSet<u32>> {
        bounded!(self, "UID SEARCH", self.inner.uid_search(query))
    }

    pub async fn fetch(&mut self, set: &str, query: &str) -> Result<Vec<Fetch>> {
        let stream = bounded!(self, "FETCH", self.inner.fetch(set, query))?;
        timeout(self.socket_timeout, stream.try_collect())
            .await
            .map_err(|_| Error::Connection("FETCH stream timed out".into()))?
            .map_err(|e| map_imap_error("FETCH", e))
    }

    pub async fn uid_fetch(&mut self, set: &str, query: &str) -> Result<Vec<Fetch>> {
        let stream = bounded!(self, "UID FETCH", self.inner.uid_fetch(set, query))?;
        timeout(self.socket_timeout, stream.try_collect())
            .await
            .map_err(|_| Error::Connection("UID FETCH stream timed out".into()))?
            .map_err(|e| map_imap_error("UID FETCH", e))
    }

    pub async fn store(&mut self, set: &str, query: &str) -> Result<Vec<Fetch>> {
        let stream = bounded!(self, "STORE", self.inner.store(set, query))?;
        timeout(self.socket_timeout, stream.try_collect())
            .await
            .map_err(|_| Error::Connection("STORE stream timed out".into()))?
            .map_err(|e| map_imap_error("STORE", e))
    }

    pub async fn uid_store(&mut self, set: &str, query: &str) -> Result<Vec<Fetch>> {
        let stream = bounded!(self, "UID STORE", self.inner.uid_store(set, query))?;
        timeout(self.socket_timeout, stream.try_collect())
            .await
            .map_err(|_| Error::Connection("UID STORE stream timed out".into()))?
            .map_err(|e| map_imap_error("UID STORE", e))
    }

    pub async fn copy(&mut self, set: &str, mailbox: &str) -> Result<()> {
        bounded!(self, "COPY", self.inner.copy(set, mailbox))
    }

    pub async fn uid_copy(&mut self, set: &str, mailbox: &str) -> Result<()> {
        bounded!(self, "UID COPY", self.inner.uid_copy(set, mailbox))
    }

    pub async fn append(
        &mut self,
        mailbox: &str,
        flags: Option<&str>,
        internal_date: Option<&str>,
        content: &[u8],
    ) -> Result<()> {
        bounded!(
            self,
            "APPEND",
            self.inner.append(mailbox, flags, internal_date, content)
        )
    }

    /// STATUS, returning the raw untagged response for the caller to
    /// parse into a key/value map.
    pub async fn status_raw(&mut self, mailbox: &str, items: &str) -> Result<Vec<u8>> {
        let command = format!("STATUS \"{mailbox}\" {items}");
        timeout(
            self.socket_timeout,
            self.inner.run_command_and_read_response(&command),
        )
        .await
        .map_err(|_| Error::Connection("STATUS timed out".into()))?
        .map_err(|e| map_imap_error("STATUS", e))
    }

    pub async fn list(&mut self, reference: Option<&str>, pattern: Option<&str>) -> Result<Vec<Name>> {
        let stream = bounded!(self, "LIST", self.inner.list(reference, pattern))?;
        timeout(self.socket_timeout, stream.try_collect())
            .await
            .map_err(|_| Error::Connection("LIST stream timed out".into()))?
            .map_err(|e| map_imap_error("LIST", e))
    }

    pub async fn lsub(&mut self, reference: Option<&str>, pattern: Option<&str>) -> Result<Vec<Name>> {
        let stream = bounded!(self, "LSUB", self.inner.lsub(reference, pattern))?;
        timeout(self.socket_timeout, stream.try_collect())
            .await
            .map_err(|_| Error::Connection("LSUB stream timed out".into()))?
            .map_err(|e| map_imap_error("LSUB", e))
    }

    pub async fn create(&mut self, mailbox: &str) -> Result<()> {
        bounded!(self, "CREATE", self.inner.create(mailbox))
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        bounded!(self, "RENAME", self.inner.rename(from, to))
    }

    pub async fn delete(&mut self, mailbox: &str) -> Result<()> {
        bounded!(self, "DELETE", self.inner.delete(mailbox))
    }

    pub async fn subscribe(&mut self, mailbox: &str) -> Result<()> {
        bounded!(self, "SUBSCRIBE", self.inner.subscribe(mailbox))
    }

    pub async fn unsubscribe(&mut self, mailbox: &str) -> Result<()> {
        bounded!(self, "UNSUBSCRIBE", self.inner.unsubscribe(mailbox))
    }

    pub async fn capabilities(&mut self) -> Result<Capabilities> {
        bounded!(self, "CAPABILITY", self.inner.capabilities())
    }

    /// LOGOUT; the session is consumed regardless of the outcome.
    pub async fn logout(mut self) -> Result<()> {
        bounded!(self, "LOGOUT", self.inner.logout())
    }
}

/// Certificate verifier that accepts all certificates, for servers
/// with self-signed certificates (local bridges, test fixtures).
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
