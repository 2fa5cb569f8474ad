//! In-process fake IMAP server for integration testing
//!
//! Speaks enough of RFC 3501 to exercise the client end-to-end over
//! implicit TLS:
//!
//! ```text
//!   Client connects via TCP
//!       |
//!   TLS handshake (self-signed cert generated at startup)
//!       |
//!   Server sends greeting: "* OK IMAP4rev1 ready\r\n"
//!       |
//!   Client sends LOGIN with username and password
//!       |
//!   Client issues commands: LIST, SELECT, SEARCH, FETCH, STORE, ...
//!       |
//!   Client sends LOGOUT
//! ```
//!
//! ## Command format
//!
//! Every client command starts with a **tag** the client chooses
//! (`A0001`, `A0002`, ...). The server echoes the tag in its
//! completion response. Lines prefixed with `*` are untagged data
//! responses sent before the final tagged OK/NO/BAD.
//!
//! ## Literals
//!
//! Commands like APPEND carry message bodies as **counted literals**:
//! `{bytecount}\r\n` followed by exactly that many raw bytes. For a
//! synchronizing literal the client waits for a `+` continuation
//! before sending the bytes, so the command reader accumulates the
//! whole command (line, continuation, literal bytes, rest of line)
//! before handing it to `imap-codec`.

use super::handlers::{
    StoreArgs, handle_append, handle_capability, handle_check, handle_close, handle_copy,
    handle_create, handle_expunge, handle_fetch, handle_list, handle_login, handle_logout,
    handle_noop, handle_search, handle_select, handle_status,
};
use super::io::write_line;
use super::mailbox::Mailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::{CommandDecodeError, Decoder};
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::core::LiteralOrLiteral8;
use imap_codec::imap_types::mailbox::{ListMailbox, Mailbox as ImapMailbox};
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// A fake IMAP server on localhost with an OS-assigned port.
///
/// The server generates a self-signed TLS certificate at startup
/// using `rcgen`, so no cert files are needed; clients connect with
/// certificate verification disabled. Mailbox state (and the handled
/// command log) is shared so tests can assert on it after driving the
/// client.
pub struct FakeImapServer {
    port: u16,
    mailbox: Arc<Mutex<Mailbox>>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a new fake IMAP server with the given mailbox state.
    pub async fn start(mailbox: Mailbox) -> Self {
        // Multiple tests race to install the process-wide crypto
        // provider; the error for an already-set provider is ignored.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let mailbox = Arc::new(Mutex::new(mailbox));

        let shared = Arc::clone(&mailbox);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let mailbox = shared.clone();
                tokio::spawn(async move {
                    let Ok(tls_stream) = acceptor.accept(stream).await else {
                        return;
                    };
                    handle_imap_session(tls_stream, &mailbox).await;
                });
            }
        });

        Self {
            port,
            mailbox,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Shared mailbox state, for post-hoc assertions.
    pub fn mailbox(&self) -> Arc<Mutex<Mailbox>> {
        Arc::clone(&self.mailbox)
    }
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Extract the pattern from a LIST wildcard argument.
fn list_pattern(pattern: &ListMailbox<'_>) -> String {
    match pattern {
        ListMailbox::Token(token) => String::from_utf8_lossy(token.as_ref()).into_owned(),
        ListMailbox::String(string) => String::from_utf8_lossy(string.as_ref()).into_owned(),
    }
}

/// The bytes of an APPEND message literal.
fn literal_bytes<'a>(message: &'a LiteralOrLiteral8<'_>) -> &'a [u8] {
    match message {
        LiteralOrLiteral8::Literal(literal) => literal.as_ref(),
        LiteralOrLiteral8::Literal8(literal) => literal.data.as_ref(),
    }
}

/// What the command reader decided after one decode attempt.
enum ReadStep {
    /// A command was dispatched; `false` means the session ends.
    Handled(bool),
    /// A literal announcement was found; read `length` raw bytes
    /// (after a `+` continuation when synchronizing).
    Literal { length: u32, sync: bool },
    /// The buffer does not hold a full command yet.
    More,
    /// The buffer cannot be parsed.
    Bad,
}

/// Run the authenticated IMAP command loop over an established
/// stream.
///
/// Uses `imap-codec`'s `CommandCodec` to parse each accumulated
/// command into a strongly-typed `Command`, then dispatches on the
/// `CommandBody` variant. Read handlers receive a snapshot taken
/// under lock; write handlers receive `&Mutex<Mailbox>` and lock
/// briefly to mutate state.
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    mailbox: &Mutex<Mailbox>,
) {
    let mut reader = BufReader::new(stream);
    let mut selected_folder: Option<String> = None;
    let codec = CommandCodec::default();

    // RFC 3501 Section 7.1.1: server greeting.
    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    'session: loop {
        // Accumulate one complete command, literals included.
        let mut buf: Vec<u8> = Vec::new();
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if line.trim().is_empty() {
            continue;
        }
        buf.extend_from_slice(line.as_bytes());

        loop {
            let step = match codec.decode(&buf) {
                Ok((_remaining, command)) => {
                    let tag = command.tag.inner();
                    let keep_going =
                        dispatch(tag, &command.body, mailbox, &mut selected_folder, &mut reader)
                            .await;
                    ReadStep::Handled(keep_going)
                }
                Err(CommandDecodeError::LiteralFound { length, mode, .. }) => ReadStep::Literal {
                    length,
                    sync: matches!(mode, imap_codec::imap_types::core::LiteralMode::Sync),
                },
                Err(CommandDecodeError::Incomplete) => ReadStep::More,
                Err(CommandDecodeError::Failed) => ReadStep::Bad,
            };

            match step {
                ReadStep::Handled(true) => break,
                ReadStep::Handled(false) => break 'session,
                ReadStep::Literal { length, sync } => {
                    if sync && write_line(&mut reader, "+ OK\r\n").await.is_err() {
                        break 'session;
                    }
                    let mut chunk = vec![0_u8; length as usize];
                    if reader.read_exact(&mut chunk).await.is_err() {
                        break 'session;
                    }
                    buf.extend_from_slice(&chunk);
                    // The rest of the command line follows the
                    // literal (at least the closing CRLF).
                    let mut rest = String::new();
                    match reader.read_line(&mut rest).await {
                        Ok(0) | Err(_) => break 'session,
                        Ok(_) => buf.extend_from_slice(rest.as_bytes()),
                    }
                }
                ReadStep::More => {
                    let mut more = String::new();
                    match reader.read_line(&mut more).await {
                        Ok(0) | Err(_) => break 'session,
                        Ok(_) => buf.extend_from_slice(more.as_bytes()),
                    }
                }
                ReadStep::Bad => {
                    let tag = line.split_whitespace().next().unwrap_or("*").to_string();
                    let resp = format!("{tag} BAD Parse error\r\n");
                    if write_line(&mut reader, &resp).await.is_err() {
                        break 'session;
                    }
                    break;
                }
            }
        }
    }
}

/// Dispatch one parsed command to its handler. Returns false when the
/// session should end (LOGOUT).
#[allow(clippy::too_many_lines)]
async fn dispatch<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    body: &CommandBody<'_>,
    mailbox: &Mutex<Mailbox>,
    selected_folder: &mut Option<String>,
    reader: &mut BufReader<S>,
) -> bool {
    // Snapshot for read-only handlers; the verb log is part of the
    // shared state so tests can count wire commands.
    let snap = {
        let mut mb = mailbox.lock().unwrap();
        mb.record(verb_of(body));
        mb.clone()
    };

    match body {
        CommandBody::Capability => {
            handle_capability(tag, reader).await;
        }
        CommandBody::Noop => {
            handle_noop(tag, reader).await;
        }
        CommandBody::Check => {
            handle_check(tag, selected_folder.as_deref(), reader).await;
        }
        CommandBody::Login { password, .. } => {
            let accepted = handle_login(tag, password.declassify().as_ref(), reader).await;
            if !accepted {
                return false;
            }
        }
        CommandBody::List {
            mailbox_wildcard, ..
        } => {
            handle_list(tag, &list_pattern(mailbox_wildcard), &snap, reader).await;
        }
        CommandBody::Select { mailbox: mb, .. } => {
            let name = mailbox_name(mb);
            *selected_folder = handle_select(tag, &name, &snap, reader).await;
        }
        CommandBody::Close => {
            handle_close(tag, mailbox, selected_folder.as_deref(), reader).await;
            *selected_folder = None;
        }
        CommandBody::Status {
            mailbox: mb,
            item_names,
            ..
        } => {
            let name = mailbox_name(mb);
            handle_status(tag, &name, item_names.as_ref(), &snap, reader).await;
        }
        CommandBody::Search { criteria, uid, .. } => {
            handle_search(
                tag,
                criteria.as_ref(),
                *uid,
                &snap,
                selected_folder.as_deref(),
                reader,
            )
            .await;
        }
        CommandBody::Fetch {
            sequence_set, uid, ..
        } => {
            handle_fetch(
                tag,
                sequence_set,
                *uid,
                &snap,
                selected_folder.as_deref(),
                reader,
            )
            .await;
        }
        CommandBody::Store {
            sequence_set,
            kind,
            response,
            flags,
            uid,
            ..
        } => {
            let args = StoreArgs {
                sequence_set,
                kind,
                response,
                flags,
                uid: *uid,
            };
            handle_store(tag, &args, mailbox, selected_folder.as_deref(), reader).await;
        }
        CommandBody::Copy {
            sequence_set,
            mailbox: dest,
            uid,
            ..
        } => {
            let dest_name = mailbox_name(dest);
            handle_copy(
                tag,
                sequence_set,
                *uid,
                &dest_name,
                mailbox,
                selected_folder.as_deref(),
                reader,
            )
            .await;
        }
        CommandBody::Expunge => {
            handle_expunge(tag, mailbox, selected_folder.as_deref(), reader).await;
        }
        CommandBody::Append {
            mailbox: dest,
            flags,
            message,
            ..
        } => {
            let dest_name = mailbox_name(dest);
            handle_append(tag, &dest_name, flags, literal_bytes(message), mailbox, reader).await;
        }
        CommandBody::Create { mailbox: mb, .. } => {
            let name = mailbox_name(mb);
            handle_create(tag, &name, mailbox, reader).await;
        }
        CommandBody::Logout => {
            handle_logout(tag, reader).await;
            return false;
        }
        _ => {
            let resp = format!("{tag} BAD Unknown command\r\n");
            if write_line(reader, &resp).await.is_err() {
                return false;
            }
        }
    }
    true
}

/// The verb name recorded in the command log.
const fn verb_of(body: &CommandBody<'_>) -> &'static str {
    match body {
        CommandBody::Capability => "CAPABILITY",
        CommandBody::Noop => "NOOP",
        CommandBody::Check => "CHECK",
        CommandBody::Login { .. } => "LOGIN",
        CommandBody::List { .. } => "LIST",
        CommandBody::Select { .. } => "SELECT",
        CommandBody::Close => "CLOSE",
        CommandBody::Status { .. } => "STATUS",
        CommandBody::Search { .. } => "SEARCH",
        CommandBody::Fetch { .. } => "FETCH",
        CommandBody::Store { .. } => "STORE",
        CommandBody::Copy { .. } => "COPY",
        CommandBody::Expunge => "EXPUNGE",
        CommandBody::Append { .. } => "APPEND",
        CommandBody::Create { .. } => "CREATE",
        CommandBody::Logout => "LOGOUT",
        _ => "OTHER",
    }
}
