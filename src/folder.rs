//! IMAP folders: names, validation, and management
//!
//! [`Folder`] is a strongly-typed name for well-known mailboxes with a
//! `Custom` escape hatch. [`FolderService`] drives the folder
//! management verbs (LIST, LSUB, CREATE, RENAME, DELETE, SUBSCRIBE,
//! UNSUBSCRIBE) over a connection; deleting a protected default folder
//! is refused before any command is issued.

use crate::connection::{Connection, ServerOutcome};
use crate::error::{Error, Result};
use std::fmt;
use tracing::{debug, info};

/// A mailbox name.
///
/// The six folders every deployment ships with (INBOX plus the usual
/// Sent/Drafts/Trash/Spam/Archive set) get their own variants so
/// callers never juggle their spellings; anything else goes through
/// [`Folder::custom`]. These defaults are also the protected set a
/// [`FolderService::delete`] refuses to touch.
///
/// Only INBOX is case-insensitive (RFC 3501 mandates the mailbox and
/// treats any casing of the name as equal); the rest match exactly.
///
/// # Examples
///
/// ```
/// use mailstore::Folder;
///
/// assert_eq!(Folder::from("inbox"), Folder::Inbox);
/// assert_eq!(Folder::custom("Receipts").to_string(), "Receipts");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Folder {
    /// `INBOX`, where new mail lands.
    Inbox,
    /// `Sent`.
    Sent,
    /// `Drafts`.
    Drafts,
    /// `Trash`.
    Trash,
    /// `Spam`.
    Spam,
    /// `Archive`.
    Archive,
    /// Any other mailbox, by its exact server-side name.
    Custom(String),
}

impl Folder {
    /// Wrap an arbitrary mailbox name.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// The name as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Custom(name) => name,
            Self::Inbox => "INBOX",
            Self::Sent => "Sent",
            Self::Drafts => "Drafts",
            Self::Trash => "Trash",
            Self::Spam => "Spam",
            Self::Archive => "Archive",
        }
    }

    /// Whether this is one of the protected default folders that must
    /// not be deleted.
    #[must_use]
    pub const fn is_protected_default(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Folder {
    fn from(name: &str) -> Self {
        match name {
            "Sent" => Self::Sent,
            "Drafts" => Self::Drafts,
            "Trash" => Self::Trash,
            "Spam" => Self::Spam,
            "Archive" => Self::Archive,
            _ if name.eq_ignore_ascii_case("inbox") => Self::Inbox,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for Folder {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

/// Tokens rejected in mailbox names. `..` and the separators guard
/// against path-style traversal on servers that map folders to
/// directories; NUL is never valid on the wire.
const DENIED_TOKENS: [&str; 4] = ["..", "/", "\\", "\0"];

/// Validate a mailbox name against the deny-list.
///
/// # Errors
///
/// Returns [`Error::Folder`] for empty names or names containing a
/// denied token.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Folder {
            name: name.to_string(),
            reason: "mailbox name cannot be empty".into(),
        });
    }
    for token in DENIED_TOKENS {
        if name.contains(token) {
            return Err(Error::Folder {
                name: name.to_string(),
                reason: format!("mailbox name contains forbidden token {token:?}"),
            });
        }
    }
    Ok(())
}

/// One entry of a LIST/LSUB response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    pub name: String,
    pub delimiter: Option<String>,
    /// Name attributes as reported (`\HasNoChildren`, `\Noselect`, ...).
    pub attributes: Vec<String>,
}

/// Folder management operations over a [`Connection`].
pub struct FolderService<'a> {
    connection: &'a Connection,
}

impl<'a> FolderService<'a> {
    #[must_use]
    pub const fn new(connection: &'a Connection) -> Self {
        Self { connection }
    }

    /// LIST folders matching `pattern` (`"*"` for all).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not authenticated or the
    /// server refuses the LIST.
    pub async fn list(&self, pattern: &str) -> Result<Vec<FolderInfo>> {
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => session.list(Some(""), Some(pattern)).await,
            None => return Err(Error::MailboxState("no active session".into())),
        };
        match self.connection.classify(call, &mut guard)? {
            ServerOutcome::Ok(names) => {
                let folders: Vec<FolderInfo> = names.iter().map(folder_info).collect();
                debug!("listed {} folders", folders.len());
                Ok(folders)
            }
            ServerOutcome::Refused(reason) => Err(Error::Folder {
                name: pattern.to_string(),
                reason,
            }),
        }
    }

    /// LSUB: the subscribed subset.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not authenticated or the
    /// server refuses the LSUB.
    pub async fn list_subscribed(&self, pattern: &str) -> Result<Vec<FolderInfo>> {
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => session.lsub(Some(""), Some(pattern)).await,
            None => return Err(Error::MailboxState("no active session".into())),
        };
        match self.connection.classify(call, &mut guard)? {
            ServerOutcome::Ok(names) => Ok(names.iter().map(folder_info).collect()),
            ServerOutcome::Refused(reason) => Err(Error::Folder {
                name: pattern.to_string(),
                reason,
            }),
        }
    }

    /// Whether `name` exists on the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the LIST round-trip fails.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let folders = self.list(name).await?;
        Ok(folders.iter().any(|folder| folder.name == name))
    }

    /// CREATE a folder. An already-existing folder surfaces as a
    /// folder error carrying the server's response.
    ///
    /// # Errors
    ///
    /// [`Error::Folder`] on validation failure or server refusal.
    pub async fn create(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => session.create(name).await,
            None => return Err(Error::MailboxState("no active session".into())),
        };
        match self.connection.classify(call, &mut guard)? {
            ServerOutcome::Ok(()) => {
                info!("created folder {name}");
                Ok(())
            }
            ServerOutcome::Refused(reason) => Err(Error::Folder {
                name: name.to_string(),
                reason,
            }),
        }
    }

    /// RENAME a folder.
    ///
    /// # Errors
    ///
    /// [`Error::Folder`] on validation failure or server refusal
    /// (e.g. NONEXISTENT).
    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        validate_name(old_name)?;
        validate_name(new_name)?;
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => session.rename(old_name, new_name).await,
            None => return Err(Error::MailboxState("no active session".into())),
        };
        match self.connection.classify(call, &mut guard)? {
            ServerOutcome::Ok(()) => {
                info!("renamed folder {old_name} to {new_name}");
                Ok(())
            }
            ServerOutcome::Refused(reason) => Err(Error::Folder {
                name: old_name.to_string(),
                reason,
            }),
        }
    }

    /// DELETE a folder. Protected default folders (INBOX, Sent,
    /// Drafts, Trash, Spam, Archive) are refused before any command
    /// is issued.
    ///
    /// # Errors
    ///
    /// [`Error::Folder`] on validation failure, protected-folder
    /// refusal, or server refusal (e.g. NONEXISTENT).
    pub async fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        if Folder::from(name).is_protected_default() {
            return Err(Error::Folder {
                name: name.to_string(),
                reason: "cannot delete a protected default folder".into(),
            });
        }
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => session.delete(name).await,
            None => return Err(Error::MailboxState("no active session".into())),
        };
        match self.connection.classify(call, &mut guard)? {
            ServerOutcome::Ok(()) => {
                info!("deleted folder {name}");
                Ok(())
            }
            ServerOutcome::Refused(reason) => Err(Error::Folder {
                name: name.to_string(),
                reason,
            }),
        }
    }

    /// SUBSCRIBE to a folder.
    ///
    /// # Errors
    ///
    /// [`Error::Folder`] on validation failure or server refusal.
    pub async fn subscribe(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => session.subscribe(name).await,
            None => return Err(Error::MailboxState("no active session".into())),
        };
        match self.connection.classify(call, &mut guard)? {
            ServerOutcome::Ok(()) => Ok(()),
            ServerOutcome::Refused(reason) => Err(Error::Folder {
                name: name.to_string(),
                reason,
            }),
        }
    }

    /// UNSUBSCRIBE from a folder.
    ///
    /// # Errors
    ///
    /// [`Error::Folder`] on validation failure or server refusal.
    pub async fn unsubscribe(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => session.unsubscribe(name).await,
            None => return Err(Error::MailboxState("no active session".into())),
        };
        match self.connection.classify(call, &mut guard)? {
            ServerOutcome::Ok(()) => Ok(()),
            ServerOutcome::Refused(reason) => Err(Error::Folder {
                name: name.to_string(),
                reason,
            }),
        }
    }
}

fn folder_info(name: &async_imap::types::Name) -> FolderInfo {
    FolderInfo {
        name: name.name().to_string(),
        delimiter: name.delimiter().map(ToString::to_string),
        attributes: name
            .attributes()
            .iter()
            .map(|attribute| format!("{attribute:?}"))
            .collect(),
    }
}
