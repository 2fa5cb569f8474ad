//! Error types for mailstore
//!
//! Every error carries a human-readable message; connection and
//! operation errors additionally carry the server's response text when
//! one was received. [`Error::category`] maps each variant to the
//! coarse status class callers branch on (client-side precondition,
//! authentication, server-side, unexpected).

use thiserror::Error;

/// Coarse classification of an error, independent of its variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Client-side precondition failure; never retried.
    Client,
    /// Authentication rejected; never retried.
    Auth,
    /// Server-side or transport failure.
    Server,
    /// Anything that should not happen.
    Unexpected,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Mailbox selection failed: {0}")]
    MailboxSelection(String),

    #[error("Mailbox state error: {0}")]
    MailboxState(String),

    #[error("Folder '{name}' error: {reason}")]
    Folder { name: String, reason: String },

    #[error("Operation '{operation}' failed: {reason}")]
    Operation { operation: String, reason: String },

    #[error("Operation produced an empty result: {0}")]
    EmptyResult(String),

    #[error("Email parsing error: {0}")]
    Parse(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The status class of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::EmptyResult(_) | Self::MailboxState(_) => {
                ErrorCategory::Client
            }
            Self::Authentication(_) => ErrorCategory::Auth,
            Self::Connection(_)
            | Self::MailboxSelection(_)
            | Self::Folder { .. }
            | Self::Operation { .. }
            | Self::Tls(_)
            | Self::Io(_) => ErrorCategory::Server,
            Self::Parse(_) => ErrorCategory::Unexpected,
        }
    }

    /// Whether the connect retry loop may try again after this error.
    ///
    /// Authentication rejections and client-side preconditions are
    /// terminal; transport failures are retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Server)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
