#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! IMAP client library for remote mailstores
//!
//! High-level IMAP4rev1 operations over TLS — mailbox selection,
//! search, fetch, flag stores, move/trash/delete/restore composites,
//! append, and batched bulk drivers — with connection pooling,
//! retry-with-backoff, background health monitoring, and operation
//! metrics. Message addressing is UID-first via [`MessageSet`].

mod config;
mod connection;
mod error;
mod flag;
mod folder;
mod mailbox;
mod message;
mod message_set;
mod metrics;
mod monitor;
mod pool;
mod result;
mod search;
mod session;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState};
pub use error::{Error, ErrorCategory, Result};
pub use flag::{Flag, FlagCommand};
pub use folder::{Folder, FolderInfo, FolderService, validate_name};
pub use mailbox::{FetchOutcome, MailboxService};
pub use message::{Attachment, EmailMessage, MessagePart};
pub use message_set::{Batches, MessageSet, RangeEnd};
pub use metrics::{ConnectionMetrics, HealthReport};
pub use monitor::{MonitorStatistics, OperationMonitor, OperationRecord};
pub use pool::{PoolStats, SessionPool};
pub use result::{BulkResult, OperationResult, StatusItem};
pub use search::SearchCriteria;
