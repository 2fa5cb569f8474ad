//! Structured results of mailbox operations
//!
//! Server-level non-OK responses are reported through these records
//! rather than raised: a failed [`OperationResult`] leaves the
//! connection usable, while precondition violations and unrecoverable
//! connection failures surface as [`crate::Error`] values.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Outcome of a single mailbox operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub operation: String,
    pub message_count: usize,
    /// Message ids the operation touched, as id strings.
    pub affected_messages: Vec<String>,
    pub execution_time: Duration,
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
    /// Operation-specific extras (e.g. fetched messages are carried
    /// out-of-band; their count lands here).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OperationResult {
    /// Start a result for `operation`; finish it with the `succeeded`
    /// / `failed` builders.
    #[must_use]
    pub fn named(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            ..Self::default()
        }
    }

    /// Mark successful, back-filling `message_count` from the affected
    /// list when unset.
    #[must_use]
    pub fn succeeded(mut self, execution_time: Duration) -> Self {
        self.success = true;
        self.execution_time = execution_time;
        if self.message_count == 0 {
            self.message_count = self.affected_messages.len();
        }
        self
    }

    /// Mark failed with the given reason.
    #[must_use]
    pub fn failed(mut self, execution_time: Duration, error: impl Into<String>) -> Self {
        self.success = false;
        self.execution_time = execution_time;
        self.error_message = Some(error.into());
        self
    }

    #[must_use]
    pub fn with_affected(mut self, affected: Vec<String>) -> Self {
        self.message_count = affected.len();
        self.affected_messages = affected;
        self
    }

    /// Override the message count (e.g. the estimated size of a
    /// message set whose affected list is range components).
    #[must_use]
    pub fn with_message_count(mut self, count: usize) -> Self {
        self.message_count = count;
        self
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Aggregate outcome of a batched driver.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkResult {
    pub operation: String,
    pub total_messages: usize,
    pub successful_messages: usize,
    pub failed_messages: usize,
    pub execution_time: Duration,
    pub batch_size: usize,
    pub batches_processed: usize,
    /// Per-item error messages.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl BulkResult {
    /// Fraction of items that succeeded, as a percentage.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_messages == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.successful_messages as f64 / self.total_messages as f64;
        rate * 100.0
    }

    /// True only when every item succeeded.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.total_messages > 0 && self.successful_messages == self.total_messages
    }
}

/// STATUS data items of RFC 3501 section 6.3.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusItem {
    Messages,
    Recent,
    UidNext,
    UidValidity,
    Unseen,
}

impl StatusItem {
    /// The STATUS item name on the wire.
    #[must_use]
    pub const fn as_imap_str(self) -> &'static str {
        match self {
            Self::Messages => "MESSAGES",
            Self::Recent => "RECENT",
            Self::UidNext => "UIDNEXT",
            Self::UidValidity => "UIDVALIDITY",
            Self::Unseen => "UNSEEN",
        }
    }

    /// Render a STATUS item list: `(MESSAGES UNSEEN)`.
    #[must_use]
    pub fn render_list(items: &[Self]) -> String {
        let inner = items
            .iter()
            .map(|item| item.as_imap_str())
            .collect::<Vec<_>>()
            .join(" ");
        format!("({inner})")
    }
}

impl fmt::Display for StatusItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}
