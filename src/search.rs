//! IMAP SEARCH criteria builder
//!
//! A small algebra over strings producing the argument of a SEARCH or
//! UID SEARCH command. Leaves are the parameter-less predicates
//! (`ALL`, `SEEN`, ...) and the dated/text predicates; combinators are
//! `and`, `or`, and `not`. Dates render as `DD-Mon-YYYY`; quoted
//! strings are escaped per IMAP literal rules.
//!
//! # Examples
//!
//! ```
//! use mailstore::SearchCriteria;
//! use chrono::NaiveDate;
//!
//! let since = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
//! let criteria = SearchCriteria::and([
//!     SearchCriteria::since(since),
//!     SearchCriteria::from_address("a@b"),
//! ]);
//! assert_eq!(criteria.as_str(), "(SINCE 1-Jan-2024 FROM \"a@b\")");
//! ```

use chrono::{Duration, NaiveDate, Utc};
use std::fmt;

/// An IMAP SEARCH expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchCriteria(String);

impl SearchCriteria {
    /// All messages in the mailbox.
    #[must_use]
    pub fn all() -> Self {
        Self("ALL".into())
    }

    /// Messages with the `\Seen` flag.
    #[must_use]
    pub fn seen() -> Self {
        Self("SEEN".into())
    }

    /// Messages without the `\Seen` flag.
    #[must_use]
    pub fn unseen() -> Self {
        Self("UNSEEN".into())
    }

    /// Messages with the `\Flagged` flag.
    #[must_use]
    pub fn flagged() -> Self {
        Self("FLAGGED".into())
    }

    /// Messages without the `\Flagged` flag.
    #[must_use]
    pub fn unflagged() -> Self {
        Self("UNFLAGGED".into())
    }

    /// Messages with the `\Answered` flag.
    #[must_use]
    pub fn answered() -> Self {
        Self("ANSWERED".into())
    }

    /// Messages without the `\Answered` flag.
    #[must_use]
    pub fn unanswered() -> Self {
        Self("UNANSWERED".into())
    }

    /// Messages with the `\Deleted` flag.
    #[must_use]
    pub fn deleted() -> Self {
        Self("DELETED".into())
    }

    /// Messages without the `\Deleted` flag.
    #[must_use]
    pub fn undeleted() -> Self {
        Self("UNDELETED".into())
    }

    /// Messages with the `\Draft` flag.
    #[must_use]
    pub fn draft() -> Self {
        Self("DRAFT".into())
    }

    /// Messages with an internal date before `date` (exclusive).
    #[must_use]
    pub fn before(date: NaiveDate) -> Self {
        Self(format!("BEFORE {}", imap_date(date)))
    }

    /// Messages with an internal date on `date`.
    #[must_use]
    pub fn on(date: NaiveDate) -> Self {
        Self(format!("ON {}", imap_date(date)))
    }

    /// Messages with an internal date on or after `date`.
    #[must_use]
    pub fn since(date: NaiveDate) -> Self {
        Self(format!("SINCE {}", imap_date(date)))
    }

    /// Messages received within the last `days` days
    /// (`SINCE today - days`).
    #[must_use]
    pub fn recent(days: i64) -> Self {
        let date = Utc::now().date_naive() - Duration::days(days);
        Self::since(date)
    }

    /// Messages whose From header contains `address`.
    #[must_use]
    pub fn from_address(address: &str) -> Self {
        Self(format!("FROM {}", quote(address)))
    }

    /// Messages whose To header contains `address`.
    #[must_use]
    pub fn to_address(address: &str) -> Self {
        Self(format!("TO {}", quote(address)))
    }

    /// Messages whose Subject header contains `subject`.
    #[must_use]
    pub fn subject(subject: &str) -> Self {
        Self(format!("SUBJECT {}", quote(subject)))
    }

    /// Messages whose body contains `text`.
    #[must_use]
    pub fn body(text: &str) -> Self {
        Self(format!("BODY {}", quote(text)))
    }

    /// Messages containing `text` anywhere (headers or body).
    #[must_use]
    pub fn text(text: &str) -> Self {
        Self(format!("TEXT {}", quote(text)))
    }

    /// Messages whose `field` header contains `value`.
    #[must_use]
    pub fn header(field: &str, value: &str) -> Self {
        Self(format!("HEADER {} {}", quote(field), quote(value)))
    }

    /// Conjunction: `(a b c)`.
    #[must_use]
    pub fn and(criteria: impl IntoIterator<Item = Self>) -> Self {
        let joined = criteria
            .into_iter()
            .map(|c| c.0)
            .collect::<Vec<_>>()
            .join(" ");
        Self(format!("({joined})"))
    }

    /// Disjunction: `(OR a b)`.
    #[must_use]
    pub fn or(a: Self, b: Self) -> Self {
        Self(format!("(OR {} {})", a.0, b.0))
    }

    /// Negation: `NOT (a)`.
    #[must_use]
    pub fn not(criteria: Self) -> Self {
        Self(format!("NOT ({})", criteria.0))
    }

    /// Wrap an already-formed SEARCH expression.
    #[must_use]
    pub fn raw(expression: impl Into<String>) -> Self {
        Self(expression.into())
    }

    /// The SEARCH argument string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Format a date as the IMAP `DD-Mon-YYYY` literal (no zero padding,
/// English month abbreviation).
fn imap_date(date: NaiveDate) -> String {
    date.format("%-d-%b-%Y").to_string()
}

/// Quote a string per IMAP quoted-string rules, escaping backslash and
/// double-quote.
fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
