//! Message flags and STORE commands
//!
//! RFC 3501 defines six system flags plus server- and user-defined
//! keywords. [`Flag`] models both without resorting to raw strings,
//! and [`FlagCommand`] names the three STORE data items that
//! manipulate them. [`Flag::render_list`] produces the parenthesized
//! list form commands put on the wire.

use std::fmt;

/// A message flag.
///
/// The six RFC 3501 system flags are first-class variants; everything
/// else (keywords like `$Important`, server extensions) travels
/// through [`Flag::Keyword`]. Note that `\Recent` is special: servers
/// set it, clients cannot STORE it.
///
/// # Examples
///
/// ```
/// use mailstore::Flag;
///
/// assert_eq!(Flag::Deleted.as_imap_str(), "\\Deleted");
/// assert_eq!(
///     Flag::render_list(&[Flag::Seen, Flag::Keyword("$Work".into())]),
///     "(\\Seen $Work)"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// `\Seen`: the message has been read.
    Seen,
    /// `\Answered`: a reply has been sent.
    Answered,
    /// `\Flagged`: marked for attention.
    Flagged,
    /// `\Deleted`: marked for removal by the next EXPUNGE.
    Deleted,
    /// `\Draft`: not yet complete.
    Draft,
    /// `\Recent`: first session to see this message (read-only).
    Recent,
    /// Any non-system flag, carried verbatim.
    Keyword(String),
}

impl Flag {
    /// The wire form: system flags carry their leading backslash,
    /// keywords pass through untouched.
    #[must_use]
    pub fn as_imap_str(&self) -> &str {
        match self {
            Self::Keyword(keyword) => keyword,
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
        }
    }

    /// Render a flag list as the parenthesized form STORE and APPEND
    /// expect, e.g. `(\Seen \Flagged)`.
    #[must_use]
    pub fn render_list(flags: &[Self]) -> String {
        let mut rendered = String::from("(");
        for (position, flag) in flags.iter().enumerate() {
            if position > 0 {
                rendered.push(' ');
            }
            rendered.push_str(flag.as_imap_str());
        }
        rendered.push(')');
        rendered
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

impl From<&async_imap::types::Flag<'_>> for Flag {
    fn from(flag: &async_imap::types::Flag<'_>) -> Self {
        use async_imap::types::Flag as Wire;
        match flag {
            Wire::Seen => Self::Seen,
            Wire::Answered => Self::Answered,
            Wire::Flagged => Self::Flagged,
            Wire::Deleted => Self::Deleted,
            Wire::Draft => Self::Draft,
            Wire::Recent => Self::Recent,
            Wire::MayCreate => Self::Keyword("\\*".to_string()),
            Wire::Custom(keyword) => Self::Keyword(keyword.to_string()),
        }
    }
}

/// The three STORE data items of RFC 3501 section 6.4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagCommand {
    /// `+FLAGS` adds the listed flags.
    Add,
    /// `-FLAGS` removes the listed flags.
    Remove,
    /// `FLAGS` replaces the entire flag set.
    Set,
}

impl FlagCommand {
    /// The IMAP wire representation of this STORE data item.
    #[must_use]
    pub const fn as_imap_str(self) -> &'static str {
        match self {
            Self::Add => "+FLAGS",
            Self::Remove => "-FLAGS",
            Self::Set => "FLAGS",
        }
    }
}

impl fmt::Display for FlagCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}
