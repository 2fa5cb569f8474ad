//! Test data model for the fake IMAP server
//!
//! Provides a builder-style API for constructing mailbox state:
//!
//! ```ignore
//! let mailbox = MailboxBuilder::new()
//!     .folder("INBOX")
//!         .email(1, false, raw_rfc2822_bytes)
//!         .email(2, true, raw_rfc2822_bytes)
//!     .folder("Trash")
//!     .build();
//! ```
//!
//! The `Mailbox` is shared with the fake IMAP server via a `Mutex` so
//! the server knows which folders exist, what emails they contain,
//! and which flags each email carries. It also keeps a log of every
//! command verb the server handled, which lets tests assert on wire
//! behavior (e.g. "selecting the same folder twice issues one
//! SELECT").

use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};

/// A complete mailbox: named folders plus the handled-command log.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    pub folders: Vec<Folder>,
    /// Command verbs in the order the server handled them.
    pub command_log: Vec<String>,
}

impl Mailbox {
    /// Look up a folder by name (case-sensitive, matching real IMAP).
    pub fn get_folder(&self, name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.name == name)
    }

    pub fn get_folder_mut(&mut self, name: &str) -> Option<&mut Folder> {
        self.folders.iter_mut().find(|f| f.name == name)
    }

    /// Record one handled command verb.
    pub fn record(&mut self, verb: &str) {
        self.command_log.push(verb.to_string());
    }

    /// How many times `verb` was handled.
    pub fn command_count(&self, verb: &str) -> usize {
        self.command_log.iter().filter(|v| *v == verb).count()
    }
}

/// A single IMAP folder (e.g. "INBOX", "Trash").
#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    pub emails: Vec<TestEmail>,
}

impl Folder {
    /// The next UID an APPEND or COPY into this folder receives.
    pub fn next_uid(&self) -> u32 {
        self.emails.iter().map(|e| e.uid).max().map_or(1, |m| m + 1)
    }
}

/// A test email stored in a folder.
///
/// - `uid`: IMAP UID -- unique per folder, never reused.
/// - `flags`: IMAP flag strings (`\Seen`, `\Deleted`, ...).
/// - `raw`: the complete RFC 2822 message (headers + body) as bytes,
///   returned in FETCH responses.
#[derive(Debug, Clone)]
pub struct TestEmail {
    pub uid: u32,
    pub flags: Vec<String>,
    pub raw: Vec<u8>,
}

impl TestEmail {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn seen(&self) -> bool {
        self.has_flag("\\Seen")
    }

    pub fn deleted(&self) -> bool {
        self.has_flag("\\Deleted")
    }

    pub fn add_flag(&mut self, flag: &str) {
        if !self.has_flag(flag) {
            self.flags.push(flag.to_string());
        }
    }

    pub fn remove_flag(&mut self, flag: &str) {
        self.flags.retain(|f| f != flag);
    }
}

/// Resolve a `SequenceSet` against a folder into matching UIDs.
///
/// With `uid` set, numbers in the set are UIDs; otherwise they are
/// 1-based sequence positions. `*` resolves to the highest UID or
/// position.
pub fn resolve_uids(folder: &Folder, set: &SequenceSet, uid: bool) -> Vec<u32> {
    let max = if uid {
        folder.emails.iter().map(|e| e.uid).max().unwrap_or(0)
    } else {
        u32::try_from(folder.emails.len()).unwrap_or(u32::MAX)
    };
    if max == 0 {
        return Vec::new();
    }

    let value_of = |v: &SeqOrUid| match v {
        SeqOrUid::Value(n) => n.get(),
        SeqOrUid::Asterisk => max,
    };

    let mut matched = Vec::new();
    for seq in set.0.as_ref() {
        let (lo, hi) = match seq {
            Sequence::Single(v) => {
                let n = value_of(v);
                (n, n)
            }
            Sequence::Range(a, b) => {
                let (x, y) = (value_of(a), value_of(b));
                if x <= y { (x, y) } else { (y, x) }
            }
        };
        for n in lo..=hi.min(max) {
            if uid {
                if folder.emails.iter().any(|e| e.uid == n) {
                    matched.push(n);
                }
            } else if let Some(email) = folder.emails.get(n as usize - 1) {
                matched.push(email.uid);
            }
        }
    }
    matched.sort_unstable();
    matched.dedup();
    matched
}

/// Builder for constructing a `Mailbox` step by step.
///
/// Call `.folder(name)` to start a new folder, then chain
/// `.email(uid, seen, raw)` or `.flagged_email(uid, flags, raw)`
/// calls to add messages to it. Finish with `.build()`.
pub struct MailboxBuilder {
    folders: Vec<Folder>,
}

impl MailboxBuilder {
    pub fn new() -> Self {
        Self {
            folders: Vec::new(),
        }
    }

    /// Add a new folder. Subsequent `.email()` calls add to this folder.
    pub fn folder(mut self, name: &str) -> Self {
        self.folders.push(Folder {
            name: name.to_string(),
            emails: Vec::new(),
        });
        self
    }

    /// Add an email to the most recently added folder.
    ///
    /// # Panics
    ///
    /// Panics if called before any `.folder()` call.
    pub fn email(self, uid: u32, seen: bool, raw: &[u8]) -> Self {
        let flags: &[&str] = if seen { &["\\Seen"] } else { &[] };
        self.flagged_email(uid, flags, raw)
    }

    /// Add an email with an explicit flag list.
    ///
    /// # Panics
    ///
    /// Panics if called before any `.folder()` call.
    pub fn flagged_email(mut self, uid: u32, flags: &[&str], raw: &[u8]) -> Self {
        self.folders
            .last_mut()
            .expect("call .folder() before .email()")
            .emails
            .push(TestEmail {
                uid,
                flags: flags.iter().map(ToString::to_string).collect(),
                raw: raw.to_vec(),
            });
        self
    }

    /// Consume the builder and return the finished `Mailbox`.
    pub fn build(self) -> Mailbox {
        Mailbox {
            folders: self.folders,
            command_log: Vec::new(),
        }
    }
}
