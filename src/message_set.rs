//! Sets of message identifiers for IMAP operations
//!
//! A [`MessageSet`] is an immutable value describing which messages an
//! operation targets: individual ids, inclusive ranges (`10:20`), and
//! open-ended ranges (`100:*`), rendered in the canonical comma-joined
//! wire form of RFC 3501. The set carries a flag distinguishing UIDs
//! from sequence numbers so the operation engine can pick the right
//! command variant; UID sets are the reliable choice and sequence
//! number constructors log a warning.
//!
//! Derived views (individual ids, ranges, estimated count) are parsed
//! once on first access and cached; the value itself never changes.

use crate::error::{Error, Result};
use crate::message::EmailMessage;
use std::fmt;
use std::sync::OnceLock;
use tracing::warn;

/// The upper bound of a range component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeEnd {
    /// A concrete id.
    Id(u32),
    /// `*`: the highest id in the mailbox.
    Star,
}

impl fmt::Display for RangeEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Star => f.write_str("*"),
        }
    }
}

/// Parsed view of the canonical id-string, built lazily.
#[derive(Debug, Clone, Default)]
struct ParsedViews {
    /// Individual ids, ascending.
    singles: Vec<u32>,
    /// `(start, end)` ranges in string order.
    ranges: Vec<(u32, RangeEnd)>,
}

/// An immutable set of message identifiers.
///
/// # Examples
///
/// ```
/// use mailstore::MessageSet;
///
/// let set = MessageSet::from_uids(&[1, 3, 2, 5, 4, 10, 11, 12], None).unwrap();
/// assert_eq!(set.msg_ids(), "1:5,10:12");
/// assert!(set.contains(4));
/// assert!(!set.contains(6));
/// assert_eq!(set.estimated_count(), 8);
/// ```
#[derive(Debug, Default)]
pub struct MessageSet {
    ids: String,
    is_uid: bool,
    mailbox: Option<String>,
    views: OnceLock<ParsedViews>,
}

impl Clone for MessageSet {
    fn clone(&self) -> Self {
        Self {
            ids: self.ids.clone(),
            is_uid: self.is_uid,
            mailbox: self.mailbox.clone(),
            views: OnceLock::new(),
        }
    }
}

impl PartialEq for MessageSet {
    fn eq(&self, other: &Self) -> bool {
        self.ids == other.ids && self.is_uid == other.is_uid && self.mailbox == other.mailbox
    }
}

impl Eq for MessageSet {}

impl fmt::Display for MessageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_uid { "UID" } else { "SEQ" };
        write!(f, "MessageSet({kind}: {}", self.ids)?;
        if let Some(mailbox) = &self.mailbox {
            write!(f, ", mailbox: {mailbox}")?;
        }
        f.write_str(")")
    }
}

impl MessageSet {
    /// Build a set of UIDs. Duplicates are removed, ids sorted, and
    /// consecutive runs collapsed into ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `uids` is empty or contains only
    /// zeroes.
    pub fn from_uids(uids: &[u32], mailbox: Option<&str>) -> Result<Self> {
        if uids.is_empty() {
            return Err(Error::Config("UID list cannot be empty".into()));
        }
        let ids = canonicalize(uids)?;
        Ok(Self {
            ids,
            is_uid: true,
            mailbox: mailbox.map(ToOwned::to_owned),
            views: OnceLock::new(),
        })
    }

    /// Build a set of sequence numbers.
    ///
    /// Sequence numbers shift when messages are expunged; UID sets are
    /// the reliable choice and this constructor logs a warning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `seq_nums` is empty or contains
    /// only zeroes.
    pub fn from_sequence_numbers(seq_nums: &[u32], mailbox: Option<&str>) -> Result<Self> {
        if seq_nums.is_empty() {
            return Err(Error::Config("Sequence number list cannot be empty".into()));
        }
        let ids = canonicalize(seq_nums)?;
        warn!("building a sequence-number MessageSet; prefer UIDs for reliable operations");
        Ok(Self {
            ids,
            is_uid: false,
            mailbox: mailbox.map(ToOwned::to_owned),
            views: OnceLock::new(),
        })
    }

    /// Build a set from fetched messages, preferring their UIDs and
    /// falling back to sequence numbers (with a warning) when any
    /// message lacks one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `messages` is empty or no message
    /// carries either identifier.
    pub fn from_messages(messages: &[EmailMessage]) -> Result<Self> {
        if messages.is_empty() {
            return Err(Error::Config("Email message list cannot be empty".into()));
        }
        let mailbox = messages[0].mailbox.as_deref();

        if messages.iter().all(|m| m.uid.is_some()) {
            let uids: Vec<u32> = messages.iter().filter_map(|m| m.uid).collect();
            return Self::from_uids(&uids, mailbox);
        }

        let seq_nums: Vec<u32> = messages.iter().filter_map(|m| m.sequence_number).collect();
        if seq_nums.is_empty() {
            return Err(Error::Config(
                "No UIDs or sequence numbers found in messages".into(),
            ));
        }
        warn!("some messages lack UIDs; falling back to sequence numbers");
        Self::from_sequence_numbers(&seq_nums, mailbox)
    }

    /// Build a single-range set `start:end`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `start` is zero or a concrete `end`
    /// is below `start`.
    pub fn from_range(start: u32, end: RangeEnd, is_uid: bool, mailbox: Option<&str>) -> Result<Self> {
        if start == 0 {
            return Err(Error::Config("Range start must be positive".into()));
        }
        if let RangeEnd::Id(end_id) = end {
            if end_id < start {
                return Err(Error::Config(format!(
                    "Invalid range: start ({start}) > end ({end_id})"
                )));
            }
        }
        Ok(Self {
            ids: format!("{start}:{end}"),
            is_uid,
            mailbox: mailbox.map(ToOwned::to_owned),
            views: OnceLock::new(),
        })
    }

    /// The whole mailbox: `1:*`.
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches the other constructors.
    pub fn all(is_uid: bool, mailbox: Option<&str>) -> Result<Self> {
        Self::from_range(1, RangeEnd::Star, is_uid, mailbox)
    }

    /// Parse a raw comma-separated id-string (`"1:3,5,10:*"`).
    ///
    /// Components are validated independently and kept in the given
    /// order; call [`Self::normalize`] to re-optimize across them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for empty input, non-digit tokens,
    /// zero ids, inverted ranges, or a `*` anywhere but a range end.
    pub fn parse(raw: &str, is_uid: bool, mailbox: Option<&str>) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(Error::Config("Message id string cannot be empty".into()));
        }
        let mut components = Vec::new();
        for component in raw.split(',') {
            let component = component.trim();
            validate_component(component)?;
            components.push(component.to_string());
        }
        Ok(Self {
            ids: components.join(","),
            is_uid,
            mailbox: mailbox.map(ToOwned::to_owned),
            views: OnceLock::new(),
        })
    }

    /// Merge several sets into one (string concatenation, like
    /// repeated [`Self::union`]).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `sets` is empty or mixes UID and
    /// sequence-number sets.
    pub fn merge(sets: &[Self]) -> Result<Self> {
        let Some(first) = sets.first() else {
            return Err(Error::Config("Cannot merge an empty list of sets".into()));
        };
        let mut merged = first.clone();
        for set in &sets[1..] {
            merged = merged.union(set)?;
        }
        Ok(merged)
    }

    /// The canonical comma-joined id-string sent on the wire.
    #[must_use]
    pub fn msg_ids(&self) -> &str {
        &self.ids
    }

    /// True when the set holds UIDs, false for sequence numbers.
    #[must_use]
    pub const fn is_uid(&self) -> bool {
        self.is_uid
    }

    /// The mailbox this set was built against, if tagged.
    #[must_use]
    pub fn mailbox(&self) -> Option<&str> {
        self.mailbox.as_deref()
    }

    fn views(&self) -> &ParsedViews {
        self.views.get_or_init(|| {
            let mut singles = Vec::new();
            let mut ranges = Vec::new();
            for component in self.ids.split(',') {
                if let Some((start, end)) = component.split_once(':') {
                    let start: u32 = start.parse().unwrap_or(0);
                    let end = if end == "*" {
                        RangeEnd::Star
                    } else {
                        RangeEnd::Id(end.parse().unwrap_or(0))
                    };
                    ranges.push((start, end));
                } else if let Ok(id) = component.parse() {
                    singles.push(id);
                }
            }
            singles.sort_unstable();
            singles.dedup();
            ParsedViews { singles, ranges }
        })
    }

    /// Individual ids (excluding ranges), ascending.
    #[must_use]
    pub fn individual_ids(&self) -> &[u32] {
        &self.views().singles
    }

    /// `(start, end)` range components in string order.
    #[must_use]
    pub fn ranges(&self) -> &[(u32, RangeEnd)] {
        &self.views().ranges
    }

    /// Estimated number of messages. Bounded ranges contribute their
    /// span; open-ended ranges contribute 1 as a conservative lower
    /// bound.
    #[must_use]
    pub fn estimated_count(&self) -> usize {
        let views = self.views();
        let mut count = views.singles.len();
        for (start, end) in &views.ranges {
            match end {
                RangeEnd::Id(end_id) => count += (end_id - start + 1) as usize,
                RangeEnd::Star => count += 1,
            }
        }
        count
    }

    /// Membership test. A `start:*` range matches any id >= `start`.
    #[must_use]
    pub fn contains(&self, id: u32) -> bool {
        let views = self.views();
        if views.singles.binary_search(&id).is_ok() {
            return true;
        }
        views.ranges.iter().any(|(start, end)| match end {
            RangeEnd::Id(end_id) => (*start..=*end_id).contains(&id),
            RangeEnd::Star => id >= *start,
        })
    }

    /// True when any range ends with `*`.
    #[must_use]
    pub fn has_open_range(&self) -> bool {
        self.ranges().iter().any(|(_, end)| *end == RangeEnd::Star)
    }

    /// True when the set is exactly one individual id.
    #[must_use]
    pub fn is_single_message(&self) -> bool {
        let views = self.views();
        views.singles.len() == 1 && views.ranges.is_empty()
    }

    /// True when the set consists of ranges only.
    #[must_use]
    pub fn is_range_only(&self) -> bool {
        let views = self.views();
        views.singles.is_empty() && !views.ranges.is_empty()
    }

    /// Smallest id in the set, when deterministic.
    #[must_use]
    pub fn first_id(&self) -> Option<u32> {
        let views = self.views();
        let single_min = views.singles.first().copied();
        let range_min = views.ranges.iter().map(|(start, _)| *start).min();
        match (single_min, range_min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Largest id in the set, or `None` when an open range makes it
    /// unknowable.
    #[must_use]
    pub fn last_id(&self) -> Option<u32> {
        if self.has_open_range() {
            return None;
        }
        let views = self.views();
        let single_max = views.singles.last().copied();
        let range_max = views
            .ranges
            .iter()
            .filter_map(|(_, end)| match end {
                RangeEnd::Id(id) => Some(*id),
                RangeEnd::Star => None,
            })
            .max();
        match (single_max, range_max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Re-optimize across components: individual ids and bounded
    /// ranges are merged into maximal intervals; open ranges collapse
    /// to a single `start:*` absorbing everything above its start.
    ///
    /// Idempotent, and preserves membership exactly.
    #[must_use]
    pub fn normalize(&self) -> Self {
        let views = self.views();

        // Closed intervals from singles and bounded ranges.
        let mut intervals: Vec<(u32, u32)> = views
            .singles
            .iter()
            .map(|&id| (id, id))
            .chain(views.ranges.iter().filter_map(|(start, end)| match end {
                RangeEnd::Id(end_id) => Some((*start, *end_id)),
                RangeEnd::Star => None,
            }))
            .collect();
        intervals.sort_unstable();

        let mut open_start = views
            .ranges
            .iter()
            .filter(|(_, end)| *end == RangeEnd::Star)
            .map(|(start, _)| *start)
            .min();

        let mut merged: Vec<(u32, u32)> = Vec::new();
        for (start, end) in intervals {
            match merged.last_mut() {
                Some((_, prev_end)) if start <= prev_end.saturating_add(1) => {
                    *prev_end = (*prev_end).max(end);
                }
                _ => merged.push((start, end)),
            }
        }

        // Fold intervals touching the open range into it.
        if let Some(open) = open_start {
            let mut lowered = open;
            merged.retain(|&(start, end)| {
                if end.saturating_add(1) >= lowered {
                    lowered = lowered.min(start);
                    false
                } else {
                    true
                }
            });
            open_start = Some(lowered);
        }

        let mut components: Vec<String> = merged
            .iter()
            .map(|&(start, end)| {
                if start == end {
                    start.to_string()
                } else {
                    format!("{start}:{end}")
                }
            })
            .collect();
        if let Some(open) = open_start {
            components.push(format!("{open}:*"));
        }

        Self {
            ids: components.join(","),
            is_uid: self.is_uid,
            mailbox: self.mailbox.clone(),
            views: OnceLock::new(),
        }
    }

    /// Concatenate two sets. The left set's mailbox tag wins when the
    /// tags differ (with a warning). The result is not re-optimized;
    /// call [`Self::normalize`] for the canonical merged form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when mixing UID and sequence-number
    /// sets.
    pub fn union(&self, other: &Self) -> Result<Self> {
        if self.is_uid != other.is_uid {
            return Err(Error::Config(
                "Cannot combine UID and sequence-number message sets".into(),
            ));
        }
        if let (Some(left), Some(right)) = (&self.mailbox, &other.mailbox) {
            if left != right {
                warn!("combining message sets from different mailboxes: {left} and {right}");
            }
        }
        Ok(Self {
            ids: format!("{},{}", self.ids, other.ids),
            is_uid: self.is_uid,
            mailbox: self.mailbox.clone().or_else(|| other.mailbox.clone()),
            views: OnceLock::new(),
        })
    }

    /// Ids present in both sets.
    ///
    /// Defined over individual ids only; sets containing ranges are
    /// refused rather than expanded.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] on UID/sequence mixing or when either side
    /// contains ranges; [`Error::EmptyResult`] when nothing is shared.
    pub fn intersection(&self, other: &Self) -> Result<Self> {
        self.check_individual_op(other, "intersection")?;
        let common: Vec<u32> = self
            .individual_ids()
            .iter()
            .copied()
            .filter(|id| other.individual_ids().binary_search(id).is_ok())
            .collect();
        if common.is_empty() {
            return Err(Error::EmptyResult("no common messages found".into()));
        }
        self.rebuild_with(&common, other)
    }

    /// Ids in `self` but not in `other`.
    ///
    /// Defined over individual ids only; sets containing ranges are
    /// refused rather than expanded.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] on UID/sequence mixing or when either side
    /// contains ranges; [`Error::EmptyResult`] when nothing remains.
    pub fn subtract(&self, other: &Self) -> Result<Self> {
        self.check_individual_op(other, "subtract")?;
        let remaining: Vec<u32> = self
            .individual_ids()
            .iter()
            .copied()
            .filter(|id| other.individual_ids().binary_search(id).is_err())
            .collect();
        if remaining.is_empty() {
            return Err(Error::EmptyResult(
                "no messages remaining after subtraction".into(),
            ));
        }
        self.rebuild_with(&remaining, other)
    }

    fn check_individual_op(&self, other: &Self, op: &str) -> Result<()> {
        if self.is_uid != other.is_uid {
            return Err(Error::Config(format!(
                "Cannot {op} UID and sequence-number message sets"
            )));
        }
        if !self.ranges().is_empty() || !other.ranges().is_empty() {
            return Err(Error::Config(format!(
                "{op} is defined over individual ids only; normalize away ranges first"
            )));
        }
        Ok(())
    }

    fn rebuild_with(&self, ids: &[u32], other: &Self) -> Result<Self> {
        let mailbox = self.mailbox.as_deref().or(other.mailbox.as_deref());
        if self.is_uid {
            Self::from_uids(ids, mailbox)
        } else {
            Self::from_sequence_numbers(ids, mailbox)
        }
    }

    /// Iterate the individual ids in sub-sets of at most `batch_size`.
    ///
    /// A set containing only ranges cannot be partitioned and yields a
    /// single batch equal to the whole set (with a warning). Ranges in
    /// a mixed set are not batched.
    #[must_use]
    pub fn batches(&self, batch_size: usize) -> Batches<'_> {
        if !self.ranges().is_empty() {
            warn!("batching a message set containing ranges; ranges are not split");
        }
        Batches {
            set: self,
            batch_size: batch_size.max(1),
            position: 0,
            whole_set_emitted: false,
        }
    }

    /// Split an individual-id set into sets of at most `max_size` ids.
    /// Sets containing ranges are returned whole (with a warning).
    #[must_use]
    pub fn split_by_size(&self, max_size: usize) -> Vec<Self> {
        if self.estimated_count() <= max_size {
            return vec![self.clone()];
        }
        if !self.ranges().is_empty() {
            warn!("cannot split a message set containing ranges");
            return vec![self.clone()];
        }
        self.batches(max_size).collect()
    }

    /// Warn when this set is about to be used against a different
    /// mailbox than it was built for.
    pub fn validate_for_mailbox(&self, mailbox: &str) {
        if let Some(tagged) = &self.mailbox {
            if tagged != mailbox {
                warn!("message set tagged for mailbox '{tagged}' used with '{mailbox}'");
            }
        }
        if !self.is_uid {
            warn!("using sequence numbers against mailbox '{mailbox}'; prefer UIDs");
        }
    }
}

/// Iterator over the individual-id batches of a [`MessageSet`].
pub struct Batches<'a> {
    set: &'a MessageSet,
    batch_size: usize,
    position: usize,
    whole_set_emitted: bool,
}

impl Iterator for Batches<'_> {
    type Item = MessageSet;

    fn next(&mut self) -> Option<Self::Item> {
        let singles = self.set.individual_ids();
        if singles.is_empty() {
            // Ranges-only: one batch covering the whole set.
            if self.whole_set_emitted || self.set.ranges().is_empty() {
                return None;
            }
            self.whole_set_emitted = true;
            return Some(self.set.clone());
        }
        if self.position >= singles.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(singles.len());
        let chunk = &singles[self.position..end];
        self.position = end;
        let mailbox = self.set.mailbox();
        let batch = if self.set.is_uid() {
            MessageSet::from_uids(chunk, mailbox)
        } else {
            MessageSet::from_sequence_numbers(chunk, mailbox)
        };
        batch.ok()
    }
}

/// Sort, dedupe, and collapse maximal consecutive runs into ranges.
fn canonicalize(raw: &[u32]) -> Result<String> {
    let mut ids: Vec<u32> = raw.iter().copied().filter(|&id| id > 0).collect();
    if ids.is_empty() {
        return Err(Error::Config("No valid message ids provided".into()));
    }
    ids.sort_unstable();
    ids.dedup();

    let mut components = Vec::new();
    let mut run_start = ids[0];
    let mut run_end = ids[0];
    for &id in &ids[1..] {
        if id == run_end + 1 {
            run_end = id;
        } else {
            components.push(render_run(run_start, run_end));
            run_start = id;
            run_end = id;
        }
    }
    components.push(render_run(run_start, run_end));
    Ok(components.join(","))
}

fn render_run(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}:{end}")
    }
}

/// Validate a single `N` or `N:M` component of a raw id-string.
fn validate_component(component: &str) -> Result<()> {
    if component.is_empty() {
        return Err(Error::Config("Empty component in message id string".into()));
    }
    if let Some((start, end)) = component.split_once(':') {
        let start_id: u32 = start
            .parse()
            .map_err(|_| Error::Config(format!("Invalid range start: {start}")))?;
        if start_id == 0 {
            return Err(Error::Config("Range start must be positive".into()));
        }
        if end == "*" {
            return Ok(());
        }
        let end_id: u32 = end
            .parse()
            .map_err(|_| Error::Config(format!("Invalid range end: {end}")))?;
        if end_id < start_id {
            return Err(Error::Config(format!(
                "Invalid range: start ({start_id}) > end ({end_id})"
            )));
        }
        Ok(())
    } else {
        let id: u32 = component
            .parse()
            .map_err(|_| Error::Config(format!("Invalid message id: {component}")))?;
        if id == 0 {
            return Err(Error::Config("Message id must be positive".into()));
        }
        Ok(())
    }
}
