//! The mailbox operation engine
//!
//! [`MailboxService`] binds a [`Connection`] to a current mailbox
//! selection and drives the IMAP command sequences: select, search,
//! fetch, flag stores, copy, the move/trash/delete/restore
//! composites, append, and the batched bulk drivers.
//!
//! Every operation returns an [`OperationResult`] (bulk drivers a
//! [`BulkResult`]). Server `NO`/`BAD` responses produce failed
//! results and leave the connection usable; validation problems are
//! raised as typed errors before any command is issued; transport
//! failures mark the connection broken and propagate. Mutating
//! composites finish with a CHECK round-trip before reporting
//! success.

use crate::connection::{Connection, ServerOutcome};
use crate::error::{Error, Result};
use crate::flag::{Flag, FlagCommand};
use crate::folder;
use crate::message::{EmailMessage, MessagePart};
use crate::message_set::MessageSet;
use crate::monitor::{MonitorStatistics, OperationMonitor};
use crate::result::{BulkResult, OperationResult, StatusItem};
use crate::search::SearchCriteria;
use chrono::DateTime;
use std::collections::HashMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default batch size for the bulk drivers.
const DEFAULT_BULK_BATCH_SIZE: usize = 100;

fn no_session() -> Error {
    Error::MailboxState("no active session".into())
}

/// Unwrap a raw round-trip, recording terminal failures before
/// propagating them.
macro_rules! try_hard {
    ($self:ident, $op:expr, $start:expr, $call:expr) => {
        match $call {
            Ok(outcome) => outcome,
            Err(e) => return Err($self.hard($op, $start, e)),
        }
    };
}

/// A fetch operation's structured outcome: the result record plus the
/// parsed messages (carried out-of-band of the untyped metadata map).
#[derive(Debug)]
pub struct FetchOutcome {
    pub result: OperationResult,
    pub messages: Vec<EmailMessage>,
}

/// Stateful mailbox operations bound to one connection.
///
/// # Examples
///
/// ```no_run
/// use mailstore::{Connection, ConnectionConfig, MailboxService, SearchCriteria};
///
/// # async fn demo() -> mailstore::Result<()> {
/// let connection = Connection::new(ConnectionConfig::new("imap.example.com", "u", "p"));
/// connection.connect().await?;
/// let mut mailbox = MailboxService::new(&connection);
/// mailbox.select("INBOX").await?;
/// let found = mailbox.uid_search(&SearchCriteria::unseen()).await?;
/// println!("{} unseen messages", found.message_count);
/// # Ok(())
/// # }
/// ```
pub struct MailboxService<'a> {
    connection: &'a Connection,
    current_selection: Option<String>,
    monitor: OperationMonitor,
    bulk_batch_size: usize,
}

impl<'a> MailboxService<'a> {
    #[must_use]
    pub fn new(connection: &'a Connection) -> Self {
        Self {
            connection,
            current_selection: None,
            monitor: OperationMonitor::new(),
            bulk_batch_size: DEFAULT_BULK_BATCH_SIZE,
        }
    }

    #[must_use]
    pub fn with_bulk_batch_size(mut self, batch_size: usize) -> Self {
        self.bulk_batch_size = batch_size.max(1);
        self
    }

    /// The currently selected mailbox, if any.
    #[must_use]
    pub fn current_selection(&self) -> Option<&str> {
        self.current_selection.as_deref()
    }

    /// Monitoring statistics for this service.
    #[must_use]
    pub fn statistics(&self) -> MonitorStatistics {
        self.monitor.statistics()
    }

    // ── result plumbing ────────────────────────────────────────────

    fn finish_success(&mut self, operation: &str, start: Instant) -> std::time::Duration {
        let elapsed = start.elapsed();
        self.monitor.record(operation, elapsed, true);
        self.connection.note_success(elapsed);
        elapsed
    }

    /// Fold a server `NO`/`BAD` into a failed result.
    fn refused(&mut self, operation: &str, start: Instant, reason: String) -> OperationResult {
        let elapsed = start.elapsed();
        self.monitor.record(operation, elapsed, false);
        self.connection.note_failure(&Error::Operation {
            operation: operation.to_string(),
            reason: reason.clone(),
        });
        warn!("{operation} refused by server: {reason}");
        OperationResult::named(operation).failed(elapsed, reason)
    }

    /// Record a terminal failure and hand the error back.
    fn hard(&mut self, operation: &str, start: Instant, error: Error) -> Error {
        let elapsed = start.elapsed();
        self.monitor.record(operation, elapsed, false);
        self.connection.note_failure(&error);
        error
    }

    fn ensure_selected(&self) -> Result<&str> {
        self.current_selection
            .as_deref()
            .ok_or_else(|| Error::MailboxState("no mailbox selected; call select() first".into()))
    }

    // ── session round-trips (no monitor recording) ─────────────────

    async fn raw_select(
        &self,
        mailbox: &str,
    ) -> Result<ServerOutcome<async_imap::types::Mailbox>> {
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => session.select(mailbox).await,
            None => return Err(no_session()),
        };
        self.connection.classify(call, &mut guard)
    }

    async fn raw_close(&self) -> Result<ServerOutcome<()>> {
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => session.close().await,
            None => return Err(no_session()),
        };
        self.connection.classify(call, &mut guard)
    }

    async fn raw_status(&self, mailbox: &str, items: &str) -> Result<ServerOutcome<Vec<u8>>> {
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => session.status_raw(mailbox, items).await,
            None => return Err(no_session()),
        };
        self.connection.classify(call, &mut guard)
    }

    async fn raw_store(
        &self,
        set: &MessageSet,
        command: FlagCommand,
        flags: &[Flag],
    ) -> Result<ServerOutcome<()>> {
        self.connection.require_authenticated()?;
        let query = format!("{} {}", command.as_imap_str(), Flag::render_list(flags));
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => {
                if set.is_uid() {
                    session.uid_store(set.msg_ids(), &query).await.map(|_| ())
                } else {
                    session.store(set.msg_ids(), &query).await.map(|_| ())
                }
            }
            None => return Err(no_session()),
        };
        self.connection.classify(call, &mut guard)
    }

    async fn raw_copy(&self, set: &MessageSet, destination: &str) -> Result<ServerOutcome<()>> {
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => {
                if set.is_uid() {
                    session.uid_copy(set.msg_ids(), destination).await
                } else {
                    session.copy(set.msg_ids(), destination).await
                }
            }
            None => return Err(no_session()),
        };
        self.connection.classify(call, &mut guard)
    }

    async fn raw_expunge(&self) -> Result<ServerOutcome<Vec<u32>>> {
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => session.expunge().await,
            None => return Err(no_session()),
        };
        self.connection.classify(call, &mut guard)
    }

    async fn raw_check(&self) -> Result<ServerOutcome<()>> {
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => session.check().await,
            None => return Err(no_session()),
        };
        self.connection.classify(call, &mut guard)
    }

    async fn raw_create(&self, mailbox: &str) -> Result<ServerOutcome<()>> {
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => session.create(mailbox).await,
            None => return Err(no_session()),
        };
        self.connection.classify(call, &mut guard)
    }

    async fn raw_search(&self, query: &str, uid: bool) -> Result<ServerOutcome<Vec<u32>>> {
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => {
                let found = if uid {
                    session.uid_search(query).await
                } else {
                    session.search(query).await
                };
                found.map(|ids| {
                    let mut sorted: Vec<u32> = ids.into_iter().collect();
                    sorted.sort_unstable();
                    sorted
                })
            }
            None => return Err(no_session()),
        };
        self.connection.classify(call, &mut guard)
    }

    async fn raw_fetch(
        &self,
        set: &MessageSet,
        query: &str,
    ) -> Result<ServerOutcome<Vec<async_imap::types::Fetch>>> {
        self.connection.require_authenticated()?;
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => {
                if set.is_uid() {
                    session.uid_fetch(set.msg_ids(), query).await
                } else {
                    session.fetch(set.msg_ids(), query).await
                }
            }
            None => return Err(no_session()),
        };
        self.connection.classify(call, &mut guard)
    }

    async fn raw_append(
        &self,
        mailbox: &str,
        flags: &[Flag],
        internal_date: Option<&str>,
        content: &[u8],
    ) -> Result<ServerOutcome<()>> {
        self.connection.require_authenticated()?;
        let flag_list = if flags.is_empty() {
            None
        } else {
            Some(Flag::render_list(flags))
        };
        let mut guard = self.connection.session_guard().await;
        let call = match guard.as_mut() {
            Some(session) => {
                session
                    .append(mailbox, flag_list.as_deref(), internal_date, content)
                    .await
            }
            None => return Err(no_session()),
        };
        self.connection.classify(call, &mut guard)
    }

    // ── selection state ────────────────────────────────────────────

    /// SELECT a mailbox. Selecting the current mailbox again is a
    /// no-op that issues no command.
    ///
    /// # Errors
    ///
    /// [`Error::Folder`] for an invalid name,
    /// [`Error::MailboxSelection`] when the server refuses the SELECT,
    /// connection errors on transport failure.
    pub async fn select(&mut self, mailbox: &str) -> Result<OperationResult> {
        let start = Instant::now();

        if self.current_selection.as_deref() == Some(mailbox) {
            let elapsed = self.finish_success("select", start);
            return Ok(OperationResult::named("select")
                .with_metadata("mailbox", mailbox)
                .with_metadata("already_selected", true)
                .succeeded(elapsed));
        }

        folder::validate_name(mailbox)?;
        let outcome = self.raw_select(mailbox).await;
        match outcome {
            Ok(ServerOutcome::Ok(status)) => {
                self.current_selection = Some(mailbox.to_string());
                let elapsed = self.finish_success("select", start);
                info!("Mailbox selected: {mailbox}");
                let exists = usize::try_from(status.exists).unwrap_or_default();
                let mut result = OperationResult::named("select")
                    .with_metadata("mailbox", mailbox)
                    .with_metadata("exists", status.exists);
                result.message_count = exists;
                Ok(result.succeeded(elapsed))
            }
            Ok(ServerOutcome::Refused(reason)) => Err(self.hard(
                "select",
                start,
                Error::MailboxSelection(format!("failed to select {mailbox}: {reason}")),
            )),
            Err(e) => Err(self.hard("select", start, e)),
        }
    }

    /// CLOSE the current mailbox. Idempotent when nothing is
    /// selected.
    ///
    /// # Errors
    ///
    /// Connection errors on transport failure.
    pub async fn close(&mut self) -> Result<OperationResult> {
        let start = Instant::now();

        if self.current_selection.is_none() {
            let elapsed = self.finish_success("close", start);
            return Ok(OperationResult::named("close")
                .with_metadata("no_mailbox_selected", true)
                .succeeded(elapsed));
        }

        let outcome = self.raw_close().await;
        match outcome {
            Ok(ServerOutcome::Ok(())) => {
                let closed = self.current_selection.take();
                let elapsed = self.finish_success("close", start);
                debug!("Mailbox closed: {closed:?}");
                Ok(OperationResult::named("close")
                    .with_metadata("closed_mailbox", closed.unwrap_or_default())
                    .succeeded(elapsed))
            }
            Ok(ServerOutcome::Refused(reason)) => Ok(self.refused("close", start, reason)),
            Err(e) => Err(self.hard("close", start, e)),
        }
    }

    /// CHECK: request a server checkpoint for the selected mailbox.
    ///
    /// # Errors
    ///
    /// Connection errors on transport failure.
    pub async fn check(&mut self) -> Result<OperationResult> {
        let start = Instant::now();
        match self.raw_check().await {
            Ok(ServerOutcome::Ok(())) => {
                let elapsed = self.finish_success("check", start);
                Ok(OperationResult::named("check").succeeded(elapsed))
            }
            Ok(ServerOutcome::Refused(reason)) => Ok(self.refused("check", start, reason)),
            Err(e) => Err(self.hard("check", start, e)),
        }
    }

    /// STATUS: fetch counters for a mailbox without selecting it.
    /// The parsed `(KEY VALUE ...)` pairs land in the result
    /// metadata.
    ///
    /// # Errors
    ///
    /// [`Error::Folder`] for an invalid name, connection errors on
    /// transport failure.
    pub async fn status(
        &mut self,
        mailbox: &str,
        items: &[StatusItem],
    ) -> Result<OperationResult> {
        let start = Instant::now();
        folder::validate_name(mailbox)?;

        let rendered = StatusItem::render_list(items);
        let outcome = self.raw_status(mailbox, &rendered).await;
        match outcome {
            Ok(ServerOutcome::Ok(raw)) => {
                let parsed = parse_status_response(&raw);
                let elapsed = self.finish_success("status", start);
                let mut result = OperationResult::named("status").with_metadata("mailbox", mailbox);
                for (key, value) in &parsed {
                    result = result.with_metadata(key, *value);
                }
                Ok(result.succeeded(elapsed))
            }
            Ok(ServerOutcome::Refused(reason)) => Ok(self.refused("status", start, reason)),
            Err(e) => Err(self.hard("status", start, e)),
        }
    }

    // ── search ─────────────────────────────────────────────────────

    /// SEARCH with sequence-number results.
    ///
    /// A search with no hits is a success with `message_count == 0`.
    ///
    /// # Errors
    ///
    /// [`Error::MailboxState`] without a selection, connection errors
    /// on transport failure.
    pub async fn search(&mut self, criteria: &SearchCriteria) -> Result<OperationResult> {
        self.search_inner("search", criteria, false).await
    }

    /// UID SEARCH.
    ///
    /// # Errors
    ///
    /// [`Error::MailboxState`] without a selection, connection errors
    /// on transport failure.
    pub async fn uid_search(&mut self, criteria: &SearchCriteria) -> Result<OperationResult> {
        self.search_inner("uid_search", criteria, true).await
    }

    async fn search_inner(
        &mut self,
        operation: &'static str,
        criteria: &SearchCriteria,
        uid: bool,
    ) -> Result<OperationResult> {
        let start = Instant::now();
        self.ensure_selected()?;

        let outcome = self.raw_search(criteria.as_str(), uid).await;
        match outcome {
            Ok(ServerOutcome::Ok(ids)) => {
                let affected: Vec<String> = ids.iter().map(ToString::to_string).collect();
                let elapsed = self.finish_success(operation, start);
                debug!("{operation} found {} messages", affected.len());
                Ok(OperationResult::named(operation)
                    .with_affected(affected)
                    .with_metadata("criteria", criteria.as_str())
                    .succeeded(elapsed))
            }
            Ok(ServerOutcome::Refused(reason)) => Ok(self.refused(operation, start, reason)),
            Err(e) => Err(self.hard(operation, start, e)),
        }
    }

    // ── fetch ──────────────────────────────────────────────────────

    /// FETCH (or UID FETCH, when the set holds UIDs) the given part
    /// plus `FLAGS UID` for every message in the set.
    ///
    /// Malformed response parts are logged and skipped; the operation
    /// succeeds when at least one message was produced.
    ///
    /// # Errors
    ///
    /// [`Error::MailboxState`] without a selection, connection errors
    /// on transport failure.
    pub async fn fetch(&mut self, set: &MessageSet, part: MessagePart) -> Result<FetchOutcome> {
        self.fetch_inner("fetch", set, part).await
    }

    /// UID FETCH. The set must hold UIDs.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for a sequence-number set, otherwise as
    /// [`Self::fetch`].
    pub async fn uid_fetch(&mut self, set: &MessageSet, part: MessagePart) -> Result<FetchOutcome> {
        expect_uid_set(set)?;
        self.fetch_inner("uid_fetch", set, part).await
    }

    async fn fetch_inner(
        &mut self,
        operation: &'static str,
        set: &MessageSet,
        part: MessagePart,
    ) -> Result<FetchOutcome> {
        let start = Instant::now();
        let selected = self.ensure_selected()?.to_string();
        set.validate_for_mailbox(&selected);

        let query = format!("({} FLAGS UID)", part.as_imap_str());
        let outcome = self.raw_fetch(set, &query).await;

        match outcome {
            Ok(ServerOutcome::Ok(fetches)) => {
                let requested = fetches.len();
                let mut messages = Vec::new();
                for fetch in &fetches {
                    match build_message(fetch, &selected) {
                        Some(message) => messages.push(message),
                        None => {
                            warn!("skipping malformed fetch part (seq {})", fetch.message);
                        }
                    }
                }

                if messages.is_empty() {
                    return Ok(FetchOutcome {
                        result: self.refused(
                            operation,
                            start,
                            "no messages could be produced from the fetch response".into(),
                        ),
                        messages,
                    });
                }

                let elapsed = self.finish_success(operation, start);
                info!("{operation} produced {} messages", messages.len());
                let mut result = OperationResult::named(operation)
                    .with_affected(affected_ids(set))
                    .with_metadata("message_part", part.as_imap_str())
                    .with_metadata("requested_count", requested)
                    .with_metadata("processed_count", messages.len());
                result.message_count = messages.len();
                Ok(FetchOutcome {
                    result: result.succeeded(elapsed),
                    messages,
                })
            }
            Ok(ServerOutcome::Refused(reason)) => Ok(FetchOutcome {
                result: self.refused(operation, start, reason),
                messages: Vec::new(),
            }),
            Err(e) => Err(self.hard(operation, start, e)),
        }
    }

    // ── flag stores ────────────────────────────────────────────────

    /// STORE (or UID STORE) a flag change for the set.
    ///
    /// # Errors
    ///
    /// [`Error::MailboxState`] without a selection, [`Error::Config`]
    /// for an empty flag list, connection errors on transport failure.
    pub async fn store_flags(
        &mut self,
        set: &MessageSet,
        command: FlagCommand,
        flags: &[Flag],
    ) -> Result<OperationResult> {
        let operation = match command {
            FlagCommand::Add => "add_flags",
            FlagCommand::Remove => "remove_flags",
            FlagCommand::Set => "set_flags",
        };
        let start = Instant::now();
        self.ensure_selected()?;
        if flags.is_empty() && command != FlagCommand::Set {
            return Err(Error::Config("flag list cannot be empty".into()));
        }

        match self.raw_store(set, command, flags).await {
            Ok(ServerOutcome::Ok(())) => {
                let elapsed = self.finish_success(operation, start);
                Ok(OperationResult::named(operation)
                    .with_affected(affected_ids(set))
                    .with_message_count(set.estimated_count())
                    .with_metadata("flags", Flag::render_list(flags))
                    .with_metadata("command", command.as_imap_str())
                    .succeeded(elapsed))
            }
            Ok(ServerOutcome::Refused(reason)) => Ok(self.refused(operation, start, reason)),
            Err(e) => Err(self.hard(operation, start, e)),
        }
    }

    /// Add one flag to every message in the set.
    ///
    /// # Errors
    ///
    /// As [`Self::store_flags`].
    pub async fn add_flag(&mut self, set: &MessageSet, flag: Flag) -> Result<OperationResult> {
        self.store_flags(set, FlagCommand::Add, std::slice::from_ref(&flag))
            .await
    }

    /// Remove one flag from every message in the set.
    ///
    /// # Errors
    ///
    /// As [`Self::store_flags`].
    pub async fn remove_flag(&mut self, set: &MessageSet, flag: Flag) -> Result<OperationResult> {
        self.store_flags(set, FlagCommand::Remove, std::slice::from_ref(&flag))
            .await
    }

    /// Replace the entire flag set of every message in the set.
    ///
    /// # Errors
    ///
    /// As [`Self::store_flags`].
    pub async fn set_flags(&mut self, set: &MessageSet, flags: &[Flag]) -> Result<OperationResult> {
        self.store_flags(set, FlagCommand::Set, flags).await
    }

    /// Mark every message in the set `\Seen`.
    ///
    /// # Errors
    ///
    /// As [`Self::store_flags`].
    pub async fn mark_seen(&mut self, set: &MessageSet) -> Result<OperationResult> {
        self.add_flag(set, Flag::Seen).await
    }

    /// Clear `\Seen` on every message in the set.
    ///
    /// # Errors
    ///
    /// As [`Self::store_flags`].
    pub async fn mark_unseen(&mut self, set: &MessageSet) -> Result<OperationResult> {
        self.remove_flag(set, Flag::Seen).await
    }

    /// Add each flag in turn, one STORE per flag, aggregating one
    /// result per flag.
    ///
    /// # Errors
    ///
    /// As [`Self::store_flags`]; the first terminal error aborts.
    pub async fn bulk_add_flags(
        &mut self,
        set: &MessageSet,
        flags: &[Flag],
    ) -> Result<Vec<OperationResult>> {
        let mut results = Vec::with_capacity(flags.len());
        for flag in flags {
            results.push(self.add_flag(set, flag.clone()).await?);
        }
        Ok(results)
    }

    /// Remove each flag in turn, one STORE per flag.
    ///
    /// # Errors
    ///
    /// As [`Self::store_flags`]; the first terminal error aborts.
    pub async fn bulk_remove_flags(
        &mut self,
        set: &MessageSet,
        flags: &[Flag],
    ) -> Result<Vec<OperationResult>> {
        let mut results = Vec::with_capacity(flags.len());
        for flag in flags {
            results.push(self.remove_flag(set, flag.clone()).await?);
        }
        Ok(results)
    }

    // ── copy / move composites ─────────────────────────────────────

    /// COPY (or UID COPY) the set to `destination`.
    ///
    /// When the server answers with a `TRYCREATE` hint the
    /// destination is created and the copy retried exactly once.
    ///
    /// # Errors
    ///
    /// [`Error::MailboxState`] without a selection, [`Error::Folder`]
    /// for an invalid destination, connection errors on transport
    /// failure.
    pub async fn copy(&mut self, set: &MessageSet, destination: &str) -> Result<OperationResult> {
        let start = Instant::now();
        self.ensure_selected()?;
        folder::validate_name(destination)?;

        let first = try_hard!(self, "copy", start, self.raw_copy(set, destination).await);
        let outcome = match first {
            ServerOutcome::Refused(reason) if reason.contains("TRYCREATE") => {
                info!("destination {destination} missing (TRYCREATE); creating and retrying");
                let created = try_hard!(self, "copy", start, self.raw_create(destination).await);
                match created {
                    ServerOutcome::Ok(()) => {
                        try_hard!(self, "copy", start, self.raw_copy(set, destination).await)
                    }
                    ServerOutcome::Refused(create_reason) => ServerOutcome::Refused(format!(
                        "{reason}; creating destination failed: {create_reason}"
                    )),
                }
            }
            other => other,
        };

        match outcome {
            ServerOutcome::Ok(()) => {
                let elapsed = self.finish_success("copy", start);
                Ok(OperationResult::named("copy")
                    .with_affected(affected_ids(set))
                    .with_message_count(set.estimated_count())
                    .with_metadata("destination", destination)
                    .succeeded(elapsed))
            }
            ServerOutcome::Refused(reason) => Ok(self.refused("copy", start, reason)),
        }
    }

    /// UID COPY. The set must hold UIDs.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for a sequence-number set, otherwise as
    /// [`Self::copy`].
    pub async fn uid_copy(&mut self, set: &MessageSet, destination: &str) -> Result<OperationResult> {
        expect_uid_set(set)?;
        self.copy(set, destination).await
    }

    /// Move the set to `destination`: COPY, then `+FLAGS \Deleted` on
    /// the source, then EXPUNGE, then CHECK.
    ///
    /// A copy failure aborts before the source is touched; a failure
    /// to flag the copies as deleted reports "copied but not removed
    /// from source" in the result warnings.
    ///
    /// # Errors
    ///
    /// [`Error::MailboxState`] without a selection, [`Error::Folder`]
    /// for an invalid destination, connection errors on transport
    /// failure.
    pub async fn move_messages(
        &mut self,
        set: &MessageSet,
        destination: &str,
    ) -> Result<OperationResult> {
        self.move_composite("move", set, destination).await
    }

    /// UID move. The set must hold UIDs.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for a sequence-number set, otherwise as
    /// [`Self::move_messages`].
    pub async fn uid_move_messages(
        &mut self,
        set: &MessageSet,
        destination: &str,
    ) -> Result<OperationResult> {
        expect_uid_set(set)?;
        self.move_composite("uid_move", set, destination).await
    }

    async fn move_composite(
        &mut self,
        operation: &'static str,
        set: &MessageSet,
        destination: &str,
    ) -> Result<OperationResult> {
        let start = Instant::now();
        let selected = self.ensure_selected()?.to_string();
        folder::validate_name(destination)?;
        set.validate_for_mailbox(&selected);

        debug!("moving {set} to {destination}");

        match try_hard!(self, operation, start, self.raw_copy(set, destination).await) {
            ServerOutcome::Ok(()) => {}
            ServerOutcome::Refused(reason) => {
                return Ok(self
                    .refused(
                        operation,
                        start,
                        format!("failed to copy messages to destination: {reason}"),
                    )
                    .with_affected(affected_ids(set)));
            }
        }

        match try_hard!(
            self,
            operation,
            start,
            self.raw_store(set, FlagCommand::Add, &[Flag::Deleted]).await
        ) {
            ServerOutcome::Ok(()) => {}
            ServerOutcome::Refused(reason) => {
                return Ok(self
                    .refused(
                        operation,
                        start,
                        format!("failed to mark messages for deletion: {reason}"),
                    )
                    .with_affected(affected_ids(set))
                    .with_warning("messages copied but not removed from source"));
            }
        }

        match try_hard!(self, operation, start, self.raw_expunge().await) {
            ServerOutcome::Ok(removed) => {
                debug!("expunged {} messages from {selected}", removed.len());
            }
            ServerOutcome::Refused(reason) => {
                return Ok(self
                    .refused(operation, start, format!("expunge failed: {reason}"))
                    .with_affected(affected_ids(set))
                    .with_warning("messages copied and flagged but not expunged"));
            }
        }

        let check = try_hard!(self, operation, start, self.check().await);
        let elapsed = self.finish_success(operation, start);
        info!("moved {set} to {destination}");
        Ok(OperationResult::named(operation)
            .with_affected(affected_ids(set))
            .with_message_count(set.estimated_count())
            .with_metadata("destination", destination)
            .with_metadata("check_ok", check.success)
            .succeeded(elapsed))
    }

    // ── trash / delete / restore ───────────────────────────────────

    /// Mark the set `\Deleted` and move it to the trash mailbox.
    ///
    /// # Errors
    ///
    /// As [`Self::move_messages`].
    pub async fn trash(
        &mut self,
        set: &MessageSet,
        trash_mailbox: &str,
    ) -> Result<OperationResult> {
        let start = Instant::now();
        self.ensure_selected()?;
        folder::validate_name(trash_mailbox)?;

        match try_hard!(
            self,
            "trash",
            start,
            self.raw_store(set, FlagCommand::Add, &[Flag::Deleted]).await
        ) {
            ServerOutcome::Ok(()) => {}
            ServerOutcome::Refused(reason) => {
                return Ok(self
                    .refused(
                        "trash",
                        start,
                        format!("failed to mark messages for deletion: {reason}"),
                    )
                    .with_affected(affected_ids(set)));
            }
        }

        let moved = try_hard!(
            self,
            "trash",
            start,
            self.move_composite("move", set, trash_mailbox).await
        );
        if !moved.success {
            return Ok(self
                .refused(
                    "trash",
                    start,
                    format!(
                        "failed to move messages to trash: {}",
                        moved.error_message.unwrap_or_default()
                    ),
                )
                .with_affected(affected_ids(set)));
        }

        let elapsed = self.finish_success("trash", start);
        Ok(OperationResult::named("trash")
            .with_affected(affected_ids(set))
            .with_message_count(set.estimated_count())
            .with_metadata("trash_mailbox", trash_mailbox)
            .succeeded(elapsed))
    }

    /// Permanently delete the set: trash, then EXPUNGE, then CHECK.
    /// Idempotent with respect to already-deleted messages.
    ///
    /// # Errors
    ///
    /// As [`Self::trash`].
    pub async fn delete(
        &mut self,
        set: &MessageSet,
        trash_mailbox: &str,
    ) -> Result<OperationResult> {
        let start = Instant::now();
        self.ensure_selected()?;
        folder::validate_name(trash_mailbox)?;

        let trashed = try_hard!(self, "delete", start, self.trash(set, trash_mailbox).await);
        if !trashed.success {
            return Ok(self
                .refused(
                    "delete",
                    start,
                    format!(
                        "failed to trash messages: {}",
                        trashed.error_message.unwrap_or_default()
                    ),
                )
                .with_affected(affected_ids(set)));
        }

        if let ServerOutcome::Refused(reason) =
            try_hard!(self, "delete", start, self.raw_expunge().await)
        {
            return Ok(self
                .refused("delete", start, format!("expunge failed: {reason}"))
                .with_affected(affected_ids(set)));
        }
        let check = try_hard!(self, "delete", start, self.check().await);

        let elapsed = self.finish_success("delete", start);
        info!("permanently deleted {set}");
        Ok(OperationResult::named("delete")
            .with_affected(affected_ids(set))
            .with_message_count(set.estimated_count())
            .with_metadata("trash_mailbox", trash_mailbox)
            .with_metadata("check_ok", check.success)
            .succeeded(elapsed))
    }

    /// Restore messages from the trash: select the trash mailbox,
    /// move the set to `safe_mailbox`, select the safe mailbox, clear
    /// `\Deleted` there, and CHECK.
    ///
    /// # Errors
    ///
    /// As [`Self::move_messages`], plus selection errors for either
    /// mailbox.
    pub async fn restore(
        &mut self,
        set: &MessageSet,
        trash_mailbox: &str,
        safe_mailbox: &str,
    ) -> Result<OperationResult> {
        let start = Instant::now();
        folder::validate_name(trash_mailbox)?;
        folder::validate_name(safe_mailbox)?;

        let selected_trash = try_hard!(self, "restore", start, self.select(trash_mailbox).await);
        if !selected_trash.success {
            return Ok(self
                .refused(
                    "restore",
                    start,
                    format!(
                        "failed to select trash mailbox: {}",
                        selected_trash.error_message.unwrap_or_default()
                    ),
                )
                .with_affected(affected_ids(set)));
        }

        let moved = try_hard!(
            self,
            "restore",
            start,
            self.move_composite("move", set, safe_mailbox).await
        );
        if !moved.success {
            return Ok(self
                .refused(
                    "restore",
                    start,
                    format!(
                        "failed to move messages out of trash: {}",
                        moved.error_message.unwrap_or_default()
                    ),
                )
                .with_affected(affected_ids(set)));
        }

        try_hard!(self, "restore", start, self.select(safe_mailbox).await);

        // The copies in the safe mailbox have fresh identifiers;
        // clear \Deleted across the whole mailbox.
        let everything = MessageSet::all(set.is_uid(), Some(safe_mailbox))?;
        if let ServerOutcome::Refused(reason) = try_hard!(
            self,
            "restore",
            start,
            self.raw_store(&everything, FlagCommand::Remove, &[Flag::Deleted])
                .await
        ) {
            return Ok(self
                .refused(
                    "restore",
                    start,
                    format!("failed to remove deleted flag: {reason}"),
                )
                .with_affected(affected_ids(set))
                .with_warning("messages moved but deleted flag not removed"));
        }

        let check = try_hard!(self, "restore", start, self.check().await);
        let elapsed = self.finish_success("restore", start);
        info!("restored {set} from {trash_mailbox} to {safe_mailbox}");
        Ok(OperationResult::named("restore")
            .with_affected(affected_ids(set))
            .with_message_count(set.estimated_count())
            .with_metadata("trash_mailbox", trash_mailbox)
            .with_metadata("safe_mailbox", safe_mailbox)
            .with_metadata("check_ok", check.success)
            .succeeded(elapsed))
    }

    // ── append / upload ────────────────────────────────────────────

    /// APPEND a raw message to a mailbox, with optional flags and an
    /// optional internal date.
    ///
    /// # Errors
    ///
    /// [`Error::Folder`] for an invalid mailbox name,
    /// [`Error::Config`] for empty content, connection errors on
    /// transport failure.
    pub async fn append(
        &mut self,
        mailbox: &str,
        flags: &[Flag],
        internal_date: Option<DateTime<chrono::FixedOffset>>,
        content: &[u8],
    ) -> Result<OperationResult> {
        let start = Instant::now();
        folder::validate_name(mailbox)?;
        if content.is_empty() {
            return Err(Error::Config("cannot append an empty message".into()));
        }

        let date_literal = internal_date.map(|dt| imap_internal_date(&dt));
        match self
            .raw_append(mailbox, flags, date_literal.as_deref(), content)
            .await
        {
            Ok(ServerOutcome::Ok(())) => {
                let elapsed = self.finish_success("append", start);
                info!("appended {} octets to {mailbox}", content.len());
                let mut result = OperationResult::named("append")
                    .with_metadata("mailbox", mailbox)
                    .with_metadata("size", content.len());
                result.message_count = 1;
                Ok(result.succeeded(elapsed))
            }
            Ok(ServerOutcome::Refused(reason)) => Ok(self.refused("append", start, reason)),
            Err(e) => Err(self.hard("append", start, e)),
        }
    }

    /// Batched APPEND of many messages. Each message must carry a
    /// date and raw content; failures are counted per message and the
    /// sweep continues. The cancellation token is honored between
    /// individual APPENDs.
    ///
    /// # Errors
    ///
    /// [`Error::Folder`] for an invalid mailbox name,
    /// [`Error::Config`] for an empty message list, connection errors
    /// on transport failure.
    pub async fn upload_eml(
        &mut self,
        messages: &[EmailMessage],
        flags: &[Flag],
        mailbox: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<BulkResult> {
        let start = Instant::now();
        folder::validate_name(mailbox)?;
        if messages.is_empty() {
            return Err(Error::Config("email list cannot be empty".into()));
        }

        let batch_size = self.bulk_batch_size;
        let total = messages.len();
        let total_batches = total.div_ceil(batch_size);
        let mut successful = 0_usize;
        let mut failed = 0_usize;
        let mut batches_processed = 0_usize;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        'batches: for batch in messages.chunks(batch_size) {
            batches_processed += 1;
            for message in batch {
                if cancel.is_some_and(CancellationToken::is_cancelled) {
                    warnings.push("upload cancelled by caller".to_string());
                    break 'batches;
                }
                if !message.is_uploadable() {
                    failed += 1;
                    errors.push(format!(
                        "message '{}' lacks a date or raw content",
                        message.subject
                    ));
                    continue;
                }
                let internal_date = message
                    .date
                    .as_deref()
                    .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                    .map(|dt| imap_internal_date(&dt));
                match self
                    .raw_append(mailbox, flags, internal_date.as_deref(), &message.raw)
                    .await
                {
                    Ok(ServerOutcome::Ok(())) => successful += 1,
                    Ok(ServerOutcome::Refused(reason)) => {
                        failed += 1;
                        errors.push(format!(
                            "failed to upload '{}': {reason}",
                            message.subject
                        ));
                    }
                    Err(e) => {
                        return Err(self.hard("upload_eml", start, e));
                    }
                }
            }
            if batches_processed % 10 == 0 {
                info!("processed {batches_processed}/{total_batches} upload batches");
            }
        }

        let execution_time = start.elapsed();
        let all_ok = successful == total;
        self.monitor.record("upload_eml", execution_time, all_ok);
        if all_ok {
            info!("uploaded all {total} messages to {mailbox}");
        } else {
            warn!("uploaded {successful}/{total} messages to {mailbox}");
        }

        Ok(BulkResult {
            operation: "upload_eml".into(),
            total_messages: total,
            successful_messages: successful,
            failed_messages: failed,
            execution_time,
            batch_size,
            batches_processed,
            errors,
            warnings,
            metadata: HashMap::from([(
                "mailbox".to_string(),
                serde_json::Value::from(mailbox),
            )]),
        })
    }

    // ── bulk drivers ───────────────────────────────────────────────

    /// Move several sets, each to its own destination. Per-set
    /// failures are aggregated; the sweep continues.
    ///
    /// # Errors
    ///
    /// Connection errors on transport failure abort the sweep.
    pub async fn bulk_move(
        &mut self,
        pairs: &[(MessageSet, String)],
        cancel: Option<&CancellationToken>,
    ) -> Result<BulkResult> {
        self.bulk_composite("bulk_move", pairs, cancel, false).await
    }

    /// Delete several sets, each through its own trash mailbox.
    ///
    /// # Errors
    ///
    /// Connection errors on transport failure abort the sweep.
    pub async fn bulk_delete(
        &mut self,
        pairs: &[(MessageSet, String)],
        cancel: Option<&CancellationToken>,
    ) -> Result<BulkResult> {
        self.bulk_composite("bulk_delete", pairs, cancel, true).await
    }

    async fn bulk_composite(
        &mut self,
        operation: &'static str,
        pairs: &[(MessageSet, String)],
        cancel: Option<&CancellationToken>,
        delete: bool,
    ) -> Result<BulkResult> {
        let start = Instant::now();
        let total: usize = pairs.iter().map(|(set, _)| set.estimated_count()).sum();
        let mut successful = 0_usize;
        let mut failed = 0_usize;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut batches_processed = 0_usize;

        for (set, target) in pairs {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                warnings.push(format!("{operation} cancelled by caller"));
                break;
            }
            batches_processed += 1;
            let result = if delete {
                try_hard!(self, operation, start, self.delete(set, target).await)
            } else {
                try_hard!(
                    self,
                    operation,
                    start,
                    self.move_composite("move", set, target).await
                )
            };
            if result.success {
                successful += set.estimated_count();
            } else {
                failed += set.estimated_count();
                errors.push(format!(
                    "{set} -> {target}: {}",
                    result.error_message.unwrap_or_default()
                ));
            }
        }

        let execution_time = start.elapsed();
        self.monitor
            .record(operation, execution_time, failed == 0 && successful == total);

        Ok(BulkResult {
            operation: operation.into(),
            total_messages: total,
            successful_messages: successful,
            failed_messages: failed,
            execution_time,
            batch_size: 1,
            batches_processed,
            errors,
            warnings,
            metadata: HashMap::new(),
        })
    }

    /// UID SEARCH, then fetch the hits as RFC822 in batches and run
    /// `processor` over each parsed message. Processor failures count
    /// toward the failed tally without aborting the sweep; the
    /// cancellation token is honored between batches.
    ///
    /// # Errors
    ///
    /// [`Error::MailboxState`] without a selection, connection errors
    /// on transport failure.
    pub async fn search_and_process<F>(
        &mut self,
        criteria: &SearchCriteria,
        batch_size: Option<usize>,
        cancel: Option<&CancellationToken>,
        mut processor: F,
    ) -> Result<BulkResult>
    where
        F: FnMut(&EmailMessage) -> std::result::Result<(), String>,
    {
        let start = Instant::now();
        let batch_size = batch_size.unwrap_or(self.bulk_batch_size).max(1);

        let search_result = try_hard!(
            self,
            "search_and_process",
            start,
            self.uid_search(criteria).await
        );
        if !search_result.success {
            return Ok(BulkResult {
                operation: "search_and_process".into(),
                batch_size,
                execution_time: start.elapsed(),
                errors: vec![format!(
                    "search failed: {}",
                    search_result.error_message.unwrap_or_default()
                )],
                ..BulkResult::default()
            });
        }

        let uids: Vec<u32> = search_result
            .affected_messages
            .iter()
            .filter_map(|id| id.parse().ok())
            .collect();
        let total = uids.len();
        if total == 0 {
            return Ok(BulkResult {
                operation: "search_and_process".into(),
                batch_size,
                execution_time: start.elapsed(),
                ..BulkResult::default()
            });
        }

        let total_batches = total.div_ceil(batch_size);
        let mut successful = 0_usize;
        let mut failed = 0_usize;
        let mut batches_processed = 0_usize;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for chunk in uids.chunks(batch_size) {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                warnings.push("sweep cancelled by caller".to_string());
                break;
            }
            batches_processed += 1;
            let set = MessageSet::from_uids(chunk, self.current_selection.as_deref())?;

            let outcome = try_hard!(
                self,
                "search_and_process",
                start,
                self.uid_fetch(&set, MessagePart::Rfc822).await
            );
            if !outcome.result.success {
                failed += chunk.len();
                errors.push(format!(
                    "batch {batches_processed} fetch failed: {}",
                    outcome.result.error_message.unwrap_or_default()
                ));
                continue;
            }

            for message in &outcome.messages {
                match processor(message) {
                    Ok(()) => successful += 1,
                    Err(reason) => {
                        failed += 1;
                        errors.push(format!("processing failed for message: {reason}"));
                    }
                }
            }

            if batches_processed % 10 == 0 {
                info!("processed {batches_processed}/{total_batches} batches");
            }
        }

        let execution_time = start.elapsed();
        self.monitor
            .record("search_and_process", execution_time, successful == total);

        Ok(BulkResult {
            operation: "search_and_process".into(),
            total_messages: total,
            successful_messages: successful,
            failed_messages: failed,
            execution_time,
            batch_size,
            batches_processed,
            errors,
            warnings,
            metadata: HashMap::from([(
                "criteria".to_string(),
                serde_json::Value::from(criteria.as_str()),
            )]),
        })
    }
}

/// The set's components as the result's affected-message id strings.
fn affected_ids(set: &MessageSet) -> Vec<String> {
    set.msg_ids().split(',').map(ToString::to_string).collect()
}

fn expect_uid_set(set: &MessageSet) -> Result<()> {
    if set.is_uid() {
        Ok(())
    } else {
        Err(Error::Config(
            "this operation requires a UID message set".into(),
        ))
    }
}

/// Build an [`EmailMessage`] from one FETCH item, overlaying the
/// server-assigned metadata. Returns `None` for parts without a
/// usable body.
fn build_message(fetch: &async_imap::types::Fetch, mailbox: &str) -> Option<EmailMessage> {
    let body = fetch.body()?;
    if body.is_empty() {
        return None;
    }
    let mut message = match EmailMessage::from_rfc822_bytes(body) {
        Ok(message) => message,
        Err(e) => {
            warn!("failed to parse fetched message: {e}");
            return None;
        }
    };
    message.flags = fetch.flags().map(|flag| Flag::from(&flag)).collect();
    message.sequence_number = Some(fetch.message);
    message.uid = fetch.uid;
    message.size = body.len();
    message.mailbox = Some(mailbox.to_string());
    Some(message)
}

/// Quoted IMAP internal date for APPEND (`"01-Jan-2024 12:00:00 +0000"`).
fn imap_internal_date(date: &DateTime<chrono::FixedOffset>) -> String {
    format!("\"{}\"", date.format("%d-%b-%Y %H:%M:%S %z"))
}

/// Parse an untagged `* STATUS "box" (KEY VAL ...)` response into a
/// key/value map.
fn parse_status_response(raw: &[u8]) -> HashMap<String, u64> {
    let text = String::from_utf8_lossy(raw);
    let mut parsed = HashMap::new();
    for line in text.lines() {
        let Some(position) = line.find("STATUS") else {
            continue;
        };
        let rest = &line[position..];
        let (Some(open), Some(close)) = (rest.find('('), rest.rfind(')')) else {
            continue;
        };
        if open >= close {
            continue;
        }
        let mut tokens = rest[open + 1..close].split_whitespace();
        while let (Some(key), Some(value)) = (tokens.next(), tokens.next()) {
            if let Ok(value) = value.parse::<u64>() {
                parsed.insert(key.to_string(), value);
            }
        }
    }
    parsed
}
