//! IMAP connection lifecycle
//!
//! A [`Connection`] owns one authenticated IMAP session and drives it
//! through the state machine Idle -> Connecting -> Authenticated
//! (oscillating through Broken on failures) -> Closed. Connecting
//! retries with exponential backoff; authentication rejections are
//! terminal. With `use_pool` set, connect adopts a pooled session
//! after a NOOP liveness probe and disconnect parks the session back.
//!
//! At most one IMAP command is in flight per connection: the session
//! sits behind one async mutex, which also serializes the background
//! health monitor against foreground operations.

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::metrics::{ConnectionMetrics, HealthReport};
use crate::pool::SessionPool;
use crate::session::{self, ImapSession};
use chrono::Utc;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deadline for NOOP liveness probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a [`Connection`]. Exactly one holds at any
/// moment; all operation methods require `Authenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Authenticated,
    Broken,
    Closed,
}

/// Shared core of a connection, also owned by its monitor task.
#[derive(Debug)]
struct ConnectionInner {
    config: ConnectionConfig,
    pool: Option<Arc<SessionPool>>,
    session: AsyncMutex<Option<ImapSession>>,
    state: StdMutex<ConnectionState>,
    metrics: StdMutex<ConnectionMetrics>,
    connected_at: StdMutex<Option<Instant>>,
}

impl ConnectionInner {
    fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state mutex poisoned")
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("state mutex poisoned") = state;
    }

    fn with_metrics<T>(&self, f: impl FnOnce(&mut ConnectionMetrics) -> T) -> T {
        f(&mut self.metrics.lock().expect("metrics mutex poisoned"))
    }

    /// Fold the current session's age into cumulative uptime.
    fn accumulate_uptime(&self) {
        let started = self
            .connected_at
            .lock()
            .expect("uptime mutex poisoned")
            .take();
        if let Some(started) = started {
            self.with_metrics(|m| m.cumulative_uptime += started.elapsed());
        }
    }

    fn adopt(&self, session: ImapSession, guard: &mut Option<ImapSession>) {
        *guard = Some(session);
        *self.connected_at.lock().expect("uptime mutex poisoned") = Some(Instant::now());
        self.with_metrics(|m| {
            m.successful_connections += 1;
            m.last_connection_time = Some(Utc::now());
        });
        self.set_state(ConnectionState::Authenticated);
    }

    /// One connect attempt: pooled sessions first (verified with a
    /// NOOP, skipping LOGIN), then a fresh dial and LOGIN.
    async fn try_connect_once(&self) -> Result<()> {
        let mut guard = self.session.lock().await;

        if self.config.use_pool {
            if let Some(pool) = &self.pool {
                let key = self.config.pool_key();
                while let Some(mut pooled) = pool.checkout(&key) {
                    match pooled.noop_within(PROBE_TIMEOUT).await {
                        Ok(()) => {
                            info!("adopted pooled session for {key}");
                            self.adopt(pooled, &mut guard);
                            return Ok(());
                        }
                        Err(e) => {
                            debug!("pooled session for {key} is stale: {e}");
                            drop(pooled);
                        }
                    }
                }
            }
        }

        let stream = session::open_stream(&self.config).await?;
        let fresh = session::login(stream, &self.config).await?;
        info!("Connected to IMAP server {}", self.config.host);
        self.adopt(fresh, &mut guard);
        Ok(())
    }

    /// The full connect path: up to `max_retries + 1` attempts with
    /// (optionally exponential) backoff between them. Authentication
    /// rejections abort immediately.
    async fn establish(&self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        let mut delay = self.config.initial_retry_delay;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            self.with_metrics(|m| m.connection_attempts += 1);

            match self.try_connect_once().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.with_metrics(|m| {
                        m.failed_connections += 1;
                        m.last_error = Some(e.to_string());
                    });
                    if !e.is_retryable() {
                        self.set_state(ConnectionState::Closed);
                        return Err(e);
                    }
                    if attempt < self.config.max_retries {
                        warn!(
                            "connect attempt {} failed: {e}; retrying in {:?}",
                            attempt + 1,
                            delay
                        );
                        sleep(delay).await;
                        delay = next_delay(delay, &self.config);
                    }
                    last_error = Some(e);
                }
            }
        }

        self.set_state(ConnectionState::Broken);
        let detail = last_error.map_or_else(String::new, |e| format!(": {e}"));
        Err(Error::Connection(format!(
            "all {} connect attempts failed{detail}",
            self.config.max_retries + 1
        )))
    }

    /// NOOP probe; a failure drops the session and marks the
    /// connection broken.
    async fn probe(&self) -> bool {
        let mut guard = self.session.lock().await;
        let Some(current) = guard.as_mut() else {
            return false;
        };
        let start = Instant::now();
        match current.noop_within(PROBE_TIMEOUT).await {
            Ok(()) => {
                self.with_metrics(|m| m.record_operation_success(start.elapsed()));
                true
            }
            Err(e) => {
                debug!("liveness probe failed: {e}");
                self.with_metrics(|m| m.record_operation_failure(&e.to_string()));
                *guard = None;
                self.accumulate_uptime();
                self.set_state(ConnectionState::Broken);
                false
            }
        }
    }
}

/// What the server said to one issued command.
#[derive(Debug)]
pub(crate) enum ServerOutcome<T> {
    /// Tagged OK with the parsed data.
    Ok(T),
    /// Tagged `NO`/`BAD`; the connection stays usable.
    Refused(String),
}

/// Delay for the attempt after one that waited `current`.
fn next_delay(current: Duration, config: &ConnectionConfig) -> Duration {
    if config.exponential_backoff {
        (current * 2).min(config.max_retry_delay)
    } else {
        current
    }
}

/// A managed IMAP connection: authenticated session, retrying
/// connect, metrics, and an optional background health monitor.
///
/// # Examples
///
/// ```no_run
/// use mailstore::{Connection, ConnectionConfig};
///
/// # async fn demo() -> mailstore::Result<()> {
/// let config = ConnectionConfig::new("imap.example.com", "user", "secret");
/// let connection = Connection::new(config);
/// connection.connect().await?;
/// assert!(connection.is_connected().await);
/// connection.disconnect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
    /// Cancellation token of the running monitor task; `None` when no
    /// monitor is active for the current connected period.
    monitor_cancel: StdMutex<Option<CancellationToken>>,
}

impl Connection {
    /// A connection that always dials fresh sessions.
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self::build(config, None)
    }

    /// A connection drawing from (and returning to) `pool` when the
    /// config sets `use_pool`.
    #[must_use]
    pub fn with_pool(config: ConnectionConfig, pool: Arc<SessionPool>) -> Self {
        Self::build(config, Some(pool))
    }

    /// A pooled connection using the process-wide pool.
    #[must_use]
    pub fn pooled(config: ConnectionConfig) -> Self {
        let config = config.with_pool(true);
        Self::build(config, Some(SessionPool::global()))
    }

    fn build(config: ConnectionConfig, pool: Option<Arc<SessionPool>>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                config,
                pool,
                session: AsyncMutex::new(None),
                state: StdMutex::new(ConnectionState::Idle),
                metrics: StdMutex::new(ConnectionMetrics::default()),
                connected_at: StdMutex::new(None),
            }),
            monitor_cancel: StdMutex::new(None),
        }
    }

    /// The configuration this connection was built with.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Establish (or re-establish) the session.
    ///
    /// Already-live connections return immediately. Otherwise the
    /// retry loop runs; on success the background health monitor is
    /// started when enabled.
    ///
    /// # Errors
    ///
    /// [`Error::Authentication`] when LOGIN is rejected (not
    /// retried); [`Error::Connection`] when every attempt failed.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.state() == ConnectionState::Authenticated && self.inner.probe().await {
            debug!("already connected");
            return Ok(());
        }

        self.inner.establish().await?;
        self.start_monitor();
        Ok(())
    }

    /// Close the connection: the monitor stops, uptime is folded into
    /// the metrics, and the session is parked in the pool when still
    /// healthy (logged out otherwise).
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` keeps the contract that
    /// callers must disconnect explicitly.
    pub async fn disconnect(&self) -> Result<()> {
        self.stop_monitor();

        let taken = self.inner.session.lock().await.take();
        self.inner.accumulate_uptime();
        self.inner.set_state(ConnectionState::Closed);

        let Some(mut session) = taken else {
            debug!("no session to disconnect");
            return Ok(());
        };

        if self.inner.config.use_pool && session.noop_within(PROBE_TIMEOUT).await.is_ok() {
            if let Some(pool) = &self.inner.pool {
                match pool.checkin(&self.inner.config.pool_key(), session) {
                    Ok(()) => return Ok(()),
                    Err(surplus) => {
                        surplus.logout().await.ok();
                        return Ok(());
                    }
                }
            }
        }

        session.logout().await.ok();
        info!("Disconnected from {}", self.inner.config.host);
        Ok(())
    }

    /// NOOP liveness probe. Returns true iff the server answered OK.
    /// A failed probe drops the session and marks the connection
    /// broken.
    pub async fn is_connected(&self) -> bool {
        self.inner.probe().await
    }

    /// Point-in-time health snapshot (one NOOP probe plus metric
    /// reads).
    pub async fn health_check(&self) -> HealthReport {
        let is_connected = self.is_connected().await;
        let connection_age = self
            .inner
            .connected_at
            .lock()
            .expect("uptime mutex poisoned")
            .map(|started| started.elapsed());
        self.inner.with_metrics(|m| HealthReport {
            is_connected,
            connection_age,
            total_operations: m.total_operations,
            failed_operations: m.failed_operations,
            success_rate: m.success_rate(),
            average_response_time: m.average_response_time,
            last_error: m.last_error.clone(),
        })
    }

    /// CAPABILITY: the server's advertised capabilities, rendered as
    /// strings.
    ///
    /// # Errors
    ///
    /// [`Error::MailboxState`] when not authenticated; connection or
    /// operation errors from the round-trip.
    pub async fn capabilities(&self) -> Result<Vec<String>> {
        self.require_authenticated()?;
        let mut guard = self.inner.session.lock().await;
        let call = match guard.as_mut() {
            Some(current) => current.capabilities().await,
            None => return Err(Error::MailboxState("no active session".into())),
        };
        match self.classify(call, &mut guard)? {
            ServerOutcome::Ok(capabilities) => Ok(capabilities
                .iter()
                .map(|capability| format!("{capability:?}"))
                .collect()),
            ServerOutcome::Refused(reason) => Err(Error::Operation {
                operation: "CAPABILITY".into(),
                reason,
            }),
        }
    }

    /// Snapshot of the connection metrics.
    #[must_use]
    pub fn metrics(&self) -> ConnectionMetrics {
        self.inner.with_metrics(|m| m.clone())
    }

    /// Zero all metrics.
    pub fn reset_metrics(&self) {
        self.inner.with_metrics(|m| *m = ConnectionMetrics::default());
    }

    /// Lock the session slot for one command round-trip.
    pub(crate) async fn session_guard(&self) -> MutexGuard<'_, Option<ImapSession>> {
        self.inner.session.lock().await
    }

    /// Classify one command's outcome. Server `NO`/`BAD` responses
    /// come back as [`ServerOutcome::Refused`] for the caller to fold
    /// into a failed result; transport-level failures drop the
    /// session (via `guard`), mark the connection broken, and
    /// propagate as errors.
    pub(crate) fn classify<T>(
        &self,
        outcome: Result<T>,
        guard: &mut Option<ImapSession>,
    ) -> Result<ServerOutcome<T>> {
        match outcome {
            Ok(value) => Ok(ServerOutcome::Ok(value)),
            Err(Error::Operation { reason, .. }) => Ok(ServerOutcome::Refused(reason)),
            Err(e) => {
                if matches!(e, Error::Connection(_) | Error::Tls(_) | Error::Io(_)) {
                    self.discard_session(guard);
                }
                Err(e)
            }
        }
    }

    /// Precondition shared by every operation.
    pub(crate) fn require_authenticated(&self) -> Result<()> {
        match self.inner.state() {
            ConnectionState::Authenticated => Ok(()),
            other => Err(Error::MailboxState(format!(
                "connection is {other:?}; operations require Authenticated"
            ))),
        }
    }

    /// Record a successful operation latency.
    pub(crate) fn note_success(&self, elapsed: Duration) {
        if self.inner.config.monitoring_enabled {
            self.inner.with_metrics(|m| m.record_operation_success(elapsed));
        }
    }

    /// Record a failed operation; connection-level failures mark the
    /// connection broken so the health monitor recovers it.
    pub(crate) fn note_failure(&self, error: &Error) {
        if self.inner.config.monitoring_enabled {
            self.inner
                .with_metrics(|m| m.record_operation_failure(&error.to_string()));
        }
        if matches!(error, Error::Connection(_) | Error::Tls(_) | Error::Io(_)) {
            self.inner.set_state(ConnectionState::Broken);
        }
    }

    /// Drop a session the caller observed failing at the transport
    /// level.
    pub(crate) fn discard_session(&self, guard: &mut Option<ImapSession>) {
        *guard = None;
        self.inner.accumulate_uptime();
        self.inner.set_state(ConnectionState::Broken);
    }

    /// Start the background health monitor, at most once per
    /// connected period.
    fn start_monitor(&self) {
        let config = &self.inner.config;
        if !config.monitoring_enabled || config.health_check_interval.is_zero() {
            return;
        }
        let mut slot = self.monitor_cancel.lock().expect("monitor mutex poisoned");
        if slot.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        drop(slot);

        let inner = Arc::clone(&self.inner);
        let interval = config.health_check_interval;
        tokio::spawn(async move {
            debug!("health monitor started");
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = sleep(interval) => {
                        match inner.state() {
                            ConnectionState::Closed
                            | ConnectionState::Idle
                            | ConnectionState::Connecting => continue,
                            ConnectionState::Authenticated | ConnectionState::Broken => {}
                        }
                        if inner.probe().await {
                            continue;
                        }
                        warn!("health check failed; attempting reconnect");
                        inner.with_metrics(|m| m.reconnection_attempts += 1);
                        match inner.establish().await {
                            Ok(()) => info!("connection restored by health monitor"),
                            Err(e) => warn!("health monitor reconnect failed: {e}"),
                        }
                    }
                }
            }
            debug!("health monitor stopped");
        });
    }

    fn stop_monitor(&self) {
        let token = self
            .monitor_cancel
            .lock()
            .expect("monitor mutex poisoned")
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }
}

impl Drop for Connection {
    // Cleanup is explicit: callers must disconnect(). Drop only makes
    // sure the monitor task does not outlive the connection.
    fn drop(&mut self) {
        self.stop_monitor();
    }
}
