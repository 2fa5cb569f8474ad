//! Connection metrics and health snapshots

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Counters and observations for one connection.
///
/// Mutated only by the owning connection's operation path and its
/// health monitor; external readers take a snapshot via
/// [`crate::Connection::metrics`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionMetrics {
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub reconnection_attempts: u64,
    pub total_operations: u64,
    pub failed_operations: u64,
    pub last_connection_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Cumulative mean latency of successful operations.
    pub average_response_time: Duration,
    /// Total time spent connected, accumulated on disconnect.
    pub cumulative_uptime: Duration,
}

impl ConnectionMetrics {
    /// Record one successful operation and fold its latency into the
    /// running mean. The mean is over successful operations only.
    pub fn record_operation_success(&mut self, elapsed: Duration) {
        self.total_operations += 1;
        let successes = self.total_operations - self.failed_operations;
        // new_mean = (old_mean * (n - 1) + sample) / n
        let total = self.average_response_time
            * u32::try_from(successes - 1).unwrap_or(u32::MAX)
            + elapsed;
        self.average_response_time = total / u32::try_from(successes).unwrap_or(u32::MAX);
    }

    /// Record one failed operation.
    pub fn record_operation_failure(&mut self, error: &str) {
        self.total_operations += 1;
        self.failed_operations += 1;
        self.last_error = Some(error.to_string());
    }

    /// Percentage of operations that succeeded, 0 when none ran.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = (self.total_operations - self.failed_operations) as f64
            / self.total_operations as f64;
        rate * 100.0
    }
}

/// Point-in-time health snapshot of a connection.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Outcome of the NOOP probe taken for this report.
    pub is_connected: bool,
    /// Age of the current session, `None` when disconnected.
    pub connection_age: Option<Duration>,
    pub total_operations: u64,
    pub failed_operations: u64,
    /// `(total - failed) / total` as a percentage.
    pub success_rate: f64,
    pub average_response_time: Duration,
    pub last_error: Option<String>,
}
