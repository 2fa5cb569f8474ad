//! Per-service operation monitoring
//!
//! Every public operation on the mailbox service records its name,
//! latency, and outcome here. The monitor keeps per-operation
//! counters, running means, and a bounded tail of recent records.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// How many recent operation records are retained.
const RECORD_CAPACITY: usize = 100;

/// One recorded operation.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub operation: String,
    pub timestamp: DateTime<Utc>,
    pub execution_time: Duration,
    pub success: bool,
}

/// Aggregated view returned by [`OperationMonitor::statistics`].
#[derive(Debug, Clone)]
pub struct MonitorStatistics {
    /// Time since the monitor (and so the service) was created.
    pub uptime: Duration,
    pub total_operations: u64,
    pub operations_by_type: HashMap<String, u64>,
    pub error_counts: HashMap<String, u64>,
    pub average_times: HashMap<String, Duration>,
    /// Most recent records, oldest first.
    pub recent_operations: Vec<OperationRecord>,
}

/// Bounded operation history with per-operation aggregates.
#[derive(Debug)]
pub struct OperationMonitor {
    started_at: Instant,
    counts: HashMap<String, u64>,
    total_times: HashMap<String, Duration>,
    error_counts: HashMap<String, u64>,
    recent: VecDeque<OperationRecord>,
}

impl Default for OperationMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            counts: HashMap::new(),
            total_times: HashMap::new(),
            error_counts: HashMap::new(),
            recent: VecDeque::with_capacity(RECORD_CAPACITY),
        }
    }

    /// Record one operation outcome.
    pub fn record(&mut self, operation: &str, execution_time: Duration, success: bool) {
        *self.counts.entry(operation.to_string()).or_default() += 1;
        *self
            .total_times
            .entry(operation.to_string())
            .or_default() += execution_time;
        if !success {
            *self.error_counts.entry(operation.to_string()).or_default() += 1;
        }

        if self.recent.len() == RECORD_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(OperationRecord {
            operation: operation.to_string(),
            timestamp: Utc::now(),
            execution_time,
            success,
        });
    }

    /// Aggregate statistics over everything recorded so far.
    #[must_use]
    pub fn statistics(&self) -> MonitorStatistics {
        let average_times = self
            .counts
            .iter()
            .map(|(operation, &count)| {
                let total = self
                    .total_times
                    .get(operation)
                    .copied()
                    .unwrap_or_default();
                let mean = total / u32::try_from(count).unwrap_or(u32::MAX).max(1);
                (operation.clone(), mean)
            })
            .collect();

        MonitorStatistics {
            uptime: self.started_at.elapsed(),
            total_operations: self.counts.values().sum(),
            operations_by_type: self.counts.clone(),
            error_counts: self.error_counts.clone(),
            average_times,
            recent_operations: self.recent.iter().cloned().collect(),
        }
    }
}
