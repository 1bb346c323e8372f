use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::CalendarEvent;

/// Current persisted schema version. Bump together with a migration step in
/// `store::migrate_document`.
pub const SCHEMA_VERSION: u32 = 2;

/// Long-lived scheduling state, persisted across invocations.
///
/// `cached_events` is only ever overwritten by a *successful* fetch; a failed
/// fetch leaves it untouched so it can serve as the fallback feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleState {
    pub last_fetch: Option<DateTime<Utc>>,
    pub cached_events: Option<Vec<CalendarEvent>>,
    pub exact_checkin: Option<DateTime<Utc>>,
    pub exact_checkout: Option<DateTime<Utc>>,
    pub schema_version: u32,
}

impl Default for ScheduleState {
    fn default() -> Self {
        Self {
            last_fetch: None,
            cached_events: None,
            exact_checkin: None,
            exact_checkout: None,
            schema_version: SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Program,
    Delete,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Program => "program",
            OperationKind::Delete => "delete",
        }
    }
}

/// One lock command awaiting asynchronous hardware confirmation.
///
/// Keyed by lock id: a new submission for the same lock overwrites the prior
/// entry, and any observed device event for the lock removes it, so the table
/// stays bounded by the number of locks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingLockOperation {
    pub lock_id: String,
    pub kind: OperationKind,
    pub submitted_at: DateTime<Utc>,
}

/// Aggregate reliability counters for one operation class.
///
/// Monotonic and write-only: these are reported, never read back to alter
/// behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryClassStats {
    pub successes: u64,
    pub failures: u64,
    /// Cumulative attempt count across successful operations only.
    pub attempts_on_success: u64,
    pub first_try_successes: u64,
}

impl RetryClassStats {
    pub fn record_success(&mut self, attempts: u32) {
        self.successes += 1;
        self.attempts_on_success += u64::from(attempts);
        if attempts == 1 {
            self.first_try_successes += 1;
        }
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Mean attempts per successful operation, for reporting.
    pub fn average_attempts(&self) -> f64 {
        if self.successes == 0 {
            0.0
        } else {
            self.attempts_on_success as f64 / self.successes as f64
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryStatistics {
    pub program: RetryClassStats,
    pub delete: RetryClassStats,
}

impl RetryStatistics {
    pub fn class_mut(&mut self, kind: OperationKind) -> &mut RetryClassStats {
        match kind {
            OperationKind::Program => &mut self.program,
            OperationKind::Delete => &mut self.delete,
        }
    }

    pub fn class(&self, kind: OperationKind) -> &RetryClassStats {
        match kind {
            OperationKind::Program => &self.program,
            OperationKind::Delete => &self.delete,
        }
    }
}
