use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// One reliability/outcome record. These feed the host's analytics surface;
/// nothing in this crate reads them back.
#[derive(Debug, Clone)]
pub struct AnalyticsEvent {
    pub kind: String,
    pub success: bool,
    pub attempts: u32,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl AnalyticsEvent {
    pub fn new(kind: &str, success: bool, attempts: u32, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            success,
            attempts,
            detail: detail.into(),
            at: Utc::now(),
        }
    }

    pub fn outcome(kind: &str, success: bool, detail: impl Into<String>) -> Self {
        Self::new(kind, success, 0, detail)
    }
}

pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: AnalyticsEvent);
}

/// Default sink: analytics land in the log stream.
pub struct LogAnalytics;

impl AnalyticsSink for LogAnalytics {
    fn record(&self, event: AnalyticsEvent) {
        log::info!(
            "[Analytics] {} {} attempts={} {}",
            event.kind,
            if event.success { "ok" } else { "failed" },
            event.attempts,
            event.detail
        );
    }
}

/// Capturing sink for tests and host integrations that batch-upload.
#[derive(Default)]
pub struct MemoryAnalytics {
    pub events: Mutex<Vec<AnalyticsEvent>>,
}

impl MemoryAnalytics {
    pub fn kinds(&self) -> Vec<String> {
        self.events
            .lock()
            .expect("analytics mutex")
            .iter()
            .map(|e| e.kind.clone())
            .collect()
    }

    pub fn find(&self, kind: &str) -> Vec<AnalyticsEvent> {
        self.events
            .lock()
            .expect("analytics mutex")
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

impl AnalyticsSink for MemoryAnalytics {
    fn record(&self, event: AnalyticsEvent) {
        self.events.lock().expect("analytics mutex").push(event);
    }
}
