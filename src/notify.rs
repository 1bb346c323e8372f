use std::sync::{Arc, Mutex};

use anyhow::Result;

/// Fire-and-forget delivery target for user-facing messages (push, SMS,
/// whatever the host wires up).
pub trait NotificationSink: Send + Sync {
    fn send(&self, message: &str) -> Result<()>;
}

/// Fans a message out to every registered sink. Sink failures are caught and
/// logged, never propagated; a broken notification channel must not block a
/// scheduled action.
#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn notify(&self, message: &str) {
        log::info!("[Notify] {}", message);
        for sink in &self.sinks {
            if let Err(e) = sink.send(message) {
                log::warn!("[Notify] sink delivery failed: {}", e);
            }
        }
    }
}

/// Capturing sink for tests.
#[derive(Default)]
pub struct MemorySink {
    pub messages: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("notify mutex").clone()
    }
}

impl NotificationSink for MemorySink {
    fn send(&self, message: &str) -> Result<()> {
        self.messages
            .lock()
            .expect("notify mutex")
            .push(message.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl NotificationSink for FailingSink {
        fn send(&self, _message: &str) -> Result<()> {
            Err(anyhow::anyhow!("delivery refused"))
        }
    }

    #[test]
    fn test_sink_failure_never_propagates() {
        let captured = Arc::new(MemorySink::default());
        let notifier = Notifier::new()
            .with_sink(Arc::new(FailingSink))
            .with_sink(captured.clone());

        notifier.notify("check-out complete");

        assert_eq!(captured.messages(), vec!["check-out complete".to_string()]);
    }
}
