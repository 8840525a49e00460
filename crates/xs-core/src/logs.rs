//! Fan-out of the active tunnel's output and lifecycle events.
//!
//! Live only: subscribers see events published after they subscribed. A slow
//! subscriber loses the oldest events and is told how many it missed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// A line of engine stdout/stderr.
    Log,
    /// A lifecycle transition or stream notice.
    Info,
    Error,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Log => "log",
            LogKind::Info => "info",
            LogKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    #[serde(skip)]
    pub kind: LogKind,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEvent {
    pub fn new(kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self::new(LogKind::Log, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogKind::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogKind::Error, message)
    }

    /// Notice sent to a subscriber that fell behind.
    pub fn skipped(count: u64) -> Self {
        Self::info(format!("skipped {count} log lines"))
    }
}

#[derive(Debug, Clone)]
pub struct LogHub {
    tx: broadcast::Sender<LogEvent>,
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LogHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: LogEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn no_replay_for_late_subscribers() {
        let hub = LogHub::new(8);
        hub.publish(LogEvent::log("before"));
        let mut rx = hub.subscribe();
        hub.publish(LogEvent::log("after"));
        assert_eq!(rx.recv().await.unwrap().message, "after");
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_how_much_it_missed() {
        let hub = LogHub::new(2);
        let mut rx = hub.subscribe();
        for i in 0..5 {
            hub.publish(LogEvent::log(format!("line {i}")));
        }
        match rx.recv().await {
            Err(RecvError::Lagged(n)) => {
                assert_eq!(n, 3);
                assert_eq!(LogEvent::skipped(n).message, "skipped 3 log lines");
            }
            other => panic!("expected lag, got {other:?}"),
        }
        assert_eq!(rx.recv().await.unwrap().message, "line 3");
    }

    #[test]
    fn wire_shape_omits_kind() {
        let v = serde_json::to_value(LogEvent::error("boom")).unwrap();
        assert_eq!(v["message"], "boom");
        assert!(v.get("kind").is_none());
        assert!(v["timestamp"].is_string());
    }
}
