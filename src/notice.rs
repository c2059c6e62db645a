//! Non-blocking operator notifications.
//!
//! The engine reports background outcomes (sync results, failed uploads,
//! auto-archives) without ever blocking on the UI. Notices go out over a
//! broadcast channel; the embedding shell renders them as toasts. Nobody
//! listening is fine.

use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Error,
}

/// A transient operator-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
}

/// Broadcast hub for notices.
pub struct NoticeHub {
    tx: broadcast::Sender<Notice>,
}

impl Default for NoticeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NoticeHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn push(&self, severity: Severity, message: impl Into<String>) {
        let notice = Notice {
            severity,
            message: message.into(),
        };
        debug!(severity = ?notice.severity, message = %notice.message, "notice");
        let _ = self.tx.send(notice);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(Severity::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(Severity::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(Severity::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_pushed_notices() {
        let hub = NoticeHub::new();
        let mut rx = hub.subscribe();
        hub.success("order submitted");

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.severity, Severity::Success);
        assert_eq!(notice.message, "order submitted");
    }

    #[test]
    fn push_without_subscribers_does_not_panic() {
        let hub = NoticeHub::new();
        hub.error("remote unreachable");
    }
}
