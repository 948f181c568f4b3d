//! Transient success/failure notices published by mutations.

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Fan-out of notices to any number of subscribers. Publishing with nobody
/// listening is fine; slow subscribers lose the oldest notices.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notice>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    pub fn success(&self, message: impl Into<String>) {
        self.publish(NoticeLevel::Success, message.into());
    }

    pub fn failure(&self, message: impl Into<String>) {
        self.publish(NoticeLevel::Failure, message.into());
    }

    fn publish(&self, level: NoticeLevel, message: String) {
        // Err only means there is no subscriber right now.
        let _ = self.sender.send(Notice { level, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_notices_in_order() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();
        notifier.success("Todo created successfully");
        notifier.failure("Failed to delete todo");

        assert_eq!(rx.try_recv().unwrap().level, NoticeLevel::Success);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.level, NoticeLevel::Failure);
        assert_eq!(second.message, "Failed to delete todo");
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        Notifier::new(1).success("nobody listens");
    }
}
