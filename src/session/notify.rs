//! Cross-session notice of created files

use tokio::sync::broadcast;

use super::SessionId;

/// Default number of notices buffered per subscriber
pub const DEFAULT_NOTICE_CAPACITY: usize = 256;

/// A file created through session `origin`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNotice {
    pub origin: SessionId,
    pub path: String,
}

/// Broadcasts successful `create` calls to every live session.
#[derive(Debug, Clone)]
pub struct CreateNotifier {
    tx: broadcast::Sender<CreateNotice>,
}

impl CreateNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CreateNotice> {
        self.tx.subscribe()
    }

    /// Publish a notice; returns how many sessions will see it
    pub fn publish(&self, origin: SessionId, path: impl Into<String>) -> usize {
        self.tx
            .send(CreateNotice {
                origin,
                path: path.into(),
            })
            .unwrap_or(0)
    }
}

impl Default for CreateNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_NOTICE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let notifier = CreateNotifier::default();
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();

        assert_eq!(notifier.publish(SessionId(7), "/tmp/x"), 2);

        let expected = CreateNotice {
            origin: SessionId(7),
            path: "/tmp/x".to_string(),
        };
        assert_eq!(a.recv().await.unwrap(), expected);
        assert_eq!(b.recv().await.unwrap(), expected);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let notifier = CreateNotifier::new(4);
        assert_eq!(notifier.publish(SessionId(1), "/a"), 0);
    }
}
