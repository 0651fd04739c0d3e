//! Best-effort fan-out of state changes to operator clients.
//!
//! Publishing never blocks and never fails the caller: with no subscribers
//! the notification is dropped, and a slow subscriber lags instead of
//! applying back-pressure to the core.

use log::warn;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::messages::{format_frame, Resource, Verb};

/// Default number of notifications buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

/// One pushed change.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// `SERVER_INSERT`, `SERVER_UPDATE` or `SERVER_DELETE`.
    pub verb: Verb,
    /// What changed.
    pub resource: Resource,
    /// New state (or the removed record).
    pub payload: serde_json::Value,
}

impl Notification {
    /// Operator frame text.
    pub fn to_frame(&self) -> String {
        format_frame(self.verb, self.resource, &self.payload.to_string())
    }
}

/// Broadcast hub for [`Notification`]s.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier {
    /// Hub buffering `capacity` notifications per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New receiver seeing every notification published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Publish a change.
    pub fn publish<T: Serialize>(&self, verb: Verb, resource: Resource, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("dropping {} notification: {e}", resource.as_str());
                return;
            }
        };
        // No subscribers is fine.
        let _ = self.tx.send(Notification {
            verb,
            resource,
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_silent() {
        let notifier = Notifier::new(4);
        notifier.publish(Verb::ServerUpdate, Resource::Train, &serde_json::json!({"id": 1}));
    }

    #[tokio::test]
    async fn subscribers_receive_frames() {
        let notifier = Notifier::new(4);
        let mut rx = notifier.subscribe();
        notifier.publish(Verb::ServerDelete, Resource::Stretch, &serde_json::json!({"id": 2}));

        let note = rx.recv().await.unwrap();
        assert_eq!(note.to_frame(), r#"SERVER_DELETE:STRETCH${"id":2}"#);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let notifier = Notifier::new(2);
        let mut rx = notifier.subscribe();
        for id in 0..5 {
            notifier.publish(Verb::ServerUpdate, Resource::Signal, &id);
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
