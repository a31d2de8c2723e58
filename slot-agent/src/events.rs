//! Notifications published by the operation supervisor.
//!
//! Discrete events go out on a broadcast channel; observers that only care
//! about current state use the supervisor's observables instead.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::supervisor::OperationKind;

/// Maximum number of queued events per subscriber
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SupervisorEvent {
    /// An operation was accepted and its process launched
    #[serde(rename = "operation:started")]
    OperationStarted { kind: OperationKind },

    /// New text appended to the output buffer
    #[serde(rename = "operation:output")]
    Output { text: String },

    /// Percentage reported by an update run
    #[serde(rename = "operation:progress")]
    Progress { percent: u8 },

    #[serde(rename = "operation:succeeded")]
    OperationSucceeded { title: String, message: String },

    #[serde(rename = "operation:failed")]
    OperationFailed { title: String, message: String },

    /// The backup catalog was rebuilt from disk
    #[serde(rename = "catalog:refreshed")]
    CatalogRefreshed { backups: usize },
}

/// Fan-out of supervisor events to any number of listeners.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<SupervisorEvent>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Having no listeners is not an error.
    pub fn publish(&self, event: SupervisorEvent) {
        match self.tx.send(event) {
            Ok(count) => debug!("Delivered event to {} listener(s)", count),
            Err(broadcast::error::SendError(event)) => {
                debug!("No listeners for event: {:?}", event)
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.tx.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_listeners() {
        let notifier = Notifier::new();
        notifier.publish(SupervisorEvent::Progress { percent: 10 });
    }

    #[test]
    fn test_event_serialization() {
        let event = SupervisorEvent::OperationFailed {
            title: "Error".into(),
            message: "process crashed".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("operation:failed"));
        assert!(json.contains("process crashed"));
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.publish(SupervisorEvent::Progress { percent: 10 });
        notifier.publish(SupervisorEvent::Progress { percent: 55 });

        assert_eq!(rx.recv().await.unwrap(), SupervisorEvent::Progress { percent: 10 });
        assert_eq!(rx.recv().await.unwrap(), SupervisorEvent::Progress { percent: 55 });
    }
}
