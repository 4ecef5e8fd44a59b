//! Installer event fan-out for embedders that want to observe progress.

use chrono::{DateTime, Utc};
use log::trace;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::resource::EntityId;
use crate::task::{TaskKind, TaskOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallerEventKind {
    Installed,
    Updated,
    Removed,
    Retrying,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallerEvent {
    pub entity: EntityId,
    pub kind: InstallerEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl InstallerEvent {
    /// Builds the event describing an executed task.
    pub fn from_outcome(
        entity: &EntityId,
        kind: TaskKind,
        outcome: &TaskOutcome,
        version: Option<String>,
    ) -> Self {
        let (kind, message) = match (outcome, kind) {
            (TaskOutcome::Done, TaskKind::Install) => (InstallerEventKind::Installed, None),
            (TaskOutcome::Done, TaskKind::Update) => (InstallerEventKind::Updated, None),
            (TaskOutcome::Done, TaskKind::Remove) => (InstallerEventKind::Removed, None),
            (TaskOutcome::RetryLater(reason), _) => {
                (InstallerEventKind::Retrying, Some(reason.clone()))
            }
            (TaskOutcome::Failed(reason), _) => (InstallerEventKind::Failed, Some(reason.clone())),
        };
        Self {
            entity: entity.clone(),
            kind,
            version,
            message,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<InstallerEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn send(&self, event: InstallerEvent) {
        if self.sender.send(event).is_err() {
            trace!("No installer event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstallerEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_subscribers() {
        let events = EventBroadcaster::new(4);
        events.send(InstallerEvent::from_outcome(
            &EntityId::artifact("foo"),
            TaskKind::Install,
            &TaskOutcome::Done,
            None,
        ));
        assert_eq!(events.receiver_count(), 0);
    }

    #[test]
    fn test_subscriber_receives_event() {
        let events = EventBroadcaster::new(4);
        let mut rx = events.subscribe();
        events.send(InstallerEvent::from_outcome(
            &EntityId::artifact("foo"),
            TaskKind::Update,
            &TaskOutcome::RetryLater("admin not ready".to_string()),
            Some("1.1.0".to_string()),
        ));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, InstallerEventKind::Retrying);
        assert_eq!(event.message.as_deref(), Some("admin not ready"));
        assert_eq!(event.version.as_deref(), Some("1.1.0"));
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = InstallerEvent::from_outcome(
            &EntityId::configuration("org.example"),
            TaskKind::Remove,
            &TaskOutcome::Done,
            None,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["entity"], "config:org.example");
        assert_eq!(json["kind"], "removed");
        assert!(json.get("version").is_none());
        assert!(json.get("timestamp").is_some());
    }
}
