use anyhow::Result;
use serde::Serialize;
use tokio::sync::broadcast;
use shared::protocol::{inbox_topic, EVENT_ADDED, EVENT_REMOVED, EVENT_UPDATED};
use shared::types::DiscoveryResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InboxEventKind {
    Added,
    Updated,
    Removed,
}

impl InboxEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxEventKind::Added => "added",
            InboxEventKind::Updated => "updated",
            InboxEventKind::Removed => "removed",
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            InboxEventKind::Added => EVENT_ADDED,
            InboxEventKind::Updated => EVENT_UPDATED,
            InboxEventKind::Removed => EVENT_REMOVED,
        }
    }
}

/// Outward notification about an inbox change, carrying the result as stored.
#[derive(Debug, Clone, Serialize)]
pub struct InboxEvent {
    pub topic: String,
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub kind: InboxEventKind,
    pub result: DiscoveryResult,
}

impl InboxEvent {
    pub fn new(kind: InboxEventKind, result: DiscoveryResult) -> Self {
        Self {
            topic: inbox_topic(&result.thing_uid.to_string(), kind.as_str()),
            event_type: kind.event_type(),
            kind,
            result,
        }
    }
}

/// The external event bus.
pub trait EventPublisher: Send + Sync {
    fn post(&self, event: InboxEvent) -> Result<()>;
}

/// Publishes onto a tokio broadcast channel; having no subscribers is not an error.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<InboxEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboxEvent> {
        self.tx.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn post(&self, event: InboxEvent) -> Result<()> {
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for inbox event");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_topic() {
        let result = DiscoveryResult::builder("demo:dev:1".parse().unwrap()).build();
        let event = InboxEvent::new(InboxEventKind::Removed, result);
        assert_eq!(event.topic, "inbox/demo:dev:1/removed");
        assert_eq!(event.event_type, "InboxRemovedEvent");
    }

    #[test]
    fn test_broadcast_publisher_delivers() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();
        let result = DiscoveryResult::builder("demo:dev:1".parse().unwrap()).build();

        publisher.post(InboxEvent::new(InboxEventKind::Added, result)).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, InboxEventKind::Added);
    }
}
