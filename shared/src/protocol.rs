/// Topic prefix of events published for inbox changes
pub const INBOX_TOPIC_PREFIX: &str = "inbox";

/// Event type names, one per inbox change kind
pub const EVENT_ADDED: &str = "InboxAddedEvent";
pub const EVENT_UPDATED: &str = "InboxUpdatedEvent";
pub const EVENT_REMOVED: &str = "InboxRemovedEvent";

/// API path prefix
pub const API_PREFIX: &str = "/v1";

/// Builds the topic for a change of the given thing, e.g. "inbox/demo:dev:1/added".
pub fn inbox_topic(thing_uid: &str, action: &str) -> String {
    format!("{}/{}/{}", INBOX_TOPIC_PREFIX, thing_uid, action)
}
