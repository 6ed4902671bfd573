use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use anyhow::Result;
use shared::types::DiscoveryResult;
use crate::events::{InboxEvent, InboxEventKind};
use super::Inbox;

/// Observer of inbox changes. Errors and panics are logged and do not reach
/// the inbox or other listeners.
pub trait InboxListener: Send + Sync {
    fn thing_added(&self, _inbox: &Inbox, _result: &DiscoveryResult) -> Result<()> {
        Ok(())
    }

    fn thing_updated(&self, _inbox: &Inbox, _result: &DiscoveryResult) -> Result<()> {
        Ok(())
    }

    fn thing_removed(&self, _inbox: &Inbox, _result: &DiscoveryResult) -> Result<()> {
        Ok(())
    }
}

impl Inbox {
    /// Registers a listener; registering the same one twice has no effect.
    pub fn add_listener(&self, listener: Arc<dyn InboxListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                listeners.push(listener);
            }
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn InboxListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    /// Tells every listener about the change, then posts the outward event.
    /// For additions and updates the event carries the value stored after the
    /// listeners ran, and is skipped if a listener removed the result.
    pub(crate) fn notify(&self, kind: InboxEventKind, result: DiscoveryResult) {
        let listeners = self.listeners.read().map(|l| l.clone()).unwrap_or_default();
        for listener in listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match kind {
                InboxEventKind::Added => listener.thing_added(self, &result),
                InboxEventKind::Updated => listener.thing_updated(self, &result),
                InboxEventKind::Removed => listener.thing_removed(self, &result),
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(
                    "Inbox listener failed on {} of {}: {:#}",
                    kind.as_str(),
                    result.thing_uid,
                    e
                ),
                Err(_) => tracing::error!(
                    "Inbox listener panicked on {} of {}",
                    kind.as_str(),
                    result.thing_uid
                ),
            }
        }

        let current = match kind {
            InboxEventKind::Removed => Some(result),
            _ => self.get(&result.thing_uid),
        };
        let (Some(publisher), Some(current)) = (&self.publisher, current) else {
            return;
        };
        if let Err(e) = publisher.post(InboxEvent::new(kind, current)) {
            tracing::error!("Failed to post inbox {} event: {:#}", kind.as_str(), e);
        }
    }
}
