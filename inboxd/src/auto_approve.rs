//! Policy engine reacting to inbox and registry changes: approves results that
//! match a predicate and flags duplicates of already provisioned devices.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use anyhow::Result;
use shared::types::{value_to_string, DiscoveryResult, DiscoveryResultFlag, Thing, ThingStatus};
use shared::uid::ThingUID;
use crate::config::AutomationConfig;
use crate::inbox::{lock, Inbox, InboxListener};
use crate::registry::{ThingRegistry, ThingRegistryChangeListener, ThingStatusListener, ThingTypeRegistry};

/// Decides whether a discovery result is approved without user interaction.
pub trait InboxAutoApprovePredicate: Send + Sync {
    fn test(&self, result: &DiscoveryResult) -> bool;
}

impl<F> InboxAutoApprovePredicate for F
where
    F: Fn(&DiscoveryResult) -> bool + Send + Sync,
{
    fn test(&self, result: &DiscoveryResult) -> bool {
        self(result)
    }
}

struct Subscriptions {
    inbox: Arc<dyn InboxListener>,
    registry: Arc<dyn ThingRegistryChangeListener>,
}

pub struct AutomaticInboxProcessor {
    inbox: Arc<Inbox>,
    thing_registry: Arc<dyn ThingRegistry>,
    thing_types: Arc<dyn ThingTypeRegistry>,
    predicates: RwLock<Vec<Arc<dyn InboxAutoApprovePredicate>>>,
    auto_ignore: AtomicBool,
    always_approve: AtomicBool,
    subscriptions: Mutex<Option<Subscriptions>>,
}

impl AutomaticInboxProcessor {
    pub fn new(
        inbox: Arc<Inbox>,
        thing_registry: Arc<dyn ThingRegistry>,
        thing_types: Arc<dyn ThingTypeRegistry>,
    ) -> Self {
        Self {
            inbox,
            thing_registry,
            thing_types,
            predicates: RwLock::new(Vec::new()),
            auto_ignore: AtomicBool::new(true),
            always_approve: AtomicBool::new(false),
            subscriptions: Mutex::new(None),
        }
    }

    /// Subscribes to the inbox and the thing registry and applies `config`.
    /// Status changes are not wired here, the status source registers the
    /// processor as a [`ThingStatusListener`] itself.
    pub fn activate(self: &Arc<Self>, config: &AutomationConfig) {
        let inbox_listener: Arc<dyn InboxListener> = self.clone();
        let registry_listener: Arc<dyn ThingRegistryChangeListener> = self.clone();
        self.thing_registry.add_listener(registry_listener.clone());
        self.inbox.add_listener(inbox_listener.clone());
        *lock(&self.subscriptions) = Some(Subscriptions {
            inbox: inbox_listener,
            registry: registry_listener,
        });
        self.modified(config);
    }

    /// Applies changed settings; newly enabled auto-approval catches up on
    /// everything already staged.
    pub fn modified(&self, config: &AutomationConfig) {
        self.auto_ignore.store(config.auto_ignore, Ordering::SeqCst);
        self.always_approve.store(config.always_approve, Ordering::SeqCst);
        self.auto_approve_staged();
    }

    pub fn deactivate(&self) {
        if let Some(subscriptions) = lock(&self.subscriptions).take() {
            self.inbox.remove_listener(&subscriptions.inbox);
            self.thing_registry.remove_listener(&subscriptions.registry);
        }
    }

    pub fn set_always_approve(&self, always_approve: bool) {
        self.always_approve.store(always_approve, Ordering::SeqCst);
        self.auto_approve_staged();
    }

    pub fn set_auto_ignore(&self, auto_ignore: bool) {
        self.auto_ignore.store(auto_ignore, Ordering::SeqCst);
    }

    /// Registers a predicate and runs it against the NEW results already in the
    /// inbox. Registering the same predicate again has no effect.
    pub fn add_predicate(&self, predicate: Arc<dyn InboxAutoApprovePredicate>) {
        {
            let Ok(mut predicates) = self.predicates.write() else {
                return;
            };
            if predicates.iter().any(|p| Arc::ptr_eq(p, &predicate)) {
                return;
            }
            predicates.push(predicate.clone());
        }

        for result in self.inbox.get_all() {
            if result.flag == DiscoveryResultFlag::New && evaluate(predicate.as_ref(), &result) {
                self.approve(&result);
            }
        }
    }

    pub fn remove_predicate(&self, predicate: &Arc<dyn InboxAutoApprovePredicate>) {
        if let Ok(mut predicates) = self.predicates.write() {
            predicates.retain(|p| !Arc::ptr_eq(p, predicate));
        }
    }

    fn auto_approve_staged(&self) {
        for result in self.inbox.get_all() {
            if result.flag == DiscoveryResultFlag::New && self.is_to_be_auto_approved(&result) {
                self.approve(&result);
            }
        }
    }

    fn is_to_be_auto_approved(&self, result: &DiscoveryResult) -> bool {
        if self.always_approve.load(Ordering::SeqCst) {
            return true;
        }
        let predicates = self.predicates.read().map(|p| p.clone()).unwrap_or_default();
        predicates.iter().any(|p| evaluate(p.as_ref(), result))
    }

    fn approve(&self, result: &DiscoveryResult) {
        match self.inbox.approve(&result.thing_uid, None, None) {
            Ok(Some(thing)) => tracing::info!("Auto-approved {} as thing {}", result.thing_uid, thing.uid),
            Ok(None) => {}
            Err(e) => tracing::warn!("Auto-approval of {} failed: {}", result.thing_uid, e),
        }
    }

    fn representation_value_of(&self, thing: &Thing) -> Option<String> {
        let thing_type = self.thing_types.thing_type(&thing.thing_type_uid)?;
        let property = thing_type.representation_property?;
        thing
            .properties
            .get(&property)
            .cloned()
            .or_else(|| thing.configuration.get(&property).map(value_to_string))
    }

    /// Staged results of `thing`'s binding carrying its representation value
    /// and the given flag.
    fn duplicates_of(&self, thing: &Thing, flag: DiscoveryResultFlag) -> Vec<DiscoveryResult> {
        let Some(value) = self.representation_value_of(thing) else {
            return Vec::new();
        };
        self.inbox
            .stream()
            .filter(|r| r.flag == flag)
            .filter(|r| r.binding_id() == thing.thing_type_uid.binding_id())
            .filter(|r| r.representation_value().as_deref() == Some(value.as_str()))
            .collect()
    }
}

/// Runs a predicate, counting a panic as "no match".
fn evaluate(predicate: &dyn InboxAutoApprovePredicate, result: &DiscoveryResult) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| predicate.test(result))) {
        Ok(matched) => matched,
        Err(_) => {
            tracing::error!("Auto-approve predicate panicked on {}", result.thing_uid);
            false
        }
    }
}

impl InboxListener for AutomaticInboxProcessor {
    fn thing_added(&self, inbox: &Inbox, result: &DiscoveryResult) -> Result<()> {
        if self.auto_ignore.load(Ordering::SeqCst) {
            if let Some(value) = result.representation_value() {
                let provisioned = self.thing_registry.all().into_iter().any(|thing| {
                    thing.thing_type_uid.binding_id() == result.binding_id()
                        && self.representation_value_of(&thing).as_deref() == Some(value.as_str())
                });
                if provisioned {
                    tracing::debug!("Auto-ignoring the inbox entry for the representation value '{}'", value);
                    inbox.set_flag(&result.thing_uid, Some(DiscoveryResultFlag::Ignored));
                }
            }
        }

        if self.is_to_be_auto_approved(result) {
            self.approve(result);
        }
        Ok(())
    }
}

impl ThingRegistryChangeListener for AutomaticInboxProcessor {
    fn added(&self, _thing: &Thing) {}

    fn removed(&self, thing: &Thing) {
        let ignored = self.duplicates_of(thing, DiscoveryResultFlag::Ignored);
        if let [result] = ignored.as_slice() {
            tracing::debug!("Removing the ignored result {} from the inbox", result.thing_uid);
            self.inbox.remove(&result.thing_uid);
        }
    }

    fn updated(&self, _old: &Thing, _thing: &Thing) {}
}

impl ThingStatusListener for AutomaticInboxProcessor {
    fn status_changed(&self, thing_uid: &ThingUID, status: ThingStatus) {
        if status != ThingStatus::Online || !self.auto_ignore.load(Ordering::SeqCst) {
            return;
        }
        let Some(thing) = self.thing_registry.get(thing_uid) else {
            return;
        };
        let candidates = self.duplicates_of(&thing, DiscoveryResultFlag::New);
        if let [result] = candidates.as_slice() {
            tracing::debug!("Auto-ignoring {}, thing {} went online", result.thing_uid, thing_uid);
            self.inbox.set_flag(&result.thing_uid, Some(DiscoveryResultFlag::Ignored));
        }
    }
}
