//! The inbox: staging store for discovery results awaiting approval.
//!
//! Mutations of stored results happen under one store-wide lock which is
//! always released before listeners run. Listeners, the thing registry and the
//! approval path can therefore call back into the inbox freely.

pub mod approval;
pub mod handle;
pub mod listener;
pub mod pending;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::types::{value_to_string, DiscoveryResult, DiscoveryResultFlag, Thing, ThingType};
use shared::uid::{ThingTypeUID, ThingUID};
use crate::events::{EventPublisher, InboxEventKind};
use crate::registry::{
    ConfigNormalizer, DefaultNormalizer, ThingHandlerFactory, ThingRegistry,
    ThingRegistryChangeListener, ThingTypeRegistry,
};
use crate::storage::Storage;

pub use handle::InboxHandle;
pub use listener::InboxListener;
pub use pending::{PendingResult, MAX_RETRIES};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// What the merge step decided while holding the mutation lock.
enum Merge {
    Registered { thing: Thing, managed: bool },
    Stored(InboxEventKind, DiscoveryResult),
    Failed,
}

pub struct Inbox {
    storage: Arc<dyn Storage<DiscoveryResult>>,
    thing_registry: Arc<dyn ThingRegistry>,
    thing_types: Arc<dyn ThingTypeRegistry>,
    normalizer: Arc<dyn ConfigNormalizer>,
    publisher: Option<Arc<dyn EventPublisher>>,
    factories: RwLock<Vec<Arc<dyn ThingHandlerFactory>>>,
    listeners: RwLock<Vec<Arc<dyn InboxListener>>>,
    /// Results whose thing type is not known yet
    delayed: Mutex<HashMap<ThingUID, PendingResult>>,
    /// Which discovery source produced a stored result
    discoverers: Mutex<HashMap<ThingUID, String>>,
    mutation: Mutex<()>,
    registry_hook: Mutex<Option<Arc<dyn ThingRegistryChangeListener>>>,
}

impl Inbox {
    pub fn new(
        storage: Arc<dyn Storage<DiscoveryResult>>,
        thing_registry: Arc<dyn ThingRegistry>,
        thing_types: Arc<dyn ThingTypeRegistry>,
    ) -> Self {
        Self {
            storage,
            thing_registry,
            thing_types,
            normalizer: Arc::new(DefaultNormalizer),
            publisher: None,
            factories: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            delayed: Mutex::new(HashMap::new()),
            discoverers: Mutex::new(HashMap::new()),
            mutation: Mutex::new(()),
            registry_hook: Mutex::new(None),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn ConfigNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn add_thing_handler_factory(&self, factory: Arc<dyn ThingHandlerFactory>) {
        if let Ok(mut factories) = self.factories.write() {
            factories.push(factory);
        }
    }

    pub fn remove_thing_handler_factory(&self, factory: &Arc<dyn ThingHandlerFactory>) {
        if let Ok(mut factories) = self.factories.write() {
            factories.retain(|f| !Arc::ptr_eq(f, factory));
        }
    }

    /// Subscribes to the thing registry so approved things leave the inbox.
    pub fn activate(self: &Arc<Self>) {
        let hook: Arc<dyn ThingRegistryChangeListener> = self.clone();
        self.thing_registry.add_listener(hook.clone());
        *lock(&self.registry_hook) = Some(hook);
    }

    pub fn deactivate(&self) {
        if let Some(hook) = lock(&self.registry_hook).take() {
            self.thing_registry.remove_listener(&hook);
        }
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.clear();
        }
        self.fail_pending();
    }

    /// Snapshot of all stored results; empty if the storage fails.
    pub fn get_all(&self) -> Vec<DiscoveryResult> {
        match self.storage.values() {
            Ok(values) => values,
            Err(e) => {
                tracing::error!("Failed to read inbox storage: {:#}", e);
                Vec::new()
            }
        }
    }

    pub fn stream(&self) -> impl Iterator<Item = DiscoveryResult> {
        self.get_all().into_iter()
    }

    pub fn get(&self, thing_uid: &ThingUID) -> Option<DiscoveryResult> {
        match self.storage.get(&thing_uid.to_string()) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Failed to read inbox entry {}: {:#}", thing_uid, e);
                None
            }
        }
    }

    fn store(&self, result: &DiscoveryResult) -> bool {
        match self.storage.put(&result.thing_uid.to_string(), result) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to store inbox entry {}: {:#}", result.thing_uid, e);
                false
            }
        }
    }

    fn delete(&self, thing_uid: &ThingUID) -> Option<DiscoveryResult> {
        lock(&self.discoverers).remove(thing_uid);
        match self.storage.remove(&thing_uid.to_string()) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!("Failed to remove inbox entry {}: {:#}", thing_uid, e);
                None
            }
        }
    }

    /// Merges a reported result into the store, or pushes its configuration into
    /// an already registered thing. Unknown thing types park the result for retry.
    pub(crate) fn process(&self, pending: PendingResult) {
        let PendingResult {
            result,
            source,
            reply,
            retry_count,
        } = pending;
        let thing_uid = result.thing_uid.clone();

        // a fresh report supersedes one waiting for its type
        lock(&self.delayed).remove(&thing_uid);

        let Some(thing_type) = self.thing_types.thing_type(&result.thing_type_uid) else {
            if retry_count >= MAX_RETRIES {
                tracing::warn!(
                    "Giving up on discovery result {}: thing type {} still unknown after {} retries",
                    thing_uid,
                    result.thing_type_uid,
                    retry_count
                );
                let _ = reply.send(false);
                return;
            }
            tracing::debug!(
                "Thing type {} of {} is not known yet, delaying (attempt {})",
                result.thing_type_uid,
                thing_uid,
                retry_count
            );
            lock(&self.delayed).insert(
                thing_uid,
                PendingResult {
                    result,
                    source,
                    reply,
                    retry_count: retry_count + 1,
                },
            );
            return;
        };

        let result = self.normalize_result(result, &thing_type);

        let outcome = {
            let _guard = lock(&self.mutation);
            match self.thing_registry.get(&thing_uid) {
                Some(thing) => Merge::Registered {
                    managed: self.thing_registry.is_managed(&thing_uid),
                    thing,
                },
                None => match self.get(&thing_uid) {
                    None => self
                        .store(&result)
                        .then(|| Merge::Stored(InboxEventKind::Added, result.clone()))
                        .unwrap_or(Merge::Failed),
                    Some(mut stored) => {
                        stored.synchronize(&result);
                        self.store(&stored)
                            .then(|| Merge::Stored(InboxEventKind::Updated, stored))
                            .unwrap_or(Merge::Failed)
                    }
                },
            }
        };

        let (kind, stored) = match outcome {
            Merge::Stored(kind, stored) => (kind, stored),
            Merge::Registered { thing, managed } => {
                tracing::debug!(
                    "Discovery result {} not added to inbox, it is already registered as a thing",
                    thing_uid
                );
                // registry updates notify listeners, so this runs unlocked
                if managed {
                    self.synchronize_configuration(thing, &result, &thing_type);
                }
                let _ = reply.send(false);
                return;
            }
            Merge::Failed => {
                let _ = reply.send(false);
                return;
            }
        };
        if let Some(source) = source {
            lock(&self.discoverers).insert(thing_uid.clone(), source);
        }
        match kind {
            InboxEventKind::Added => tracing::info!("Added new thing '{}' to inbox", thing_uid),
            _ => tracing::debug!("Updated discovery result for '{}'", thing_uid),
        }
        self.notify(kind, stored);
        let _ = reply.send(true);
    }

    /// Normalizes values of properties that are config parameters of the type.
    fn normalize_result(&self, mut result: DiscoveryResult, thing_type: &ThingType) -> DiscoveryResult {
        for (key, value) in result.properties.iter_mut() {
            if let Some(parameter) = thing_type.parameter(key) {
                *value = self.normalizer.normalize(value, Some(parameter));
            }
        }
        result
    }

    /// Splits the result's properties into free-form properties and config values.
    pub(crate) fn split_properties(
        &self,
        result: &DiscoveryResult,
        thing_type: Option<&ThingType>,
    ) -> (HashMap<String, String>, HashMap<String, Value>) {
        let mut properties = HashMap::new();
        let mut configuration = HashMap::new();
        for (key, value) in &result.properties {
            match thing_type.and_then(|t| t.parameter(key)) {
                Some(parameter) => {
                    configuration.insert(key.clone(), self.normalizer.normalize(value, Some(parameter)));
                }
                None => {
                    properties.insert(key.clone(), value_to_string(value));
                }
            }
        }
        (properties, configuration)
    }

    /// Overwrites config values of a registered thing that differ from the
    /// reported ones and persists the thing if anything changed.
    fn synchronize_configuration(&self, mut thing: Thing, result: &DiscoveryResult, thing_type: &ThingType) {
        let mut updated = false;
        for (key, value) in &result.properties {
            if !thing.configuration.contains_key(key) {
                continue;
            }
            let normalized = self.normalizer.normalize(value, thing_type.parameter(key));
            if thing.configuration.get(key) == Some(&normalized) {
                continue;
            }
            thing.configuration.insert(key.clone(), normalized);
            updated = true;
        }

        if updated {
            tracing::debug!("The configuration for thing '{}' is updated", thing.uid);
            let uid = thing.uid.clone();
            if let Err(e) = self.thing_registry.update(thing) {
                tracing::error!("Failed to update configuration of {}: {:#}", uid, e);
            }
        }
    }

    /// Deletes the result. Unless a thing with this UID is registered, results
    /// staged below it as their bridge go as well.
    pub fn remove(&self, thing_uid: &ThingUID) -> bool {
        let removed = {
            let _guard = lock(&self.mutation);
            if self.get(thing_uid).is_none() {
                return false;
            }
            let mut removed = Vec::new();
            if self.thing_registry.get(thing_uid).is_none() {
                removed.extend(self.take_bridge_children(thing_uid));
            }
            match self.delete(thing_uid) {
                Some(result) => removed.push(result),
                None => return false,
            }
            removed
        };

        for result in removed {
            tracing::info!("Removed thing '{}' from inbox", result.thing_uid);
            self.notify(InboxEventKind::Removed, result);
        }
        true
    }

    /// Removes every result whose bridge is `bridge_uid`.
    pub fn remove_results_for_bridge(&self, bridge_uid: &ThingUID) -> Vec<ThingUID> {
        let removed = {
            let _guard = lock(&self.mutation);
            self.take_bridge_children(bridge_uid)
        };
        let uids = removed.iter().map(|r| r.thing_uid.clone()).collect();
        for result in removed {
            tracing::debug!("Removed '{}' from inbox with its bridge {}", result.thing_uid, bridge_uid);
            self.notify(InboxEventKind::Removed, result);
        }
        uids
    }

    // caller holds the mutation lock
    fn take_bridge_children(&self, bridge_uid: &ThingUID) -> Vec<DiscoveryResult> {
        self.get_all()
            .into_iter()
            .filter(|r| r.bridge_uid.as_ref() == Some(bridge_uid))
            .filter_map(|r| self.delete(&r.thing_uid))
            .collect()
    }

    /// Sets the flag of a stored result, `None` meaning NEW. Returns false if
    /// there is no such result.
    pub fn set_flag(&self, thing_uid: &ThingUID, flag: Option<DiscoveryResultFlag>) -> bool {
        let updated = {
            let _guard = lock(&self.mutation);
            let Some(mut result) = self.get(thing_uid) else {
                tracing::warn!("Cannot set flag of '{}', it is not in the inbox", thing_uid);
                return false;
            };
            result.flag = flag.unwrap_or_default();
            self.store(&result).then_some(result)
        };

        match updated {
            Some(result) => {
                self.notify(InboxEventKind::Updated, result);
                true
            }
            None => false,
        }
    }

    /// Removes results whose TTL ran out by `now`.
    pub fn remove_expired(&self, now: DateTime<Utc>) -> Vec<ThingUID> {
        let mut removed = Vec::new();
        for result in self.get_all() {
            if !result.is_expired(now) {
                continue;
            }
            tracing::debug!("Inbox entry for thing {} is expired and will be removed", result.thing_uid);
            if self.remove(&result.thing_uid) {
                removed.push(result.thing_uid);
            }
        }
        removed
    }

    /// Re-runs every delayed result through `process`. Returns how many are
    /// still waiting afterwards.
    pub(crate) fn retry_pending(&self) -> usize {
        let pending: Vec<PendingResult> = lock(&self.delayed).drain().map(|(_, p)| p).collect();
        if !pending.is_empty() {
            tracing::debug!("Retrying {} delayed discovery results", pending.len());
        }
        for entry in pending {
            self.process(entry);
        }
        self.pending_count()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.delayed).len()
    }

    /// Resolves every delayed result as not added.
    pub(crate) fn fail_pending(&self) {
        let pending: Vec<PendingResult> = lock(&self.delayed).drain().map(|(_, p)| p).collect();
        for entry in pending {
            tracing::debug!("Dropping delayed discovery result {}", entry.result.thing_uid);
            let _ = entry.reply.send(false);
        }
    }

    /// Removes results of the given types that `source` reported before
    /// `timestamp`, optionally only those below `bridge_uid`.
    pub fn remove_older_results(
        &self,
        source: &str,
        timestamp: DateTime<Utc>,
        thing_type_uids: &[ThingTypeUID],
        bridge_uid: Option<&ThingUID>,
    ) -> Vec<ThingUID> {
        let mut removed = Vec::new();
        for result in self.get_all() {
            if !thing_type_uids.contains(&result.thing_type_uid) || result.timestamp >= timestamp {
                continue;
            }
            let same_source = lock(&self.discoverers)
                .get(&result.thing_uid)
                .map_or(true, |discoverer| discoverer == source);
            if !same_source {
                continue;
            }
            if bridge_uid.is_some_and(|bridge| result.bridge_uid.as_ref() != Some(bridge)) {
                continue;
            }
            if self.remove(&result.thing_uid) {
                tracing::debug!("Removed {} from inbox because it was older than {}", result.thing_uid, timestamp);
                removed.push(result.thing_uid);
            }
        }
        removed
    }

}

impl ThingRegistryChangeListener for Inbox {
    fn added(&self, thing: &Thing) {
        if self.remove(&thing.uid) {
            tracing::debug!("Discovery result {} removed from inbox, it was added as a thing", thing.uid);
        }
    }

    fn removed(&self, thing: &Thing) {
        if thing.is_bridge() {
            self.remove_results_for_bridge(&thing.uid);
        }
    }

    fn updated(&self, _old: &Thing, _thing: &Thing) {
        // triggered by our own configuration sync, nothing to do
    }
}
