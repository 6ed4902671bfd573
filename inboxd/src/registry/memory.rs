use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use anyhow::{bail, Result};
use shared::types::{Thing, ThingStatus, ThingType};
use shared::uid::{ThingTypeUID, ThingUID};
use super::{ThingRegistry, ThingRegistryChangeListener, ThingStatusListener, ThingTypeRegistry};

/// Fixed set of thing types, usually taken from the daemon config.
pub struct StaticThingTypeRegistry {
    types: RwLock<HashMap<ThingTypeUID, ThingType>>,
}

impl StaticThingTypeRegistry {
    pub fn new(types: Vec<ThingType>) -> Self {
        Self {
            types: RwLock::new(types.into_iter().map(|t| (t.uid.clone(), t)).collect()),
        }
    }

    /// Makes a type known after startup, e.g. once its binding is loaded.
    pub fn register(&self, thing_type: ThingType) {
        if let Ok(mut types) = self.types.write() {
            types.insert(thing_type.uid.clone(), thing_type);
        }
    }
}

impl ThingTypeRegistry for StaticThingTypeRegistry {
    fn thing_type(&self, uid: &ThingTypeUID) -> Option<ThingType> {
        self.types.read().ok()?.get(uid).cloned()
    }
}

/// In-process thing registry; every thing it holds is managed.
#[derive(Default)]
pub struct MemoryThingRegistry {
    things: Mutex<BTreeMap<ThingUID, Thing>>,
    statuses: Mutex<HashMap<ThingUID, ThingStatus>>,
    listeners: RwLock<Vec<Arc<dyn ThingRegistryChangeListener>>>,
    status_listeners: RwLock<Vec<Arc<dyn ThingStatusListener>>>,
}

impl MemoryThingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn things(&self) -> MutexGuard<'_, BTreeMap<ThingUID, Thing>> {
        self.things.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn listeners(&self) -> Vec<Arc<dyn ThingRegistryChangeListener>> {
        self.listeners.read().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn status(&self, uid: &ThingUID) -> ThingStatus {
        self.statuses
            .lock()
            .ok()
            .and_then(|s| s.get(uid).copied())
            .unwrap_or_default()
    }

    /// Records a status transition and tells the status listeners about it.
    pub fn set_status(&self, uid: &ThingUID, status: ThingStatus) -> Result<()> {
        if self.get(uid).is_none() {
            bail!("Thing {} is not registered", uid);
        }
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.insert(uid.clone(), status);
        }
        let listeners = self.status_listeners.read().map(|l| l.clone()).unwrap_or_default();
        for listener in listeners {
            listener.status_changed(uid, status);
        }
        Ok(())
    }

    pub fn add_status_listener(&self, listener: Arc<dyn ThingStatusListener>) {
        if let Ok(mut listeners) = self.status_listeners.write() {
            listeners.push(listener);
        }
    }

    pub fn remove_status_listener(&self, listener: &Arc<dyn ThingStatusListener>) {
        if let Ok(mut listeners) = self.status_listeners.write() {
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }
}

impl ThingRegistry for MemoryThingRegistry {
    fn get(&self, uid: &ThingUID) -> Option<Thing> {
        self.things().get(uid).cloned()
    }

    fn all(&self) -> Vec<Thing> {
        self.things().values().cloned().collect()
    }

    fn add(&self, thing: Thing) -> Result<()> {
        {
            let mut things = self.things();
            if things.contains_key(&thing.uid) {
                bail!("Thing {} is already registered", thing.uid);
            }
            things.insert(thing.uid.clone(), thing.clone());
        }
        tracing::info!("Registered thing {}", thing.uid);
        for listener in self.listeners() {
            listener.added(&thing);
        }
        Ok(())
    }

    fn remove(&self, uid: &ThingUID) -> Option<Thing> {
        let removed = self.things().remove(uid)?;
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.remove(uid);
        }
        tracing::info!("Removed thing {}", uid);
        for listener in self.listeners() {
            listener.removed(&removed);
        }
        Some(removed)
    }

    fn update(&self, thing: Thing) -> Result<()> {
        let old = {
            let mut things = self.things();
            match things.get_mut(&thing.uid) {
                Some(slot) => std::mem::replace(slot, thing.clone()),
                None => bail!("Thing {} is not registered", thing.uid),
            }
        };
        for listener in self.listeners() {
            listener.updated(&old, &thing);
        }
        Ok(())
    }

    fn is_managed(&self, uid: &ThingUID) -> bool {
        self.things().contains_key(uid)
    }

    fn add_listener(&self, listener: Arc<dyn ThingRegistryChangeListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    fn remove_listener(&self, listener: &Arc<dyn ThingRegistryChangeListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }
}
