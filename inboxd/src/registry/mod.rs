//! Collaborators the inbox talks to: the thing type lookup, the thing registry
//! with its change notifications, and the factories that build things.

pub mod factory;
pub mod memory;
pub mod normalize;

use std::sync::Arc;
use anyhow::Result;
use shared::types::{Thing, ThingStatus, ThingType};
use shared::uid::{ThingTypeUID, ThingUID};

pub use factory::{create_thing, GenericThingFactory, ThingHandlerFactory};
pub use memory::{MemoryThingRegistry, StaticThingTypeRegistry};
pub use normalize::{ConfigNormalizer, DefaultNormalizer};

pub trait ThingTypeRegistry: Send + Sync {
    fn thing_type(&self, uid: &ThingTypeUID) -> Option<ThingType>;
}

/// Observer of registry membership changes.
pub trait ThingRegistryChangeListener: Send + Sync {
    fn added(&self, thing: &Thing);

    fn removed(&self, thing: &Thing);

    fn updated(&self, old: &Thing, thing: &Thing);
}

/// Observer of thing status transitions.
pub trait ThingStatusListener: Send + Sync {
    fn status_changed(&self, thing_uid: &ThingUID, status: ThingStatus);
}

/// The registry of things. Implementations must not hold internal locks while
/// notifying listeners: listeners call back into the registry.
pub trait ThingRegistry: Send + Sync {
    fn get(&self, uid: &ThingUID) -> Option<Thing>;

    fn all(&self) -> Vec<Thing>;

    fn add(&self, thing: Thing) -> Result<()>;

    fn remove(&self, uid: &ThingUID) -> Option<Thing>;

    /// Persists a changed thing; only valid for managed things
    fn update(&self, thing: Thing) -> Result<()>;

    /// Whether the thing is owned by this process and may be modified
    fn is_managed(&self, uid: &ThingUID) -> bool;

    fn add_listener(&self, listener: Arc<dyn ThingRegistryChangeListener>);

    fn remove_listener(&self, listener: &Arc<dyn ThingRegistryChangeListener>);
}
