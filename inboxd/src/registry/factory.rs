use std::collections::HashMap;
use std::sync::Arc;
use serde_json::Value;
use shared::types::{Thing, ThingKind};
use shared::uid::{ThingTypeUID, ThingUID};
use super::ThingTypeRegistry;

/// A binding-side factory able to build things of the types it supports.
pub trait ThingHandlerFactory: Send + Sync {
    fn supports_thing_type(&self, thing_type_uid: &ThingTypeUID) -> bool;

    fn create_thing(
        &self,
        thing_type_uid: &ThingTypeUID,
        configuration: HashMap<String, Value>,
        thing_uid: &ThingUID,
        bridge_uid: Option<&ThingUID>,
    ) -> Option<Thing>;
}

/// Asks each supporting factory in turn and attaches `properties` to the first
/// thing produced.
pub fn create_thing(
    thing_uid: &ThingUID,
    configuration: HashMap<String, Value>,
    properties: HashMap<String, String>,
    bridge_uid: Option<&ThingUID>,
    thing_type_uid: &ThingTypeUID,
    factories: &[Arc<dyn ThingHandlerFactory>],
) -> Option<Thing> {
    let mut thing = factories
        .iter()
        .filter(|factory| factory.supports_thing_type(thing_type_uid))
        .find_map(|factory| {
            factory.create_thing(thing_type_uid, configuration.clone(), thing_uid, bridge_uid)
        })?;
    thing.properties.extend(properties);
    Some(thing)
}

/// Builds plain things for every type the type registry knows.
pub struct GenericThingFactory {
    thing_types: Arc<dyn ThingTypeRegistry>,
}

impl GenericThingFactory {
    pub fn new(thing_types: Arc<dyn ThingTypeRegistry>) -> Self {
        Self { thing_types }
    }
}

impl ThingHandlerFactory for GenericThingFactory {
    fn supports_thing_type(&self, thing_type_uid: &ThingTypeUID) -> bool {
        self.thing_types.thing_type(thing_type_uid).is_some()
    }

    fn create_thing(
        &self,
        thing_type_uid: &ThingTypeUID,
        configuration: HashMap<String, Value>,
        thing_uid: &ThingUID,
        bridge_uid: Option<&ThingUID>,
    ) -> Option<Thing> {
        let thing_type = self.thing_types.thing_type(thing_type_uid)?;
        let mut thing = Thing::new(thing_uid.clone(), thing_type_uid.clone());
        thing.kind = thing_type.kind;
        thing.bridge_uid = bridge_uid.cloned();
        thing.configuration = configuration;
        if thing.kind == ThingKind::Bridge {
            tracing::debug!("Created bridge {}", thing_uid);
        }
        Some(thing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticThingTypeRegistry;
    use shared::types::ThingType;

    fn registry() -> Arc<dyn ThingTypeRegistry> {
        Arc::new(StaticThingTypeRegistry::new(vec![ThingType {
            uid: "demo:bridge".parse().unwrap(),
            label: "Bridge".to_string(),
            kind: ThingKind::Bridge,
            representation_property: None,
            parameters: Vec::new(),
        }]))
    }

    #[test]
    fn test_generic_factory_builds_known_types() {
        let factories: Vec<Arc<dyn ThingHandlerFactory>> =
            vec![Arc::new(GenericThingFactory::new(registry()))];
        let uid: ThingUID = "demo:bridge:b1".parse().unwrap();

        let thing = create_thing(
            &uid,
            HashMap::from([("host".to_string(), Value::from("h"))]),
            HashMap::from([("vendor".to_string(), "acme".to_string())]),
            None,
            &uid.thing_type_uid(),
            &factories,
        )
        .unwrap();

        assert!(thing.is_bridge());
        assert_eq!(thing.configuration["host"], Value::from("h"));
        assert_eq!(thing.properties["vendor"], "acme");
    }

    #[test]
    fn test_no_supporting_factory() {
        let factories: Vec<Arc<dyn ThingHandlerFactory>> =
            vec![Arc::new(GenericThingFactory::new(registry()))];
        let uid: ThingUID = "other:dev:1".parse().unwrap();

        let thing = create_thing(
            &uid,
            HashMap::new(),
            HashMap::new(),
            None,
            &uid.thing_type_uid(),
            &factories,
        );
        assert!(thing.is_none());
    }
}
