use shared::types::Thing;
use shared::uid::{ThingUID, SEPARATOR};
use crate::error::InboxError;
use crate::registry::create_thing;
use super::Inbox;

impl Inbox {
    /// Turns a staged result into a registered thing.
    ///
    /// The result itself stays in the inbox; it is removed once the registry
    /// reports the new thing. Returns `Ok(None)` if no factory supports the
    /// result's thing type.
    pub fn approve(
        &self,
        thing_uid: &ThingUID,
        label: Option<&str>,
        new_thing_id: Option<&str>,
    ) -> Result<Option<Thing>, InboxError> {
        let result = self
            .get(thing_uid)
            .ok_or_else(|| InboxError::NotFound(thing_uid.clone()))?;

        let target_uid = match new_thing_id {
            Some(id) if id.contains(SEPARATOR) => return Err(InboxError::InvalidId(id.to_string())),
            Some(id) => thing_uid.with_id(id)?,
            None => thing_uid.clone(),
        };

        let thing_type = self.thing_types.thing_type(&result.thing_type_uid);
        let (properties, configuration) = self.split_properties(&result, thing_type.as_ref());

        let factories = self.factories.read().map(|f| f.clone()).unwrap_or_default();
        let Some(mut thing) = create_thing(
            &target_uid,
            configuration,
            properties,
            result.bridge_uid.as_ref(),
            &result.thing_type_uid,
            &factories,
        ) else {
            tracing::warn!(
                "Cannot create thing. No binding found that supports creating a thing of type {}",
                result.thing_type_uid
            );
            return Ok(None);
        };

        thing.label = match label {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => result.label.clone(),
        };

        if self.thing_registry.remove(&target_uid).is_some() {
            tracing::debug!("Replaced existing thing {} on approval", target_uid);
        }
        self.thing_registry
            .add(thing.clone())
            .map_err(|e| InboxError::Registry {
                uid: target_uid.clone(),
                reason: format!("{:#}", e),
            })?;

        tracing::info!("Approved '{}' as thing {}", thing_uid, target_uid);
        Ok(Some(thing))
    }
}
