use std::collections::HashMap;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use crate::uid::{ThingTypeUID, ThingUID};

/// Whether a discovery result still awaits a decision or was dismissed by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiscoveryResultFlag {
    #[default]
    New,
    Ignored,
}

/// A device reported by a discovery source, staged in the inbox until it is
/// approved as a thing, ignored, or it expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub thing_uid: ThingUID,

    pub thing_type_uid: ThingTypeUID,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_uid: Option<ThingUID>,

    /// Raw properties as reported; config parameters are split out on approval
    #[serde(default)]
    pub properties: HashMap<String, Value>,

    /// Name of the property that fingerprints the physical device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub representation_property: Option<String>,

    pub label: String,

    #[serde(default)]
    pub flag: DiscoveryResultFlag,

    /// Creation or last update
    pub timestamp: DateTime<Utc>,

    /// TTL in seconds, `None` never expires
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl DiscoveryResult {
    pub fn builder(thing_uid: ThingUID) -> DiscoveryResultBuilder {
        DiscoveryResultBuilder::new(thing_uid)
    }

    pub fn binding_id(&self) -> &str {
        self.thing_type_uid.binding_id()
    }

    /// String form of the representation property's value, if both are present.
    pub fn representation_value(&self) -> Option<String> {
        let key = self.representation_property.as_deref()?;
        self.properties.get(key).map(value_to_string)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => i64::try_from(ttl)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .and_then(|ttl| self.timestamp.checked_add_signed(ttl))
                .is_some_and(|deadline| deadline <= now),
        }
    }

    /// Merges a newer report for the same thing into this one. The flag and
    /// thing type are kept, everything else the source reports is taken from `newer`.
    pub fn synchronize(&mut self, newer: &DiscoveryResult) {
        if newer.thing_uid != self.thing_uid {
            return;
        }
        self.bridge_uid = newer.bridge_uid.clone();
        self.properties = newer.properties.clone();
        self.representation_property = newer.representation_property.clone();
        self.label = newer.label.clone();
        self.timestamp = newer.timestamp;
        self.ttl = newer.ttl;
    }
}

/// Renders a property value the way it is shown to users: strings unquoted.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct DiscoveryResultBuilder {
    result: DiscoveryResult,
}

impl DiscoveryResultBuilder {
    pub fn new(thing_uid: ThingUID) -> Self {
        let thing_type_uid = thing_uid.thing_type_uid();
        Self {
            result: DiscoveryResult {
                thing_uid,
                thing_type_uid,
                bridge_uid: None,
                properties: HashMap::new(),
                representation_property: None,
                label: String::new(),
                flag: DiscoveryResultFlag::New,
                timestamp: Utc::now(),
                ttl: None,
            },
        }
    }

    pub fn with_thing_type(mut self, thing_type_uid: ThingTypeUID) -> Self {
        self.result.thing_type_uid = thing_type_uid;
        self
    }

    pub fn with_bridge(mut self, bridge_uid: ThingUID) -> Self {
        self.result.bridge_uid = Some(bridge_uid);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.result.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_representation_property(mut self, key: impl Into<String>) -> Self {
        self.result.representation_property = Some(key.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.result.label = label.into();
        self
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.result.ttl = Some(ttl_secs);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.result.timestamp = timestamp;
        self
    }

    pub fn build(self) -> DiscoveryResult {
        self.result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThingStatus {
    #[default]
    Unknown,
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThingKind {
    #[default]
    Thing,
    Bridge,
}

/// A managed entity created from an approved discovery result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thing {
    pub uid: ThingUID,
    pub thing_type_uid: ThingTypeUID,
    #[serde(default)]
    pub kind: ThingKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_uid: Option<ThingUID>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub configuration: HashMap<String, Value>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Thing {
    pub fn new(uid: ThingUID, thing_type_uid: ThingTypeUID) -> Self {
        Self {
            uid,
            thing_type_uid,
            kind: ThingKind::Thing,
            bridge_uid: None,
            label: String::new(),
            configuration: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    pub fn is_bridge(&self) -> bool {
        self.kind == ThingKind::Bridge
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Text,
    Integer,
    Decimal,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDescriptionParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub parameter_type: ParameterType,
}

/// Type descriptor of things: representation property and config parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThingType {
    pub uid: ThingTypeUID,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub kind: ThingKind,
    #[serde(default)]
    pub representation_property: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ConfigDescriptionParameter>,
}

impl ThingType {
    pub fn parameter(&self, name: &str) -> Option<&ConfigDescriptionParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> ThingUID {
        s.parse().unwrap()
    }

    #[test]
    fn test_synchronize_preserves_flag() {
        let mut stored = DiscoveryResult::builder(uid("demo:dev:1"))
            .with_property("host", "10.0.0.1")
            .with_label("old")
            .build();
        stored.flag = DiscoveryResultFlag::Ignored;

        let newer = DiscoveryResult::builder(uid("demo:dev:1"))
            .with_property("host", "10.0.0.2")
            .with_property("serial", "abc")
            .with_representation_property("serial")
            .with_bridge(uid("demo:bridge:b1"))
            .with_label("new")
            .with_ttl(60)
            .build();

        stored.synchronize(&newer);

        assert_eq!(stored.flag, DiscoveryResultFlag::Ignored);
        assert_eq!(stored.properties, newer.properties);
        assert_eq!(stored.label, "new");
        assert_eq!(stored.representation_property.as_deref(), Some("serial"));
        assert_eq!(stored.bridge_uid, Some(uid("demo:bridge:b1")));
        assert_eq!(stored.ttl, Some(60));
    }

    #[test]
    fn test_synchronize_keeps_thing_type() {
        let mut stored = DiscoveryResult::builder(uid("demo:dev:1")).build();
        let retyped = DiscoveryResult::builder(uid("demo:dev:1"))
            .with_thing_type("demo:other".parse().unwrap())
            .with_label("retyped")
            .build();

        stored.synchronize(&retyped);

        assert_eq!(stored.thing_type_uid.to_string(), "demo:dev");
        assert_eq!(stored.label, "retyped");
    }

    #[test]
    fn test_synchronize_ignores_other_thing() {
        let mut stored = DiscoveryResult::builder(uid("demo:dev:1")).with_label("a").build();
        let other = DiscoveryResult::builder(uid("demo:dev:2")).with_label("b").build();
        stored.synchronize(&other);
        assert_eq!(stored.label, "a");
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let unlimited = DiscoveryResult::builder(uid("demo:dev:1"))
            .with_timestamp(now - chrono::Duration::days(3650))
            .build();
        assert!(!unlimited.is_expired(now));

        let finite = DiscoveryResult::builder(uid("demo:dev:2"))
            .with_timestamp(now)
            .with_ttl(60)
            .build();
        assert!(!finite.is_expired(now + chrono::Duration::seconds(59)));
        assert!(finite.is_expired(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_representation_value() {
        let result = DiscoveryResult::builder(uid("demo:dev:1"))
            .with_property("serial", "abc")
            .with_property("port", 80)
            .with_representation_property("serial")
            .build();
        assert_eq!(result.representation_value().as_deref(), Some("abc"));
        assert_eq!(result.binding_id(), "demo");

        let numeric = DiscoveryResult::builder(uid("demo:dev:1"))
            .with_property("port", 80)
            .with_representation_property("port")
            .build();
        assert_eq!(numeric.representation_value().as_deref(), Some("80"));

        let missing = DiscoveryResult::builder(uid("demo:dev:1"))
            .with_representation_property("serial")
            .build();
        assert_eq!(missing.representation_value(), None);
    }

    #[test]
    fn test_flag_serializes_uppercase() {
        let json = serde_json::to_string(&DiscoveryResultFlag::Ignored).unwrap();
        assert_eq!(json, "\"IGNORED\"");
    }
}
