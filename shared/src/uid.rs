use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UidError {
    #[error("UID '{0}' must have at least {1} segments")]
    TooFewSegments(String, usize),

    #[error("UID segment '{segment}' in '{uid}' contains invalid characters")]
    InvalidSegment { uid: String, segment: String },
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn split_segments(raw: &str, min: usize) -> Result<Vec<String>, UidError> {
    let segments: Vec<String> = raw.split(SEPARATOR).map(str::to_string).collect();
    if segments.len() < min {
        return Err(UidError::TooFewSegments(raw.to_string(), min));
    }
    if let Some(bad) = segments.iter().find(|s| !is_valid_segment(s)) {
        return Err(UidError::InvalidSegment {
            uid: raw.to_string(),
            segment: bad.clone(),
        });
    }
    Ok(segments)
}

/// Identifies a thing type, e.g. "hue:bulb".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThingTypeUID {
    binding_id: String,
    id: String,
}

impl ThingTypeUID {
    pub fn new(binding_id: &str, id: &str) -> Result<Self, UidError> {
        format!("{binding_id}{SEPARATOR}{id}").parse()
    }

    pub fn binding_id(&self) -> &str {
        &self.binding_id
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl FromStr for ThingTypeUID {
    type Err = UidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = split_segments(s, 2)?;
        if segments.len() != 2 {
            return Err(UidError::InvalidSegment {
                uid: s.to_string(),
                segment: segments[2..].join(":"),
            });
        }
        let id = segments.pop().unwrap_or_default();
        let binding_id = segments.pop().unwrap_or_default();
        Ok(Self { binding_id, id })
    }
}

impl fmt::Display for ThingTypeUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.binding_id, SEPARATOR, self.id)
    }
}

impl TryFrom<String> for ThingTypeUID {
    type Error = UidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ThingTypeUID> for String {
    fn from(uid: ThingTypeUID) -> Self {
        uid.to_string()
    }
}

/// Identifies a thing: `binding:type[:bridge...]:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThingUID {
    segments: Vec<String>,
}

impl ThingUID {
    /// Builds the UID of a thing of `thing_type`, optionally nested below a bridge.
    pub fn new(
        thing_type: &ThingTypeUID,
        bridge: Option<&ThingUID>,
        id: &str,
    ) -> Result<Self, UidError> {
        let mut raw = thing_type.to_string();
        if let Some(bridge) = bridge {
            // the bridge's own binding and type segments are not repeated
            for segment in bridge.segments.iter().skip(2) {
                raw.push(SEPARATOR);
                raw.push_str(segment);
            }
        }
        raw.push(SEPARATOR);
        raw.push_str(id);
        raw.parse()
    }

    pub fn binding_id(&self) -> &str {
        &self.segments[0]
    }

    pub fn thing_type_id(&self) -> &str {
        &self.segments[1]
    }

    /// The instance id, i.e. the last segment.
    pub fn id(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// The type this UID was minted for.
    pub fn thing_type_uid(&self) -> ThingTypeUID {
        ThingTypeUID {
            binding_id: self.segments[0].clone(),
            id: self.segments[1].clone(),
        }
    }

    /// Returns a copy whose last segment is replaced by `id`.
    pub fn with_id(&self, id: &str) -> Result<Self, UidError> {
        let prefix = &self.segments[..self.segments.len() - 1];
        let raw = format!("{}{}{}", prefix.join(":"), SEPARATOR, id);
        raw.parse()
    }
}

impl FromStr for ThingUID {
    type Err = UidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            segments: split_segments(s, 3)?,
        })
    }
}

impl fmt::Display for ThingUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join(":"))
    }
}

impl TryFrom<String> for ThingUID {
    type Error = UidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ThingUID> for String {
    fn from(uid: ThingUID) -> Self {
        uid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_thing_uid() {
        let uid: ThingUID = "hue:bulb:bridge1:lamp".parse().unwrap();
        assert_eq!(uid.binding_id(), "hue");
        assert_eq!(uid.thing_type_id(), "bulb");
        assert_eq!(uid.id(), "lamp");
        assert_eq!(uid.thing_type_uid().to_string(), "hue:bulb");
        assert_eq!(uid.to_string(), "hue:bulb:bridge1:lamp");
    }

    #[test]
    fn test_reject_malformed_uids() {
        assert!("hue:bulb".parse::<ThingUID>().is_err());
        assert!("hue::lamp".parse::<ThingUID>().is_err());
        assert!("hue:bulb:la mp".parse::<ThingUID>().is_err());
        assert!("hue:bulb:x".parse::<ThingTypeUID>().is_err());
    }

    #[test]
    fn test_with_id_replaces_last_segment() {
        let uid: ThingUID = "demo:dev:bridge:1".parse().unwrap();
        assert_eq!(uid.with_id("kitchen").unwrap().to_string(), "demo:dev:bridge:kitchen");
        assert!(uid.with_id("").is_err());
        assert!(uid.with_id("a b").is_err());
    }

    #[test]
    fn test_new_nests_below_bridge() {
        let bridge_type = ThingTypeUID::new("hue", "bridge").unwrap();
        let bridge = ThingUID::new(&bridge_type, None, "b1").unwrap();
        let bulb = ThingTypeUID::new("hue", "bulb").unwrap();
        let uid = ThingUID::new(&bulb, Some(&bridge), "lamp").unwrap();
        assert_eq!(uid.to_string(), "hue:bulb:b1:lamp");
    }

    #[test]
    fn test_serde_as_string() {
        let uid: ThingUID = "demo:dev:1".parse().unwrap();
        let json = serde_json::to_string(&uid).unwrap();
        assert_eq!(json, "\"demo:dev:1\"");
        let back: ThingUID = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uid);
        assert!(serde_json::from_str::<ThingUID>("\"nope\"").is_err());
    }
}
