//! Settings document mirrored between the device and the client.

use crate::domain::error::LinkError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const TIMEZONE_KEY: &str = "timezone";

/// JSON mapping of setting name to value. The device holds the canonical
/// copy; the firmware starts from `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsDocument(Map<String, Value>);

impl SettingsDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse device text. Anything but a JSON object is rejected.
    pub fn parse(text: &str) -> Result<Self, LinkError> {
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(LinkError::Protocol(format!(
                "expected a JSON object, got {}",
                type_name(&other)
            ))),
            Err(e) => Err(LinkError::Protocol(e.to_string())),
        }
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    pub fn timezone(&self) -> Option<&str> {
        self.0.get(TIMEZONE_KEY).and_then(Value::as_str)
    }

    pub fn set_timezone(&mut self, zone: &str) {
        self.0
            .insert(TIMEZONE_KEY.to_string(), Value::String(zone.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Keys whose value differs from `previous` (added, changed or removed).
    pub fn changed_keys(&self, previous: Option<&SettingsDocument>) -> Vec<String> {
        let empty = Map::new();
        let old = previous.map(|d| &d.0).unwrap_or(&empty);

        let mut changed: Vec<String> = self
            .0
            .iter()
            .filter(|(k, v)| old.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        changed.extend(old.keys().filter(|k| !self.0.contains_key(*k)).cloned());
        changed.sort();
        changed
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_document() {
        let doc = SettingsDocument::parse(r#"{"timezone":"Asia/Tokyo","volume":3}"#).unwrap();
        assert_eq!(doc.timezone(), Some("Asia/Tokyo"));
        assert_eq!(doc.get("volume"), Some(&Value::from(3)));
    }

    #[test]
    fn firmware_default_is_empty_object() {
        let doc = SettingsDocument::parse("{}").unwrap();
        assert_eq!(doc, SettingsDocument::new());
        assert_eq!(doc.timezone(), None);
    }

    #[test]
    fn rejects_non_objects_and_garbage() {
        assert!(matches!(
            SettingsDocument::parse("[1,2]"),
            Err(LinkError::Protocol(_))
        ));
        assert!(matches!(
            SettingsDocument::parse("{\"timezone\":"),
            Err(LinkError::Protocol(_))
        ));
        assert!(matches!(
            SettingsDocument::parse(""),
            Err(LinkError::Protocol(_))
        ));
    }

    #[test]
    fn serializes_compactly_for_the_wire() {
        let mut doc = SettingsDocument::new();
        doc.set_timezone("America/New_York");
        assert_eq!(doc.to_json(), r#"{"timezone":"America/New_York"}"#);
    }

    #[test]
    fn reports_added_changed_and_removed_keys() {
        let old = SettingsDocument::parse(r#"{"timezone":"Europe/Rome","brightness":5}"#).unwrap();
        let new = SettingsDocument::parse(r#"{"timezone":"Asia/Tokyo","sound":true}"#).unwrap();
        assert_eq!(
            new.changed_keys(Some(&old)),
            vec!["brightness", "sound", "timezone"]
        );
        assert!(new.changed_keys(Some(&new)).is_empty());
        assert_eq!(new.changed_keys(None), vec!["sound", "timezone"]);
    }
}
