//! Values handling: package defaults, caller overlays and deep merge

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::error::{CoreError, Result};

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Load values from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse values from YAML string. An empty document yields empty values.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(match value {
            JsonValue::Null => Self::new(),
            other => Self(other),
        })
    }

    /// Deep merge another Values into this one
    ///
    /// Rules:
    /// - Scalars: overlay replaces base
    /// - Objects: recursive merge
    /// - Arrays: overlay replaces base (not appended)
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Set a value by dotted path (e.g., "image.tag")
    pub fn set(&mut self, path: &str, value: JsonValue) {
        let parts: Vec<&str> = path.split('.').collect();
        set_nested(&mut self.0, &parts, value);
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        path.split('.')
            .try_fold(&self.0, |value, key| value.as_object()?.get(key))
    }

    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }
}

/// Caller-supplied value document, kept exactly as received.
///
/// The raw text (YAML or JSON) is what gets persisted with a release; it is
/// only parsed when a render needs it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueOverlay(String);

impl ValueOverlay {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Parse the overlay. JSON is accepted since it is valid YAML.
    pub fn parse(&self) -> Result<Values> {
        if self.is_empty() {
            return Ok(Values::new());
        }

        let values = Values::from_yaml(&self.0)?;
        if !values.0.is_object() {
            return Err(CoreError::InvalidValues {
                message: "value overlay must be a mapping at the top level".to_string(),
            });
        }
        Ok(values)
    }

    /// Defaults with this overlay merged on top
    pub fn merged_over(&self, defaults: &Values) -> Result<Values> {
        let mut merged = defaults.clone();
        merged.merge(&self.parse()?);
        Ok(merged)
    }
}

impl From<&str> for ValueOverlay {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ValueOverlay {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn set_nested(value: &mut JsonValue, path: &[&str], new_value: JsonValue) {
    let Some((key, remaining)) = path.split_first() else {
        *value = new_value;
        return;
    };

    if !value.is_object() {
        *value = JsonValue::Object(serde_json::Map::new());
    }

    if let JsonValue::Object(map) = value {
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
        set_nested(entry, remaining, new_value);
    }
}

/// Parse --set arguments (key=value format) into a YAML overlay
pub fn parse_set_values(set_args: &[String]) -> Result<Values> {
    let mut values = Values::new();

    for arg in set_args {
        let (key, val) = arg.split_once('=').ok_or_else(|| CoreError::InvalidValues {
            message: format!("Invalid --set format: '{}'. Expected key=value", arg),
        })?;

        let json_value = match val {
            "true" => JsonValue::Bool(true),
            "false" => JsonValue::Bool(false),
            "null" => JsonValue::Null,
            _ => {
                if let Ok(num) = val.parse::<i64>() {
                    JsonValue::Number(num.into())
                } else if let Some(num) = val
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                {
                    JsonValue::Number(num)
                } else if val.starts_with('[') || val.starts_with('{') {
                    serde_json::from_str(val).unwrap_or_else(|_| JsonValue::String(val.to_string()))
                } else {
                    JsonValue::String(val.to_string())
                }
            }
        };

        values.set(key, json_value);
    }

    Ok(values)
}
