//! Manufacturing order model
//!
//! An order names one or more components; each component points at a
//! parametric model, carries the parameter values to apply, and optionally
//! narrows which CAM setups get posted and how.
//!
//! Parameter values are resolved into [`ParameterValue`] once, while the
//! order is deserialized, from the native JSON type of each value.

use crate::error::OrderError;
use crate::units;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// A value to assign to a host user parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    /// Expression with its own unit token, passed to the host verbatim
    StringWithUnits(String),
    /// Bare number; the parameter's existing unit is appended
    Numeric(Number),
    /// 0/1 switch, assigned as a unitless string
    IntegerFlag(u8),
}

impl ParameterValue {
    /// Resolve the variant from a JSON value's native type
    pub fn from_json(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(Self::StringWithUnits(s.clone())),
            Value::Bool(b) => Ok(Self::IntegerFlag(u8::from(*b))),
            Value::Number(n) => match n.as_u64() {
                Some(flag @ (0 | 1)) => Ok(Self::IntegerFlag(flag as u8)),
                _ => Ok(Self::Numeric(n.clone())),
            },
            other => Err(format!(
                "parameter values must be strings, numbers, or 0/1 flags, got {}",
                json_type_name(other)
            )),
        }
    }

    /// Build the expression to hand to the host
    ///
    /// * `existing_unit` - unit of the parameter being replaced, used only
    ///   for [`ParameterValue::Numeric`]
    pub fn to_expression(&self, existing_unit: &str) -> String {
        match self {
            Self::StringWithUnits(s) => s.clone(),
            Self::Numeric(n) => units::with_unit(&units::format_number(n), existing_unit),
            Self::IntegerFlag(flag) => flag.to_string(),
        }
    }

    /// Short name of the variant, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StringWithUnits(_) => "string",
            Self::Numeric(_) => "numeric",
            Self::IntegerFlag(_) => "flag",
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StringWithUnits(s) => write!(f, "{}", s),
            Self::Numeric(n) => write!(f, "{}", units::format_number(n)),
            Self::IntegerFlag(flag) => write!(f, "{}", flag),
        }
    }
}

impl Serialize for ParameterValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::StringWithUnits(s) => serializer.serialize_str(s),
            Self::Numeric(n) => n.serialize(serializer),
            Self::IntegerFlag(flag) => serializer.serialize_u8(*flag),
        }
    }
}

impl<'de> Deserialize<'de> for ParameterValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(de::Error::custom)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parameter assignments in the order they appear in the document
///
/// Order is only kept when deserializing straight from JSON text. A
/// `serde_json::Value` object sorts its keys, so maps built through
/// `serde_json::from_value` come out in key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterMap {
    entries: Vec<(String, ParameterValue)>,
}

impl ParameterMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, replacing an earlier one with the same name
    pub fn insert(&mut self, name: impl Into<String>, value: ParameterValue) {
        let name = name.into();
        self.entries.retain(|(n, _)| n != &name);
        self.entries.push((name, value));
    }

    /// Look up a value by exact name
    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Iterate entries in document order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, ParameterValue)> for ParameterMap {
    fn from_iter<I: IntoIterator<Item = (K, ParameterValue)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

impl Serialize for ParameterMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ParameterMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ParameterMapVisitor;

        impl<'de> Visitor<'de> for ParameterMapVisitor {
            type Value = ParameterMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of parameter names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, ParameterValue)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, value)) = access.next_entry::<String, ParameterValue>()? {
                    if entries.iter().any(|(n, _)| n == &name) {
                        return Err(de::Error::custom(format!(
                            "duplicate parameter '{}'",
                            name
                        )));
                    }
                    entries.push((name, value));
                }
                Ok(ParameterMap { entries })
            }
        }

        deserializer.deserialize_map(ParameterMapVisitor)
    }
}

/// Post-processing overrides for one component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessorConfig {
    /// Post-processor profile to use instead of the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_processor_name: Option<String>,
    /// Output file stem to use instead of the program number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_name: Option<String>,
}

/// Order-level output settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    /// Directory for generated programs, overriding the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_directory: Option<PathBuf>,
    /// Place programs in a timestamped sub-directory
    #[serde(default)]
    pub include_timestamp: bool,
}

/// One part of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub component_id: String,
    /// Filesystem path or host-resolvable URI of the model
    #[serde(alias = "fusionModelPath")]
    pub model_path: String,
    #[serde(default)]
    pub parameters: ParameterMap,
    /// When non-empty, only these setups are considered
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_processor_config: Option<PostProcessorConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Component {
    /// Final path segment of the model path (file name or URI leaf)
    pub fn model_file_name(&self) -> &str {
        let trimmed = self.model_path.trim_end_matches(['/', '\\']);
        trimmed
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(trimmed)
    }

    /// Whether the model path is a host URI rather than a filesystem path
    pub fn is_uri(&self) -> bool {
        self.model_path.contains("://")
    }

    /// Profile override, if any
    pub fn post_processor_name(&self) -> Option<&str> {
        self.post_processor_config
            .as_ref()
            .and_then(|c| c.post_processor_name.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    /// Output file stem override, if any
    pub fn output_file_name(&self) -> Option<&str> {
        self.post_processor_config
            .as_ref()
            .and_then(|c| c.output_file_name.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// A manufacturing order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub version: String,
    pub order_id: String,
    pub components: Vec<Component>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_config: Option<OutputConfig>,
}

impl Order {
    /// Load and check an order from a JSON file
    pub fn load(path: &Path) -> Result<Self, OrderError> {
        let content = std::fs::read_to_string(path).map_err(|source| OrderError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Parse and check an order from JSON text
    pub fn from_json_str(content: &str) -> Result<Self, OrderError> {
        let order: Self = serde_json::from_str(content)?;
        order.validate()?;
        Ok(order)
    }

    /// Check the structural invariants the pipeline relies on
    ///
    /// Every violation is collected so one report covers the whole document.
    pub fn validate(&self) -> Result<(), OrderError> {
        let mut errors = Vec::new();

        if !is_semver(&self.version) {
            errors.push(format!(
                "Invalid version format: '{}' (expected X.Y.Z)",
                self.version
            ));
        }

        if self.order_id.trim().is_empty() {
            errors.push("orderId cannot be empty".to_string());
        }

        if self.components.is_empty() {
            errors.push("components must contain at least 1 item".to_string());
        }

        let mut seen = HashSet::new();
        for (index, component) in self.components.iter().enumerate() {
            let prefix = format!("Component[{}]", index);
            if component.component_id.trim().is_empty() {
                errors.push(format!("{}: componentId cannot be empty", prefix));
            } else if !seen.insert(component.component_id.as_str()) {
                errors.push(format!(
                    "{}: Duplicate componentId: '{}'",
                    prefix, component.component_id
                ));
            }
            if component.model_path.trim().is_empty() {
                errors.push(format!("{}: modelPath cannot be empty", prefix));
            }
            if component.setup_names.iter().any(|s| s.trim().is_empty()) {
                errors.push(format!("{}: setupNames cannot contain empty names", prefix));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(OrderError::Invalid(errors))
        }
    }

    /// Total number of parameter assignments across components
    pub fn parameter_count(&self) -> usize {
        self.components.iter().map(|c| c.parameters.len()).sum()
    }
}

fn is_semver(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}
