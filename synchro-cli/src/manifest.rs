//! The `package.json` descriptor of a Synchro app.
//!
//! Only a handful of fields matter to this tool, but the whole document is
//! kept so that rewriting it (to record `synchroArchiveUrl`) loses nothing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Key under which the download URL of an installed archive is recorded.
pub const ARCHIVE_URL_KEY: &str = "synchroArchiveUrl";

/// Parsed app descriptor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Map<String, Value>);

impl Manifest {
    /// Parse a descriptor; the document must be a JSON object.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        serde_json::from_slice(bytes)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// Whether the descriptor declares `engines.synchro`.
    pub fn is_synchro_app(&self) -> bool {
        self.engine("synchro").is_some()
    }

    /// Version requirement declared under `engines.<name>`. Null, `false`,
    /// zero and empty-string values count as undeclared.
    pub fn engine(&self, name: &str) -> Option<&Value> {
        self.0
            .get("engines")
            .and_then(Value::as_object)
            .and_then(|engines| engines.get(name))
            .filter(|v| is_truthy(v))
    }

    /// Declared dependencies, name to version constraint.
    pub fn dependencies(&self) -> BTreeMap<String, String> {
        self.0
            .get("dependencies")
            .and_then(Value::as_object)
            .map(|deps| {
                deps.iter()
                    .map(|(name, constraint)| {
                        let constraint = match constraint {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (name.clone(), constraint)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_dependencies(&self) -> bool {
        self.0
            .get("dependencies")
            .and_then(Value::as_object)
            .is_some_and(|deps| !deps.is_empty())
    }

    /// URL the app was installed from, if it was installed from one.
    pub fn archive_url(&self) -> Option<&str> {
        self.0.get(ARCHIVE_URL_KEY).and_then(Value::as_str)
    }

    pub fn set_archive_url(&mut self, url: &str) {
        self.0
            .insert(ARCHIVE_URL_KEY.to_string(), Value::String(url.to_string()));
    }

    /// Serialize with two-space indentation, as npm writes it.
    pub fn to_pretty_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(&self.0)
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}
