//! Deployment outputs.
//!
//! Produced once by the driver after apply, read by the orchestrator and
//! verifier, never mutated.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutputError {
    #[error("Output '{0}' not found")]
    KeyNotFound(String),

    #[error("Output '{key}' is empty")]
    Empty { key: String },

    #[error("Output '{key}' is not an object")]
    NotAnObject { key: String },

    #[error("Output '{key}' has no non-empty string attribute '{attribute}'")]
    MissingAttribute { key: String, attribute: String },

    #[error("Malformed engine output: {0}")]
    Malformed(String),
}

/// One entry of `terraform output -json`.
#[derive(Debug, Deserialize)]
struct OutputEnvelope {
    value: Value,
    #[serde(default)]
    sensitive: bool,
}

/// Named values exposed by a deployment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentOutputs {
    values: BTreeMap<String, Value>,
    sensitive: Vec<String>,
}

impl DeploymentOutputs {
    /// Parse the JSON document printed by `terraform output -json`.
    pub fn from_engine_json(json: &str) -> Result<Self, OutputError> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }

        let envelopes: BTreeMap<String, OutputEnvelope> =
            serde_json::from_str(json).map_err(|e| OutputError::Malformed(e.to_string()))?;

        let mut outputs = Self::default();
        for (key, envelope) in envelopes {
            if envelope.sensitive {
                outputs.sensitive.push(key.clone());
            }
            outputs.values.insert(key, envelope.value);
        }
        Ok(outputs)
    }

    #[cfg(test)]
    fn from_values(values: BTreeMap<String, Value>) -> Self {
        Self {
            values,
            sensitive: Vec::new(),
        }
    }

    /// Look up an output by name.
    pub fn output(&self, key: &str) -> Result<&Value, OutputError> {
        self.values
            .get(key)
            .ok_or_else(|| OutputError::KeyNotFound(key.to_string()))
    }

    /// Look up an output and require it to be non-empty.
    pub fn require_non_empty(&self, key: &str) -> Result<&Value, OutputError> {
        let value = self.output(key)?;
        if is_empty(value) {
            return Err(OutputError::Empty {
                key: key.to_string(),
            });
        }
        Ok(value)
    }

    /// Read a non-empty string attribute of an object output.
    pub fn attribute(&self, key: &str, attribute: &str) -> Result<&str, OutputError> {
        let object = self
            .output(key)?
            .as_object()
            .ok_or_else(|| OutputError::NotAnObject {
                key: key.to_string(),
            })?;

        object
            .get(attribute)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| OutputError::MissingAttribute {
                key: key.to_string(),
                attribute: attribute.to_string(),
            })
    }

    /// Whether the engine marked an output as sensitive.
    pub fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive.iter().any(|k| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Outputs the engine did not mark as sensitive, safe to log.
    pub fn non_sensitive(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .filter(move |(k, _)| !self.is_sensitive(k))
    }
}

/// Free-function form of [`DeploymentOutputs::output`].
pub fn output<'a>(outputs: &'a DeploymentOutputs, key: &str) -> Result<&'a Value, OutputError> {
    outputs.output(key)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
