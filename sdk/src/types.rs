//! Capability catalog and input/output types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Input map handed to a capability: parameter name to JSON value.
pub type Inputs = Map<String, Value>;

/// One declared input parameter of a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,

    /// Loose type tag ("string", "integer", "array", ...). Advisory only.
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

fn default_param_type() -> String {
    "any".to_string()
}

impl ParamSpec {
    /// A required parameter
    pub fn required(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            required: true,
            default: None,
            description: String::new(),
        }
    }

    /// An optional parameter
    pub fn optional(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Catalog entry describing one capability.
///
/// The catalog is the sole source of truth for whether a capability exists.
/// `guidance` is descriptive text shown to the planner and is never enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub inputs: Vec<ParamSpec>,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

impl CapabilitySpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            guidance: None,
        }
    }

    /// Add a declared input parameter
    pub fn with_input(mut self, param: ParamSpec) -> Self {
        self.inputs.push(param);
        self
    }

    /// Add a declared output field
    pub fn with_output(mut self, field: impl Into<String>) -> Self {
        self.outputs.push(field.into());
        self
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }

    /// Names of the required parameters that have no default
    pub fn required_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .filter(|p| p.required && p.default.is_none())
            .map(|p| p.name.as_str())
    }
}

/// Typed accessors over a capability's input map.
#[derive(Debug, Clone, Default)]
pub struct CapabilityInput {
    pub params: Inputs,
}

impl CapabilityInput {
    pub fn new(params: Inputs) -> Self {
        Self { params }
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Result<String, InputError> {
        match self.params.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(InputError::InvalidParameter(key.to_string())),
            None => Err(InputError::MissingParameter(key.to_string())),
        }
    }

    /// Get an optional string parameter
    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    }
}

/// Helpers for the result-map convention shared by every capability.
///
/// A result is a JSON object. A failed invocation carries `"error": true`
/// (or a non-empty error string) plus a human-readable `"message"`. A result
/// may report the tokens it consumed under `"tokens_used"`.
pub struct CapabilityOutput;

impl CapabilityOutput {
    /// Failed result
    pub fn error(message: impl Into<String>) -> Value {
        serde_json::json!({ "error": true, "message": message.into() })
    }

    /// True when the result carries an error flag
    pub fn is_error(result: &Value) -> bool {
        match result.get("error") {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }

    /// Best-effort error description
    pub fn error_message(result: &Value) -> Option<String> {
        if !Self::is_error(result) {
            return None;
        }
        let message = result
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| result.get("error").and_then(|e| e.as_str()))
            .unwrap_or("capability reported an error");
        Some(message.to_string())
    }

    /// Tokens the capability reported consuming, if any
    pub fn tokens_used(result: &Value) -> u64 {
        result
            .get("tokens_used")
            .and_then(|t| t.as_u64())
            .unwrap_or(0)
    }
}

/// Input-access errors
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: Value) -> CapabilityInput {
        match value {
            Value::Object(map) => CapabilityInput::new(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_param_str_success() {
        let input = input(json!({"name": "Alice"}));
        assert_eq!(input.param_str("name").unwrap(), "Alice");
    }

    #[test]
    fn test_param_str_missing() {
        let input = input(json!({}));
        assert!(matches!(
            input.param_str("missing").unwrap_err(),
            InputError::MissingParameter(_)
        ));
    }

    #[test]
    fn test_param_str_wrong_type() {
        let input = input(json!({"name": 3}));
        assert!(matches!(
            input.param_str("name").unwrap_err(),
            InputError::InvalidParameter(_)
        ));
    }

    #[test]
    fn test_error_flag_detection() {
        assert!(CapabilityOutput::is_error(&CapabilityOutput::error("boom")));
        assert!(CapabilityOutput::is_error(&json!({"error": "bad path"})));
        assert!(!CapabilityOutput::is_error(&json!({"error": false})));
        assert!(!CapabilityOutput::is_error(&json!({"error": null})));
        assert!(!CapabilityOutput::is_error(&json!({"error": ""})));
        assert!(!CapabilityOutput::is_error(&json!({"text": "fine"})));
    }

    #[test]
    fn test_error_message() {
        let failed = CapabilityOutput::error("disk full");
        assert_eq!(
            CapabilityOutput::error_message(&failed).as_deref(),
            Some("disk full")
        );
        let as_string = json!({"error": "bad path"});
        assert_eq!(
            CapabilityOutput::error_message(&as_string).as_deref(),
            Some("bad path")
        );
        assert_eq!(CapabilityOutput::error_message(&json!({"ok": 1})), None);
    }

    #[test]
    fn test_tokens_used() {
        assert_eq!(CapabilityOutput::tokens_used(&json!({"tokens_used": 120})), 120);
        assert_eq!(CapabilityOutput::tokens_used(&json!({})), 0);
    }

    #[test]
    fn test_spec_required_inputs() {
        let spec = CapabilitySpec::new("search_documents", "Full-text search")
            .with_input(ParamSpec::required("query", "string"))
            .with_input(ParamSpec::optional("limit", "integer").with_default(json!(10)))
            .with_input(ParamSpec::required("index", "string").with_default(json!("main")))
            .with_output("results");

        let required: Vec<&str> = spec.required_inputs().collect();
        assert_eq!(required, vec!["query"]);
        assert_eq!(spec.outputs, vec!["results"]);
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: CapabilitySpec = serde_json::from_value(json!({
            "name": "organize_files",
            "inputs": [{"name": "path", "required": true}]
        }))
        .unwrap();
        assert_eq!(spec.inputs[0].param_type, "any");
        assert!(spec.inputs[0].required);
        assert!(spec.guidance.is_none());
    }
}
