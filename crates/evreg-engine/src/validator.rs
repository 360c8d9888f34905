use jsonschema::Validator;
use serde_json::Value;

use crate::error::{RegistryError, RegistryResult};

/// Shape check applied to every payload before it is stored.
pub trait SchemaValidator: Send + Sync {
    /// Returns the list of violations, empty when the payload is valid.
    fn violations(&self, payload: &Value) -> Vec<String>;

    fn validate(&self, payload: &Value) -> RegistryResult<()> {
        let violations = self.violations(payload);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Validation(violations))
        }
    }
}

/// Minimal EPCIS event shape: `type` and `eventTime` are required strings;
/// the common optional fields are type-checked when present.
pub const EPCIS_EVENT_SCHEMA: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "type": "object",
  "properties": {
    "@context": { "type": "string" },
    "type": { "type": "string" },
    "eventTime": { "type": "string" },
    "eventTimeZoneOffset": { "type": "string" },
    "epcList": { "type": "array" },
    "action": { "type": "string" },
    "bizStep": { "type": "string" },
    "disposition": { "type": "string" }
  },
  "required": ["type", "eventTime"]
}"#;

/// JSON Schema validator, EPCIS event schema by default.
pub struct EpcisValidator {
    validator: Validator,
}

impl EpcisValidator {
    pub fn new() -> RegistryResult<Self> {
        let schema: Value = serde_json::from_str(EPCIS_EVENT_SCHEMA)
            .map_err(|e| RegistryError::Config(format!("event schema: {e}")))?;
        Self::with_schema(&schema)
    }

    /// Validate against a caller-supplied schema instead.
    pub fn with_schema(schema: &Value) -> RegistryResult<Self> {
        let validator = jsonschema::options()
            .with_draft(jsonschema::Draft::Draft7)
            .build(schema)
            .map_err(|e| RegistryError::Config(format!("schema does not compile: {e}")))?;
        Ok(Self { validator })
    }
}

impl SchemaValidator for EpcisValidator {
    fn violations(&self, payload: &Value) -> Vec<String> {
        self.validator
            .iter_errors(payload)
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{path}: {err}")
                }
            })
            .collect()
    }
}

/// Accepts everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl SchemaValidator for AcceptAll {
    fn violations(&self, _payload: &Value) -> Vec<String> {
        Vec::new()
    }
}
