//! JSON Schema contracts for structured stage output.

use serde_json::Value;
use thiserror::Error;

const PLAN_SCHEMA_JSON: &str = include_str!("../../../../schema/plan-v1.json");
const SYNTHESIS_SCHEMA_JSON: &str = include_str!("../../../../schema/synthesis-v1.json");

#[derive(Error, Debug)]
pub enum ContractError {
    #[error("Invalid schema JSON for contract '{name}': {source}")]
    InvalidJson {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to compile schema for contract '{name}': {reason}")]
    Compile { name: String, reason: String },
}

/// A compiled schema. Validation is purely structural.
pub struct Contract {
    name: String,
    validator: jsonschema::Validator,
}

impl Contract {
    pub fn compile(name: &str, schema_json: &str) -> Result<Self, ContractError> {
        let schema: Value =
            serde_json::from_str(schema_json).map_err(|source| ContractError::InvalidJson {
                name: name.to_string(),
                source,
            })?;

        let validator = jsonschema::validator_for(&schema).map_err(|e| ContractError::Compile {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            name: name.to_string(),
            validator,
        })
    }

    /// Contract for the Planning stage's execution plan.
    pub fn plan() -> Result<Self, ContractError> {
        Self::compile("plan-v1", PLAN_SCHEMA_JSON)
    }

    /// Contract for the Synthesis stage's output.
    pub fn synthesis() -> Result<Self, ContractError> {
        Self::compile("synthesis-v1", SYNTHESIS_SCHEMA_JSON)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns every violation message, or `Ok` when the instance conforms.
    pub fn validate(&self, instance: &Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|e| e.to_string())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl std::fmt::Debug for Contract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Contract").field("name", &self.name).finish()
    }
}
