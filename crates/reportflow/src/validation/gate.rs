//! The per-stage validation gate.
//!
//! Planning and Synthesis are gated differently. A Planning output that
//! violates its contract but still carries tasks goes through unvalidated
//! with a warning; without tasks it becomes an empty plan and an error.
//! A Synthesis output that violates its contract is always replaced by
//! [`synthesis_fallback`] and recorded as an error.

use serde_json::{json, Value};
use tracing::{error, warn};

use crate::pipeline::StructuredMap;

use super::contract::{Contract, ContractError};

/// Result of gating one stage output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateOutcome {
    pub value: StructuredMap,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl GateOutcome {
    fn passed(value: StructuredMap) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub struct ValidationGate {
    plan: Contract,
    synthesis: Contract,
}

impl ValidationGate {
    /// Gate using the embedded plan and synthesis contracts.
    pub fn new() -> Result<Self, ContractError> {
        Ok(Self::with_contracts(Contract::plan()?, Contract::synthesis()?))
    }

    pub fn with_contracts(plan: Contract, synthesis: Contract) -> Self {
        Self { plan, synthesis }
    }

    pub fn gate_plan(&self, raw: StructuredMap) -> GateOutcome {
        let violations = match self.plan.validate(&Value::Object(raw.clone())) {
            Ok(()) => return GateOutcome::passed(raw),
            Err(violations) => violations.join("; "),
        };

        let has_tasks = raw
            .get("tasks")
            .and_then(Value::as_array)
            .is_some_and(|tasks| !tasks.is_empty());

        if has_tasks {
            warn!(violations = %violations, "Plan failed validation, proceeding unvalidated");
            GateOutcome {
                value: raw,
                warnings: vec![format!(
                    "Planning output failed validation, proceeding with unvalidated plan: {}",
                    violations
                )],
                errors: Vec::new(),
            }
        } else {
            error!(violations = %violations, "Plan failed validation and has no tasks");
            GateOutcome {
                value: StructuredMap::new(),
                warnings: Vec::new(),
                errors: vec![format!(
                    "Planning output failed validation and contains no tasks: {}",
                    violations
                )],
            }
        }
    }

    pub fn gate_synthesis(&self, raw: StructuredMap) -> GateOutcome {
        match self.synthesis.validate(&Value::Object(raw.clone())) {
            Ok(()) => GateOutcome::passed(raw),
            Err(violations) => {
                let reason = violations.join("; ");
                error!(violations = %reason, "Synthesis failed validation, substituting default");
                GateOutcome {
                    value: synthesis_fallback(&reason),
                    warnings: Vec::new(),
                    errors: vec![format!("Synthesis output failed validation: {}", reason)],
                }
            }
        }
    }
}

/// Minimal safe synthesis carrying the failure reason.
pub fn synthesis_fallback(reason: &str) -> StructuredMap {
    let value = json!({
        "status": "validation_failed",
        "reason": reason,
        "summary": "Synthesis unavailable.",
        "key_findings": [],
        "confidence": "low",
        "recommendations": [],
    });
    match value {
        Value::Object(map) => map,
        _ => StructuredMap::new(),
    }
}
