use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::llm::{invoke_structured, InvocationConfig, LanguageModel};
use crate::pipeline::{
    PipelineError, PipelineState, RunContext, Stage, StageName, StageOutput, StructuredMap,
};
use crate::prompts::PromptResolver;
use crate::validation::{synthesis_fallback, ValidationGate};

use super::{build_request, diagnostics_block, render_map, subtask_digest};

const LIST_FIELDS: [&str; 3] = ["key_findings", "recommendations", "gaps"];

/// Reconciles extracted facts and sub-task outcomes into one structure.
pub struct SynthesisStage {
    model: Arc<dyn LanguageModel>,
    prompts: Arc<dyn PromptResolver>,
    gate: Arc<ValidationGate>,
}

impl SynthesisStage {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        prompts: Arc<dyn PromptResolver>,
        gate: Arc<ValidationGate>,
    ) -> Self {
        Self {
            model,
            prompts,
            gate,
        }
    }
}

#[async_trait]
impl Stage for SynthesisStage {
    fn name(&self) -> StageName {
        StageName::Synthesis
    }

    async fn run(
        &self,
        state: &PipelineState,
        ctx: &RunContext,
    ) -> Result<StageOutput, PipelineError> {
        let objective = state
            .execution_plan()
            .get("objective")
            .and_then(Value::as_str)
            .filter(|o| !o.trim().is_empty())
            .unwrap_or("(not specified)")
            .to_string();

        let mut vars = HashMap::new();
        vars.insert("objective", objective);
        vars.insert("facts", render_map(state.extracted_facts()));
        vars.insert("subtask_digest", subtask_digest(state.subtask_results()));
        vars.insert("diagnostics", diagnostics_block(state.errors(), state.warnings()));

        let config = InvocationConfig::structured(ctx.config.models.synthesis_temperature);
        let request = match build_request(self.prompts.as_ref(), "synthesis", ctx, &vars, config) {
            Ok(request) => request,
            Err(e) => return Ok(self.degraded(state, format!("Synthesis failed: {}", e))),
        };

        let raw = match invoke_structured(
            self.model.as_ref(),
            &request,
            ctx.config.structured_retries,
            ctx.call_deadline(),
        )
        .await
        {
            Ok(raw) => raw,
            Err(e) => return Ok(self.degraded(state, format!("Synthesis failed: {}", e))),
        };

        let outcome = self.gate.gate_synthesis(normalize_synthesis(raw));
        let mut output = StageOutput::new(StageName::Synthesis);
        if let Some(first) = outcome.errors.first() {
            output.mark_degraded(first.clone());
        } else {
            let findings = outcome
                .value
                .get("key_findings")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            info!(findings, "Synthesis complete");
        }
        output.synthesis = Some(outcome.value);
        output.errors = outcome.errors;
        output.warnings = outcome.warnings;
        Ok(output)
    }

    /// Failed synthesis still hands a well-formed structure downstream.
    fn degraded(&self, _state: &PipelineState, reason: String) -> StageOutput {
        let mut output = StageOutput::degraded(StageName::Synthesis, reason.clone());
        let mut fallback = synthesis_fallback(&reason);
        fallback.insert("status".to_string(), Value::String("unavailable".to_string()));
        output.synthesis = Some(fallback);
        output
    }
}

/// Lower-cases `confidence`, trims the summary, and trims and de-duplicates
/// the list fields.
pub fn normalize_synthesis(mut synthesis: StructuredMap) -> StructuredMap {
    if let Some(Value::String(confidence)) = synthesis.get_mut("confidence") {
        *confidence = confidence.trim().to_lowercase();
    }
    if let Some(Value::String(summary)) = synthesis.get_mut("summary") {
        *summary = summary.trim().to_string();
    }

    for field in LIST_FIELDS {
        if let Some(Value::Array(items)) = synthesis.get_mut(field) {
            let mut kept: Vec<Value> = Vec::with_capacity(items.len());
            for item in items.drain(..) {
                let item = match item {
                    Value::String(s) => Value::String(s.trim().to_string()),
                    other => other,
                };
                let blank = item.as_str().is_some_and(str::is_empty);
                if !blank && !kept.contains(&item) {
                    kept.push(item);
                }
            }
            *items = kept;
        }
    }

    synthesis
}
