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
use crate::validation::ValidationGate;

use super::{build_request, render_map, render_metadata};

/// Produces the execution plan: an objective and the sub-task list.
pub struct PlanningStage {
    model: Arc<dyn LanguageModel>,
    prompts: Arc<dyn PromptResolver>,
    gate: Arc<ValidationGate>,
}

impl PlanningStage {
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
impl Stage for PlanningStage {
    fn name(&self) -> StageName {
        StageName::Planning
    }

    async fn run(
        &self,
        state: &PipelineState,
        ctx: &RunContext,
    ) -> Result<StageOutput, PipelineError> {
        let document_names = state
            .input_documents()
            .iter()
            .map(|d| d.filename.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let mut vars = HashMap::new();
        vars.insert("facts", render_map(state.extracted_facts()));
        vars.insert("metadata", render_metadata(state.input_metadata()));
        vars.insert("document_names", document_names);

        let config = InvocationConfig::structured(ctx.config.models.planning_temperature);
        let request = match build_request(self.prompts.as_ref(), "planning", ctx, &vars, config) {
            Ok(request) => request,
            Err(e) => return Ok(self.degraded(state, format!("Planning failed: {}", e))),
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
            Err(e) => return Ok(self.degraded(state, format!("Planning failed: {}", e))),
        };

        let outcome = self.gate.gate_plan(correct_plan(raw));
        let task_count = outcome
            .value
            .get("tasks")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        info!(tasks = task_count, "Execution plan ready");

        let mut output = StageOutput::new(StageName::Planning);
        if let Some(first) = outcome.errors.first() {
            output.mark_degraded(first.clone());
        }
        output.execution_plan = Some(outcome.value);
        output.errors = outcome.errors;
        output.warnings = outcome.warnings;
        Ok(output)
    }
}

/// Trims the objective and task fields; trims, de-duplicates and drops
/// blank tool names. Values of unexpected types are left for the gate.
pub fn correct_plan(mut plan: StructuredMap) -> StructuredMap {
    if let Some(Value::String(objective)) = plan.get_mut("objective") {
        *objective = objective.trim().to_string();
    }

    if let Some(Value::Array(tasks)) = plan.get_mut("tasks") {
        for task in tasks.iter_mut().filter_map(Value::as_object_mut) {
            for field in ["task_text", "relevant_content"] {
                if let Some(Value::String(text)) = task.get_mut(field) {
                    *text = text.trim().to_string();
                }
            }

            if let Some(Value::Array(names)) = task.get_mut("tool_names") {
                let mut seen = Vec::new();
                for name in names.iter().filter_map(Value::as_str).map(str::trim) {
                    if !name.is_empty() && !seen.iter().any(|s: &String| s == name) {
                        seen.push(name.to_string());
                    }
                }
                *names = seen.into_iter().map(Value::String).collect();
            }
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::prompts::BuiltinPrompts;
    use crate::test_support::{ctx, model};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn stage(model: Arc<dyn LanguageModel>) -> PlanningStage {
        PlanningStage::new(
            model,
            Arc::new(BuiltinPrompts::new()),
            Arc::new(ValidationGate::new().unwrap()),
        )
    }

    fn state() -> PipelineState {
        PipelineState::new(Vec::new(), BTreeMap::new())
    }

    #[test]
    fn test_correct_plan() {
        let raw = json!({
            "objective": "  Assess risk ",
            "tasks": [
                {
                    "task_text": " Agent: Legal\nReview ",
                    "relevant_content": " c ",
                    "tool_names": [" search", "search", "", "calc", 3]
                },
                "not an object"
            ]
        });
        let plan = correct_plan(raw.as_object().cloned().unwrap());
        assert_eq!(plan["objective"], "Assess risk");
        assert_eq!(plan["tasks"][0]["task_text"], "Agent: Legal\nReview");
        assert_eq!(plan["tasks"][0]["relevant_content"], "c");
        assert_eq!(plan["tasks"][0]["tool_names"], json!(["search", "calc"]));
        assert_eq!(plan["tasks"][1], "not an object");
    }

    #[tokio::test]
    async fn test_valid_plan() {
        let model = model(|_| {
            Ok(json!({
                "objective": "o",
                "tasks": [{"task_text": "t", "relevant_content": "c", "tool_names": []}]
            })
            .to_string())
        });
        let output = stage(model).run(&state(), &ctx()).await.unwrap();
        assert!(!output.is_degraded());
        assert!(output.warnings.is_empty());
        assert_eq!(output.execution_plan.unwrap()["tasks"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_plan_with_tasks_warns() {
        let model = model(|_| {
            Ok(json!({"tasks": [{"task_text": "t", "relevant_content": "c"}]}).to_string())
        });
        let output = stage(model).run(&state(), &ctx()).await.unwrap();
        assert!(!output.is_degraded());
        assert!(output.errors.is_empty());
        assert_eq!(output.warnings.len(), 1);
        assert!(!output.execution_plan.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_plan_without_tasks_errors() {
        let model = model(|_| Ok(json!({"objective": "o", "tasks": []}).to_string()));
        let output = stage(model).run(&state(), &ctx()).await.unwrap();
        assert!(output.is_degraded());
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.execution_plan, Some(StructuredMap::new()));
    }

    #[tokio::test]
    async fn test_model_failure_degrades() {
        let model = model(|_| Err(LlmError::RateLimited("quota".into())));
        let output = stage(model).run(&state(), &ctx()).await.unwrap();
        assert!(output.is_degraded());
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.execution_plan, Some(StructuredMap::new()));
    }
}
