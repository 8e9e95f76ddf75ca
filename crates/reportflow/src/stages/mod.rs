//! The five pipeline stages and the rendering helpers they share.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::llm::{InvocationConfig, LlmRequest};
use crate::pipeline::{RunContext, StructuredMap, SubtaskOutcome};
use crate::prompts::{PromptError, PromptResolver};

pub mod extraction;
pub mod fanout;
pub mod planning;
pub mod report;
pub mod synthesis;

pub use extraction::ExtractionStage;
pub use fanout::{FanOutStage, SubtaskError};
pub use planning::PlanningStage;
pub use report::ReportStage;
pub use synthesis::SynthesisStage;

/// Resolves and renders the prompt for `key` at the run's prompt version.
pub(crate) fn build_request(
    prompts: &dyn PromptResolver,
    key: &str,
    ctx: &RunContext,
    vars: &HashMap<&str, String>,
    config: InvocationConfig,
) -> Result<LlmRequest, PromptError> {
    let template = prompts.resolve(key, &ctx.config.prompt_version)?;
    Ok(LlmRequest {
        prompt: template.render(vars)?,
        system_instruction: template.system_instruction,
        config,
    })
}

/// Pretty JSON for prompts, or `(none)` for an empty map.
pub(crate) fn render_map(map: &StructuredMap) -> String {
    if map.is_empty() {
        return "(none)".to_string();
    }
    serde_json::to_string_pretty(map).unwrap_or_else(|_| "(unrenderable)".to_string())
}

pub(crate) fn render_metadata(metadata: &BTreeMap<String, Value>) -> String {
    if metadata.is_empty() {
        return "(none)".to_string();
    }
    metadata
        .iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("- {}: {}", key, s),
            other => format!("- {}: {}", key, other),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Numbered digest of sub-task outcomes, in completion order.
pub(crate) fn subtask_digest(results: &[SubtaskOutcome]) -> String {
    if results.is_empty() {
        return "(no sub-task results)".to_string();
    }
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}. [{}] {}\n{}",
                i + 1,
                r.identity,
                r.task_preview,
                r.result_text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Errors and warnings accumulated so far, one per line.
pub(crate) fn diagnostics_block(errors: &[String], warnings: &[String]) -> String {
    if errors.is_empty() && warnings.is_empty() {
        return "(none)".to_string();
    }
    errors
        .iter()
        .map(|e| format!("- error: {}", e))
        .chain(warnings.iter().map(|w| format!("- warning: {}", w)))
        .collect::<Vec<_>>()
        .join("\n")
}
