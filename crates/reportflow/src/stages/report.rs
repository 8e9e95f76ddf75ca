use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::llm::{with_deadline, InvocationConfig, LanguageModel};
use crate::pipeline::{PipelineError, PipelineState, RunContext, Stage, StageName, StageOutput};
use crate::prompts::PromptResolver;

use super::{build_request, diagnostics_block, render_map, subtask_digest};

/// Writes the final plain-text report.
pub struct ReportStage {
    model: Arc<dyn LanguageModel>,
    prompts: Arc<dyn PromptResolver>,
}

impl ReportStage {
    pub fn new(model: Arc<dyn LanguageModel>, prompts: Arc<dyn PromptResolver>) -> Self {
        Self { model, prompts }
    }
}

#[async_trait]
impl Stage for ReportStage {
    fn name(&self) -> StageName {
        StageName::Report
    }

    async fn run(
        &self,
        state: &PipelineState,
        ctx: &RunContext,
    ) -> Result<StageOutput, PipelineError> {
        let mut vars = HashMap::new();
        vars.insert("run_id", state.run_id().to_string());
        vars.insert("synthesis", render_map(state.synthesis()));
        vars.insert("facts", render_map(state.extracted_facts()));
        vars.insert("subtask_digest", subtask_digest(state.subtask_results()));
        vars.insert("diagnostics", diagnostics_block(state.errors(), state.warnings()));

        let config = InvocationConfig::text(ctx.config.models.report_temperature);
        let request = match build_request(self.prompts.as_ref(), "report", ctx, &vars, config) {
            Ok(request) => request,
            Err(e) => {
                return Ok(self.degraded(state, format!("Report generation failed: {}", e)))
            }
        };

        let report = match with_deadline(ctx.call_deadline(), self.model.complete(&request)).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                return Ok(self.degraded(
                    state,
                    "Report generation failed: model returned an empty report".to_string(),
                ))
            }
            Err(e) => {
                return Ok(self.degraded(state, format!("Report generation failed: {}", e)))
            }
        };

        info!(chars = report.len(), "Report generated");
        let mut output = StageOutput::new(StageName::Report);
        output.final_report = Some(report);
        Ok(output)
    }

    /// Falls back to a report assembled from the state, so the report is
    /// never empty once this stage has run.
    fn degraded(&self, state: &PipelineState, reason: String) -> StageOutput {
        let report = fallback_report(state, &reason);
        let mut output = StageOutput::degraded(StageName::Report, reason);
        output.final_report = Some(report);
        output
    }
}

/// Deterministic plain-text report built from the state alone.
pub fn fallback_report(state: &PipelineState, reason: &str) -> String {
    let synthesis = state.synthesis();
    let mut out = String::new();

    let _ = writeln!(out, "Analytical report (run {})", state.run_id());
    let _ = writeln!(out, "\nThis report was assembled without the report writer: {}", reason);

    let _ = writeln!(out, "\nSummary");
    let summary = synthesis
        .get("summary")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("No synthesis available.");
    let _ = writeln!(out, "{}", summary);

    let _ = writeln!(out, "\nKey findings");
    let findings: Vec<&str> = synthesis
        .get("key_findings")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if findings.is_empty() {
        let _ = writeln!(out, "- none");
    }
    for finding in findings {
        let _ = writeln!(out, "- {}", finding);
    }

    let _ = writeln!(out, "\nExtracted facts");
    if state.extracted_facts().is_empty() {
        let _ = writeln!(out, "No facts were extracted from the input documents.");
    } else {
        for (key, value) in state.extracted_facts() {
            match value {
                Value::String(s) => {
                    let _ = writeln!(out, "- {}: {}", key, s);
                }
                other => {
                    let _ = writeln!(out, "- {}: {}", key, other);
                }
            }
        }
    }

    let _ = writeln!(out, "\nSub-task results");
    let _ = writeln!(out, "{}", subtask_digest(state.subtask_results()));

    let _ = writeln!(out, "\nKnown issues");
    let _ = writeln!(out, "{}", diagnostics_block(state.errors(), state.warnings()));
    let _ = write!(out, "- error: {}", reason);

    out
}
