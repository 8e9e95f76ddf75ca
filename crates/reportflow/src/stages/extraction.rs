use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::documents::{ExtractError, TextExtractor};
use crate::llm::{invoke_structured, InvocationConfig, LanguageModel};
use crate::pipeline::{
    PipelineError, PipelineState, RunContext, Stage, StageName, StageOutput, StructuredMap,
};
use crate::prompts::PromptResolver;

use super::{build_request, render_metadata};

/// Turns the input documents into a map of extracted facts.
pub struct ExtractionStage {
    model: Arc<dyn LanguageModel>,
    extractor: Arc<dyn TextExtractor>,
    prompts: Arc<dyn PromptResolver>,
}

impl ExtractionStage {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        extractor: Arc<dyn TextExtractor>,
        prompts: Arc<dyn PromptResolver>,
    ) -> Self {
        Self {
            model,
            extractor,
            prompts,
        }
    }

    /// Extracts every document; returns the rendered corpus and one warning
    /// per document that could not be read.
    async fn read_documents(
        &self,
        state: &PipelineState,
        ctx: &RunContext,
    ) -> (Vec<String>, Vec<String>) {
        let mut sections = Vec::new();
        let mut failures = Vec::new();

        for document in state.input_documents() {
            let extract = self.extractor.extract(document);
            let result = tokio::time::timeout_at(ctx.call_deadline(), extract)
                .await
                .unwrap_or_else(|_| {
                    Err(ExtractError::Other("text extraction timed out".to_string()))
                });

            match result {
                Ok(text) => {
                    debug!(
                        filename = %document.filename,
                        chars = text.len(),
                        "Extracted document text"
                    );
                    sections.push(format!("### {}\n{}", document.filename, text.trim()));
                }
                Err(e) => {
                    warn!(
                        filename = %document.filename,
                        error = %e,
                        "Document text extraction failed"
                    );
                    failures.push(format!("'{}': {}", document.filename, e));
                }
            }
        }

        (sections, failures)
    }
}

#[async_trait]
impl Stage for ExtractionStage {
    fn name(&self) -> StageName {
        StageName::Extraction
    }

    async fn run(
        &self,
        state: &PipelineState,
        ctx: &RunContext,
    ) -> Result<StageOutput, PipelineError> {
        if state.input_documents().is_empty() {
            return Ok(self.degraded(state, "Extraction failed: no input documents".to_string()));
        }

        let (sections, failures) = self.read_documents(state, ctx).await;
        if sections.is_empty() {
            return Ok(self.degraded(
                state,
                format!(
                    "Extraction failed: no document text could be extracted ({})",
                    failures.join("; ")
                ),
            ));
        }
        let warnings: Vec<String> = failures
            .into_iter()
            .map(|f| format!("Skipped document {}", f))
            .collect();

        let mut vars = HashMap::new();
        vars.insert("documents", sections.join("\n\n"));
        vars.insert("metadata", render_metadata(state.input_metadata()));

        let config = InvocationConfig::structured(ctx.config.models.extraction_temperature);
        let facts = match build_request(self.prompts.as_ref(), "extraction", ctx, &vars, config) {
            Ok(request) => {
                invoke_structured(
                    self.model.as_ref(),
                    &request,
                    ctx.config.structured_retries,
                    ctx.call_deadline(),
                )
                .await
                .map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        let mut output = match facts {
            Ok(raw) => {
                let facts = normalize_facts(raw);
                info!(facts = facts.len(), "Extracted facts");
                let mut output = StageOutput::new(StageName::Extraction);
                output.extracted_facts = Some(facts);
                output
            }
            Err(reason) => self.degraded(state, format!("Extraction failed: {}", reason)),
        };
        output.warnings.extend(warnings);
        Ok(output)
    }
}

/// Trims strings and drops nulls, blank strings and empty containers,
/// recursively.
pub fn normalize_facts(facts: StructuredMap) -> StructuredMap {
    facts
        .into_iter()
        .filter_map(|(key, value)| normalize_value(value).map(|v| (key.trim().to_string(), v)))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn normalize_value(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| Value::String(trimmed.to_string()))
        }
        Value::Array(items) => {
            let items: Vec<Value> = items.into_iter().filter_map(normalize_value).collect();
            (!items.is_empty()).then_some(Value::Array(items))
        }
        Value::Object(map) => {
            let map = normalize_facts(map);
            (!map.is_empty()).then_some(Value::Object(map))
        }
        other => Some(other),
    }
}
