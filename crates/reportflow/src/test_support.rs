//! Stub collaborators shared by unit tests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{LanguageModel, LlmError, LlmRequest};
use crate::pipeline::{NoopProgress, PipelineConfig, RunContext};

/// Model answering through a closure.
pub struct FnModel<F> {
    respond: F,
}

impl<F> FnModel<F>
where
    F: Fn(&LlmRequest) -> Result<String, LlmError> + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self { respond }
    }
}

#[async_trait]
impl<F> LanguageModel for FnModel<F>
where
    F: Fn(&LlmRequest) -> Result<String, LlmError> + Send + Sync,
{
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        (self.respond)(request)
    }
}

pub fn model<F>(respond: F) -> Arc<dyn LanguageModel>
where
    F: Fn(&LlmRequest) -> Result<String, LlmError> + Send + Sync + 'static,
{
    Arc::new(FnModel::new(respond))
}

pub fn ctx() -> RunContext {
    ctx_with(PipelineConfig::default())
}

pub fn ctx_with(config: PipelineConfig) -> RunContext {
    RunContext::new("run-test", Arc::new(config), Arc::new(NoopProgress))
}
