//! Language-model collaborator contract.
//!
//! Concrete providers live outside this crate. The pipeline only needs
//! plain completion and, for tool-bearing sub-tasks, a tool-calling loop
//! driven by the provider.

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

pub mod structured;
pub mod tools;

pub use structured::{invoke_structured, parse_structured};
pub use tools::{
    CapabilityTool, ResolvedToolSet, StaticToolRegistry, ToolDefinition, ToolError, ToolExecutor,
    ToolRegistry,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Model does not support tool calling")]
    ToolsUnsupported,

    #[error("Tool round limit of {0} exceeded")]
    ToolRoundsExceeded(u32),

    #[error("Model call timed out")]
    TimedOut,

    #[error("Malformed structured response: {0}")]
    MalformedStructured(String),
}

/// Requested form of the model's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    Text,
    Structured,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationConfig {
    pub temperature: f32,
    pub response_shape: ResponseShape,
    /// Only meaningful in tool-calling mode.
    pub max_tool_rounds: Option<u32>,
}

impl InvocationConfig {
    pub fn text(temperature: f32) -> Self {
        Self {
            temperature,
            response_shape: ResponseShape::Text,
            max_tool_rounds: None,
        }
    }

    pub fn structured(temperature: f32) -> Self {
        Self {
            temperature,
            response_shape: ResponseShape::Structured,
            max_tool_rounds: None,
        }
    }

    pub fn with_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = Some(rounds);
        self
    }
}

/// A rendered prompt plus invocation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub prompt: String,
    pub system_instruction: String,
    pub config: InvocationConfig,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Plain completion. For [`ResponseShape::Structured`] requests the
    /// returned text is expected to carry a JSON object.
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;

    /// Tool-calling mode: the model may call into `executor` for up to
    /// `request.config.max_tool_rounds` rounds before answering.
    async fn complete_with_tools(
        &self,
        _request: &LlmRequest,
        _tools: &[ToolDefinition],
        _executor: &dyn ToolExecutor,
    ) -> Result<String, LlmError> {
        Err(LlmError::ToolsUnsupported)
    }

    fn supports_tools(&self) -> bool {
        false
    }
}

/// Bounds a collaborator call by `deadline`, mapping expiry to
/// [`LlmError::TimedOut`].
pub async fn with_deadline<F, T>(deadline: Instant, call: F) -> Result<T, LlmError>
where
    F: Future<Output = Result<T, LlmError>>,
{
    tokio::time::timeout_at(deadline, call)
        .await
        .map_err(|_| LlmError::TimedOut)?
}
