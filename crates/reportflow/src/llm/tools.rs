//! Capability tools a sub-task may use through tool-calling mode.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool '{tool}' failed: {reason}")]
    Failed { tool: String, reason: String },
}

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

#[async_trait]
pub trait CapabilityTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, arguments: Value) -> Result<String, ToolError>;
}

/// Resolves tool names requested by a plan.
pub trait ToolRegistry: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Arc<dyn CapabilityTool>>;
}

/// Callback handed to the model for executing tool requests.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: Value) -> Result<String, ToolError>;
}

/// Registry backed by a fixed name → tool map.
#[derive(Default, Clone)]
pub struct StaticToolRegistry {
    tools: HashMap<String, Arc<dyn CapabilityTool>>,
}

impl StaticToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its definition name, replacing any previous one.
    pub fn register(&mut self, tool: Arc<dyn CapabilityTool>) {
        self.tools.insert(tool.definition().name, tool);
    }

    pub fn with_tool(mut self, tool: Arc<dyn CapabilityTool>) -> Self {
        self.register(tool);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl ToolRegistry for StaticToolRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<dyn CapabilityTool>> {
        self.tools.get(name).cloned()
    }
}

/// The tools resolved for one sub-task.
#[derive(Default, Clone)]
pub struct ResolvedToolSet {
    tools: Vec<Arc<dyn CapabilityTool>>,
}

impl ResolvedToolSet {
    /// Resolves `names` against `registry`; returns the set and the names
    /// that could not be resolved.
    pub fn resolve<'a, I>(registry: &dyn ToolRegistry, names: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut tools = Vec::new();
        let mut unknown = Vec::new();
        for name in names {
            match registry.resolve(name) {
                Some(tool) => tools.push(tool),
                None => unknown.push(name.clone()),
            }
        }
        (Self { tools }, unknown)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.definition().name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ResolvedToolSet {
    async fn execute(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.definition().name == name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        tool.call(arguments).await
    }
}
