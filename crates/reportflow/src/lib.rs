pub mod audit;
pub mod config;
pub mod documents;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod stages;
pub mod telemetry;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

pub use audit::{
    AuditRecord, AuditSink, MemoryAuditSink, NoopAuditSink, RecordType, SqliteAuditStore,
};
pub use config::{load_config, Config};
pub use documents::{DocumentDescriptor, PlainTextExtractor, TextExtractor};
pub use error::{ConfigError, ReportflowError, Result};
pub use llm::{LanguageModel, LlmError, LlmRequest};
pub use pipeline::{
    Pipeline, PipelineBuilder, PipelineConfig, PipelineError, PipelineState, RunFailure, Stage,
    StageName,
};
pub use prompts::{BuiltinPrompts, PromptResolver, PromptTemplate};
pub use telemetry::init_tracing;
