use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{error, info, info_span, Instrument};

use crate::audit::{
    self, AuditError, AuditRecord, AuditSink, NoopAuditSink, RecordType, SqliteAuditStore,
    RUN_SCOPE,
};
use crate::config::{validate_config, Config};
use crate::documents::{DocumentDescriptor, PlainTextExtractor, TextExtractor};
use crate::error::Result;
use crate::llm::{LanguageModel, StaticToolRegistry, ToolRegistry};
use crate::prompts::{BuiltinPrompts, PromptResolver};
use crate::stages::{ExtractionStage, FanOutStage, PlanningStage, ReportStage, SynthesisStage};
use crate::validation::ValidationGate;

use super::config::PipelineConfig;
use super::error::{PipelineError, RunFailure};
use super::instrument::Instrumented;
use super::progress::{NoopProgress, ProgressReporter};
use super::stage::{RunContext, Stage, StageName};
use super::state::PipelineState;

/// The stage sequencer.
///
/// Runs the five stages strictly one at a time in [`StageName::ORDER`],
/// each wrapped in [`Instrumented`], merging every output into the run's
/// [`PipelineState`]. Degraded stage output never stops the run; only a
/// [`PipelineError`] does.
pub struct Pipeline {
    stages: Vec<Instrumented<Box<dyn Stage>>>,
    config: Arc<PipelineConfig>,
    audit: Arc<dyn AuditSink>,
    progress: Arc<dyn ProgressReporter>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("config", &self.config)
            .finish()
    }
}

impl Pipeline {
    pub fn builder(model: Arc<dyn LanguageModel>) -> PipelineBuilder {
        PipelineBuilder::new(model)
    }

    /// Assembles a pipeline from custom stages. They must be given in
    /// [`StageName::ORDER`].
    pub fn with_stages(
        stages: Vec<Box<dyn Stage>>,
        config: PipelineConfig,
        audit: Arc<dyn AuditSink>,
        progress: Arc<dyn ProgressReporter>,
    ) -> std::result::Result<Self, PipelineError> {
        let got: Vec<StageName> = stages.iter().map(|s| s.name()).collect();
        if got != StageName::ORDER {
            return Err(PipelineError::InvalidTopology {
                expected: StageName::ORDER.to_vec(),
                got,
            });
        }

        let stages = stages
            .into_iter()
            .map(|stage| Instrumented::new(stage, Arc::clone(&audit)))
            .collect();

        Ok(Self {
            stages,
            config: Arc::new(config),
            audit,
            progress,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs the pipeline over `documents` under a fresh run id.
    pub async fn run(
        &self,
        documents: Vec<DocumentDescriptor>,
        metadata: BTreeMap<String, Value>,
    ) -> std::result::Result<PipelineState, RunFailure> {
        self.execute(PipelineState::new(documents, metadata)).await
    }

    pub async fn run_with_id(
        &self,
        run_id: impl Into<String>,
        documents: Vec<DocumentDescriptor>,
        metadata: BTreeMap<String, Value>,
    ) -> std::result::Result<PipelineState, RunFailure> {
        self.execute(PipelineState::with_run_id(run_id, documents, metadata))
            .await
    }

    async fn execute(
        &self,
        mut state: PipelineState,
    ) -> std::result::Result<PipelineState, RunFailure> {
        let ctx = RunContext::new(
            state.run_id(),
            Arc::clone(&self.config),
            Arc::clone(&self.progress),
        );
        let span = info_span!("pipeline", run_id = %ctx.run_id);

        async move {
            if let Err(e) = self.audit.check_ready().await {
                error!(error = %e, "Audit store unreachable, aborting run");
                return Err(RunFailure::new(state, PipelineError::AuditUnavailable(e)));
            }

            info!(documents = state.input_documents().len(), "Run started");
            self.record_run(
                &ctx,
                RecordType::RunStarted,
                json!({
                    "documents": state
                        .input_documents()
                        .iter()
                        .map(|d| d.filename.as_str())
                        .collect::<Vec<_>>(),
                    "metadata_keys": state.input_metadata().keys().collect::<Vec<_>>(),
                }),
                None,
            )
            .await;

            let started = Instant::now();
            for stage in &self.stages {
                let merged = match stage.run(&state, &ctx).await {
                    Ok(output) => state.merge(output),
                    Err(e) => Err(e),
                };
                if let Err(e) = merged {
                    return Err(self.abort(&ctx, state, e, started).await);
                }
            }

            let duration_ms = started.elapsed().as_millis() as u64;
            info!(
                duration_ms,
                sub_tasks = state.subtask_results().len(),
                errors = state.errors().len(),
                warnings = state.warnings().len(),
                "Run completed"
            );
            self.record_run(
                &ctx,
                RecordType::RunCompleted,
                json!({
                    "subtask_results": state.subtask_results().len(),
                    "errors": state.errors().len(),
                    "warnings": state.warnings().len(),
                }),
                Some(duration_ms),
            )
            .await;

            Ok(state)
        }
        .instrument(span)
        .await
    }

    async fn abort(
        &self,
        ctx: &RunContext,
        state: PipelineState,
        error: PipelineError,
        started: Instant,
    ) -> RunFailure {
        let duration_ms = started.elapsed().as_millis() as u64;
        error!(error = %error, duration_ms, "Run aborted");
        self.record_run(
            ctx,
            RecordType::RunFailed,
            json!({
                "reason": error.to_string(),
                "completed_stages": state.completed_stages(),
            }),
            Some(duration_ms),
        )
        .await;
        RunFailure::new(state, error)
    }

    async fn record_run(
        &self,
        ctx: &RunContext,
        record_type: RecordType,
        payload: Value,
        duration_ms: Option<u64>,
    ) {
        let mut record = AuditRecord::new(ctx.run_id.clone(), RUN_SCOPE, record_type, payload);
        if let Some(ms) = duration_ms {
            record = record.with_duration(ms);
        }
        audit::record(self.audit.as_ref(), record).await;
    }
}

/// Assembles the standard five-stage pipeline around one language model.
pub struct PipelineBuilder {
    model: Arc<dyn LanguageModel>,
    config: PipelineConfig,
    extractor: Arc<dyn TextExtractor>,
    prompts: Arc<dyn PromptResolver>,
    tools: Arc<dyn ToolRegistry>,
    audit: Arc<dyn AuditSink>,
    progress: Arc<dyn ProgressReporter>,
}

impl PipelineBuilder {
    /// Defaults: built-in prompts, plain-text extraction, no tools, no audit
    /// persistence, no progress reporting.
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            config: PipelineConfig::default(),
            extractor: Arc::new(PlainTextExtractor),
            prompts: Arc::new(BuiltinPrompts::new()),
            tools: Arc::new(StaticToolRegistry::new()),
            audit: Arc::new(NoopAuditSink),
            progress: Arc::new(NoopProgress),
        }
    }

    /// Production constructor: runtime settings from `config` and, when
    /// enabled, a SQLite audit store.
    pub fn from_config(config: &Config, model: Arc<dyn LanguageModel>) -> Result<Self> {
        validate_config(config)?;

        let mut builder = Self::new(model).config(PipelineConfig::from_config(config));
        if config.audit.enabled {
            let path = match &config.audit.database_path {
                Some(path) => PathBuf::from(path),
                None => audit::default_database_path().ok_or_else(|| {
                    AuditError::Unavailable("cannot determine home directory".to_string())
                })?,
            };
            builder = builder.audit(Arc::new(SqliteAuditStore::open(&path)?));
        }
        Ok(builder)
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn prompts(mut self, prompts: Arc<dyn PromptResolver>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn tools(mut self, tools: Arc<dyn ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let gate = Arc::new(ValidationGate::new()?);

        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(ExtractionStage::new(
                Arc::clone(&self.model),
                self.extractor,
                Arc::clone(&self.prompts),
            )),
            Box::new(PlanningStage::new(
                Arc::clone(&self.model),
                Arc::clone(&self.prompts),
                Arc::clone(&gate),
            )),
            Box::new(FanOutStage::new(
                Arc::clone(&self.model),
                Arc::clone(&self.prompts),
                self.tools,
            )),
            Box::new(SynthesisStage::new(
                Arc::clone(&self.model),
                Arc::clone(&self.prompts),
                gate,
            )),
            Box::new(ReportStage::new(self.model, self.prompts)),
        ];

        Ok(Pipeline::with_stages(
            stages,
            self.config,
            self.audit,
            self.progress,
        )?)
    }
}
