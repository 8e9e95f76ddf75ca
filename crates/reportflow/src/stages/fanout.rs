//! Fan-out execution: runs the planned sub-tasks on a bounded worker pool
//! and fans their outcomes back in.
//!
//! A fixed number of workers (the configured fan-out width, capped by the
//! task count) pull jobs from a shared queue, so at most `fanout_width`
//! model calls are in flight no matter how many sub-tasks were planned.
//! Outcomes are funnelled through a channel to a single collector, which
//! is the only writer of the stage output; `subtask_results` therefore
//! holds outcomes in completion order.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::llm::{
    with_deadline, InvocationConfig, LanguageModel, LlmError, LlmRequest, ResolvedToolSet,
    ToolRegistry,
};
use crate::pipeline::{
    PipelineError, PipelineState, ProgressEvent, RunContext, Stage, StageName, StageOutput,
    SubtaskDescriptor, SubtaskFailure, SubtaskOutcome,
};
use crate::prompts::{PromptError, PromptResolver, PromptTemplate, SUBTASK_PROMPT};

/// Why one sub-task failed. Never affects its siblings.
#[derive(Error, Debug)]
pub enum SubtaskError {
    #[error("prompt rendering failed: {0}")]
    Prompt(#[from] PromptError),

    #[error("model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("model returned an empty answer")]
    EmptyResponse,

    #[error("panicked: {0}")]
    Panicked(String),
}

pub struct FanOutStage {
    model: Arc<dyn LanguageModel>,
    prompts: Arc<dyn PromptResolver>,
    tools: Arc<dyn ToolRegistry>,
}

struct Job {
    /// Position in the plan's task list.
    index: usize,
    descriptor: SubtaskDescriptor,
}

/// What one worker reports back for one job.
struct TaskReport {
    index: usize,
    identity: String,
    result: Result<SubtaskOutcome, SubtaskFailure>,
    warnings: Vec<String>,
}

/// Everything a worker needs, shared across the pool.
struct SubtaskRunner {
    model: Arc<dyn LanguageModel>,
    tools: Arc<dyn ToolRegistry>,
    template: PromptTemplate,
    ctx: RunContext,
}

impl FanOutStage {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        prompts: Arc<dyn PromptResolver>,
        tools: Arc<dyn ToolRegistry>,
    ) -> Self {
        Self {
            model,
            prompts,
            tools,
        }
    }

    /// Runs `jobs` on the worker pool and returns one report per job, in
    /// completion order.
    ///
    /// The run deadline bounds the whole pool. Reports collected before it
    /// expires are kept; every job still unfinished at that point gets a
    /// timed-out failure report and its worker is aborted.
    async fn execute(
        &self,
        jobs: Vec<Job>,
        template: PromptTemplate,
        ctx: &RunContext,
    ) -> Vec<TaskReport> {
        let job_count = jobs.len();
        let width = ctx.config.fanout_width.clamp(1, job_count.max(1));
        info!(sub_tasks = job_count, width, "Dispatching sub-tasks");

        let planned: Vec<(usize, String)> = jobs
            .iter()
            .map(|job| (job.index, job.descriptor.identity(job.index)))
            .collect();

        let runner = Arc::new(SubtaskRunner {
            model: Arc::clone(&self.model),
            tools: Arc::clone(&self.tools),
            template,
            ctx: ctx.clone(),
        });

        let (job_tx, job_rx) = mpsc::channel::<Job>(width);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (report_tx, mut report_rx) = mpsc::channel::<TaskReport>(width);

        let mut workers = JoinSet::new();
        for worker_id in 0..width {
            let job_rx = Arc::clone(&job_rx);
            let report_tx = report_tx.clone();
            let runner = Arc::clone(&runner);

            workers.spawn(
                async move {
                    loop {
                        let job = job_rx.lock().await.recv().await;
                        let Some(job) = job else {
                            break;
                        };
                        let report = runner.run_isolated(job).await;
                        if report_tx.send(report).await.is_err() {
                            break;
                        }
                    }
                    debug!("Worker finished");
                }
                .instrument(info_span!("fanout_worker", worker_id)),
            );
        }
        // Workers hold the only remaining senders
        drop(report_tx);

        let feed = async move {
            for job in jobs {
                if job_tx.send(job).await.is_err() {
                    break;
                }
            }
        };

        let mut reports = Vec::with_capacity(job_count);
        let collect = async {
            while let Some(report) = report_rx.recv().await {
                report_progress(ctx, &report);
                reports.push(report);
            }
        };

        let pool = async { tokio::join!(feed, collect) };
        if tokio::time::timeout_at(ctx.run_deadline(), pool).await.is_err() {
            // Dropping the set cancels the workers without waiting on them
            workers.abort_all();
            drop(workers);

            let finished: HashSet<usize> = reports.iter().map(|r| r.index).collect();
            let unfinished: Vec<_> = planned
                .into_iter()
                .filter(|(index, _)| !finished.contains(index))
                .collect();
            warn!(unfinished = unfinished.len(), "Run deadline reached during fan-out");

            for (index, identity) in unfinished {
                let report = TaskReport {
                    index,
                    identity: identity.clone(),
                    result: Err(SubtaskFailure {
                        identity,
                        error: "timed out".to_string(),
                    }),
                    warnings: Vec::new(),
                };
                report_progress(ctx, &report);
                reports.push(report);
            }
            return reports;
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Fan-out worker terminated abnormally");
            }
        }

        reports
    }
}

fn report_progress(ctx: &RunContext, report: &TaskReport) {
    ctx.progress.report(ProgressEvent::SubtaskFinished {
        run_id: ctx.run_id.clone(),
        identity: report.identity.clone(),
        success: report.result.is_ok(),
    });
}

#[async_trait]
impl Stage for FanOutStage {
    fn name(&self) -> StageName {
        StageName::FanOut
    }

    async fn run(
        &self,
        state: &PipelineState,
        ctx: &RunContext,
    ) -> Result<StageOutput, PipelineError> {
        let raw_tasks = match state.execution_plan().get("tasks").and_then(Value::as_array) {
            Some(tasks) if !tasks.is_empty() => tasks,
            _ => {
                return Ok(self.degraded(
                    state,
                    "Fan-out skipped: execution plan contains no sub-tasks".to_string(),
                ))
            }
        };

        let mut output = StageOutput::new(StageName::FanOut);

        let mut jobs = Vec::new();
        for (index, raw) in raw_tasks.iter().enumerate() {
            match SubtaskDescriptor::from_value(raw) {
                Ok(descriptor) => jobs.push(Job { index, descriptor }),
                Err(reason) => {
                    error!(
                        position = index + 1,
                        reason = %reason,
                        "Dropping malformed sub-task descriptor"
                    );
                    output.errors.push(format!(
                        "Dropped malformed sub-task descriptor #{}: {}",
                        index + 1,
                        reason
                    ));
                }
            }
        }

        if jobs.is_empty() {
            let reason = "Fan-out failed: no valid sub-task descriptors".to_string();
            output.errors.push(reason.clone());
            output.mark_degraded(reason);
            return Ok(output);
        }

        let template = match self.prompts.resolve(SUBTASK_PROMPT, &ctx.config.prompt_version) {
            Ok(template) => template,
            Err(e) => return Ok(self.degraded(state, format!("Fan-out failed: {}", e))),
        };

        let job_count = jobs.len();
        let reports = self.execute(jobs, template, ctx).await;

        if reports.len() < job_count {
            output.errors.push(format!(
                "{} sub-task(s) produced no result",
                job_count - reports.len()
            ));
        }

        for report in reports {
            output.warnings.extend(report.warnings);
            match report.result {
                Ok(outcome) => output.subtask_results.push(outcome),
                Err(failure) => output.errors.push(failure.diagnostic()),
            }
        }

        let succeeded = output.subtask_results.len();
        info!(succeeded, failed = job_count - succeeded.min(job_count), "Sub-tasks finished");
        if succeeded == 0 {
            output.mark_degraded(format!("all {} sub-tasks failed", job_count));
        }

        Ok(output)
    }
}

impl SubtaskRunner {
    /// Runs one job; errors and panics become a [`SubtaskFailure`].
    async fn run_isolated(&self, job: Job) -> TaskReport {
        let identity = job.descriptor.identity(job.index);
        let span = info_span!("subtask", identity = %identity);
        let mut warnings = Vec::new();

        let result = AssertUnwindSafe(self.run(&identity, &job.descriptor, &mut warnings))
            .catch_unwind()
            .instrument(span)
            .await
            .unwrap_or_else(|panic| Err(SubtaskError::Panicked(panic_message(panic.as_ref()))));

        let result = match result {
            Ok(result_text) => {
                info!(identity = %identity, "Sub-task completed");
                Ok(SubtaskOutcome {
                    identity: identity.clone(),
                    task_preview: job.descriptor.preview(self.ctx.config.task_preview_chars),
                    result_text,
                })
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "Sub-task failed");
                Err(SubtaskFailure {
                    identity: identity.clone(),
                    error: e.to_string(),
                })
            }
        };

        TaskReport {
            index: job.index,
            identity,
            result,
            warnings,
        }
    }

    async fn run(
        &self,
        identity: &str,
        descriptor: &SubtaskDescriptor,
        warnings: &mut Vec<String>,
    ) -> Result<String, SubtaskError> {
        let (tools, unknown) =
            ResolvedToolSet::resolve(self.tools.as_ref(), &descriptor.tool_names);
        for name in unknown {
            warn!(tool = %name, "Ignoring unknown tool");
            warnings.push(format!("sub-task '{}': unknown tool '{}' ignored", identity, name));
        }

        let tool_list = if tools.is_empty() {
            "none".to_string()
        } else {
            tools.names().join(", ")
        };

        let mut vars = HashMap::new();
        vars.insert("identity", identity.to_string());
        vars.insert("task_text", descriptor.task_text.clone());
        vars.insert("relevant_content", descriptor.relevant_content.clone());
        vars.insert("tools", tool_list.clone());

        let request = LlmRequest {
            prompt: self.template.render(&vars)?,
            system_instruction: self.template.system_instruction.clone(),
            config: InvocationConfig::text(self.ctx.config.models.subtask_temperature),
        };
        let deadline = self.ctx.call_deadline();

        let answer = if tools.is_empty() {
            with_deadline(deadline, self.model.complete(&request)).await?
        } else if !self.model.supports_tools() {
            warn!(tools = %tool_list, "Model lacks tool calling, using plain completion");
            warnings.push(format!(
                "sub-task '{}': model does not support tool calling, ran without tools [{}]",
                identity, tool_list
            ));
            with_deadline(deadline, self.model.complete(&request)).await?
        } else {
            let request = LlmRequest {
                config: request
                    .config
                    .clone()
                    .with_tool_rounds(self.ctx.config.max_tool_rounds),
                ..request
            };
            let definitions = tools.definitions();
            with_deadline(
                deadline,
                self.model.complete_with_tools(&request, &definitions, &tools),
            )
            .await?
        };

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(SubtaskError::EmptyResponse);
        }
        Ok(answer.to_string())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
