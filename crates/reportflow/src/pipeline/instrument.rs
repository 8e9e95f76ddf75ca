//! Uniform instrumentation around any [`Stage`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

use crate::audit::{self, AuditRecord, AuditSink, RecordType};

use super::error::PipelineError;
use super::progress::ProgressEvent;
use super::stage::{RunContext, Stage, StageName, StageStatus};
use super::state::{PipelineState, StageOutput};

/// Decorator recording start, completion or failure of the wrapped stage.
///
/// Audit writes are best-effort and never change the stage's result. The
/// wrapped stage is also bounded by [`RunContext::stage_deadline`]; on
/// expiry its [`Stage::degraded`] output is returned.
pub struct Instrumented<S> {
    inner: S,
    audit: Arc<dyn AuditSink>,
}

impl<S: Stage> Instrumented<S> {
    pub fn new(inner: S, audit: Arc<dyn AuditSink>) -> Self {
        Self { inner, audit }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn record(
        &self,
        ctx: &RunContext,
        stage: StageName,
        record: RecordType,
        payload: serde_json::Value,
        duration_ms: Option<u64>,
    ) {
        let mut entry = AuditRecord::new(ctx.run_id.clone(), stage.as_str(), record, payload);
        if let Some(ms) = duration_ms {
            entry = entry.with_duration(ms);
        }
        audit::record(self.audit.as_ref(), entry).await;
    }
}

#[async_trait]
impl<S: Stage> Stage for Instrumented<S> {
    fn name(&self) -> StageName {
        self.inner.name()
    }

    async fn run(
        &self,
        state: &PipelineState,
        ctx: &RunContext,
    ) -> Result<StageOutput, PipelineError> {
        let stage = self.name();
        let span = info_span!("stage", stage = stage.as_str());

        async move {
            info!("Stage started");
            ctx.progress.report(ProgressEvent::StageStarted {
                run_id: ctx.run_id.clone(),
                stage,
            });
            self.record(ctx, stage, RecordType::StageStarted, json!({}), None)
                .await;

            let started = Instant::now();
            let run = self.inner.run(state, ctx);
            let result = match tokio::time::timeout_at(ctx.stage_deadline(), run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Stage exceeded the run deadline");
                    Ok(self.inner.degraded(state, format!("{} stage timed out", stage)))
                }
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            match &result {
                Ok(output) => match &output.status {
                    StageStatus::Completed => {
                        info!(
                            duration_ms,
                            errors = output.errors.len(),
                            warnings = output.warnings.len(),
                            "Stage completed"
                        );
                        ctx.progress.report(ProgressEvent::StageCompleted {
                            run_id: ctx.run_id.clone(),
                            stage,
                            duration_ms,
                        });
                        self.record(
                            ctx,
                            stage,
                            RecordType::StageCompleted,
                            json!({
                                "errors": output.errors.len(),
                                "warnings": output.warnings.len(),
                            }),
                            Some(duration_ms),
                        )
                        .await;
                        self.record(
                            ctx,
                            stage,
                            RecordType::StageTiming,
                            json!({ "stage": stage.as_str() }),
                            Some(duration_ms),
                        )
                        .await;
                    }
                    StageStatus::Degraded { reason } => {
                        warn!(duration_ms, reason = %reason, "Stage degraded");
                        ctx.progress.report(ProgressEvent::StageFailed {
                            run_id: ctx.run_id.clone(),
                            stage,
                            duration_ms,
                            reason: reason.clone(),
                        });
                        self.record(
                            ctx,
                            stage,
                            RecordType::StageFailed,
                            json!({ "reason": reason, "recoverable": true }),
                            Some(duration_ms),
                        )
                        .await;
                    }
                },
                Err(e) => {
                    error!(duration_ms, error = %e, "Stage failed fatally");
                    ctx.progress.report(ProgressEvent::StageFailed {
                        run_id: ctx.run_id.clone(),
                        stage,
                        duration_ms,
                        reason: e.to_string(),
                    });
                    self.record(
                        ctx,
                        stage,
                        RecordType::StageFailed,
                        json!({ "reason": e.to_string(), "recoverable": false }),
                        Some(duration_ms),
                    )
                    .await;
                }
            }

            result
        }
        .instrument(span)
        .await
    }

    fn degraded(&self, state: &PipelineState, reason: String) -> StageOutput {
        self.inner.degraded(state, reason)
    }
}
