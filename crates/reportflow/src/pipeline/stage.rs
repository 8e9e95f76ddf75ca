//! The single narrow interface every pipeline stage implements.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::config::PipelineConfig;
use super::error::PipelineError;
use super::progress::ProgressReporter;
use super::state::{PipelineState, StageOutput};

/// The five stages of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Extraction,
    Planning,
    FanOut,
    Synthesis,
    Report,
}

impl StageName {
    /// Fixed execution order.
    pub const ORDER: [StageName; 5] = [
        StageName::Extraction,
        StageName::Planning,
        StageName::FanOut,
        StageName::Synthesis,
        StageName::Report,
    ];

    /// Stable identifier used in audit records and prompt lookups.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Extraction => "extraction",
            StageName::Planning => "planning",
            StageName::FanOut => "fan_out",
            StageName::Synthesis => "synthesis",
            StageName::Report => "report",
        }
    }

    /// Position in [`StageName::ORDER`].
    pub fn position(&self) -> usize {
        Self::ORDER
            .iter()
            .position(|s| s == self)
            .unwrap_or(Self::ORDER.len())
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageName::Extraction => write!(f, "Extraction"),
            StageName::Planning => write!(f, "Planning"),
            StageName::FanOut => write!(f, "Fan-out execution"),
            StageName::Synthesis => write!(f, "Synthesis"),
            StageName::Report => write!(f, "Report generation"),
        }
    }
}

/// Whether a stage produced its real output or fell back to a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Degraded { reason: String },
}

/// Per-run execution context handed to every stage.
///
/// Cloning is cheap; fan-out workers each hold their own copy.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub config: Arc<PipelineConfig>,
    pub progress: Arc<dyn ProgressReporter>,
    run_deadline: Instant,
}

impl RunContext {
    /// Starts the run clock now.
    pub fn new(
        run_id: impl Into<String>,
        config: Arc<PipelineConfig>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        let run_deadline = deadline_after(Instant::now(), config.run_timeout);
        Self {
            run_id: run_id.into(),
            config,
            progress,
            run_deadline,
        }
    }

    /// Instant after which the whole run is out of time.
    pub fn run_deadline(&self) -> Instant {
        self.run_deadline
    }

    /// Backstop for a whole stage invocation. Collaborator calls inside the
    /// stage expire first, so stages can still shape their own degraded
    /// output before this fires.
    pub fn stage_deadline(&self) -> Instant {
        deadline_after(self.run_deadline, self.config.stage_grace)
    }

    /// Deadline for one collaborator call started now.
    pub fn call_deadline(&self) -> Instant {
        let call = deadline_after(Instant::now(), self.config.call_timeout);
        std::cmp::min(self.run_deadline, call)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.run_deadline
    }
}

/// Roughly thirty years; stands in for "no deadline".
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + timeout`, saturating at [`FAR_FUTURE`] for timeouts too large
/// to represent.
fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// One step of the pipeline: reads the state produced so far and returns
/// the fields it owns as a [`StageOutput`].
///
/// Recoverable problems are reported inside the output (`errors`,
/// [`StageStatus::Degraded`]); `Err` is reserved for fatal conditions that
/// abort the run.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn run(
        &self,
        state: &PipelineState,
        ctx: &RunContext,
    ) -> Result<StageOutput, PipelineError>;

    /// Output used when the stage cannot finish, e.g. on timeout.
    fn degraded(&self, _state: &PipelineState, reason: String) -> StageOutput {
        StageOutput::degraded(self.name(), reason)
    }
}

#[async_trait]
impl Stage for Box<dyn Stage> {
    fn name(&self) -> StageName {
        self.as_ref().name()
    }

    async fn run(
        &self,
        state: &PipelineState,
        ctx: &RunContext,
    ) -> Result<StageOutput, PipelineError> {
        self.as_ref().run(state, ctx).await
    }

    fn degraded(&self, state: &PipelineState, reason: String) -> StageOutput {
        self.as_ref().degraded(state, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::progress::NoopProgress;

    #[test]
    fn test_stage_order_and_names() {
        let names: Vec<_> = StageName::ORDER.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            vec!["extraction", "planning", "fan_out", "synthesis", "report"]
        );
        assert_eq!(StageName::Synthesis.position(), 3);
        assert_eq!(StageName::FanOut.to_string(), "Fan-out execution");
    }

    #[tokio::test]
    async fn test_call_deadline_never_exceeds_run_deadline() {
        let config = PipelineConfig {
            run_timeout: Duration::from_secs(1),
            call_timeout: Duration::from_secs(60),
            ..PipelineConfig::default()
        };
        let ctx = RunContext::new("run-1", Arc::new(config), Arc::new(NoopProgress));
        assert!(ctx.call_deadline() <= ctx.run_deadline());
        assert!(ctx.stage_deadline() > ctx.run_deadline());
        assert!(!ctx.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_expires() {
        let config = PipelineConfig {
            run_timeout: Duration::from_millis(50),
            ..PipelineConfig::default()
        };
        let ctx = RunContext::new("run-1", Arc::new(config), Arc::new(NoopProgress));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(ctx.is_expired());
    }

    #[tokio::test]
    async fn test_huge_timeouts_saturate_instead_of_overflowing() {
        let config = PipelineConfig {
            run_timeout: Duration::from_secs(u64::MAX),
            call_timeout: Duration::from_secs(u64::MAX),
            stage_grace: Duration::from_millis(u64::MAX),
            ..PipelineConfig::default()
        };
        let ctx = RunContext::new("run-1", Arc::new(config), Arc::new(NoopProgress));

        assert!(ctx.run_deadline() > Instant::now() + Duration::from_secs(86_400 * 365));
        assert!(ctx.call_deadline() <= ctx.run_deadline());
        assert!(ctx.stage_deadline() >= ctx.run_deadline());
        assert!(!ctx.is_expired());
    }
}
