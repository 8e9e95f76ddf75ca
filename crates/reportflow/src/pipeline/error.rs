use thiserror::Error;

use crate::audit::AuditError;

use super::stage::StageName;
use super::state::PipelineState;

/// Fatal conditions. Any of these aborts the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Audit store unreachable at run start: {0}")]
    AuditUnavailable(#[source] AuditError),

    #[error("{stage} stage ran out of order (expected {expected:?})")]
    OutOfOrder {
        stage: StageName,
        expected: Option<StageName>,
    },

    #[error("{stage} stage wrote field '{field}' owned by another stage")]
    OwnershipViolation {
        stage: StageName,
        field: &'static str,
    },

    #[error("Pipeline topology must be {expected:?}, got {got:?}")]
    InvalidTopology {
        expected: Vec<StageName>,
        got: Vec<StageName>,
    },

    #[error("{stage} stage failed fatally: {message}")]
    StageFatal { stage: StageName, message: String },
}

/// An aborted run. Carries the state as it was at the failure point.
#[derive(Error, Debug)]
#[error("Run {run_id} aborted: {error}", run_id = .state.run_id())]
pub struct RunFailure {
    pub state: Box<PipelineState>,
    #[source]
    pub error: PipelineError,
}

impl RunFailure {
    pub fn new(state: PipelineState, error: PipelineError) -> Self {
        Self {
            state: Box::new(state),
            error,
        }
    }
}
