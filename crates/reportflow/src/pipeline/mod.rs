pub mod config;
pub mod error;
pub mod instrument;
pub mod progress;
pub mod runner;
pub mod stage;
pub mod state;
pub mod subtask;

pub use config::PipelineConfig;
pub use error::{PipelineError, RunFailure};
pub use instrument::Instrumented;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::{Pipeline, PipelineBuilder};
pub use stage::{RunContext, Stage, StageName, StageStatus};
pub use state::{PipelineState, StageOutput, StructuredMap};
pub use subtask::{SubtaskDescriptor, SubtaskFailure, SubtaskOutcome};
