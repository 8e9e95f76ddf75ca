use serde::Serialize;
use tokio::sync::broadcast;

use super::stage::StageName;

/// Events emitted while a run progresses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    StageStarted {
        run_id: String,
        stage: StageName,
    },
    StageCompleted {
        run_id: String,
        stage: StageName,
        duration_ms: u64,
    },
    StageFailed {
        run_id: String,
        stage: StageName,
        duration_ms: u64,
        reason: String,
    },
    SubtaskFinished {
        run_id: String,
        identity: String,
        success: bool,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Fans progress events out to any number of in-process subscribers.
#[derive(Clone)]
pub struct BroadcastProgress {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastProgress {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }
}
