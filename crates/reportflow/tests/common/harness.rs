//! Test harness for isolated pipeline runs.
//!
//! `StubModel` answers each stage from a script and records every sub-task
//! call, including the concurrent-call high-water mark. `TestHarness` owns
//! a temp directory for input documents plus the audit and progress
//! collaborators handed to the pipeline.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use tokio::time::Instant;

use reportflow::audit::MemoryAuditSink;
use reportflow::llm::{LanguageModel, LlmError, LlmRequest};
use reportflow::pipeline::{BroadcastProgress, Pipeline, PipelineConfig, PipelineState, RunFailure};
use reportflow::DocumentDescriptor;

use super::builders::{facts, valid_synthesis, PlanBuilder};

/// Which prompt a request carries, told apart by the built-in templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Extraction,
    Planning,
    Subtask,
    Synthesis,
    Report,
}

impl Route {
    fn of(request: &LlmRequest) -> Self {
        let prompt = request.prompt.as_str();
        if prompt.starts_with("Extract the key facts") {
            Route::Extraction
        } else if prompt.starts_with("Plan the analysis") {
            Route::Planning
        } else if prompt.starts_with("You are acting as:") {
            Route::Subtask
        } else if prompt.starts_with("Objective:") {
            Route::Synthesis
        } else {
            Route::Report
        }
    }
}

/// One recorded sub-task call.
#[derive(Debug, Clone)]
pub struct SubtaskCall {
    pub identity: String,
    pub started: Instant,
}

pub struct StubModel {
    extraction: Result<String, LlmError>,
    planning: Result<String, LlmError>,
    synthesis: Result<String, LlmError>,
    report: Result<String, LlmError>,
    subtask_delay: Duration,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,

    calls: Mutex<Vec<Route>>,
    subtask_calls: Mutex<Vec<SubtaskCall>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl StubModel {
    /// Answers every stage successfully; the plan has `tasks` sub-tasks.
    pub fn new(tasks: usize) -> Self {
        Self {
            extraction: Ok(facts().to_string()),
            planning: Ok(PlanBuilder::with_tasks(tasks).build().to_string()),
            synthesis: Ok(valid_synthesis().to_string()),
            report: Ok("Quarterly analysis\n\nRevenue grew while margins narrowed.".to_string()),
            subtask_delay: Duration::from_millis(20),
            delays: HashMap::new(),
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            subtask_calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_plan(mut self, plan: Value) -> Self {
        self.planning = Ok(plan.to_string());
        self
    }

    pub fn with_extraction(mut self, reply: Result<String, LlmError>) -> Self {
        self.extraction = reply;
        self
    }

    pub fn with_synthesis(mut self, reply: Result<String, LlmError>) -> Self {
        self.synthesis = reply;
        self
    }

    pub fn with_report(mut self, reply: Result<String, LlmError>) -> Self {
        self.report = reply;
        self
    }

    pub fn with_subtask_delay(mut self, delay: Duration) -> Self {
        self.subtask_delay = delay;
        self
    }

    /// Per-identity delay overriding the default.
    pub fn with_delay(mut self, identity: &str, delay: Duration) -> Self {
        self.delays.insert(identity.to_string(), delay);
        self
    }

    /// The sub-task with this identity fails with a provider error.
    pub fn failing(mut self, identity: &str) -> Self {
        self.failing.insert(identity.to_string());
        self
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Route> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, route: Route) -> usize {
        self.calls().iter().filter(|r| **r == route).count()
    }

    pub fn subtask_calls(&self) -> Vec<SubtaskCall> {
        self.subtask_calls.lock().unwrap().clone()
    }

    async fn answer_subtask(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let identity = request
            .prompt
            .lines()
            .next()
            .and_then(|line| line.strip_prefix("You are acting as: "))
            .unwrap_or_default()
            .to_string();

        self.subtask_calls.lock().unwrap().push(SubtaskCall {
            identity: identity.clone(),
            started: Instant::now(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.get(&identity).copied().unwrap_or(self.subtask_delay);
        tokio::time::sleep(delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&identity) {
            return Err(LlmError::Provider(format!("{} is unavailable", identity)));
        }
        Ok(format!("Findings from {}: nothing alarming.", identity))
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let route = Route::of(request);
        self.calls.lock().unwrap().push(route);

        match route {
            Route::Extraction => self.extraction.clone(),
            Route::Planning => self.planning.clone(),
            Route::Subtask => self.answer_subtask(request).await,
            Route::Synthesis => self.synthesis.clone(),
            Route::Report => self.report.clone(),
        }
    }
}

/// Test harness providing an isolated environment for pipeline runs.
pub struct TestHarness {
    /// Temporary directory holding input documents.
    temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub audit: Arc<MemoryAuditSink>,
    pub progress: BroadcastProgress,
    pub config: PipelineConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_audit(MemoryAuditSink::new())
    }

    pub fn with_audit(audit: MemoryAuditSink) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let input_dir = temp_dir.path().join("input");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");

        Self {
            temp_dir,
            input_dir,
            audit: Arc::new(audit),
            progress: BroadcastProgress::default(),
            config: PipelineConfig::default(),
        }
    }

    pub fn width(mut self, width: usize) -> Self {
        self.config.fanout_width = width;
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut PipelineConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Writes a text document into the input directory.
    pub fn document(&self, name: &str, content: &str) -> DocumentDescriptor {
        let path = self.input_dir.join(name);
        std::fs::write(&path, content).expect("Failed to write document");
        DocumentDescriptor::from_path(path)
    }

    /// A descriptor pointing at a file that does not exist.
    pub fn missing_document(&self, name: &str) -> DocumentDescriptor {
        DocumentDescriptor::from_path(self.input_dir.join(name))
    }

    pub fn pipeline(&self, model: Arc<StubModel>) -> Pipeline {
        Pipeline::builder(model)
            .config(self.config.clone())
            .audit(self.audit.clone())
            .progress(Arc::new(self.progress.clone()))
            .build()
            .expect("Failed to build pipeline")
    }

    /// Runs the pipeline over one standard memo document.
    pub async fn run(&self, model: Arc<StubModel>) -> Result<PipelineState, RunFailure> {
        let memo = self.document(
            "memo.txt",
            "Acme Corporation Q3 memo.\nRevenue rose 12% to 12.4M; gross margin fell two points.",
        );
        self.pipeline(model).run(vec![memo], BTreeMap::new()).await
    }
}
