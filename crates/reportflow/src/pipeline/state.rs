use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::documents::DocumentDescriptor;

use super::error::PipelineError;
use super::stage::{StageName, StageStatus};
use super::subtask::SubtaskOutcome;

/// Opaque structured value exchanged with the language model.
pub type StructuredMap = Map<String, Value>;

/// The record threaded through every stage of one run.
///
/// Fields are only written through [`PipelineState::merge`], which enforces
/// stage order and field ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    // Input, set once at run start
    run_id: String,
    input_documents: Vec<DocumentDescriptor>,
    input_metadata: BTreeMap<String, Value>,

    // Extraction
    extracted_facts: StructuredMap,

    // Planning
    execution_plan: StructuredMap,

    // Fan-out, in completion order
    subtask_results: Vec<SubtaskOutcome>,

    // Synthesis
    synthesis: StructuredMap,

    // Report generation
    final_report: String,

    // Append-only diagnostics from every stage
    errors: Vec<String>,
    warnings: Vec<String>,

    completed_stages: Vec<StageName>,
}

impl PipelineState {
    /// Creates the state for a new run with a fresh run id.
    pub fn new(
        input_documents: Vec<DocumentDescriptor>,
        input_metadata: BTreeMap<String, Value>,
    ) -> Self {
        Self::with_run_id(
            uuid::Uuid::new_v4().to_string(),
            input_documents,
            input_metadata,
        )
    }

    pub fn with_run_id(
        run_id: impl Into<String>,
        input_documents: Vec<DocumentDescriptor>,
        input_metadata: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            input_documents,
            input_metadata,
            extracted_facts: StructuredMap::new(),
            execution_plan: StructuredMap::new(),
            subtask_results: Vec::new(),
            synthesis: StructuredMap::new(),
            final_report: String::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            completed_stages: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn input_documents(&self) -> &[DocumentDescriptor] {
        &self.input_documents
    }

    pub fn input_metadata(&self) -> &BTreeMap<String, Value> {
        &self.input_metadata
    }

    pub fn extracted_facts(&self) -> &StructuredMap {
        &self.extracted_facts
    }

    pub fn execution_plan(&self) -> &StructuredMap {
        &self.execution_plan
    }

    pub fn subtask_results(&self) -> &[SubtaskOutcome] {
        &self.subtask_results
    }

    pub fn synthesis(&self) -> &StructuredMap {
        &self.synthesis
    }

    pub fn final_report(&self) -> &str {
        &self.final_report
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn completed_stages(&self) -> &[StageName] {
        &self.completed_stages
    }

    pub fn has_completed(&self, stage: StageName) -> bool {
        self.completed_stages.contains(&stage)
    }

    /// The stage allowed to merge next, or `None` once the run is complete.
    pub fn next_stage(&self) -> Option<StageName> {
        StageName::ORDER.get(self.completed_stages.len()).copied()
    }

    /// Merges one stage's output.
    ///
    /// Owned fields are replaced wholesale; `subtask_results`, `errors` and
    /// `warnings` are appended. Rejects outputs from a stage that is not
    /// next in order or that touch a field another stage owns, leaving the
    /// state untouched.
    pub fn merge(&mut self, output: StageOutput) -> Result<(), PipelineError> {
        let expected = self.next_stage();
        if expected != Some(output.stage) {
            return Err(PipelineError::OutOfOrder {
                stage: output.stage,
                expected,
            });
        }

        if let Some(field) = output.foreign_field() {
            return Err(PipelineError::OwnershipViolation {
                stage: output.stage,
                field,
            });
        }

        if let Some(facts) = output.extracted_facts {
            self.extracted_facts = facts;
        }
        if let Some(plan) = output.execution_plan {
            self.execution_plan = plan;
        }
        self.subtask_results.extend(output.subtask_results);
        if let Some(synthesis) = output.synthesis {
            self.synthesis = synthesis;
        }
        if let Some(report) = output.final_report {
            self.final_report = report;
        }
        self.errors.extend(output.errors);
        self.warnings.extend(output.warnings);
        self.completed_stages.push(output.stage);

        Ok(())
    }
}

/// The partial state a stage returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub stage: StageName,
    pub status: StageStatus,
    pub extracted_facts: Option<StructuredMap>,
    pub execution_plan: Option<StructuredMap>,
    pub subtask_results: Vec<SubtaskOutcome>,
    pub synthesis: Option<StructuredMap>,
    pub final_report: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl StageOutput {
    /// Empty, completed output for `stage`.
    pub fn new(stage: StageName) -> Self {
        Self {
            stage,
            status: StageStatus::Completed,
            extracted_facts: None,
            execution_plan: None,
            subtask_results: Vec::new(),
            synthesis: None,
            final_report: None,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Degraded output: the stage's owned field is reset to its empty value
    /// and `reason` becomes the single error entry.
    pub fn degraded(stage: StageName, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let mut output = Self::new(stage);
        match stage {
            StageName::Extraction => output.extracted_facts = Some(StructuredMap::new()),
            StageName::Planning => output.execution_plan = Some(StructuredMap::new()),
            StageName::FanOut => {}
            StageName::Synthesis => output.synthesis = Some(StructuredMap::new()),
            StageName::Report => output.final_report = Some(String::new()),
        }
        output.errors.push(reason.clone());
        output.status = StageStatus::Degraded { reason };
        output
    }

    /// Marks the output degraded without touching its fields.
    pub fn mark_degraded(&mut self, reason: impl Into<String>) {
        self.status = StageStatus::Degraded {
            reason: reason.into(),
        };
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.status, StageStatus::Degraded { .. })
    }

    /// First field set by this output that its stage does not own.
    fn foreign_field(&self) -> Option<&'static str> {
        let written = [
            ("extracted_facts", StageName::Extraction, self.extracted_facts.is_some()),
            ("execution_plan", StageName::Planning, self.execution_plan.is_some()),
            ("subtask_results", StageName::FanOut, !self.subtask_results.is_empty()),
            ("synthesis", StageName::Synthesis, self.synthesis.is_some()),
            ("final_report", StageName::Report, self.final_report.is_some()),
        ];
        written
            .into_iter()
            .find(|(_, owner, set)| *set && *owner != self.stage)
            .map(|(field, _, _)| field)
    }
}
