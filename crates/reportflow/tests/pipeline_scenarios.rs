//! End-to-end runs of the five-stage pipeline against a stub model.

mod common;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{task, PlanBuilder, StubModel, TestHarness};
use common::harness::Route;
use reportflow::audit::{MemoryAuditSink, RecordType, SqliteAuditStore};
use reportflow::llm::LlmError;
use reportflow::pipeline::{Pipeline, PipelineError, ProgressEvent, StageName};

#[tokio::test]
async fn end_to_end_three_subtasks() {
    let harness = TestHarness::new().width(5);
    let model = Arc::new(StubModel::new(3));

    let state = harness.run(model.clone()).await.unwrap();

    assert_eq!(state.subtask_results().len(), 3);
    assert!(state.errors().is_empty(), "errors: {:?}", state.errors());
    assert!(!state.final_report().is_empty());
    assert_eq!(state.completed_stages(), &StageName::ORDER);
    assert_eq!(state.extracted_facts()["company"], "Acme Corporation");
    assert_eq!(state.synthesis()["confidence"], "medium");

    // All three ran at once
    assert_eq!(model.peak_concurrency(), 3);
    assert_eq!(model.calls_to(Route::Subtask), 3);
}

#[tokio::test]
async fn scale_ten_subtasks_runs_in_batches() {
    let delay = Duration::from_millis(30);
    let harness = TestHarness::new().width(5);
    let model = Arc::new(StubModel::new(10).with_subtask_delay(delay));

    let state = harness.run(model.clone()).await.unwrap();

    assert_eq!(state.subtask_results().len(), 10);
    assert!(model.peak_concurrency() <= 5);
    assert_eq!(model.peak_concurrency(), 5);

    // The sixth call can only start once a slot of the first batch frees up
    let calls = model.subtask_calls();
    let first = calls.iter().map(|c| c.started).min().unwrap();
    let last = calls.iter().map(|c| c.started).max().unwrap();
    assert!(last - first >= delay);
}

#[tokio::test]
async fn one_failing_subtask_is_isolated() {
    let harness = TestHarness::new();
    let model = Arc::new(StubModel::new(4).failing("Analyst 2"));

    let state = harness.run(model).await.unwrap();

    assert_eq!(state.subtask_results().len(), 3);
    assert_eq!(state.errors().len(), 1);
    assert!(state.errors()[0].contains("Analyst 2"));
    assert!(state
        .subtask_results()
        .iter()
        .all(|r| r.identity != "Analyst 2" && r.result_text.starts_with("Findings from")));
    assert!(!state.final_report().is_empty());
}

#[tokio::test]
async fn results_are_the_same_set_whatever_the_completion_order() {
    let identities = |state: &reportflow::PipelineState| -> HashSet<String> {
        state
            .subtask_results()
            .iter()
            .map(|r| r.identity.clone())
            .collect()
    };

    let fast_first = Arc::new(
        StubModel::new(3)
            .with_delay("Analyst 1", Duration::from_millis(5))
            .with_delay("Analyst 3", Duration::from_millis(60)),
    );
    let slow_first = Arc::new(
        StubModel::new(3)
            .with_delay("Analyst 1", Duration::from_millis(60))
            .with_delay("Analyst 3", Duration::from_millis(5)),
    );

    let a = TestHarness::new().run(fast_first).await.unwrap();
    let b = TestHarness::new().run(slow_first).await.unwrap();

    assert_eq!(identities(&a), identities(&b));
    // Completion order, not submission order
    assert_eq!(a.subtask_results()[0].identity, "Analyst 1");
    assert_eq!(b.subtask_results()[0].identity, "Analyst 3");
}

#[tokio::test]
async fn invalid_plan_with_tasks_proceeds_with_warning() {
    let plan = PlanBuilder::with_tasks(2).without_objective().build();
    let model = Arc::new(StubModel::new(0).with_plan(plan));

    let state = TestHarness::new().run(model).await.unwrap();

    assert!(state.errors().is_empty(), "errors: {:?}", state.errors());
    assert_eq!(state.warnings().len(), 1);
    assert!(state.warnings()[0].contains("unvalidated"));
    assert_eq!(state.subtask_results().len(), 2);
}

#[tokio::test]
async fn plan_without_tasks_records_error_and_empty_plan() {
    let model = Arc::new(StubModel::new(0));

    let state = TestHarness::new().run(model.clone()).await.unwrap();

    assert!(state.execution_plan().is_empty());
    assert!(state
        .errors()
        .iter()
        .any(|e| e.starts_with("Planning output failed validation")));
    assert!(state.subtask_results().is_empty());
    assert_eq!(model.calls_to(Route::Subtask), 0);
    assert!(!state.final_report().is_empty());
}

#[tokio::test]
async fn malformed_descriptor_is_dropped_not_fatal() {
    let plan = PlanBuilder::new()
        .task("Finance")
        .raw_task(json!({"task_text": "Agent: Ghost", "relevant_content": ""}))
        .build();
    let model = Arc::new(StubModel::new(0).with_plan(plan));

    let state = TestHarness::new().run(model).await.unwrap();

    assert_eq!(state.subtask_results().len(), 1);
    // Plan gate warning for the blank content, fan-out error for the drop
    assert_eq!(state.warnings().len(), 1);
    assert_eq!(state.errors().len(), 1);
    assert!(state.errors()[0].contains("Dropped malformed sub-task descriptor #2"));
}

#[tokio::test]
async fn extraction_failure_degrades_and_run_reaches_report() {
    let harness = TestHarness::new();
    let model = Arc::new(StubModel::new(2));
    let pipeline = harness.pipeline(model.clone());

    let state = pipeline
        .run(vec![harness.missing_document("lost.txt")], BTreeMap::new())
        .await
        .unwrap();

    assert!(state.extracted_facts().is_empty());
    assert_eq!(state.errors().len(), 1);
    assert!(state.errors()[0].starts_with("Extraction failed"));
    assert!(state.has_completed(StageName::Report));
    assert!(!state.final_report().is_empty());
    assert_eq!(model.calls_to(Route::Extraction), 0);

    let failed = harness.audit.records_of(RecordType::StageFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].stage_name, "extraction");
}

#[tokio::test]
async fn extraction_model_error_degrades() {
    let model = Arc::new(
        StubModel::new(1).with_extraction(Err(LlmError::RateLimited("slow down".into()))),
    );

    let state = TestHarness::new().run(model).await.unwrap();

    assert!(state.extracted_facts().is_empty());
    assert_eq!(state.errors().len(), 1);
    assert_eq!(state.subtask_results().len(), 1);
}

#[tokio::test]
async fn invalid_synthesis_is_replaced_by_safe_default() {
    let model = Arc::new(
        StubModel::new(2).with_synthesis(Ok(json!({"summary": "partial"}).to_string())),
    );

    let state = TestHarness::new().run(model).await.unwrap();

    assert_eq!(state.synthesis()["status"], "validation_failed");
    assert_eq!(state.errors().len(), 1);
    assert!(!state.final_report().is_empty());
}

#[tokio::test]
async fn report_failure_uses_fallback_report() {
    let model = Arc::new(StubModel::new(2).with_report(Err(LlmError::Transport("reset".into()))));

    let state = TestHarness::new().run(model).await.unwrap();

    let report = state.final_report();
    assert!(report.starts_with("Analytical report (run "));
    assert!(report.contains("Revenue grew while margins narrowed."));
    assert!(report.contains("Analyst 1"));
    assert_eq!(state.errors().len(), 1);
}

#[tokio::test]
async fn every_subtask_failing_still_completes_the_run() {
    let model = Arc::new(StubModel::new(2).failing("Analyst 1").failing("Analyst 2"));
    let harness = TestHarness::new();

    let state = harness.run(model).await.unwrap();

    assert!(state.subtask_results().is_empty());
    assert_eq!(state.errors().len(), 2);
    assert!(!state.final_report().is_empty());
    let failed = harness.audit.records_of(RecordType::StageFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].stage_name, "fan_out");
}

#[tokio::test]
async fn unreachable_audit_store_aborts_before_any_stage() {
    let harness = TestHarness::with_audit(MemoryAuditSink::unreachable());
    let model = Arc::new(StubModel::new(3));

    let failure = harness.run(model.clone()).await.unwrap_err();

    assert!(matches!(failure.error, PipelineError::AuditUnavailable(_)));
    assert!(failure.state.completed_stages().is_empty());
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn audit_write_failures_never_surface() {
    let harness = TestHarness::with_audit(MemoryAuditSink::with_failing_writes());
    let model = Arc::new(StubModel::new(3));

    let state = harness.run(model).await.unwrap();

    assert!(state.errors().is_empty());
    assert_eq!(state.subtask_results().len(), 3);
}

#[tokio::test]
async fn audit_trail_covers_run_and_every_stage() {
    let harness = TestHarness::new();
    let state = harness.run(Arc::new(StubModel::new(3))).await.unwrap();

    let records = harness.audit.records();
    assert!(records.iter().all(|r| r.run_id == state.run_id()));
    assert_eq!(records[0].record_type, RecordType::RunStarted);
    assert_eq!(records.last().unwrap().record_type, RecordType::RunCompleted);
    assert_eq!(harness.audit.records_of(RecordType::StageStarted).len(), 5);
    assert_eq!(harness.audit.records_of(RecordType::StageCompleted).len(), 5);

    let timed: Vec<_> = harness
        .audit
        .records_of(RecordType::StageTiming)
        .into_iter()
        .map(|r| r.stage_name)
        .collect();
    assert_eq!(timed, vec!["extraction", "planning", "fan_out", "synthesis", "report"]);
}

#[tokio::test]
async fn sqlite_audit_store_persists_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteAuditStore::open(&dir.path().join("audit.db")).unwrap());
    let harness = TestHarness::new();
    let memo = harness.document("memo.txt", "Revenue rose 12%.");

    let pipeline = Pipeline::builder(Arc::new(StubModel::new(2)))
        .audit(store.clone())
        .build()
        .unwrap();
    let state = pipeline.run(vec![memo], BTreeMap::new()).await.unwrap();

    assert_eq!(store.count_by_type(state.run_id(), RecordType::StageTiming).unwrap(), 5);
    assert_eq!(store.count_by_type(state.run_id(), RecordType::RunCompleted).unwrap(), 1);
    let records = store.records_for_run(state.run_id()).unwrap();
    assert_eq!(records.first().unwrap().record_type, RecordType::RunStarted);
}

#[tokio::test]
async fn progress_events_report_each_subtask() {
    let harness = TestHarness::new();
    let mut events = harness.progress.subscribe();

    harness
        .run(Arc::new(StubModel::new(3).failing("Analyst 3")))
        .await
        .unwrap();

    let mut finished = Vec::new();
    let mut stage_events = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ProgressEvent::SubtaskFinished { identity, success, .. } => {
                finished.push((identity, success))
            }
            _ => stage_events += 1,
        }
    }
    assert_eq!(finished.len(), 3);
    assert_eq!(finished.iter().filter(|(_, ok)| !ok).count(), 1);
    // Started plus completed for each of the five stages
    assert_eq!(stage_events, 10);
}

#[tokio::test]
async fn run_timeout_fails_slow_subtasks_and_keeps_the_rest() {
    let harness = TestHarness::new().configure(|c| {
        c.run_timeout = Duration::from_millis(300);
        c.stage_grace = Duration::from_secs(5);
    });
    let plan = PlanBuilder::new().task("Quick").task("Stalled").build();
    let model = Arc::new(
        StubModel::new(0)
            .with_plan(plan)
            .with_delay("Stalled", Duration::from_secs(30)),
    );

    let state = harness.run(model).await.unwrap();

    assert_eq!(state.subtask_results().len(), 1);
    assert_eq!(state.subtask_results()[0].identity, "Quick");
    assert_eq!(state.errors().len(), 1);
    assert!(state.errors()[0].contains("Stalled"));
    assert!(state.errors()[0].contains("timed out"));
    assert!(!state.final_report().is_empty());
}

#[tokio::test]
async fn run_timeout_without_stage_grace_keeps_finished_subtasks() {
    let harness = TestHarness::new().configure(|c| {
        c.run_timeout = Duration::from_millis(300);
        c.stage_grace = Duration::ZERO;
    });
    let plan = PlanBuilder::new().task("Quick").task("Stalled").build();
    let model = Arc::new(
        StubModel::new(0)
            .with_plan(plan)
            .with_delay("Stalled", Duration::from_secs(30)),
    );

    let state = harness.run(model).await.unwrap();

    assert_eq!(state.subtask_results().len(), 1);
    assert_eq!(state.subtask_results()[0].identity, "Quick");
    assert_eq!(state.errors().len(), 1);
    assert!(state.errors()[0].starts_with("sub-task 'Stalled' failed"));
    assert!(state.errors()[0].contains("timed out"));
    assert!(state.has_completed(StageName::Report));
}

#[tokio::test]
async fn descriptors_without_labels_get_positional_identities() {
    let plan = PlanBuilder::new()
        .raw_task(json!({"task_text": "Summarise the risks", "relevant_content": "risk register"}))
        .raw_task(task("Named"))
        .build();
    let model = Arc::new(StubModel::new(0).with_plan(plan));

    let state = TestHarness::new().run(model).await.unwrap();

    let identities: HashSet<_> = state
        .subtask_results()
        .iter()
        .map(|r| r.identity.as_str())
        .collect();
    assert_eq!(identities, HashSet::from(["subtask-1", "Named"]));
}
