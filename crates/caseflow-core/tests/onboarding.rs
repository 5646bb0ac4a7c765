//! End-to-end runs of the bundled catalog with the built-in executors

use caseflow_core::executors::default_registry;
use caseflow_core::{
    CaseWorkflow, CatalogLoader, MemoryStore, StepStatus, StepType, TaskCompletionHandler,
    TaskKind, TaskResolution, TaskStatus, TaskStore, WorkflowEngine, WorkflowError,
    WorkflowStatus, WorkflowStep, WorkflowStore, WorkflowTemplate,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

fn catalog_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
}

async fn setup() -> (Arc<MemoryStore>, Arc<WorkflowEngine>, TaskCompletionHandler) {
    let store = Arc::new(MemoryStore::new());
    let catalog = CatalogLoader::new(catalog_dir()).load().unwrap();
    catalog.install(store.as_ref()).await.unwrap();

    let engine = Arc::new(WorkflowEngine::new(
        store.clone(),
        default_registry(store.clone()),
    ));
    let handler = TaskCompletionHandler::new(engine.clone(), store.clone());
    (store, engine, handler)
}

fn data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn output(case: &CaseWorkflow, step_id: &str) -> Value {
    let execution = case
        .executions
        .iter()
        .rev()
        .find(|e| e.step_id == step_id)
        .unwrap();
    let raw = execution.output_data.as_deref().unwrap();
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[tokio::test]
async fn onboarding_pauses_for_client_then_completes() {
    let (store, engine, handler) = setup().await;

    let mut case = engine
        .open_case(
            "client-001",
            "client-onboarding",
            None,
            data(&[("jurisdiction", "KY"), ("aum", "2000000")]),
        )
        .await
        .unwrap();
    engine.start(&mut case).await.unwrap();

    assert_eq!(case.status, WorkflowStatus::Paused);
    assert_eq!(case.current_step_id.as_deref(), Some("welcome_pack"));

    let risk = output(&case, "risk_assessment");
    assert_eq!(risk["rule_id"], "offshore-jurisdiction");
    assert_eq!(risk["outputs"]["tier"], "HIGH");
    assert_eq!(output(&case, "fee_quote"), json!(4500));

    let tasks = store.tasks_for_case(case.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].kind, TaskKind::ClientApproval);
    assert_eq!(tasks[0].title, "Approve fee schedule");

    let case = handler
        .complete(
            tasks[0].id,
            TaskResolution::completed()
                .with_output(json!({"signed": true}))
                .by("client-portal"),
        )
        .await
        .unwrap();

    assert_eq!(case.status, WorkflowStatus::Completed);
    let steps: Vec<_> = case
        .executions
        .iter()
        .map(|e| (e.step_id.as_str(), e.status))
        .collect();
    assert_eq!(
        steps,
        vec![
            ("risk_assessment", StepStatus::Completed),
            ("fee_quote", StepStatus::Completed),
            ("client_approval", StepStatus::Completed),
            ("welcome_pack", StepStatus::Skipped),
        ]
    );

    let approval = output(&case, "client_approval");
    assert_eq!(approval["status"], "completed");
    assert_eq!(approval["resolved_by"], "client-portal");
    assert_eq!(approval["output"]["signed"], true);

    let task = store.load_task(tasks[0].id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.resolved_at.is_some());
}

#[tokio::test]
async fn fee_failure_routes_to_manual_pricing() {
    let (store, engine, handler) = setup().await;

    // No aum: the fee formula cannot resolve its variables
    let mut case = engine
        .open_case("client-002", "client-onboarding", None, data(&[("pep", "TRUE")]))
        .await
        .unwrap();
    engine.start(&mut case).await.unwrap();

    assert_eq!(case.status, WorkflowStatus::Paused);
    let fee = case.executions_for("fee_quote").next().unwrap();
    assert_eq!(fee.status, StepStatus::Failed);
    assert!(fee
        .error_message
        .as_deref()
        .unwrap()
        .contains("unknown variable 'aum'"));
    assert_eq!(case.executions_for("client_approval").count(), 0);

    let tasks = store.tasks_for_case(case.id).await.unwrap();
    assert_eq!(tasks[0].kind, TaskKind::HumanTask);
    assert_eq!(tasks[0].assignee.as_deref(), Some("pricing-desk"));

    let case = handler
        .complete(tasks[0].id, TaskResolution::completed())
        .await
        .unwrap();
    assert_eq!(case.status, WorkflowStatus::Completed);

    let err = handler
        .complete(tasks[0].id, TaskResolution::completed())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::TaskAlreadyResolved(_)));
}

#[tokio::test]
async fn completing_task_of_cancelled_workflow_is_rejected() {
    let (store, engine, handler) = setup().await;

    let mut case = engine
        .open_case(
            "client-003",
            "client-onboarding",
            None,
            data(&[("jurisdiction", "GB"), ("aum", "50000000")]),
        )
        .await
        .unwrap();
    engine.start(&mut case).await.unwrap();
    assert_eq!(output(&case, "risk_assessment")["outputs"]["tier"], "MEDIUM");

    engine
        .cancel(&mut case, Some("client withdrew".into()))
        .await
        .unwrap();

    let tasks = store.tasks_for_case(case.id).await.unwrap();
    let err = handler
        .complete(tasks[0].id, TaskResolution::rejected())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::AlreadyTerminal(WorkflowStatus::Cancelled)
    ));

    let task = store.load_task(tasks[0].id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
}

#[tokio::test]
async fn periodic_review_uses_review_interval() {
    let (_store, engine, _handler) = setup().await;

    let mut case = engine
        .open_case(
            "client-004",
            "periodic-review",
            None,
            data(&[("jurisdiction", "FR"), ("aum", "100")]),
        )
        .await
        .unwrap();
    engine.start(&mut case).await.unwrap();

    assert_eq!(case.status, WorkflowStatus::Paused);
    assert_eq!(output(&case, "risk_assessment")["rule_id"], "standard");
    assert_eq!(output(&case, "review_interval"), json!(1095));
}

#[tokio::test]
async fn unknown_task_is_rejected() {
    let (_store, _engine, handler) = setup().await;
    let id = uuid::Uuid::new_v4();
    assert!(matches!(
        handler.complete(id, TaskResolution::completed()).await,
        Err(WorkflowError::TaskNotFound(found)) if found == id
    ));
}

#[tokio::test]
async fn stale_task_cannot_skip_the_current_pause() {
    let (store, engine, handler) = setup().await;

    let mut template = WorkflowTemplate::new("dual-sign-off", 1)
        .with_step(WorkflowStep::new("first", StepType::HumanTask, 10))
        .with_step(WorkflowStep::new("second", StepType::HumanTask, 20))
        .with_step(WorkflowStep::new("letter", StepType::DocumentGeneration, 30).optional());
    template.publish().unwrap();
    store.save_template(&template).await.unwrap();

    let mut case = engine
        .open_case("client-005", "dual-sign-off", None, BTreeMap::new())
        .await
        .unwrap();
    engine.start(&mut case).await.unwrap();
    // An operator pushes the workflow past the first pause without the task
    engine.resume(&mut case).await.unwrap();
    assert_eq!(case.status, WorkflowStatus::Paused);

    let tasks = store.tasks_for_case(case.id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    let first = tasks.iter().find(|t| t.step_id == "first").unwrap();
    let second = tasks.iter().find(|t| t.step_id == "second").unwrap();

    let err = handler
        .complete(first.id, TaskResolution::completed())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::TaskNotAwaited(id) if id == first.id));

    let stored = engine.load_case(case.id).await.unwrap();
    assert_eq!(stored.status, WorkflowStatus::Paused);
    let untouched = store.load_task(first.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, TaskStatus::Pending);

    let case = handler
        .complete(second.id, TaskResolution::completed())
        .await
        .unwrap();
    assert_eq!(case.status, WorkflowStatus::Completed);
}
