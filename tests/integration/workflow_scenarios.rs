//! Workflow orchestration through a running session
//!
//! Tests cover:
//! - Step timeouts exhausting retries and the single failure recommendation
//! - Alert, health and schedule triggers
//! - Disabled workflows
//! - Workflows declared in a configuration file using the built-in actions

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use watchtower::config::read_config_file;
use watchtower::error::EngineError;
use watchtower::sources::MemorySource;
use watchtower::workflows::{StepStatus, TriggerKind, WorkflowStep, WorkflowTrigger};
use watchtower::{ExecutionStatus, MEMORY_MB, SessionBuilder, Severity, Workflow};

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_step_timing_out_twice_fails_the_execution() {
    let source = MemorySource::new();
    let session = builder(&source)
        .action("stuck", pause(Duration::from_secs(60)))
        .action("after", noop())
        .register_workflow(
            Workflow::new("restart", WorkflowTrigger::Manual)
                .step(WorkflowStep::new("stuck").with_timeout(Duration::from_millis(100)))
                .step("after"),
        )
        .start()
        .unwrap();

    let execution = session
        .execute_manually("restart", serde_json::Value::Null)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.steps_completed, 0);
    assert_eq!(execution.steps_expected, 2);
    assert_eq!(execution.step_results.len(), 1);
    assert_eq!(execution.step_results[0].status, StepStatus::Failed);
    assert_eq!(execution.step_results[0].attempts, 2);
    assert!(execution.error.is_some());

    assert_eq!(execution.recommendations.len(), 1);
    assert!(execution.recommendations[0].contains("stuck"));

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_alert_triggers_matching_workflow() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 150.0);

    let session = builder(&source)
        .rule(memory_rule(100.0, Severity::High))
        .action("check", noop())
        .register_workflow(
            Workflow::new("triage", WorkflowTrigger::alert_type("memory_.*")).step("check"),
        )
        .start()
        .unwrap();

    let (tx, mut rx) = mpsc::channel(4);
    session.on_execution_complete(tx).await;

    let snapshot = tick(&session).await;
    let execution = recv_within(&mut rx, Duration::from_secs(5)).await;
    let alert = session.open_alerts().pop().unwrap();

    assert_eq!(execution.workflow_id, "triage");
    assert_eq!(execution.trigger, TriggerKind::Alert);
    assert_eq!(execution.alert_id, Some(alert.id));
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.snapshot_at, Some(snapshot.timestamp));
    assert!(execution.started_at >= snapshot.timestamp);
    assert!(
        execution
            .recommendations
            .iter()
            .any(|r| r.contains("memory usage of api exceeds 100MB")),
        "unexpected recommendations: {:?}",
        execution.recommendations
    );

    // the open alert does not trigger again
    tick(&session).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(session.executions().await.len(), 1);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_disabled_workflow_never_executes() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 150.0);

    let session = builder(&source)
        .rule(memory_rule(100.0, Severity::High))
        .action("check", noop())
        .register_workflow(
            Workflow::new("off", WorkflowTrigger::Severity { min: Severity::Low })
                .step("check")
                .disabled(),
        )
        .register_workflow(
            Workflow::new("on", WorkflowTrigger::Severity { min: Severity::Low }).step("check"),
        )
        .start()
        .unwrap();

    let (tx, mut rx) = mpsc::channel(4);
    session.on_execution_complete(tx).await;

    tick(&session).await;
    let execution = recv_within(&mut rx, Duration::from_secs(5)).await;
    assert_eq!(execution.workflow_id, "on");

    let result = session
        .execute_manually("off", serde_json::Value::Null)
        .await;
    assert_matches!(result, Err(EngineError::WorkflowDisabled(id)) if id == "off");

    tokio::time::sleep(Duration::from_secs(1)).await;
    let executions = session.executions().await;
    assert_eq!(executions.len(), 1);
    assert!(executions.iter().all(|e| e.workflow_id != "off"));

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_health_trigger_fires_once_per_crossing() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 500.0);

    let session = builder(&source)
        .action("check", noop())
        .register_workflow(
            Workflow::new("recover", WorkflowTrigger::HealthBelow { threshold: 0.5 }).step("check"),
        )
        .start()
        .unwrap();

    let (tx, mut rx) = mpsc::channel(4);
    session.on_execution_complete(tx).await;

    for _ in 0..3 {
        tick(&session).await;
    }
    let first = recv_within(&mut rx, Duration::from_secs(5)).await;
    assert_eq!(first.trigger, TriggerKind::Snapshot);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(drain(&mut rx).is_empty());

    source.set("api", MEMORY_MB, 50.0);
    tick(&session).await;
    source.set("api", MEMORY_MB, 500.0);
    tick(&session).await;

    let second = recv_within(&mut rx, Duration::from_secs(5)).await;
    assert_eq!(second.trigger, TriggerKind::Snapshot);
    assert_eq!(session.executions().await.len(), 2);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_workflow_runs_on_its_own_cadence() {
    let source = MemorySource::new();
    let session = builder(&source)
        .action("check", noop())
        .register_workflow(
            Workflow::new("report", WorkflowTrigger::Schedule { every_secs: 10 }).step("check"),
        )
        .start()
        .unwrap();

    tokio::time::sleep(Duration::from_secs(35)).await;

    let executions = session.executions().await;
    assert_eq!(executions.len(), 3);
    assert!(executions.iter().all(|e| e.trigger == TriggerKind::Schedule));
    assert!(executions.iter().all(|e| e.status == ExecutionStatus::Completed));

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_workflows_from_config_file_use_builtin_actions() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let config = serde_json::json!({
        "units": [{"id": "api", "kind": "http"}, {"id": "worker"}],
        "alerts": {
            "rules": [
                {"metric": "memory_mb", "comparator": ">", "threshold": 100.0, "severity": "high"}
            ]
        },
        "workflows": [{
            "id": "triage",
            "name": "Memory triage",
            "trigger": {"type": "alert_type", "pattern": "memory_mb"},
            "steps": ["diagnose", {"action": "collect-report", "timeout_ms": 500}]
        }]
    });
    write!(file, "{config}").unwrap();

    let config = read_config_file(file.path().to_str().unwrap()).unwrap();

    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 400.0);
    source.set("worker", MEMORY_MB, 20.0);

    let session = SessionBuilder::from_config(config, Arc::new(source))
        .probe(light_probe())
        .start()
        .unwrap();

    let (tx, mut rx) = mpsc::channel(4);
    session.on_execution_complete(tx).await;
    tick(&session).await;

    let execution = recv_within(&mut rx, Duration::from_secs(5)).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.steps_completed, 2);

    let diagnosis = execution.step_results[0].output.clone().unwrap();
    assert!(diagnosis.contains("worst units: api"), "{diagnosis}");

    let report = execution.step_results[1].output.clone().unwrap();
    assert!(report.contains("high memory_mb alert on api"), "{report}");

    session.stop().await;
}
