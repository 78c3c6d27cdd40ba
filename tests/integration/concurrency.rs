//! Concurrency rules of the orchestrator
//!
//! Tests cover:
//! - At most one running execution per workflow, drop and queue policies
//! - Independent workflows running side by side
//! - The profile's concurrency cap
//! - Stopping a session with executions in flight, cooperative or not

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use watchtower::actors::ABANDONED_AT_STOP;
use watchtower::error::EngineError;
use watchtower::sources::MemorySource;
use watchtower::workflows::{ConcurrencyPolicy, WorkflowTrigger};
use watchtower::{ExecutionStatus, MEMORY_MB, ProfileName, Severity, Workflow};

use crate::helpers::*;

fn on_any_alert(id: &str) -> Workflow {
    Workflow::new(id, WorkflowTrigger::Severity { min: Severity::Low }).step("pause")
}

#[tokio::test(start_paused = true)]
async fn test_no_second_running_execution_of_a_workflow() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 150.0);

    let session = builder(&source)
        .rule(memory_rule(100.0, Severity::High))
        .action("pause", pause(Duration::from_secs(10)))
        .register_workflow(on_any_alert("slow"))
        .start()
        .unwrap();

    let (tx, mut rx) = mpsc::channel(4);
    session.on_execution_complete(tx).await;

    tick(&session).await;
    assert_eq!(session.status().await.running_executions, 1);

    let duplicate = session
        .execute_manually("slow", serde_json::Value::Null)
        .await;
    assert_matches!(duplicate, Err(EngineError::WorkflowBusy(id)) if id == "slow");

    let finished = recv_within(&mut rx, Duration::from_secs(20)).await;
    assert_eq!(finished.status, ExecutionStatus::Completed);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(session.executions().await.len(), 1);
    assert_eq!(session.status().await.running_executions, 0);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_queued_triggers_run_back_to_back() {
    let source = MemorySource::new();
    let session = builder(&source)
        .action("pause", pause(Duration::from_secs(1)))
        .register_workflow(
            Workflow::new("serial", WorkflowTrigger::Manual)
                .step("pause")
                .with_concurrency(ConcurrencyPolicy::Queue),
        )
        .start()
        .unwrap();

    let (first, second) = tokio::join!(
        session.execute_manually("serial", serde_json::Value::Null),
        session.execute_manually("serial", serde_json::Value::Null),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(first.status, ExecutionStatus::Completed);
    assert_eq!(second.status, ExecutionStatus::Completed);
    assert_ne!(first.execution_id, second.execution_id);
    assert!(second.started_at >= first.finished_at.unwrap());

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_independent_workflows_run_side_by_side() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 150.0);

    let session = builder(&source)
        .rule(memory_rule(100.0, Severity::High))
        .action("pause", pause(Duration::from_secs(5)))
        .register_workflow(on_any_alert("first"))
        .register_workflow(on_any_alert("second"))
        .start()
        .unwrap();

    let (tx, mut rx) = mpsc::channel(4);
    session.on_execution_complete(tx).await;

    tick(&session).await;
    assert_eq!(session.status().await.running_executions, 2);

    let mut finished = vec![
        recv_within(&mut rx, Duration::from_secs(10)).await.workflow_id,
        recv_within(&mut rx, Duration::from_secs(10)).await.workflow_id,
    ];
    finished.sort();
    assert_eq!(finished, vec!["first", "second"]);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_profile_caps_concurrent_executions() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 150.0);

    // minimal allows two concurrent operations
    let session = builder(&source)
        .profile(ProfileName::Minimal)
        .rule(memory_rule(100.0, Severity::High))
        .action("pause", pause(Duration::from_secs(5)))
        .register_workflow(on_any_alert("a"))
        .register_workflow(on_any_alert("b"))
        .register_workflow(on_any_alert("c"))
        .start()
        .unwrap();

    tick(&session).await;
    assert_eq!(session.status().await.running_executions, 2);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let executions = session.executions().await;
    assert_eq!(executions.len(), 2);
    assert!(executions.iter().all(|e| e.workflow_id != "c"));

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_in_flight_execution_between_steps() {
    let source = MemorySource::new();
    let session = Arc::new(
        builder(&source)
            .action("pause", pause(Duration::from_secs(2)))
            .register_workflow(
                Workflow::new("long", WorkflowTrigger::Manual)
                    .step("pause")
                    .step("pause")
                    .step("pause"),
            )
            .start()
            .unwrap(),
    );

    let running = tokio::spawn({
        let session = session.clone();
        async move {
            session
                .execute_manually("long", serde_json::Value::Null)
                .await
        }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    session.stop().await;

    let execution = running.await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(execution.steps_completed, 1);
    assert_eq!(execution.steps_expected, 3);

    let status = session.status().await;
    assert!(!status.monitoring);
    assert_eq!(status.running_executions, 0);

    let result = session
        .execute_manually("long", serde_json::Value::Null)
        .await;
    assert_matches!(result, Err(EngineError::ActorUnavailable(_)));
}

#[tokio::test(start_paused = true)]
async fn test_stop_records_execution_abandoned_mid_step() {
    let source = MemorySource::new();
    let session = Arc::new(
        builder(&source)
            .action("pause", pause(Duration::from_secs(20)))
            .register_workflow(Workflow::new("stuck", WorkflowTrigger::Manual).step("pause"))
            .start()
            .unwrap(),
    );

    let (tx, mut rx) = mpsc::channel(4);
    session.on_execution_complete(tx).await;

    let running = tokio::spawn({
        let session = session.clone();
        async move {
            session
                .execute_manually("stuck", serde_json::Value::Null)
                .await
        }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    session.stop().await;

    // the step ignores cancellation and outlives the shutdown grace
    let execution = running.await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(execution.error.as_deref(), Some(ABANDONED_AT_STOP));
    assert_eq!(execution.steps_completed, 0);
    assert!(execution.finished_at.unwrap() >= execution.started_at);

    let history = session.executions().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].execution_id, execution.execution_id);

    let published = drain(&mut rx);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].status, ExecutionStatus::Cancelled);
}
