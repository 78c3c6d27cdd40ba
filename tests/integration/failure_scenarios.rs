//! Failure containment
//!
//! Tests cover:
//! - HTTP agent errors and timeouts degrading only the affected unit
//! - Units that never answer
//! - Malformed rules and unregistered actions
//! - Invalid workflow registration at session start

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use watchtower::alerts::{AlertRule, Comparator};
use watchtower::config::{Config, HttpSourceConfig};
use watchtower::error::EngineError;
use watchtower::sources::{HttpMetricSource, MemorySource, UnitBehavior};
use watchtower::workflows::{StepStatus, WorkflowTrigger};
use watchtower::{ExecutionStatus, LATENCY_MS, MEMORY_MB, ProfileName, SessionBuilder, Severity, Workflow};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn http_session(server: &MockServer) -> watchtower::Session {
    let source = HttpMetricSource::new(&HttpSourceConfig {
        base_url: server.uri(),
        token: None,
    })
    .unwrap();

    let config = Config {
        metrics: vec![MEMORY_MB.to_string(), LATENCY_MS.to_string()],
        profile: ProfileName::Minimal,
        ..Config::default()
    };

    SessionBuilder::from_config(config, Arc::new(source))
        .unit("api", "http")
        .unit("db", "postgres")
        .probe(light_probe())
        .start()
        .unwrap()
}

async fn mount_value(server: &MockServer, route: &str, value: f64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "value": value })))
        .mount(server)
        .await;
}

// Real time: paused clocks and socket I/O do not mix
#[tokio::test]
async fn test_http_errors_degrade_only_the_failing_unit() {
    let server = MockServer::start().await;
    mount_value(&server, "/units/api/metrics/memory_mb", 256.0).await;
    mount_value(&server, "/units/api/metrics/latency_ms", 0.0).await;
    Mock::given(method("GET"))
        .and(path("/units/db/metrics/memory_mb"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_value(&server, "/units/db/metrics/latency_ms", 10.0).await;

    let session = http_session(&server);
    let snapshot = tick(&session).await;

    assert!(!snapshot.units["api"].degraded);
    assert!(snapshot.units["db"].degraded);
    assert!((snapshot.units["db"].score - 0.8).abs() < 1e-9);
    assert_eq!(snapshot.value("api", MEMORY_MB), Some(256.0));
    assert_eq!(snapshot.value("db", LATENCY_MS), None);

    session.stop().await;
}

#[tokio::test]
async fn test_missing_metric_is_not_a_fetch_failure() {
    let server = MockServer::start().await;
    mount_value(&server, "/units/api/metrics/memory_mb", 256.0).await;
    mount_value(&server, "/units/db/metrics/memory_mb", 0.0).await;
    // latency routes are not mounted: the agent answers 404

    let session = http_session(&server);
    let snapshot = tick(&session).await;

    assert!(snapshot.degraded_units().next().is_none());
    assert!((snapshot.units["api"].score - 0.5).abs() < 1e-9);
    assert!((snapshot.overall_health - 0.75).abs() < 1e-9);

    session.stop().await;
}

#[tokio::test]
async fn test_slow_agent_times_out_without_stalling_the_tick() {
    let server = MockServer::start().await;
    mount_value(&server, "/units/api/metrics/memory_mb", 64.0).await;
    mount_value(&server, "/units/api/metrics/latency_ms", 5.0).await;
    Mock::given(method("GET"))
        .and(path("/units/db/metrics/memory_mb"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;
    mount_value(&server, "/units/db/metrics/latency_ms", 5.0).await;

    let session = http_session(&server);
    let started = std::time::Instant::now();
    let snapshot = tick(&session).await;

    // minimal polls every 15s, the fetch timeout is capped at 5s
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(snapshot.units["db"].degraded);
    assert!(!snapshot.units["api"].degraded);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_hanging_unit_is_degraded() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 64.0);
    source.set_behavior("db", UnitBehavior::Hanging);

    let session = builder(&source).unit("db", "postgres").start().unwrap();

    let snapshot = tick(&session).await;
    assert!(snapshot.units["db"].degraded);
    assert!(!snapshot.units["api"].degraded);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_rule_does_not_block_other_rules() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 150.0);

    let session = builder(&source)
        .rule(AlertRule::new("", Comparator::Gt, 1.0, Severity::Critical))
        .rule(AlertRule::new(MEMORY_MB, Comparator::Gt, f64::NAN, Severity::Critical))
        .rule(memory_rule(100.0, Severity::Medium))
        .start()
        .unwrap();

    tick(&session).await;

    let open = session.open_alerts();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].severity, Severity::Medium);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_action_fails_the_execution() {
    let source = MemorySource::new();
    let session = builder(&source)
        .register_workflow(
            Workflow::new("broken", WorkflowTrigger::Manual)
                .step("diagnose")
                .step("does-not-exist"),
        )
        .start()
        .unwrap();

    let execution = session
        .execute_manually("broken", serde_json::Value::Null)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.steps_completed, 1);
    assert_eq!(execution.step_results[1].status, StepStatus::Failed);
    assert_eq!(execution.step_results[1].attempts, 0);
    assert_eq!(
        execution.recommendations,
        vec!["address failed step does-not-exist before retrying workflow".to_string()]
    );

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_workflows_prevent_start() {
    let source = MemorySource::new();

    let duplicate = builder(&source)
        .register_workflow(Workflow::new("twice", WorkflowTrigger::Manual))
        .register_workflow(Workflow::new("twice", WorkflowTrigger::Manual))
        .start()
        .err();
    assert_matches!(duplicate, Some(EngineError::DuplicateWorkflow(id)) if id == "twice");

    let pattern = builder(&source)
        .register_workflow(Workflow::new("bad", WorkflowTrigger::alert_type("memory(")))
        .start()
        .err();
    assert_matches!(pattern, Some(EngineError::InvalidTrigger { workflow, .. }) if workflow == "bad");

    let schedule = builder(&source)
        .register_workflow(Workflow::new("never", WorkflowTrigger::Schedule { every_secs: 0 }))
        .start()
        .err();
    assert_matches!(schedule, Some(EngineError::InvalidTrigger { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_workflow_is_reported() {
    let source = MemorySource::new();
    let session = builder(&source).start().unwrap();

    let result = session
        .execute_manually("missing", serde_json::Value::Null)
        .await;
    assert_matches!(result, Err(EngineError::WorkflowNotFound(id)) if id == "missing");

    session.stop().await;
}
