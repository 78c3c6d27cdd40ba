use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use watchtower::{
    AlertNotification, SessionBuilder, WorkflowExecution,
    config::read_config_file,
    events::FnSink,
    sources::HttpMetricSource,
    util::{get_log_level, get_source_token},
};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let level = LevelFilter::from_level(get_log_level());
    let filter = filter::Targets::new().with_targets(vec![("watchtower", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let mut config = read_config_file(&args.file)?;

    let mut source_config = config
        .source
        .take()
        .context("config file does not define a metric source")?;
    if source_config.token.is_none() {
        source_config.token = get_source_token();
    }
    let source = HttpMetricSource::new(&source_config)?;

    let session = SessionBuilder::from_config(config, Arc::new(source)).start()?;

    session
        .on_alert(FnSink(|notification: &AlertNotification| {
            let alert = &notification.alert;
            info!(
                "alert {:?}: [{}] {} on {}: {}",
                notification.kind, alert.severity, alert.alert_type, alert.unit_id, alert.message
            );
        }))
        .await;

    session
        .on_execution_complete(FnSink(|execution: &WorkflowExecution| {
            info!(
                "workflow {} finished as {:?} ({}/{} steps)",
                execution.workflow_id,
                execution.status,
                execution.steps_completed,
                execution.steps_expected
            );
            for recommendation in &execution.recommendations {
                info!("  {recommendation}");
            }
        }))
        .await;

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {e}");
    }

    let status = session.status().await;
    info!(
        "stopping with {} open alerts and {} running executions",
        status.open_alerts, status.running_executions
    );
    session.stop().await;

    Ok(())
}
