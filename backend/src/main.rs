use autoflow_backend::services::{JsonFileStorage, NoopStorage, WorkflowStorage};
use autoflow_backend::workflows::OutcomeStatus;
use autoflow_backend::{ActionRegistry, Capabilities, Config, TriggerEvent, WorkflowEngine};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let storage: Arc<dyn WorkflowStorage> = match &config.storage.storage_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "using JSON file storage");
            Arc::new(JsonFileStorage::open(dir).await?)
        }
        None => Arc::new(NoopStorage),
    };

    let actions = ActionRegistry::with_builtin(Capabilities::local(&config.capabilities));
    let engine = WorkflowEngine::new(config.engine.clone(), actions, storage);
    let loaded = engine.load_workflows().await?;
    info!(loaded, "autoflow engine ready, reading events from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => {
                info!("interrupt received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<TriggerEvent>(&line) {
                    Ok(event) => dispatch(&engine, &event).await,
                    Err(e) => warn!(error = %e, "ignoring malformed event"),
                }
            }
        }
    }

    let grace = config.engine.shutdown_grace();
    info!(grace_secs = grace.as_secs(), "shutting down");
    if !engine.shutdown(grace).await {
        error!("some executions did not finish before shutdown");
    }

    Ok(())
}

async fn dispatch(engine: &WorkflowEngine, event: &TriggerEvent) {
    let outcomes = engine.process_event(event).await;
    if outcomes.is_empty() {
        info!(trigger_type = %event.trigger_type, "no workflow matched");
    }

    for outcome in outcomes {
        match outcome.status {
            OutcomeStatus::Accepted => info!(
                workflow = %outcome.workflow_name,
                execution_id = ?outcome.execution_id,
                "execution started"
            ),
            OutcomeStatus::Rejected | OutcomeStatus::Error => warn!(
                workflow = %outcome.workflow_name,
                status = ?outcome.status,
                error = ?outcome.error.as_ref().map(|e| e.message.as_str()),
                "execution not started"
            ),
        }
    }
}
