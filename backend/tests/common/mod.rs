// Shared setup for the integration tests in this directory
use std::sync::Once;
use std::time::Duration;

use autoflow_backend::WorkflowEngine;
use autoflow_shared::Execution;
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("autoflow_backend=debug")
            .try_init()
            .ok();
    });
}

/// Poll the engine until the execution reaches a terminal status
pub async fn wait_terminal(engine: &WorkflowEngine, execution_id: Uuid) -> Execution {
    let poll = async {
        loop {
            if let Ok(execution) = engine.get_execution(execution_id).await {
                if execution.is_terminal() {
                    return execution;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };

    tokio::time::timeout(Duration::from_secs(30), poll)
        .await
        .expect("execution never finished")
}
