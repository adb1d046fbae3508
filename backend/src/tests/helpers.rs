use async_trait::async_trait;
use autoflow_shared::{ActionConfig, ActionResult, Execution, ExecutionStatus};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::workflows::{ActionHandler, ActionRegistry, ExecutionContext, WorkflowEngine};

/// Counters shared between a scripted handler and the test driving it
#[derive(Debug, Default)]
pub struct Tally {
    calls: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Tally {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub enum Behavior {
    Succeed,
    /// Return the action config as data
    Echo,
    Fail(&'static str),
    Sleep(Duration),
    /// Block until the semaphore hands out a permit or is closed
    Gate(Arc<Semaphore>),
    Panic,
}

pub struct ScriptedHandler {
    behavior: Behavior,
    tally: Arc<Tally>,
}

#[async_trait]
impl ActionHandler for ScriptedHandler {
    async fn execute(&self, config: &ActionConfig, _context: &ExecutionContext) -> ActionResult {
        self.tally.enter();
        let result = match &self.behavior {
            Behavior::Succeed => ActionResult::success(Some(serde_json::json!({ "ok": true }))),
            Behavior::Echo => ActionResult::success(Some(Value::Object(config.clone()))),
            Behavior::Fail(message) => ActionResult::failure(message),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                ActionResult::success(None)
            }
            Behavior::Gate(gate) => {
                let _permit = gate.acquire().await;
                ActionResult::success(None)
            }
            Behavior::Panic => {
                self.tally.leave();
                panic!("handler exploded");
            }
        };
        self.tally.leave();
        result
    }
}

pub fn scripted(behavior: Behavior) -> (Arc<dyn ActionHandler>, Arc<Tally>) {
    let tally = Arc::new(Tally::default());
    let handler: Arc<dyn ActionHandler> = Arc::new(ScriptedHandler {
        behavior,
        tally: tally.clone(),
    });
    (handler, tally)
}

/// A closed gate; `release` lets every waiter through
pub fn gate() -> Arc<Semaphore> {
    Arc::new(Semaphore::new(0))
}

pub fn release(gate: &Semaphore) {
    gate.close();
}

pub fn registry_with(handlers: Vec<(&str, Arc<dyn ActionHandler>)>) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    for (action_type, handler) in handlers {
        registry.register(action_type, handler);
    }
    registry
}

pub fn engine_with(handlers: Vec<(&str, Arc<dyn ActionHandler>)>) -> WorkflowEngine {
    WorkflowEngine::in_memory(registry_with(handlers))
}

/// Poll until the execution satisfies `done`, failing the test after 30s
pub async fn wait_until(engine: &WorkflowEngine, execution_id: Uuid, done: impl Fn(&Execution) -> bool) -> Execution {
    let poll = async {
        loop {
            if let Ok(execution) = engine.get_execution(execution_id).await {
                if done(&execution) {
                    return execution;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };

    tokio::time::timeout(Duration::from_secs(30), poll)
        .await
        .expect("execution did not reach the expected state in time")
}

pub async fn wait_for_status(engine: &WorkflowEngine, execution_id: Uuid, status: ExecutionStatus) -> Execution {
    wait_until(engine, execution_id, |e| e.status == status).await
}

/// Wait until the execution is terminal and the engine has nothing active left
pub async fn wait_idle(engine: &WorkflowEngine, execution_id: Uuid) -> Execution {
    let execution = wait_until(engine, execution_id, |e| e.is_terminal()).await;
    let poll = async {
        loop {
            if engine.get_engine_stats().await.active_executions == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(30), poll).await;
    engine.get_execution(execution_id).await.unwrap_or(execution)
}
