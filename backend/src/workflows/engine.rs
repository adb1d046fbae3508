// Workflow Engine - Admission, background execution and the execution state machine

use autoflow_shared::{EngineStats, Execution, ExecutionStatus, Workflow};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::actions::{ActionRegistry, ExecutionContext};
use super::executor::ActionDispatcher;
use super::registry::{WorkflowFilter, WorkflowRegistry};
use super::store::{ExecutionFilter, ExecutionStore};
use super::triggers::{TriggerEvent, TriggerMatcher};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ErrorReport};
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::services::{EngineMetrics, NoopStorage, WorkflowStorage};
use crate::validation::WorkflowValidator;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Accepted,
    /// Admission refused by policy (disabled workflow or concurrency limit)
    Rejected,
    Error,
}

/// What happened to one matching workflow during trigger processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerOutcome {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl TriggerOutcome {
    fn from_result(workflow: &Workflow, result: EngineResult<Uuid>) -> Self {
        let (status, execution_id, error) = match result {
            Ok(id) => (OutcomeStatus::Accepted, Some(id), None),
            Err(e) if e.is_rejection() => (OutcomeStatus::Rejected, None, Some(ErrorReport::from(&e))),
            Err(e) => (OutcomeStatus::Error, None, Some(ErrorReport::from(&e))),
        };

        Self {
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            status,
            execution_id,
            error,
        }
    }
}

struct EngineInner {
    registry: WorkflowRegistry,
    matcher: TriggerMatcher,
    dispatcher: ActionDispatcher,
    executions: ExecutionStore,
    storage: Arc<dyn WorkflowStorage>,
    metrics: Arc<EngineMetrics>,
    shutting_down: AtomicBool,
}

/// Workflow engine
///
/// Owns the workflow registry, trigger matching and every execution. Cheap
/// to clone; clones share the same state.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
    tracker: TaskTracker,
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig, actions: ActionRegistry, storage: Arc<dyn WorkflowStorage>) -> Self {
        let metrics = Arc::new(EngineMetrics::new());
        let actions = Arc::new(actions);

        let inner = EngineInner {
            registry: WorkflowRegistry::new(
                WorkflowValidator::new(actions.clone()),
                storage.clone(),
                metrics.clone(),
            ),
            matcher: TriggerMatcher::new(metrics.clone()),
            dispatcher: ActionDispatcher::new(actions, metrics.clone()),
            executions: ExecutionStore::new(config.history_limit, metrics.clone()),
            storage,
            metrics,
            shutting_down: AtomicBool::new(false),
        };

        Self {
            inner: Arc::new(inner),
            tracker: TaskTracker::new(),
        }
    }

    /// Engine that persists nothing, with default limits
    pub fn in_memory(actions: ActionRegistry) -> Self {
        Self::new(EngineConfig::default(), actions, Arc::new(NoopStorage))
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.inner.metrics.clone()
    }

    /// Load persisted workflow definitions into the registry
    pub async fn load_workflows(&self) -> EngineResult<usize> {
        self.inner.registry.load_from_storage().await
    }

    // ===== Workflow definitions =====

    pub async fn create_workflow(&self, workflow: Workflow) -> EngineResult<Workflow> {
        self.inner.registry.create(workflow).await
    }

    pub async fn update_workflow(&self, workflow_id: Uuid, workflow: Workflow) -> EngineResult<Workflow> {
        self.inner.registry.update(workflow_id, workflow).await
    }

    /// Delete a workflow. Its running executions are cancelled and its
    /// pending ones signalled before the definition is removed.
    pub async fn delete_workflow(&self, workflow_id: Uuid) -> EngineResult<()> {
        if !self.inner.registry.contains(workflow_id).await {
            return Err(EngineError::workflow_not_found(workflow_id));
        }

        let stopped = self
            .inner
            .executions
            .cancel_workflow(workflow_id, "workflow deleted")
            .await;
        if stopped > 0 {
            info!(workflow_id = %workflow_id, stopped, "cancelled executions of deleted workflow");
        }

        self.inner.registry.remove(workflow_id).await?;
        self.inner.matcher.forget_workflow(workflow_id);
        Ok(())
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> EngineResult<Workflow> {
        self.inner
            .registry
            .get(workflow_id)
            .await
            .ok_or_else(|| EngineError::workflow_not_found(workflow_id))
    }

    pub async fn list_workflows(&self, filter: &WorkflowFilter, params: PaginationParams) -> PaginatedResponse<Workflow> {
        self.inner.registry.list(filter, params).await
    }

    // ===== Executions =====

    /// Start a workflow execution in the background and return its id.
    ///
    /// Admission counts the workflow's pending and running executions
    /// against `max_concurrent_runs`. A manual run skips that check and the
    /// enabled flag so an operator can always force a run; it still occupies
    /// a slot that later triggered runs will count.
    pub async fn execute_workflow(&self, workflow_id: Uuid, trigger_payload: Value, manual: bool) -> EngineResult<Uuid> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }

        let workflow = self
            .inner
            .registry
            .get(workflow_id)
            .await
            .ok_or_else(|| EngineError::workflow_not_found(workflow_id))?;

        if !workflow.enabled && !manual {
            let err = EngineError::WorkflowDisabled(workflow_id);
            self.inner
                .metrics
                .execution_rejected(workflow_id, err.error_code(), &err.to_string());
            return Err(err);
        }

        let execution = Execution::pending(&workflow, trigger_payload, manual);
        let execution_id = execution.execution_id;
        let limit = (!manual).then_some(workflow.max_concurrent_runs);

        let cancel = self
            .inner
            .executions
            .admit(execution, limit)
            .await
            .inspect_err(|e| {
                self.inner
                    .metrics
                    .execution_rejected(workflow_id, e.error_code(), &e.to_string())
            })?;

        info!(
            execution_id = %execution_id,
            workflow_id = %workflow_id,
            workflow = %workflow.name,
            manual,
            "execution admitted"
        );

        let inner = self.inner.clone();
        self.tracker
            .spawn(async move { inner.run_execution(workflow, execution_id, cancel).await });

        Ok(execution_id)
    }

    /// Offer an event to every enabled workflow. Each workflow is started at
    /// most once per call, however many of its triggers match.
    pub async fn process_trigger(&self, trigger_type: &str, payload: Value) -> Vec<TriggerOutcome> {
        let mut outcomes = Vec::new();

        for workflow in self.inner.registry.enabled_snapshot().await {
            if !workflow.has_trigger_type(trigger_type) {
                continue;
            }
            let matched = workflow
                .triggers
                .iter()
                .filter(|t| t.trigger_type == trigger_type)
                .any(|t| self.inner.matcher.matches(workflow.id, t, &payload));
            if !matched {
                continue;
            }

            debug!(workflow_id = %workflow.id, trigger_type, "trigger matched");
            let result = self.execute_workflow(workflow.id, payload.clone(), false).await;
            outcomes.push(TriggerOutcome::from_result(&workflow, result));
        }

        outcomes
    }

    pub async fn process_event(&self, event: &TriggerEvent) -> Vec<TriggerOutcome> {
        debug!(event_id = %event.event_id, trigger_type = %event.trigger_type, "processing event");
        self.process_trigger(&event.trigger_type, event.payload.clone()).await
    }

    /// Cancel a running execution. Anything not currently RUNNING is left
    /// untouched and reported as an invalid state.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> EngineResult<()> {
        self.inner
            .executions
            .cancel(execution_id, "cancelled by request")
            .await?;
        info!(execution_id = %execution_id, "execution cancelled");
        Ok(())
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> EngineResult<Execution> {
        self.inner
            .executions
            .get(execution_id)
            .await
            .ok_or_else(|| EngineError::execution_not_found(execution_id))
    }

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        params: PaginationParams,
    ) -> PaginatedResponse<Execution> {
        self.inner.executions.list(filter, params).await
    }

    pub async fn get_engine_stats(&self) -> EngineStats {
        let (total_workflows, enabled_workflows) = self.inner.registry.counts().await;
        let counts = self.inner.executions.counts().await;
        let finished = counts.completed + counts.failed + counts.cancelled + counts.timed_out;

        EngineStats {
            total_workflows,
            enabled_workflows,
            active_executions: counts.active,
            running_executions: counts.running,
            history_size: counts.history,
            total_executions: counts.total,
            completed_executions: counts.completed,
            failed_executions: counts.failed,
            cancelled_executions: counts.cancelled,
            timed_out_executions: counts.timed_out,
            success_rate: if finished == 0 {
                0.0
            } else {
                counts.completed as f64 / finished as f64
            },
        }
    }

    /// Stop admitting work, signal every active execution and wait up to
    /// `grace` for them to finish. Returns true if everything drained.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner.executions.cancel_all();
        self.tracker.close();

        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if drained {
            info!("workflow engine stopped");
        } else {
            warn!(remaining = self.tracker.len(), "shutdown grace period elapsed with executions still running");
        }
        drained
    }
}

impl EngineInner {
    async fn run_execution(&self, workflow: Workflow, execution_id: Uuid, cancel: CancellationToken) {
        if !self.executions.mark_running(execution_id).await {
            debug!(execution_id = %execution_id, "execution no longer pending, not starting");
            self.finalize(execution_id).await;
            return;
        }

        let bounded = tokio::time::timeout(
            workflow.timeout_duration(),
            self.run_actions(&workflow, execution_id, &cancel),
        );

        match AssertUnwindSafe(bounded).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(_elapsed)) => {
                warn!(execution_id = %execution_id, timeout_secs = workflow.timeout, "execution timed out");
                self.executions
                    .finish(
                        execution_id,
                        ExecutionStatus::Timeout,
                        Some(format!("workflow timed out after {}s", workflow.timeout)),
                        None,
                    )
                    .await;
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                error!(execution_id = %execution_id, panic = %detail, "execution panicked");
                self.executions
                    .finish(
                        execution_id,
                        ExecutionStatus::Failed,
                        Some(EngineError::Internal(detail).to_string()),
                        None,
                    )
                    .await;
            }
        }

        self.finalize(execution_id).await;
    }

    async fn run_actions(&self, workflow: &Workflow, execution_id: Uuid, cancel: &CancellationToken) {
        let payload = match self.executions.get(execution_id).await {
            Some(execution) => execution.trigger_payload,
            None => return,
        };
        let mut context = ExecutionContext::new(execution_id, workflow.id, &workflow.name, payload);

        for (index, action) in workflow.actions.iter().enumerate() {
            if cancel.is_cancelled() {
                self.stop_cancelled(execution_id).await;
                return;
            }
            if !action.enabled {
                debug!(execution_id = %execution_id, action_index = index, "skipping disabled action");
                continue;
            }

            context.action_index = index;
            let result = self.dispatcher.run(index, action, &context, cancel).await;
            let success = result.success;
            let data = result.data.clone();
            let message = result.error_message().to_string();
            self.executions.record_action(execution_id, index, result).await;

            if !success {
                if cancel.is_cancelled() {
                    self.stop_cancelled(execution_id).await;
                    return;
                }
                let failure = EngineError::Action {
                    index,
                    action_type: action.action_type.clone(),
                    message,
                };
                self.executions
                    .finish(execution_id, ExecutionStatus::Failed, Some(failure.to_string()), Some(index))
                    .await;
                return;
            }

            if let Some(data) = data {
                context.outputs.insert(index, data);
            }
        }

        self.executions
            .finish(execution_id, ExecutionStatus::Completed, None, None)
            .await;
    }

    async fn stop_cancelled(&self, execution_id: Uuid) {
        self.executions
            .finish(
                execution_id,
                ExecutionStatus::Cancelled,
                Some("execution cancelled".to_string()),
                None,
            )
            .await;
    }

    /// Move the execution into history and hand it to storage
    async fn finalize(&self, execution_id: Uuid) {
        let Some(execution) = self.executions.complete(execution_id).await else {
            return;
        };

        info!(
            execution_id = %execution_id,
            workflow_id = %execution.workflow_id,
            status = %execution.status,
            duration_ms = execution.duration_ms.unwrap_or_default(),
            "execution finished"
        );

        if let Err(e) = self.storage.save_execution_history(&execution).await {
            warn!(execution_id = %execution_id, error = %e, "failed to persist execution history");
        }
    }
}
