// Execution Store - Active executions, bounded history and lifetime totals

use autoflow_shared::{ActionResult, Execution, ExecutionStatus};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::services::EngineMetrics;
use crate::services::metrics::metric_names;

struct ActiveEntry {
    execution: Execution,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct ExecutionTotals {
    total: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
}

impl ExecutionTotals {
    fn record(&self, status: ExecutionStatus) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match status {
            ExecutionStatus::Completed => &self.completed,
            ExecutionStatus::Failed => &self.failed,
            ExecutionStatus::Cancelled => &self.cancelled,
            ExecutionStatus::Timeout => &self.timed_out,
            ExecutionStatus::Pending | ExecutionStatus::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Filter for execution listings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionFilter {
    pub workflow_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
}

impl ExecutionFilter {
    pub fn for_workflow(workflow_id: Uuid) -> Self {
        Self {
            workflow_id: Some(workflow_id),
            status: None,
        }
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn matches(&self, execution: &Execution) -> bool {
        self.workflow_id.is_none_or(|id| execution.workflow_id == id)
            && self.status.is_none_or(|status| execution.status == status)
    }
}

/// Point-in-time counters used for engine statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StoreCounts {
    pub active: usize,
    pub running: usize,
    pub history: usize,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
}

/// Lock order is always `active` before `history`.
pub struct ExecutionStore {
    active: RwLock<HashMap<Uuid, ActiveEntry>>,
    history: Mutex<VecDeque<Execution>>,
    history_limit: usize,
    totals: ExecutionTotals,
    root_cancel: CancellationToken,
    metrics: Arc<EngineMetrics>,
}

impl ExecutionStore {
    pub fn new(history_limit: usize, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            history_limit,
            totals: ExecutionTotals::default(),
            root_cancel: CancellationToken::new(),
            metrics,
        }
    }

    /// Register a pending execution. With a `limit`, the workflow's live
    /// (pending or running) executions are counted and the insert happens
    /// in the same critical section, so concurrent admissions cannot
    /// overshoot the limit.
    pub async fn admit(&self, execution: Execution, limit: Option<u32>) -> EngineResult<CancellationToken> {
        let mut active = self.active.write().await;

        if let Some(limit) = limit {
            let live = active
                .values()
                .filter(|entry| entry.execution.workflow_id == execution.workflow_id && !entry.execution.is_terminal())
                .count();
            if live >= limit as usize {
                return Err(EngineError::ConcurrencyLimit {
                    workflow_id: execution.workflow_id,
                    running: live,
                    limit,
                });
            }
        }

        let cancel = self.root_cancel.child_token();
        let (execution_id, workflow_id) = (execution.execution_id, execution.workflow_id);
        active.insert(
            execution_id,
            ActiveEntry {
                execution,
                cancel: cancel.clone(),
            },
        );
        let active_count = active.len();
        drop(active);

        self.metrics.execution_transition(execution_id, workflow_id, None, ExecutionStatus::Pending);
        self.metrics.gauge(metric_names::ACTIVE_EXECUTIONS, active_count as f64, None);
        Ok(cancel)
    }

    /// PENDING -> RUNNING. False if the execution is gone or no longer pending.
    pub async fn mark_running(&self, execution_id: Uuid) -> bool {
        let mut active = self.active.write().await;
        let Some(entry) = active.get_mut(&execution_id) else {
            return false;
        };
        if !entry.execution.start() {
            return false;
        }
        let workflow_id = entry.execution.workflow_id;
        drop(active);

        self.metrics.execution_transition(
            execution_id,
            workflow_id,
            Some(ExecutionStatus::Pending),
            ExecutionStatus::Running,
        );
        true
    }

    pub async fn record_action(&self, execution_id: Uuid, index: usize, result: ActionResult) -> bool {
        let mut active = self.active.write().await;
        active
            .get_mut(&execution_id)
            .is_some_and(|entry| entry.execution.record_action(index, result))
    }

    /// Move a running execution into a terminal state. Returns false when it
    /// already reached one, leaving the earlier outcome untouched.
    pub async fn finish(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        error: Option<String>,
        failed_action: Option<usize>,
    ) -> bool {
        let mut active = self.active.write().await;
        let Some(entry) = active.get_mut(&execution_id) else {
            return false;
        };
        let from = entry.execution.status;
        if !entry.execution.finish(status, error) {
            return false;
        }
        if failed_action.is_some() {
            entry.execution.failed_action = failed_action;
        }
        let workflow_id = entry.execution.workflow_id;
        drop(active);

        self.metrics.execution_transition(execution_id, workflow_id, Some(from), status);
        true
    }

    /// Cancel a running execution: the terminal state is recorded now and
    /// the run loop stops at its next checkpoint.
    pub async fn cancel(&self, execution_id: Uuid, reason: &str) -> EngineResult<()> {
        let mut active = self.active.write().await;

        let Some(entry) = active.get_mut(&execution_id) else {
            drop(active);
            return match self.find_in_history(execution_id).await {
                Some(execution) => Err(EngineError::InvalidState {
                    execution_id,
                    status: execution.status,
                }),
                None => Err(EngineError::execution_not_found(execution_id)),
            };
        };

        let status = entry.execution.status;
        if status != ExecutionStatus::Running || !entry.execution.finish(ExecutionStatus::Cancelled, Some(reason.to_string())) {
            return Err(EngineError::InvalidState { execution_id, status });
        }
        entry.cancel.cancel();
        let workflow_id = entry.execution.workflow_id;
        drop(active);

        self.metrics.execution_transition(
            execution_id,
            workflow_id,
            Some(ExecutionStatus::Running),
            ExecutionStatus::Cancelled,
        );
        Ok(())
    }

    /// Stop every live execution of a workflow. Running ones are cancelled
    /// immediately; pending ones only have their token signalled and are
    /// cancelled by the run loop once it starts. Returns how many were hit.
    pub async fn cancel_workflow(&self, workflow_id: Uuid, reason: &str) -> usize {
        let mut active = self.active.write().await;
        let mut cancelled = Vec::new();
        let mut signalled = 0;

        for (id, entry) in active.iter_mut() {
            if entry.execution.workflow_id != workflow_id || entry.execution.is_terminal() {
                continue;
            }
            if entry.execution.status == ExecutionStatus::Running
                && entry.execution.finish(ExecutionStatus::Cancelled, Some(reason.to_string()))
            {
                cancelled.push(*id);
            }
            entry.cancel.cancel();
            signalled += 1;
        }
        drop(active);

        for execution_id in cancelled {
            self.metrics.execution_transition(
                execution_id,
                workflow_id,
                Some(ExecutionStatus::Running),
                ExecutionStatus::Cancelled,
            );
        }
        signalled
    }

    /// Signal every active execution's token
    pub fn cancel_all(&self) {
        self.root_cancel.cancel();
    }

    /// Take a finished execution out of the active map and append it to the
    /// history, evicting the oldest entries past the limit. An execution
    /// that somehow never reached a terminal state is closed as FAILED.
    pub async fn complete(&self, execution_id: Uuid) -> Option<Execution> {
        let mut active = self.active.write().await;
        let mut entry = active.remove(&execution_id)?;
        let active_count = active.len();

        if !entry.execution.is_terminal() {
            let from = entry.execution.status;
            if from == ExecutionStatus::Pending {
                entry.execution.start();
            }
            entry
                .execution
                .finish(ExecutionStatus::Failed, Some("execution ended without a terminal status".to_string()));
            self.metrics.execution_transition(
                execution_id,
                entry.execution.workflow_id,
                Some(from),
                ExecutionStatus::Failed,
            );
        }

        let execution = entry.execution;
        self.totals.record(execution.status);

        let mut history = self.history.lock().await;
        history.push_back(execution.clone());
        while history.len() > self.history_limit {
            if let Some(evicted) = history.pop_front() {
                debug!(execution_id = %evicted.execution_id, "evicted execution from history");
            }
        }
        drop(history);
        drop(active);

        self.metrics.gauge(metric_names::ACTIVE_EXECUTIONS, active_count as f64, None);
        Some(execution)
    }

    pub async fn get(&self, execution_id: Uuid) -> Option<Execution> {
        let active = self.active.read().await;
        if let Some(entry) = active.get(&execution_id) {
            return Some(entry.execution.clone());
        }
        let history = self.history.lock().await;
        history.iter().rev().find(|e| e.execution_id == execution_id).cloned()
    }

    /// Active executions first, then history, sorted newest first
    pub async fn list(&self, filter: &ExecutionFilter, params: PaginationParams) -> PaginatedResponse<Execution> {
        let active = self.active.read().await;
        let history = self.history.lock().await;

        let mut executions: Vec<Execution> = active
            .values()
            .map(|entry| &entry.execution)
            .chain(history.iter())
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        drop(history);
        drop(active);

        executions.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| a.execution_id.cmp(&b.execution_id))
        });
        params.paginate(executions)
    }

    pub async fn counts(&self) -> StoreCounts {
        let active = self.active.read().await;
        let history = self.history.lock().await;

        StoreCounts {
            active: active.len(),
            running: active
                .values()
                .filter(|entry| entry.execution.status == ExecutionStatus::Running)
                .count(),
            history: history.len(),
            total: self.totals.total.load(Ordering::Relaxed),
            completed: self.totals.completed.load(Ordering::Relaxed),
            failed: self.totals.failed.load(Ordering::Relaxed),
            cancelled: self.totals.cancelled.load(Ordering::Relaxed),
            timed_out: self.totals.timed_out.load(Ordering::Relaxed),
        }
    }

    async fn find_in_history(&self, execution_id: Uuid) -> Option<Execution> {
        let history = self.history.lock().await;
        history.iter().rev().find(|e| e.execution_id == execution_id).cloned()
    }
}
