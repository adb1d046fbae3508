use autoflow_shared::ExecutionStatus;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observability collaborator for the engine.
///
/// Every state transition, validation failure and retry is emitted as a
/// structured `tracing` event and folded into in-process counters that
/// callers can snapshot.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    values: Mutex<HashMap<String, f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
        }
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a metric value
    pub fn record(&self, name: &str, metric_type: MetricType, value: f64, labels: Option<JsonValue>) {
        let labels = labels.unwrap_or(JsonValue::Object(serde_json::Map::new()));
        debug!(
            target: "autoflow::metrics",
            metric = name,
            kind = metric_type.as_str(),
            value,
            labels = %labels,
            "metric recorded"
        );

        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        match metric_type {
            MetricType::Counter => *values.entry(name.to_string()).or_insert(0.0) += value,
            MetricType::Gauge => {
                values.insert(name.to_string(), value);
            }
            MetricType::Histogram => {
                *values.entry(format!("{}_count", name)).or_insert(0.0) += 1.0;
                *values.entry(format!("{}_sum", name)).or_insert(0.0) += value;
            }
        }
    }

    /// Increment a counter metric
    pub fn increment(&self, name: &str, labels: Option<JsonValue>) {
        self.record(name, MetricType::Counter, 1.0, labels)
    }

    pub fn gauge(&self, name: &str, value: f64, labels: Option<JsonValue>) {
        self.record(name, MetricType::Gauge, value, labels)
    }

    pub fn histogram(&self, name: &str, value: f64, labels: Option<JsonValue>) {
        self.record(name, MetricType::Histogram, value, labels)
    }

    /// Current value of a metric, zero if it was never recorded
    pub fn value(&self, name: &str) -> f64 {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(name).copied().unwrap_or(0.0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    // ===== Engine events =====

    pub fn execution_transition(
        &self,
        execution_id: Uuid,
        workflow_id: Uuid,
        from: Option<ExecutionStatus>,
        to: ExecutionStatus,
    ) {
        info!(
            execution_id = %execution_id,
            workflow_id = %workflow_id,
            from = from.map(|s| s.as_str()).unwrap_or("none"),
            to = to.as_str(),
            "execution state changed"
        );
        self.increment(
            &metric_names::execution_status(to),
            Some(serde_json::json!({ "workflow_id": workflow_id })),
        );
    }

    pub fn execution_rejected(&self, workflow_id: Uuid, code: &str, reason: &str) {
        warn!(workflow_id = %workflow_id, code, reason, "execution rejected");
        self.increment(
            metric_names::EXECUTIONS_REJECTED,
            Some(serde_json::json!({ "workflow_id": workflow_id, "code": code })),
        );
    }

    pub fn validation_failed(&self, workflow_id: Uuid, field: &str, message: &str) {
        warn!(workflow_id = %workflow_id, field, message, "workflow validation failed");
        self.increment(
            metric_names::VALIDATION_FAILURES,
            Some(serde_json::json!({ "field": field })),
        );
    }

    pub fn action_retry(
        &self,
        execution_id: Uuid,
        action_index: usize,
        action_type: &str,
        attempt: u32,
        max_attempts: u32,
        error: &str,
    ) {
        warn!(
            execution_id = %execution_id,
            action_index,
            action_type,
            attempt,
            max_attempts,
            error,
            "action attempt failed, retrying"
        );
        self.increment(
            metric_names::ACTION_RETRIES,
            Some(serde_json::json!({ "action_type": action_type })),
        );
    }

    pub fn action_finished(&self, action_type: &str, success: bool, duration_ms: i64) {
        let name = if success {
            metric_names::ACTIONS_SUCCEEDED
        } else {
            metric_names::ACTIONS_FAILED
        };
        let labels = serde_json::json!({ "action_type": action_type });
        self.increment(name, Some(labels.clone()));
        self.histogram(metric_names::ACTION_DURATION_MS, duration_ms as f64, Some(labels));
    }

    pub fn trigger_suppressed(&self, workflow_id: Uuid, trigger_type: &str) {
        debug!(workflow_id = %workflow_id, trigger_type, "trigger suppressed by debounce window");
        self.increment(
            metric_names::TRIGGERS_DEBOUNCED,
            Some(serde_json::json!({ "trigger_type": trigger_type })),
        );
    }
}

/// Simple wall-clock timer for action and execution durations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.start.elapsed().as_millis() as i64
    }
}

pub mod metric_names {
    use autoflow_shared::ExecutionStatus;

    pub const EXECUTIONS_REJECTED: &str = "executions_rejected";
    pub const VALIDATION_FAILURES: &str = "workflow_validation_failures";
    pub const ACTION_RETRIES: &str = "action_retries";
    pub const ACTIONS_SUCCEEDED: &str = "actions_succeeded";
    pub const ACTIONS_FAILED: &str = "actions_failed";
    pub const ACTION_DURATION_MS: &str = "action_duration_ms";
    pub const TRIGGERS_DEBOUNCED: &str = "triggers_debounced";
    pub const ACTIVE_EXECUTIONS: &str = "active_executions";

    pub fn execution_status(status: ExecutionStatus) -> String {
        format!("executions_{}", status.as_str())
    }
}
