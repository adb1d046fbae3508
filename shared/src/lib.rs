use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type ExecutionId = Uuid;

/// Key/value configuration attached to an action.
pub type ActionConfig = Map<String, Value>;

// ===== Conditions =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    In,
    NotIn,
    Regex,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Regex => "regex",
        }
    }

    /// Operators that are true when the compared field is missing from the event.
    pub fn is_negation(&self) -> bool {
        matches!(self, Self::NotEquals | Self::NotIn)
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single comparison between an event field and a literal value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    /// Field path to evaluate (dot notation for nested fields)
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
            case_sensitive: false,
        }
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    pub fn not_equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::NotEquals, value)
    }

    pub fn contains(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::Contains, Value::String(value.to_string()))
    }

    pub fn starts_with(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::StartsWith, Value::String(value.to_string()))
    }

    pub fn ends_with(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::EndsWith, Value::String(value.to_string()))
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, serde_json::json!(value))
    }

    pub fn less_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::LessThan, serde_json::json!(value))
    }

    pub fn in_list(field: &str, values: Vec<Value>) -> Self {
        Self::new(field, ConditionOperator::In, Value::Array(values))
    }

    pub fn not_in(field: &str, values: Vec<Value>) -> Self {
        Self::new(field, ConditionOperator::NotIn, Value::Array(values))
    }

    pub fn regex(field: &str, pattern: &str) -> Self {
        Self::new(field, ConditionOperator::Regex, Value::String(pattern.to_string()))
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }
}

// ===== Triggers =====

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerLogic {
    #[default]
    #[serde(alias = "AND")]
    And,
    #[serde(alias = "OR")]
    Or,
}

/// Named condition set that makes a workflow a candidate for execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    pub trigger_type: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub logic: TriggerLogic,
    /// Suppression window in seconds; 0 disables debouncing
    #[serde(default)]
    pub debounce_time: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Trigger {
    pub fn new(trigger_type: &str) -> Self {
        Self {
            trigger_type: trigger_type.to_string(),
            conditions: Vec::new(),
            logic: TriggerLogic::And,
            debounce_time: 0.0,
            enabled: true,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn any(mut self) -> Self {
        self.logic = TriggerLogic::Or;
        self
    }

    pub fn with_debounce(mut self, seconds: f64) -> Self {
        self.debounce_time = seconds;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn debounce_window(&self) -> Option<Duration> {
        if self.debounce_time > 0.0 && self.debounce_time.is_finite() {
            Some(secs_to_duration(self.debounce_time))
        } else {
            None
        }
    }
}

// ===== Actions =====

/// Non-finite or oversized values saturate instead of panicking
fn secs_to_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX)
}

pub const DEFAULT_RETRY_DELAY_SECS: f64 = 1.0;
pub const DEFAULT_ACTION_TIMEOUT_SECS: f64 = 30.0;
pub const DEFAULT_WORKFLOW_TIMEOUT_SECS: f64 = 3600.0;

/// One step of a workflow run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub config: ActionConfig,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub retry_count: u32,
    /// Seconds to wait between attempts
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    /// Seconds allowed for a single attempt
    #[serde(default = "default_action_timeout")]
    pub timeout: f64,
}

impl Action {
    pub fn new(action_type: &str, config: Value) -> Self {
        let config = match config {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Self {
            action_type: action_type.to_string(),
            name: None,
            config,
            enabled: true,
            retry_count: 0,
            retry_delay: DEFAULT_RETRY_DELAY_SECS,
            timeout: DEFAULT_ACTION_TIMEOUT_SECS,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_retry(mut self, count: u32, delay_seconds: f64) -> Self {
        self.retry_count = count;
        self.retry_delay = delay_seconds;
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    pub fn retry_delay_duration(&self) -> Duration {
        secs_to_duration(self.retry_delay)
    }

    pub fn timeout_duration(&self) -> Duration {
        secs_to_duration(self.timeout)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.action_type)
    }
}

/// Outcome of running an action (or a single attempt of it)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub duration_ms: i64,
}

impl ActionResult {
    pub fn success(data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
            attempts: 0,
            duration_ms: 0,
        }
    }

    pub fn failure(error: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            attempts: 0,
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }
}

// ===== Workflows =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub triggers: Vec<Trigger>,
    pub actions: Vec<Action>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: u32,
    /// Overall execution budget in seconds
    #[serde(default = "default_workflow_timeout")]
    pub timeout: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            triggers: Vec::new(),
            actions: Vec::new(),
            enabled: true,
            max_concurrent_runs: 1,
            timeout: DEFAULT_WORKFLOW_TIMEOUT_SECS,
            tags: Vec::new(),
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_max_concurrent_runs(mut self, runs: u32) -> Self {
        self.max_concurrent_runs = runs;
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn created_by(mut self, owner: &str) -> Self {
        self.created_by = Some(owner.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        secs_to_duration(self.timeout)
    }

    pub fn has_trigger_type(&self, trigger_type: &str) -> bool {
        self.triggers
            .iter()
            .any(|t| t.enabled && t.trigger_type == trigger_type)
    }
}

// ===== Executions =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    /// PENDING -> RUNNING -> {COMPLETED | FAILED | CANCELLED | TIMEOUT}
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        match self {
            Self::Pending => next == Self::Running,
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete run of a workflow's actions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub manual: bool,
    pub trigger_payload: Value,
    /// Results keyed by action index in the workflow definition
    #[serde(default)]
    pub action_results: BTreeMap<usize, ActionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_action: Option<usize>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl Execution {
    pub fn pending(workflow: &Workflow, trigger_payload: Value, manual: bool) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            status: ExecutionStatus::Pending,
            manual,
            trigger_payload,
            action_results: BTreeMap::new(),
            error: None,
            failed_action: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves a pending execution to running. Returns false if the move is illegal.
    pub fn start(&mut self) -> bool {
        if !self.status.can_transition_to(ExecutionStatus::Running) {
            return false;
        }
        self.status = ExecutionStatus::Running;
        true
    }

    /// Moves the execution into a terminal state, stamping completion time and duration.
    /// Terminal executions are never modified again.
    pub fn finish(&mut self, status: ExecutionStatus, error: Option<String>) -> bool {
        if !status.is_terminal() || !self.status.can_transition_to(status) {
            return false;
        }
        let now = Utc::now();
        self.status = status;
        self.error = error;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
        true
    }

    pub fn record_action(&mut self, index: usize, result: ActionResult) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.action_results.insert(index, result);
        true
    }
}

/// Aggregate counters reported by the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineStats {
    pub total_workflows: usize,
    pub enabled_workflows: usize,
    pub active_executions: usize,
    pub running_executions: usize,
    pub history_size: usize,
    pub total_executions: u64,
    pub completed_executions: u64,
    pub failed_executions: u64,
    pub cancelled_executions: u64,
    pub timed_out_executions: u64,
    pub success_rate: f64,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_runs() -> u32 {
    1
}

fn default_retry_delay() -> f64 {
    DEFAULT_RETRY_DELAY_SECS
}

fn default_action_timeout() -> f64 {
    DEFAULT_ACTION_TIMEOUT_SECS
}

fn default_workflow_timeout() -> f64 {
    DEFAULT_WORKFLOW_TIMEOUT_SECS
}
