// Workflow Triggers - Incoming events and trigger matching with debounce

use autoflow_shared::{Trigger, TriggerLogic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use uuid::Uuid;

use super::conditions::ConditionEvaluator;
use crate::services::EngineMetrics;

/// Well-known trigger type tags
pub mod trigger_types {
    pub const FILE_CREATED: &str = "file_created";
    pub const FILE_MODIFIED: &str = "file_modified";
    pub const FILE_DELETED: &str = "file_deleted";
    pub const SCHEDULED: &str = "scheduled";
    pub const WEBHOOK_RECEIVED: &str = "webhook_received";
}

/// Payload for trigger events
pub type EventPayload = serde_json::Value;

/// An event that can initiate workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    #[serde(default = "Uuid::new_v4")]
    pub event_id: Uuid,
    pub trigger_type: String,
    #[serde(default)]
    pub payload: EventPayload,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(trigger_type: &str, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            trigger_type: trigger_type.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Create a file created event
    pub fn file_created(path: &str, size: u64) -> Self {
        let mut payload = file_payload(trigger_types::FILE_CREATED, path);
        payload["size"] = serde_json::json!(size);
        Self::new(trigger_types::FILE_CREATED, payload)
    }

    /// Create a file modified event
    pub fn file_modified(path: &str, modified_by: &str) -> Self {
        let mut payload = file_payload(trigger_types::FILE_MODIFIED, path);
        payload["modified_by"] = serde_json::json!(modified_by);
        Self::new(trigger_types::FILE_MODIFIED, payload)
    }

    /// Create a file deleted event
    pub fn file_deleted(path: &str) -> Self {
        Self::new(trigger_types::FILE_DELETED, file_payload(trigger_types::FILE_DELETED, path))
    }

    /// Create a scheduled tick event
    pub fn scheduled(schedule: &str) -> Self {
        Self::new(
            trigger_types::SCHEDULED,
            serde_json::json!({
                "type": trigger_types::SCHEDULED,
                "schedule": schedule,
                "fired_at": Utc::now()
            }),
        )
    }
}

fn file_payload(event_type: &str, path: &str) -> EventPayload {
    let file = Path::new(path);
    serde_json::json!({
        "type": event_type,
        "path": path,
        "name": file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        "extension": file.extension().map(|e| e.to_string_lossy().into_owned()),
    })
}

/// Decides whether a trigger fires for an event, applying debounce
/// suppression per (workflow, trigger type).
pub struct TriggerMatcher {
    last_fired: Mutex<HashMap<(Uuid, String), Instant>>,
    metrics: Arc<EngineMetrics>,
}

impl TriggerMatcher {
    pub fn new(metrics: Arc<EngineMetrics>) -> Self {
        Self {
            last_fired: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Check a trigger against an event. Inside an open debounce window the
    /// call is suppressed without evaluating conditions; otherwise the window
    /// restarts now, whether or not the conditions then match.
    pub fn matches(&self, workflow_id: Uuid, trigger: &Trigger, event: &EventPayload) -> bool {
        if !trigger.enabled {
            return false;
        }

        if let Some(window) = trigger.debounce_window() {
            let now = Instant::now();
            let key = (workflow_id, trigger.trigger_type.clone());
            let mut last_fired = self.last_fired.lock().unwrap_or_else(|e| e.into_inner());

            if let Some(previous) = last_fired.get(&key) {
                if now.duration_since(*previous) < window {
                    drop(last_fired);
                    self.metrics.trigger_suppressed(workflow_id, &trigger.trigger_type);
                    return false;
                }
            }
            last_fired.insert(key, now);
        }

        Self::conditions_match(trigger, event)
    }

    /// Combine a trigger's conditions per its logic. No conditions means the
    /// trigger fires on every event of its type.
    pub fn conditions_match(trigger: &Trigger, event: &EventPayload) -> bool {
        if trigger.conditions.is_empty() {
            return true;
        }

        match trigger.logic {
            TriggerLogic::And => trigger
                .conditions
                .iter()
                .all(|c| ConditionEvaluator::evaluate(c, event)),
            TriggerLogic::Or => trigger
                .conditions
                .iter()
                .any(|c| ConditionEvaluator::evaluate(c, event)),
        }
    }

    /// Drop debounce state for a deleted workflow
    pub fn forget_workflow(&self, workflow_id: Uuid) {
        let mut last_fired = self.last_fired.lock().unwrap_or_else(|e| e.into_inner());
        last_fired.retain(|(id, _), _| *id != workflow_id);
    }
}
