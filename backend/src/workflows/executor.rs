// Workflow Executor - Runs a single action with templating, retries and timeouts

use autoflow_shared::{Action, ActionConfig, ActionResult};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::actions::{ActionRegistry, ExecutionContext};
use super::conditions::resolve_field;
use crate::services::{EngineMetrics, Timer};

pub struct ActionDispatcher {
    registry: Arc<ActionRegistry>,
    metrics: Arc<EngineMetrics>,
}

impl ActionDispatcher {
    pub fn new(registry: Arc<ActionRegistry>, metrics: Arc<EngineMetrics>) -> Self {
        Self { registry, metrics }
    }

    /// Execute one action, retrying failed attempts up to `retry_count` times.
    ///
    /// Each attempt is bounded by the action timeout; a timed-out attempt
    /// counts as a failure. Cancellation is only observed between attempts,
    /// so an attempt already in flight always runs to completion.
    pub async fn run(
        &self,
        index: usize,
        action: &Action,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> ActionResult {
        let timer = Timer::start();

        let Some(handler) = self.registry.get(&action.action_type) else {
            error!(
                execution_id = %context.execution_id,
                action_index = index,
                action_type = %action.action_type,
                "no handler registered for action type"
            );
            self.metrics.action_finished(&action.action_type, false, timer.elapsed_ms());
            return ActionResult::failure(&format!(
                "no handler registered for action type '{}'",
                action.action_type
            ))
            .with_attempts(0)
            .with_duration(timer.elapsed_ms());
        };

        let config = render_config(&action.config, context);
        let max_attempts = action.max_attempts();
        let mut attempts = 0;
        let mut last_error = String::new();

        info!(
            execution_id = %context.execution_id,
            action_index = index,
            action = action.display_name(),
            "executing action"
        );

        while attempts < max_attempts {
            attempts += 1;

            let outcome = tokio::time::timeout(action.timeout_duration(), handler.execute(&config, context)).await;
            last_error = match outcome {
                Ok(result) if result.success => {
                    let duration = timer.elapsed_ms();
                    self.metrics.action_finished(&action.action_type, true, duration);
                    return result.with_attempts(attempts).with_duration(duration);
                }
                Ok(result) => result.error_message().to_string(),
                Err(_) => format!("timed out after {}s", action.timeout),
            };

            if attempts == max_attempts {
                break;
            }
            if cancel.is_cancelled() {
                info!(execution_id = %context.execution_id, action_index = index, "execution cancelled, skipping retries");
                break;
            }

            self.metrics.action_retry(
                context.execution_id,
                index,
                &action.action_type,
                attempts,
                max_attempts,
                &last_error,
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(execution_id = %context.execution_id, action_index = index, "execution cancelled during retry delay");
                    break;
                }
                _ = tokio::time::sleep(action.retry_delay_duration()) => {}
            }
        }

        let duration = timer.elapsed_ms();
        self.metrics.action_finished(&action.action_type, false, duration);
        warn!(
            execution_id = %context.execution_id,
            action_index = index,
            action = action.display_name(),
            attempts,
            error = %last_error,
            "action failed"
        );

        let message = if attempts > 1 {
            format!("{} (after {} attempts)", last_error, attempts)
        } else {
            last_error
        };
        ActionResult::failure(&message)
            .with_attempts(attempts)
            .with_duration(duration)
    }
}

/// Replace `{{path}}` placeholders in string config values. Paths resolve
/// against the trigger payload first, then against the execution itself
/// (`execution_id`, `workflow_id`, `workflow_name`, `outputs.<index>...`).
fn render_config(config: &ActionConfig, context: &ExecutionContext) -> ActionConfig {
    let scope = serde_json::json!({
        "execution_id": context.execution_id,
        "workflow_id": context.workflow_id,
        "workflow_name": context.workflow_name,
        "outputs": context
            .outputs
            .iter()
            .map(|(index, data)| (index.to_string(), data.clone()))
            .collect::<serde_json::Map<String, Value>>(),
    });

    config
        .iter()
        .map(|(k, v)| (k.clone(), render_value(v, &context.trigger_payload, &scope)))
        .collect()
}

fn render_value(value: &Value, payload: &Value, scope: &Value) -> Value {
    match value {
        Value::String(s) => render_string(s, payload, scope),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, payload, scope)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, payload, scope)).collect()),
        _ => value.clone(),
    }
}

fn lookup<'a>(path: &str, payload: &'a Value, scope: &'a Value) -> Option<&'a Value> {
    resolve_field(payload, path).or_else(|| resolve_field(scope, path))
}

fn render_string(template: &str, payload: &Value, scope: &Value) -> Value {
    // A value that is exactly one placeholder keeps the referenced JSON type
    if let Some(path) = template
        .trim()
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .filter(|path| !path.contains("{{") && !path.contains("}}"))
    {
        if let Some(found) = lookup(path.trim(), payload, scope) {
            return found.clone();
        }
    }

    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + len + 2;
        let path = rest[start + 2..start + 2 + len].trim();

        rendered.push_str(&rest[..start]);
        match lookup(path, payload, scope) {
            Some(Value::String(s)) => rendered.push_str(s),
            Some(other) => rendered.push_str(&other.to_string()),
            None => rendered.push_str(&rest[start..end]),
        }
        rest = &rest[end..];
    }
    rendered.push_str(rest);

    Value::String(rendered)
}
