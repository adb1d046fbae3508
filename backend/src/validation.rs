//! Structural validation of workflow definitions
//!
//! Every create and update passes through `WorkflowValidator`. Validation
//! stops at the first violation and reports the offending field path, e.g.
//! `actions[1].config`.

use autoflow_shared::{Action, Condition, ConditionOperator, Trigger, Workflow};
use std::sync::Arc;

use crate::error::EngineError;
use crate::workflows::actions::ActionRegistry;

/// Validation result type
pub type ValidationResult<T> = Result<T, EngineError>;

/// Validated wrapper type - indicates the value has been validated
#[derive(Debug, Clone)]
pub struct Validated<T>(pub T);

impl<T> Validated<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::ops::Deref for Validated<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// String validation helpers
pub mod string {
    use super::*;

    /// Validate required non-empty string
    pub fn required(value: &str, field: &str) -> ValidationResult<()> {
        if value.trim().is_empty() {
            return Err(EngineError::validation(field, "cannot be empty"));
        }
        Ok(())
    }
}

/// Numeric validation helpers
pub mod number {
    use super::*;

    /// Finite and strictly positive
    pub fn positive(value: f64, field: &str) -> ValidationResult<()> {
        if !value.is_finite() || value <= 0.0 {
            return Err(EngineError::validation(field, "must be a finite number greater than 0"));
        }
        Ok(())
    }

    /// Finite and zero or more
    pub fn non_negative(value: f64, field: &str) -> ValidationResult<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(EngineError::validation(field, "must be a finite number of at least 0"));
        }
        Ok(())
    }

    pub fn at_least(value: u32, min: u32, field: &str) -> ValidationResult<()> {
        if value < min {
            return Err(EngineError::validation(field, format!("must be at least {}", min)));
        }
        Ok(())
    }
}

/// Checks workflow definitions against the registered action types
#[derive(Clone)]
pub struct WorkflowValidator {
    actions: Arc<ActionRegistry>,
}

impl WorkflowValidator {
    pub fn new(actions: Arc<ActionRegistry>) -> Self {
        Self { actions }
    }

    pub fn validate(&self, workflow: Workflow) -> ValidationResult<Validated<Workflow>> {
        self.check(&workflow)?;
        Ok(Validated(workflow))
    }

    pub fn check(&self, workflow: &Workflow) -> ValidationResult<()> {
        string::required(&workflow.name, "name")?;

        if workflow.triggers.is_empty() {
            return Err(EngineError::validation("triggers", "at least one trigger is required"));
        }
        if workflow.actions.is_empty() {
            return Err(EngineError::validation("actions", "at least one action is required"));
        }

        number::at_least(workflow.max_concurrent_runs, 1, "max_concurrent_runs")?;
        number::positive(workflow.timeout, "timeout")?;

        for (i, trigger) in workflow.triggers.iter().enumerate() {
            Self::check_trigger(trigger, &format!("triggers[{}]", i))?;
        }

        for (i, action) in workflow.actions.iter().enumerate() {
            self.check_action(action, &format!("actions[{}]", i))?;
        }

        Ok(())
    }

    fn check_trigger(trigger: &Trigger, path: &str) -> ValidationResult<()> {
        string::required(&trigger.trigger_type, &format!("{}.trigger_type", path))?;
        number::non_negative(trigger.debounce_time, &format!("{}.debounce_time", path))?;

        for (i, condition) in trigger.conditions.iter().enumerate() {
            Self::check_condition(condition, &format!("{}.conditions[{}]", path, i))?;
        }
        Ok(())
    }

    fn check_condition(condition: &Condition, path: &str) -> ValidationResult<()> {
        string::required(&condition.field, &format!("{}.field", path))?;

        if condition.value.is_null() {
            return Err(EngineError::validation(format!("{}.value", path), "is required"));
        }

        if condition.operator == ConditionOperator::Regex {
            let Some(pattern) = condition.value.as_str() else {
                return Err(EngineError::validation(
                    format!("{}.value", path),
                    "regex pattern must be a string",
                ));
            };
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(EngineError::validation(
                    format!("{}.value", path),
                    format!("invalid regex: {}", e),
                ));
            }
        }
        Ok(())
    }

    fn check_action(&self, action: &Action, path: &str) -> ValidationResult<()> {
        let type_field = format!("{}.action_type", path);
        string::required(&action.action_type, &type_field)?;

        let Some(handler) = self.actions.get(&action.action_type) else {
            return Err(EngineError::validation(
                type_field,
                format!("unknown action type '{}'", action.action_type),
            ));
        };

        handler
            .validate_config(&action.config)
            .map_err(|message| EngineError::validation(format!("{}.config", path), message))?;

        number::non_negative(action.retry_delay, &format!("{}.retry_delay", path))?;
        number::positive(action.timeout, &format!("{}.timeout", path))?;

        Ok(())
    }
}
