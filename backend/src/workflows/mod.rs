// Workflow Automation Engine
//
// Event-driven automation: triggers decide when a workflow runs, actions
// decide what it does, and the engine tracks every execution.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod handlers;
pub mod registry;
pub mod store;
pub mod triggers;

pub use actions::{ActionHandler, ActionRegistry, ExecutionContext};
pub use conditions::{ABSENT_FIELD_MATCHES_NEGATIONS, ConditionEvaluator};
pub use engine::{OutcomeStatus, TriggerOutcome, WorkflowEngine};
pub use executor::ActionDispatcher;
pub use registry::{WorkflowFilter, WorkflowRegistry};
pub use store::{ExecutionFilter, ExecutionStore};
pub use triggers::{EventPayload, TriggerEvent, TriggerMatcher};
