pub mod config;
pub mod error;
pub mod integrations;
pub mod pagination;
pub mod services;
pub mod validation;
pub mod workflows;

pub use config::{CapabilityConfig, Config, EngineConfig, StorageConfig};
pub use error::{EngineError, EngineResult, ErrorReport};
pub use integrations::Capabilities;
pub use pagination::{PaginatedResponse, PaginationMeta, PaginationParams};
pub use validation::{Validated, WorkflowValidator};
pub use workflows::{
    ActionHandler, ActionRegistry, ExecutionContext, ExecutionFilter, OutcomeStatus, TriggerEvent,
    TriggerOutcome, WorkflowEngine, WorkflowFilter,
};

#[cfg(test)]
mod tests;
