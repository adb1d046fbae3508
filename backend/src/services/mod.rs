pub mod metrics;
pub mod storage;

pub use metrics::{EngineMetrics, MetricType, Timer};
pub use storage::{JsonFileStorage, NoopStorage, StorageError, StorageResult, WorkflowStorage};
