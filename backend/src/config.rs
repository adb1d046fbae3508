use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_filter: String,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub capabilities: CapabilityConfig,
}

/// Runtime limits of the execution coordinator
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of finished executions kept in memory; oldest are evicted first
    pub history_limit: usize,
    /// How long shutdown waits for in-flight executions to drain
    pub shutdown_grace_secs: u64,
}

/// Where workflow definitions and execution history are persisted
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Unset keeps everything in memory
    pub storage_dir: Option<PathBuf>,
}

/// Settings for the local implementations of handler capabilities
#[derive(Debug, Clone)]
pub struct CapabilityConfig {
    pub file_root: PathBuf,
    pub embedding_dimensions: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            log_filter: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            engine: EngineConfig {
                history_limit: parse_var("AUTOFLOW_HISTORY_LIMIT", 1000)?,
                shutdown_grace_secs: parse_var("AUTOFLOW_SHUTDOWN_GRACE_SECS", 30)?,
            },
            storage: StorageConfig {
                storage_dir: env::var("AUTOFLOW_STORAGE_DIR")
                    .ok()
                    .filter(|dir| !dir.trim().is_empty())
                    .map(PathBuf::from),
            },
            capabilities: CapabilityConfig {
                file_root: env::var("AUTOFLOW_FILE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(".")),
                embedding_dimensions: parse_var("AUTOFLOW_EMBEDDING_DIMENSIONS", 64)?,
            },
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

impl EngineConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: 1000,
            shutdown_grace_secs: 30,
        }
    }
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            file_root: PathBuf::from("."),
            embedding_dimensions: 64,
        }
    }
}
