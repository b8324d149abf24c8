//! Error types for host and stats collaborators.

use cr_core::TabId;

/// Failure reported by the browser host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("Tab not found: {0}")]
    TabNotFound(TabId),
    #[error("Container not found: {0}")]
    ContainerNotFound(String),
    #[error("Host rejected {operation}: {reason}")]
    Rejected { operation: &'static str, reason: String },
}

/// Failure reported by a stats recorder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatsError {
    #[error("Stats backend error: {0}")]
    Backend(String),
}

/// Failure loading router configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
