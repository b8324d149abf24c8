//! Router configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cr_core::EngineConfig;

use crate::error::ConfigError;

pub const DEFAULT_HINT_PARAM: &str = "corral-container";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterceptorConfig {
    /// Delay before closing a tab that was replaced
    pub close_grace_ms: u64,
    /// Query parameter carrying a container hint
    pub container_hint_param: String,
    /// Period of the cache sweep; 0 disables it
    pub sweep_interval_ms: u64,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            close_grace_ms: 250,
            container_hint_param: DEFAULT_HINT_PARAM.to_string(),
            sweep_interval_ms: 30_000,
        }
    }
}

impl InterceptorConfig {
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterConfig {
    pub engine: EngineConfig,
    pub interceptor: InterceptorConfig,
    /// Capacity of the stats queue
    pub stats_queue: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            interceptor: InterceptorConfig::default(),
            stats_queue: 1024,
        }
    }
}

impl RouterConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}
