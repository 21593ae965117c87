// Aggregated settings a host hands to the core, usually read from JSON.
// Every section and field is optional and falls back to its default.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::cache::CatalogConfig;
use crate::http_client::ClientConfig;
use crate::orchestrator::OrchestratorConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub orchestrator: OrchestratorConfig,
    pub catalog: CatalogConfig,
    pub client: ClientConfig,
}

impl CoreConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}
