//! Configuration management for the SyncStack emulator.
//!
//! All configuration is driven by environment variables.

use std::path::PathBuf;

use tracing::debug;

use crate::error::{SyncStackError, SyncStackResult};

/// Global configuration for SyncStack.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStackConfig {
    /// Bind address for the gateway.
    pub gateway_listen: String,
    /// Log level.
    pub log_level: String,
    /// Emulator definition file (tables, data sources, resolvers).
    pub definition_path: Option<PathBuf>,
}

impl Default for SyncStackConfig {
    fn default() -> Self {
        Self {
            gateway_listen: "0.0.0.0:20002".to_owned(),
            log_level: "info".to_owned(),
            definition_path: None,
        }
    }
}

impl SyncStackConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("SYNCSTACK_LISTEN") {
            config.gateway_listen = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = std::env::var("SYNCSTACK_DEFINITION") {
            if !v.is_empty() {
                config.definition_path = Some(PathBuf::from(v));
            }
        }

        config
    }

    /// Read the definition file, if one is configured, as raw JSON.
    ///
    /// # Errors
    ///
    /// Returns `SyncStackError::Definition` if the file cannot be read or is
    /// not valid JSON.
    pub fn read_definition(&self) -> SyncStackResult<Option<serde_json::Value>> {
        let Some(path) = &self.definition_path else {
            return Ok(None);
        };
        let definition_error = |source: anyhow::Error| SyncStackError::Definition {
            path: path.display().to_string(),
            source,
        };
        let text = std::fs::read_to_string(path).map_err(|e| definition_error(e.into()))?;
        let value = serde_json::from_str(&text).map_err(|e| definition_error(e.into()))?;
        debug!(path = %path.display(), "loaded emulator definition");
        Ok(Some(value))
    }
}
