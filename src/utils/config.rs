// src/utils/config.rs
//! Layered engine configuration
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. `harvest.toml` in the working directory (or an explicit file)
//! 3. Environment variables, e.g. `HARVEST__CAPTURE__FETCH_POST_DATA=false`

use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub capture: CaptureConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

/// Controls which secondary fetches run after a request finishes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Fetch the response body on `LoadingFinished`
    pub fetch_response_bodies: bool,

    /// Fetch the request body on `LoadingFinished` for `post_data_methods`
    pub fetch_post_data: bool,

    /// Methods whose request bodies are fetched
    pub post_data_methods: Vec<String>,

    /// Per-fetch timeout (milliseconds); a timeout counts as unavailable
    pub enrichment_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fetch_response_bodies: true,
            fetch_post_data: true,
            post_data_methods: vec!["POST".to_string(), "PUT".to_string(), "PATCH".to_string()],
            enrichment_timeout_ms: 10_000,
        }
    }
}

impl CaptureConfig {
    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_millis(self.enrichment_timeout_ms)
    }

    /// Whether a request with `method` should have its body fetched
    pub fn wants_post_data(&self, method: &str) -> bool {
        self.fetch_post_data
            && self
                .post_data_methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method))
    }
}

/// Document wrapper defaults used by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub creator_name: String,
    pub creator_version: String,
    pub browser_name: String,
    pub browser_version: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            creator_name: "Harvest".to_string(),
            creator_version: env!("CARGO_PKG_VERSION").to_string(),
            browser_name: "Chrome".to_string(),
            browser_version: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration, reading `path` instead of `harvest.toml` when given.
    /// An explicit path must exist.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&EngineConfig::default())
            .map_err(|e| EngineError::ConfigError(format!("Invalid defaults: {}", e)))?;

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("harvest").required(false),
        };

        Config::builder()
            .add_source(defaults)
            .add_source(file)
            .add_source(
                Environment::with_prefix("HARVEST")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("capture.post_data_methods"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| EngineError::ConfigError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.capture.fetch_response_bodies);
        assert_eq!(config.capture.enrichment_timeout(), Duration::from_secs(10));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_wants_post_data() {
        let capture = CaptureConfig::default();
        assert!(capture.wants_post_data("POST"));
        assert!(capture.wants_post_data("patch"));
        assert!(!capture.wants_post_data("GET"));

        let disabled = CaptureConfig {
            fetch_post_data: false,
            ..Default::default()
        };
        assert!(!disabled.wants_post_data("POST"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[capture]\nfetch_post_data = false\nenrichment_timeout_ms = 250\n\n[logging]\njson = true"
        )
        .unwrap();

        let config = EngineConfig::load_from(Some(file.path())).unwrap();
        assert!(!config.capture.fetch_post_data);
        assert_eq!(config.capture.enrichment_timeout_ms, 250);
        assert!(config.capture.fetch_response_bodies);
        assert!(config.logging.json);
        assert_eq!(config.export.creator_name, "Harvest");
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = EngineConfig::load_from(Some(Path::new("/nonexistent/harvest.toml")));
        assert!(matches!(result, Err(EngineError::ConfigError(_))));
    }
}
