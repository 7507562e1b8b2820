// src/observability/mod.rs
//! Tracing and metrics setup
//!
//! Metrics emitted by the engine:
//!
//! - `harvest_events_total{kind}`
//! - `harvest_events_dropped_total{kind,reason}`
//! - `harvest_enrichment_total{field,outcome}`
//! - `harvest_accumulators` (gauge)

use crate::utils::config::LoggingConfig;
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides `config.level`.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| EngineError::ObservabilityFailed(format!("Invalid log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| EngineError::ObservabilityFailed(format!("Tracing init failed: {}", e)))
}

/// Install the Prometheus metrics recorder and return its render handle
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| EngineError::ObservabilityFailed(format!("Metrics init failed: {}", e)))
}

