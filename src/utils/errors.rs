// src/utils/errors.rs
//! Engine error types
//!
//! Only boundary operations (configuration, event decoding, enrichment
//! fetches, session control, export) surface errors. Event dispatch and
//! archive assembly degrade to partial data instead.

use thiserror::Error;

/// Errors produced by the capture engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// An instrumentation event could not be decoded
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// A secondary body fetch had nothing to return
    #[error("body unavailable: {0}")]
    BodyUnavailable(String),

    /// A session control action was not valid in the current state
    #[error("session error: {0}")]
    SessionError(String),

    /// Serializing captured records failed
    #[error("export failed: {0}")]
    ExportFailed(String),

    /// Tracing or metrics could not be installed
    #[error("observability setup failed: {0}")]
    ObservabilityFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;
