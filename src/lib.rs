// src/lib.rs
//! Harvest Capture Engine Library
//!
//! Turns an unordered stream of network instrumentation events into
//! complete request/response records and assembles them into HTTP
//! archives.
//!
//! # Architecture
//!
//! - **capture**: events, accumulators, dispatch, enrichment, assembly
//! - **session**: recording lifecycle and capture statistics
//! - **observability**: tracing and metrics setup
//! - **utils**: errors and configuration

// Public module exports
pub mod capture;
pub mod observability;
pub mod session;
pub mod utils;

// Re-export commonly used types
pub use capture::{
    AccumulatorStore, DispatchOutcome, EnrichmentSource, EventDispatcher, EventKind, HarDocument,
    HarEntry, NetworkEvent,
};
pub use session::{CaptureSession, CaptureStats, SessionState};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
