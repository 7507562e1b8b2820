// src/session/mod.rs
//! Recording session lifecycle
//!
//! - **Controller**: start/stop/clear, ingest gate, export
//! - **Stats**: request counts and totals for the live view

pub mod controller;
pub mod stats;

pub use controller::{CaptureSession, SessionState};
pub use stats::CaptureStats;
