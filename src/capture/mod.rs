// src/capture/mod.rs
//! Network capture and archive assembly
//!
//! - **Events**: typed instrumentation events and DevTools decoding
//! - **Accumulator**: per-request state machine
//! - **Store**: session-scoped, insertion-ordered accumulator map
//! - **Dispatcher**: routes events to accumulators
//! - **Enrichment**: asynchronous response/POST body fetches
//! - **Assembler**: accumulators → HAR entries
//! - **Exporter**: HAR / JSON serialization
//! - **Trace**: recorded DevTools traces for offline replay
//!
//! # Architecture
//!
//! ```text
//! Host events ──► Dispatcher ──► AccumulatorStore ◄── Enrichment tasks
//!                    │                  │                  ▲
//!                    └── LoadingFinished┼──────────────────┘
//!                                       ▼
//!                                  Assembler (read-only) ──► HarEntry[]
//! ```

pub mod accumulator;
pub mod assembler;
pub mod dispatcher;
pub mod enrichment;
pub mod events;
pub mod exporter;
pub mod har;
pub mod store;
pub mod trace;

// Re-export commonly used types
pub use accumulator::{Accumulator, CompletionState, ResponseBody};
pub use assembler::{assemble, assemble_entry};
pub use dispatcher::{DispatchOutcome, EventDispatcher};
pub use enrichment::{EnrichmentSource, EnrichmentTrigger, FetchedBody, StaticBodySource};
pub use events::{EventKind, Header, NetworkEvent, RequestStarted, ResponseDescriptor};
pub use exporter::{ExportFormat, Exporter};
pub use har::{HarCreator, HarDocument, HarEntry};
pub use store::AccumulatorStore;
pub use trace::Trace;
