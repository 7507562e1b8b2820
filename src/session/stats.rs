// src/session/stats.rs
//! Running totals for a capture session

use crate::capture::accumulator::CompletionState;
use crate::capture::store::AccumulatorStore;
use serde::Serialize;

/// Capture statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStats {
    pub request_count: usize,
    pub pending: usize,
    pub finished: usize,
    pub failed: usize,
    pub from_cache: usize,

    /// Sum of encoded bytes over finished requests
    pub total_encoded_bytes: u64,

    /// Requests with both a start and a finish timestamp
    pub measured: usize,

    /// Sum of measured request durations (milliseconds)
    pub total_time_ms: f64,
}

impl CaptureStats {
    pub fn from_store(store: &AccumulatorStore) -> Self {
        let mut stats = CaptureStats::default();

        store.for_each(|acc| {
            stats.request_count += 1;
            match acc.state {
                CompletionState::Pending | CompletionState::ResponseReceived => stats.pending += 1,
                CompletionState::Finished => stats.finished += 1,
                CompletionState::Failed => stats.failed += 1,
            }
            if acc.served_from_cache {
                stats.from_cache += 1;
            }
            stats.total_encoded_bytes += acc.encoded_data_length.unwrap_or(0);
            if let (Some(start), Some(end)) = (acc.start_timestamp, acc.finished_timestamp) {
                if end >= start {
                    stats.measured += 1;
                    stats.total_time_ms += (end - start) * 1000.0;
                }
            }
        });

        stats
    }

    /// Mean duration of requests with a measured time
    pub fn avg_time_ms(&self) -> f64 {
        if self.measured == 0 {
            0.0
        } else {
            self.total_time_ms / self.measured as f64
        }
    }
}
