// src/capture/dispatcher.rs
//! Event-to-accumulator dispatch
//!
//! Events are applied one at a time in delivery order. Events for unknown
//! identifiers are dropped; terminal events for already-terminal requests
//! are ignored. Neither is an error.

use crate::capture::accumulator::AlreadyTerminal;
use crate::capture::enrichment::{EnrichmentTarget, EnrichmentTrigger};
use crate::capture::events::{EventKind, NetworkEvent};
use crate::capture::store::{AccumulatorStore, PutOutcome};
use std::sync::Arc;
use tracing::{debug, trace};

/// What a dispatched event did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The event was applied
    Applied,
    /// A `RequestStarted` replaced an accumulator with the same identifier
    Replaced,
    /// No live accumulator for the identifier; the event was discarded
    UnknownRequest,
    /// The accumulator is already terminal; the event was ignored
    AlreadyTerminal,
    /// The session is not recording
    NotRecording,
}

impl DispatchOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, DispatchOutcome::Applied | DispatchOutcome::Replaced)
    }

    fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Applied => "applied",
            DispatchOutcome::Replaced => "replaced",
            DispatchOutcome::UnknownRequest => "unknown_request",
            DispatchOutcome::AlreadyTerminal => "already_terminal",
            DispatchOutcome::NotRecording => "not_recording",
        }
    }
}

impl From<Result<(), AlreadyTerminal>> for DispatchOutcome {
    fn from(result: Result<(), AlreadyTerminal>) -> Self {
        match result {
            Ok(()) => DispatchOutcome::Applied,
            Err(_) => DispatchOutcome::AlreadyTerminal,
        }
    }
}

/// Routes events into an [`AccumulatorStore`]
#[derive(Clone, Default)]
pub struct EventDispatcher {
    enrichment: Option<EnrichmentTrigger>,
}

impl EventDispatcher {
    /// Dispatcher without enrichment; bodies stay empty
    pub fn new() -> Self {
        Self { enrichment: None }
    }

    pub fn with_enrichment(enrichment: EnrichmentTrigger) -> Self {
        Self {
            enrichment: Some(enrichment),
        }
    }

    pub fn enrichment(&self) -> Option<&EnrichmentTrigger> {
        self.enrichment.as_ref()
    }

    /// Applies one event to `store`
    pub fn dispatch(&self, store: &Arc<AccumulatorStore>, event: NetworkEvent) -> DispatchOutcome {
        let NetworkEvent {
            request_id,
            timestamp,
            kind,
        } = event;
        let kind_name = kind.name();
        metrics::counter!("harvest_events_total", "kind" => kind_name).increment(1);

        let outcome = match kind {
            EventKind::RequestStarted(started) => {
                let put = store.put(&request_id, started, timestamp);
                metrics::gauge!("harvest_accumulators").set(store.len() as f64);
                match put {
                    PutOutcome::Created => DispatchOutcome::Applied,
                    PutOutcome::Replaced => DispatchOutcome::Replaced,
                }
            }
            EventKind::RequestExtraInfo(info) => store
                .update(&request_id, |acc| acc.merge_extra_request_info(info))
                .map(|()| DispatchOutcome::Applied)
                .unwrap_or(DispatchOutcome::UnknownRequest),
            EventKind::ResponseExtraInfo(info) => store
                .update(&request_id, |acc| acc.merge_extra_response_info(info))
                .map(|()| DispatchOutcome::Applied)
                .unwrap_or(DispatchOutcome::UnknownRequest),
            EventKind::ResponseReceived(response) => store
                .update(&request_id, |acc| acc.record_response(response, timestamp))
                .map(DispatchOutcome::from)
                .unwrap_or(DispatchOutcome::UnknownRequest),
            EventKind::DataChunkReceived(chunk) => store
                .update(&request_id, |acc| acc.record_chunk(chunk, timestamp))
                .map(DispatchOutcome::from)
                .unwrap_or(DispatchOutcome::UnknownRequest),
            EventKind::ServedFromCache => store
                .update(&request_id, |acc| acc.mark_served_from_cache())
                .map(DispatchOutcome::from)
                .unwrap_or(DispatchOutcome::UnknownRequest),
            EventKind::LoadingFinished {
                encoded_data_length,
            } => {
                let finished = store.update(&request_id, |acc| {
                    acc.finish(encoded_data_length, timestamp).map(|()| EnrichmentTarget {
                        request_id: request_id.clone(),
                        serial: acc.serial(),
                        method: acc.request.method.clone(),
                    })
                });
                match finished {
                    Some(Ok(target)) => {
                        if let Some(enrichment) = &self.enrichment {
                            enrichment.trigger(store, target);
                        }
                        DispatchOutcome::Applied
                    }
                    Some(Err(_)) => DispatchOutcome::AlreadyTerminal,
                    None => DispatchOutcome::UnknownRequest,
                }
            }
            EventKind::LoadingFailed {
                error_text,
                canceled,
            } => store
                .update(&request_id, |acc| acc.fail(error_text, canceled))
                .map(DispatchOutcome::from)
                .unwrap_or(DispatchOutcome::UnknownRequest),
        };

        match outcome {
            DispatchOutcome::Applied | DispatchOutcome::Replaced => {
                trace!("{} applied to {}", kind_name, request_id);
            }
            dropped => {
                debug!("{} for {} dropped: {}", kind_name, request_id, dropped.label());
                metrics::counter!(
                    "harvest_events_dropped_total",
                    "kind" => kind_name,
                    "reason" => dropped.label()
                )
                .increment(1);
            }
        }

        outcome
    }
}
