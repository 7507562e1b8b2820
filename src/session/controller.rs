// src/session/controller.rs
//! Recording session lifecycle
//!
//! A session owns the current [`AccumulatorStore`] behind a lock. Starting
//! or clearing swaps in a fresh store; the retired store is emptied, so
//! enrichment fetches that resolve afterwards find nothing to write to.

use crate::capture::assembler;
use crate::capture::dispatcher::{DispatchOutcome, EventDispatcher};
use crate::capture::enrichment::{EnrichmentSource, EnrichmentTrigger};
use crate::capture::events::NetworkEvent;
use crate::capture::har::{HarCreator, HarDocument, HarEntry};
use crate::capture::store::AccumulatorStore;
use crate::session::stats::CaptureStats;
use crate::utils::config::CaptureConfig;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Status {
    recording: bool,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub recording: bool,
    pub request_count: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Capture session: lifecycle, ingest and export
pub struct CaptureSession {
    dispatcher: EventDispatcher,
    store: RwLock<Arc<AccumulatorStore>>,
    status: RwLock<Status>,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSession {
    /// Session without enrichment; bodies are never fetched
    pub fn new() -> Self {
        Self::with_dispatcher(EventDispatcher::new())
    }

    /// Session that fetches bodies from `source` when requests finish
    pub fn with_enrichment(source: Arc<dyn EnrichmentSource>, config: CaptureConfig) -> Self {
        Self::with_dispatcher(EventDispatcher::with_enrichment(EnrichmentTrigger::new(
            source, config,
        )))
    }

    fn with_dispatcher(dispatcher: EventDispatcher) -> Self {
        Self {
            dispatcher,
            store: RwLock::new(Arc::new(AccumulatorStore::new())),
            status: RwLock::new(Status::default()),
        }
    }

    /// Starts recording into a fresh store
    pub fn start(&self) -> Result<()> {
        let mut status = self.status.write();
        if status.recording {
            return Err(EngineError::SessionError("already recording".to_string()));
        }

        self.swap_store();
        status.recording = true;
        status.started_at = Some(Utc::now());
        status.stopped_at = None;

        info!("Recording started");
        Ok(())
    }

    /// Stops recording; captured data is kept until the next start or clear
    pub fn stop(&self) {
        let mut status = self.status.write();
        if !status.recording {
            debug!("Stop requested while not recording");
            return;
        }
        status.recording = false;
        status.stopped_at = Some(Utc::now());

        info!("Recording stopped ({} requests)", self.store().len());
    }

    /// The host detached its instrumentation
    pub fn detach(&self, reason: &str) {
        info!("Instrumentation detached: {}", reason);
        self.stop();
    }

    /// Discards captured data; recording continues if active
    pub fn clear(&self) {
        self.swap_store();
        info!("Captured data cleared");
    }

    fn swap_store(&self) {
        let retired = std::mem::replace(&mut *self.store.write(), Arc::new(AccumulatorStore::new()));
        retired.clear();
        metrics::gauge!("harvest_accumulators").set(0.0);
    }

    /// Current store handle
    pub fn store(&self) -> Arc<AccumulatorStore> {
        Arc::clone(&self.store.read())
    }

    pub fn is_recording(&self) -> bool {
        self.status.read().recording
    }

    /// Applies one event, unless the session is not recording
    pub fn ingest(&self, event: NetworkEvent) -> DispatchOutcome {
        if !self.is_recording() {
            return DispatchOutcome::NotRecording;
        }
        let store = self.store();
        self.dispatcher.dispatch(&store, event)
    }

    pub fn state(&self) -> SessionState {
        let status = self.status.read();
        SessionState {
            recording: status.recording,
            request_count: self.store().len(),
            started_at: status.started_at,
            stopped_at: status.stopped_at,
        }
    }

    /// Assembles the current store; bodies still being fetched come out empty
    pub fn assemble(&self) -> Vec<HarEntry> {
        assembler::assemble(&self.store())
    }

    /// Assembles the current store into a HAR document
    pub fn export_document(&self, creator: HarCreator, browser: Option<HarCreator>) -> HarDocument {
        HarDocument::new(creator, browser, self.assemble())
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats::from_store(&self.store())
    }

    /// Waits for every enrichment fetch spawned so far
    pub async fn wait_for_enrichment(&self) {
        if let Some(enrichment) = self.dispatcher.enrichment() {
            enrichment.wait_idle().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::enrichment::{FetchedBody, StaticBodySource};
    use crate::capture::events::{EventKind, RequestStarted};

    fn started(id: &str) -> NetworkEvent {
        NetworkEvent::new(
            id,
            EventKind::RequestStarted(RequestStarted::new("GET", "https://example.com/")),
        )
    }

    #[test]
    fn test_events_ignored_while_not_recording() {
        let session = CaptureSession::new();
        assert_eq!(session.ingest(started("1")), DispatchOutcome::NotRecording);
        assert_eq!(session.state().request_count, 0);
    }

    #[test]
    fn test_start_stop_state() {
        let session = CaptureSession::new();
        session.start().unwrap();
        assert!(matches!(session.start(), Err(EngineError::SessionError(_))));

        session.ingest(started("1"));
        let state = session.state();
        assert!(state.recording);
        assert_eq!(state.request_count, 1);
        assert!(state.started_at.is_some());

        session.detach("target closed");
        let state = session.state();
        assert!(!state.recording);
        assert!(state.stopped_at.is_some());
        assert_eq!(state.request_count, 1);
        assert_eq!(session.assemble().len(), 1);
    }

    #[test]
    fn test_restart_starts_with_empty_store() {
        let session = CaptureSession::new();
        session.start().unwrap();
        session.ingest(started("1"));
        session.stop();

        session.start().unwrap();
        assert_eq!(session.state().request_count, 0);
    }

    #[test]
    fn test_clear_keeps_recording() {
        let session = CaptureSession::new();
        session.start().unwrap();
        session.ingest(started("1"));
        let old_store = session.store();

        session.clear();
        assert!(session.is_recording());
        assert!(old_store.is_empty());
        assert_eq!(session.ingest(started("2")), DispatchOutcome::Applied);
        assert_eq!(session.state().request_count, 1);
    }

    #[tokio::test]
    async fn test_clear_drops_in_flight_enrichment() {
        let source = Arc::new(StaticBodySource::new());
        source.insert_response_body("1", FetchedBody::text("old session"));

        let session = CaptureSession::with_enrichment(source, CaptureConfig::default());
        session.start().unwrap();
        session.ingest(started("1"));
        session.ingest(NetworkEvent::new(
            "1",
            EventKind::LoadingFinished {
                encoded_data_length: 11,
            },
        ));

        session.clear();
        session.ingest(started("1"));
        session.wait_for_enrichment().await;

        let acc = session.store().get("1").unwrap();
        assert!(acc.response_body().is_none());
    }
}
