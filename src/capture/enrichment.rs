// src/capture/enrichment.rs
//! Asynchronous body enrichment
//!
//! When a request finishes, the response body (and for body-carrying
//! methods, the request body) are fetched from the host on independent
//! tasks. A task writes its result back only if:
//!
//! - the store it was spawned for is still alive,
//! - the accumulator is the same incarnation (identifiers may be reused),
//! - the target field is still unset.
//!
//! Fetch failures and timeouts leave the field empty. There is no retry.

use crate::capture::accumulator::ResponseBody;
use crate::capture::store::AccumulatorStore;
use crate::utils::config::CaptureConfig;
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Body returned by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBody {
    pub body: String,
    pub base64_encoded: bool,
}

impl FetchedBody {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            base64_encoded: false,
        }
    }

    pub fn base64(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            base64_encoded: true,
        }
    }
}

/// Secondary channel to the instrumentation host.
///
/// Implementations return [`EngineError::BodyUnavailable`] when the host
/// has nothing for the request (redirects, 204s, evicted buffers).
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    async fn fetch_response_body(&self, request_id: &str) -> Result<FetchedBody>;

    async fn fetch_post_data(&self, request_id: &str) -> Result<String>;
}

/// In-memory source, used for trace replay and tests
#[derive(Default)]
pub struct StaticBodySource {
    response_bodies: DashMap<String, FetchedBody>,
    post_data: DashMap<String, String>,
}

impl StaticBodySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_response_body(&self, request_id: impl Into<String>, body: FetchedBody) {
        self.response_bodies.insert(request_id.into(), body);
    }

    pub fn insert_post_data(&self, request_id: impl Into<String>, post_data: impl Into<String>) {
        self.post_data.insert(request_id.into(), post_data.into());
    }

    pub fn len(&self) -> usize {
        self.response_bodies.len() + self.post_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EnrichmentSource for StaticBodySource {
    async fn fetch_response_body(&self, request_id: &str) -> Result<FetchedBody> {
        self.response_bodies
            .get(request_id)
            .map(|b| b.value().clone())
            .ok_or_else(|| EngineError::BodyUnavailable(format!("no response body for {}", request_id)))
    }

    async fn fetch_post_data(&self, request_id: &str) -> Result<String> {
        self.post_data
            .get(request_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| EngineError::BodyUnavailable(format!("no post data for {}", request_id)))
    }
}

/// Identifies the accumulator incarnation a fetch belongs to
#[derive(Debug, Clone)]
pub(crate) struct EnrichmentTarget {
    pub request_id: String,
    pub serial: u64,
    pub method: String,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    ResponseBody,
    PostData,
}

impl Field {
    fn label(self) -> &'static str {
        match self {
            Field::ResponseBody => "response_body",
            Field::PostData => "post_data",
        }
    }
}

/// Spawns enrichment fetches for finished requests
#[derive(Clone)]
pub struct EnrichmentTrigger {
    source: Arc<dyn EnrichmentSource>,
    config: CaptureConfig,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl EnrichmentTrigger {
    pub fn new(source: Arc<dyn EnrichmentSource>, config: CaptureConfig) -> Self {
        Self {
            source,
            config,
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Issues the fetches for a finished request without waiting on them
    pub(crate) fn trigger(&self, store: &Arc<AccumulatorStore>, target: EnrichmentTarget) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(
                "No async runtime; skipping enrichment for {}",
                target.request_id
            );
            return;
        };

        if self.config.fetch_response_bodies {
            self.spawn(&runtime, store, &target, Field::ResponseBody);
        }
        if self.config.wants_post_data(&target.method) {
            self.spawn(&runtime, store, &target, Field::PostData);
        }
    }

    fn spawn(
        &self,
        runtime: &Handle,
        store: &Arc<AccumulatorStore>,
        target: &EnrichmentTarget,
        field: Field,
    ) {
        let source = Arc::clone(&self.source);
        let store = Arc::downgrade(store);
        let target = target.clone();
        let timeout = self.config.enrichment_timeout();

        let handle = runtime.spawn(async move {
            let outcome = match field {
                Field::ResponseBody => {
                    let fetched =
                        tokio::time::timeout(timeout, source.fetch_response_body(&target.request_id))
                            .await;
                    match fetched {
                        Ok(Ok(body)) => write_back(&store, &target, |acc| {
                            acc.set_response_body(ResponseBody {
                                text: body.body,
                                base64_encoded: body.base64_encoded,
                            })
                        }),
                        Ok(Err(e)) => {
                            trace!("Response body for {} unavailable: {}", target.request_id, e);
                            "unavailable"
                        }
                        Err(_) => "timeout",
                    }
                }
                Field::PostData => {
                    let fetched =
                        tokio::time::timeout(timeout, source.fetch_post_data(&target.request_id))
                            .await;
                    match fetched {
                        Ok(Ok(post_data)) => {
                            write_back(&store, &target, |acc| acc.set_request_post_data(post_data))
                        }
                        Ok(Err(e)) => {
                            trace!("Post data for {} unavailable: {}", target.request_id, e);
                            "unavailable"
                        }
                        Err(_) => "timeout",
                    }
                }
            };

            debug!(
                "Enrichment {} for {}: {}",
                field.label(),
                target.request_id,
                outcome
            );
            metrics::counter!(
                "harvest_enrichment_total",
                "field" => field.label(),
                "outcome" => outcome
            )
            .increment(1);
        });

        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    /// Number of fetches that have not resolved yet
    pub fn in_flight(&self) -> usize {
        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|h| !h.is_finished());
        in_flight.len()
    }

    /// Waits until every fetch spawned so far has resolved
    pub async fn wait_idle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.in_flight.lock());
            if handles.is_empty() {
                return;
            }
            for result in futures::future::join_all(handles).await {
                if let Err(e) = result {
                    warn!("Enrichment task aborted: {}", e);
                }
            }
        }
    }
}

fn write_back(
    store: &Weak<AccumulatorStore>,
    target: &EnrichmentTarget,
    write: impl FnOnce(&mut crate::capture::accumulator::Accumulator) -> bool,
) -> &'static str {
    let Some(store) = store.upgrade() else {
        return "stale";
    };
    match store.update_serial(&target.request_id, target.serial, write) {
        Some(true) => "stored",
        Some(false) => "duplicate",
        None => "stale",
    }
}
