// src/capture/store.rs
//! Session-scoped accumulator store
//!
//! Maps request identifiers to accumulators and remembers the order in
//! which identifiers were first seen. Every mutation runs under the write
//! lock, so readers observe an accumulator either before or after an event
//! is applied, never in between.

use crate::capture::accumulator::Accumulator;
use crate::capture::events::RequestStarted;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Default)]
struct StoreInner {
    /// First-creation order of identifiers
    order: Vec<String>,
    entries: HashMap<String, Accumulator>,
}

/// Result of [`AccumulatorStore::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    /// An accumulator with the same identifier was discarded
    Replaced,
}

/// Accumulator store for one recording session
#[derive(Default)]
pub struct AccumulatorStore {
    inner: RwLock<StoreInner>,
    next_serial: AtomicU64,
}

impl AccumulatorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the accumulator for `request_id`, replacing any existing one.
    /// A replaced identifier keeps its original position.
    pub fn put(
        &self,
        request_id: &str,
        started: RequestStarted,
        timestamp: Option<f64>,
    ) -> PutOutcome {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let accumulator = Accumulator::new(request_id.to_string(), serial, started, timestamp);

        let mut inner = self.inner.write();
        match inner.entries.insert(request_id.to_string(), accumulator) {
            Some(_) => {
                debug!("Replaced accumulator for reused request id {}", request_id);
                PutOutcome::Replaced
            }
            None => {
                inner.order.push(request_id.to_string());
                PutOutcome::Created
            }
        }
    }

    /// Returns a copy of the current accumulator for `request_id`
    pub fn get(&self, request_id: &str) -> Option<Accumulator> {
        self.inner.read().entries.get(request_id).cloned()
    }

    /// Applies `f` to the accumulator under the write lock.
    /// Returns `None` when no accumulator exists.
    pub(crate) fn update<R>(
        &self,
        request_id: &str,
        f: impl FnOnce(&mut Accumulator) -> R,
    ) -> Option<R> {
        self.inner.write().entries.get_mut(request_id).map(f)
    }

    /// Like [`update`](Self::update), but only if the accumulator is the
    /// same incarnation identified by `serial`
    pub(crate) fn update_serial<R>(
        &self,
        request_id: &str,
        serial: u64,
        f: impl FnOnce(&mut Accumulator) -> R,
    ) -> Option<R> {
        self.inner
            .write()
            .entries
            .get_mut(request_id)
            .filter(|acc| acc.serial() == serial)
            .map(f)
    }

    /// Visits accumulators in first-creation order
    pub fn for_each(&self, mut f: impl FnMut(&Accumulator)) {
        let inner = self.inner.read();
        for id in &inner.order {
            if let Some(acc) = inner.entries.get(id) {
                f(acc);
            }
        }
    }

    /// Copies all accumulators in first-creation order
    pub fn snapshot(&self) -> Vec<Accumulator> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each(|acc| out.push(acc.clone()));
        out
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards every accumulator
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let dropped = inner.entries.len();
        *inner = StoreInner::default();
        debug!("Cleared {} accumulators", dropped);
    }
}
