// tests/store_properties.rs
//! Property tests over arbitrary event orderings

use harvest_engine::capture::events::{DataChunk, ExtraInfo, RequestStarted, ResponseDescriptor};
use harvest_engine::capture::{assemble, CompletionState};
use harvest_engine::{AccumulatorStore, EventDispatcher, EventKind, NetworkEvent};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Step {
    Start(u8),
    Response(u8),
    Extra(u8),
    Chunk(u8),
    Cache(u8),
    Finish(u8),
    Fail(u8),
}

fn step() -> impl Strategy<Value = Step> {
    let id = 0u8..4;
    prop_oneof![
        id.clone().prop_map(Step::Start),
        id.clone().prop_map(Step::Response),
        id.clone().prop_map(Step::Extra),
        id.clone().prop_map(Step::Chunk),
        id.clone().prop_map(Step::Cache),
        id.clone().prop_map(Step::Finish),
        id.prop_map(Step::Fail),
    ]
}

fn to_event(step: &Step, ts: f64) -> (String, NetworkEvent) {
    let (id, kind) = match step {
        Step::Start(id) => (
            id,
            EventKind::RequestStarted(RequestStarted::new("GET", format!("https://h/{}", id))),
        ),
        Step::Response(id) => (id, EventKind::ResponseReceived(ResponseDescriptor::new(200, "OK"))),
        Step::Extra(id) => (id, EventKind::ResponseExtraInfo(ExtraInfo::default())),
        Step::Chunk(id) => (
            id,
            EventKind::DataChunkReceived(DataChunk {
                data_length: 10,
                encoded_data_length: 4,
            }),
        ),
        Step::Cache(id) => (id, EventKind::ServedFromCache),
        Step::Finish(id) => (
            id,
            EventKind::LoadingFinished {
                encoded_data_length: 4,
            },
        ),
        Step::Fail(id) => (
            id,
            EventKind::LoadingFailed {
                error_text: "net::ERR_ABORTED".to_string(),
                canceled: true,
            },
        ),
    };
    let id = format!("r{}", id);
    (id.clone(), NetworkEvent::new(id, kind).with_timestamp(ts))
}

proptest! {
    #[test]
    fn records_are_unique_and_terminal_states_stick(steps in prop::collection::vec(step(), 0..60)) {
        let store = Arc::new(AccumulatorStore::new());
        let dispatcher = EventDispatcher::new();

        // Expected terminal state per live request, reset by each start
        let mut model: HashMap<String, Option<CompletionState>> = HashMap::new();

        for (i, step) in steps.iter().enumerate() {
            let (id, event) = to_event(step, i as f64);
            dispatcher.dispatch(&store, event);

            match step {
                Step::Start(_) => {
                    model.insert(id, None);
                }
                Step::Finish(_) | Step::Fail(_) => {
                    if let Some(terminal) = model.get_mut(&id) {
                        if terminal.is_none() {
                            *terminal = Some(if matches!(step, Step::Finish(_)) {
                                CompletionState::Finished
                            } else {
                                CompletionState::Failed
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        let snapshot = store.snapshot();
        let ids: HashSet<_> = snapshot.iter().map(|acc| acc.request_id().to_string()).collect();
        prop_assert_eq!(ids.len(), snapshot.len());
        prop_assert_eq!(snapshot.len(), model.len());

        for acc in &snapshot {
            let expected = model.get(acc.request_id()).copied().flatten();
            match expected {
                Some(state) => prop_assert_eq!(acc.state, state),
                None => prop_assert!(!acc.state.is_terminal()),
            }
            if acc.state == CompletionState::Failed {
                prop_assert!(acc.failure.is_some());
            }
        }

        let entries = assemble(&store);
        prop_assert_eq!(entries.len(), snapshot.len());
        for (entry, acc) in entries.iter().zip(&snapshot) {
            prop_assert_eq!(&entry.request_id, acc.request_id());
            prop_assert_eq!(entry.error.is_some(), acc.state == CompletionState::Failed);
        }
    }
}
