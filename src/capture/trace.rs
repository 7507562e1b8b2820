// src/capture/trace.rs
//! Recorded DevTools traces
//!
//! A trace is JSON lines, one protocol message per line:
//!
//! ```text
//! {"method": "Network.requestWillBeSent", "params": {...}}
//! {"method": "Network.getResponseBody", "params": {"requestId": "1"}, "result": {"body": "...", "base64Encoded": false}}
//! ```
//!
//! Notifications become [`NetworkEvent`]s; command replies (lines with a
//! `result`) seed a [`StaticBodySource`] so enrichment can be replayed.

use crate::capture::enrichment::{FetchedBody, StaticBodySource};
use crate::capture::events::NetworkEvent;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Deserialize)]
struct TraceLine {
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseBodyResult {
    body: String,
    #[serde(default)]
    base64_encoded: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostDataResult {
    post_data: String,
}

/// Parsed trace contents
#[derive(Default)]
pub struct Trace {
    pub events: Vec<NetworkEvent>,
    pub bodies: StaticBodySource,
    /// Lines that could not be decoded
    pub skipped: usize,
}

impl Trace {
    /// Parses a trace, skipping (and logging) lines that cannot be decoded
    pub fn parse(text: &str) -> Self {
        let mut trace = Trace::default();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let line_no = index + 1;

            let parsed: TraceLine = match serde_json::from_str(line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Skipping trace line {}: {}", line_no, e);
                    trace.skipped += 1;
                    continue;
                }
            };

            match parsed.result {
                Some(result) => trace.record_reply(line_no, &parsed.method, &parsed.params, result),
                None => match NetworkEvent::from_cdp(&parsed.method, &parsed.params) {
                    Ok(Some(event)) => trace.events.push(event),
                    Ok(None) => debug!("Ignoring {} on line {}", parsed.method, line_no),
                    Err(e) => {
                        warn!("Skipping trace line {}: {}", line_no, e);
                        trace.skipped += 1;
                    }
                },
            }
        }

        trace
    }

    fn record_reply(&mut self, line_no: usize, method: &str, params: &Value, result: Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            warn!("Skipping trace line {}: reply without requestId", line_no);
            self.skipped += 1;
            return;
        };

        let stored = match method {
            "Network.getResponseBody" => serde_json::from_value::<ResponseBodyResult>(result)
                .map(|r| {
                    self.bodies.insert_response_body(
                        request_id,
                        FetchedBody {
                            body: r.body,
                            base64_encoded: r.base64_encoded,
                        },
                    )
                }),
            "Network.getRequestPostData" => serde_json::from_value::<PostDataResult>(result)
                .map(|r| self.bodies.insert_post_data(request_id, r.post_data)),
            _ => {
                debug!("Ignoring reply to {} on line {}", method, line_no);
                return;
            }
        };

        if let Err(e) = stored {
            warn!("Skipping trace line {}: {}", line_no, e);
            self.skipped += 1;
        }
    }
}
