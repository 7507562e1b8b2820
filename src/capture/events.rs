// src/capture/events.rs
//! Typed network instrumentation events
//!
//! Every host notification is normalised into a [`NetworkEvent`] before it
//! reaches the dispatcher. [`NetworkEvent::from_cdp`] decodes DevTools
//! `Network.*` notifications; hosts with their own instrumentation can build
//! events directly.

use crate::utils::errors::{EngineError, Result};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A single header as a name/value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Finds the first header named `name` (ASCII case-insensitive)
pub fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Accepts either a JSON object (`{"Accept": "*/*"}`, the DevTools shape) or
/// a list of `{name, value}` pairs. Object order is preserved.
fn deserialize_headers<'de, D>(deserializer: D) -> std::result::Result<Vec<Header>, D::Error>
where
    D: Deserializer<'de>,
{
    struct HeadersVisitor;

    impl<'de> Visitor<'de> for HeadersVisitor {
        type Value = Vec<Header>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a header object or a list of name/value pairs")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
            let mut headers = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, value)) = map.next_entry::<String, Value>()? {
                let value = match value {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                headers.push(Header { name, value });
            }
            Ok(headers)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
            let mut headers = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(header) = seq.next_element::<Header>()? {
                headers.push(header);
            }
            Ok(headers)
        }

        fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_any(HeadersVisitor)
}

/// Request as described by the primary "request started" event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: String,
    #[serde(deserialize_with = "deserialize_headers")]
    pub headers: Vec<Header>,
    /// Body sent inline with the event, when the host had it at hand
    pub post_data: Option<String>,
    /// Set when the request carries a body, captured or not
    pub has_post_data: bool,
    pub initial_priority: Option<String>,
}

/// Payload of `RequestStarted`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStarted {
    pub request: RequestDescriptor,
    #[serde(default)]
    pub initiator: Option<Value>,
    /// Wall-clock start, seconds since the Unix epoch
    #[serde(default)]
    pub wall_time: f64,
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub frame_id: Option<String>,
}

impl RequestStarted {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            request: RequestDescriptor {
                url: url.into(),
                method: method.into(),
                ..Default::default()
            },
            initiator: None,
            wall_time: 0.0,
            resource_type: None,
            frame_id: None,
        }
    }

    pub fn with_headers(mut self, headers: Vec<Header>) -> Self {
        self.request.headers = headers;
        self
    }

    pub fn with_wall_time(mut self, wall_time: f64) -> Self {
        self.wall_time = wall_time;
        self
    }
}

/// DevTools resource timing; offsets are milliseconds relative to
/// `request_time`, −1 when a phase did not happen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceTiming {
    pub request_time: f64,
    pub dns_start: f64,
    pub dns_end: f64,
    pub connect_start: f64,
    pub connect_end: f64,
    pub ssl_start: f64,
    pub ssl_end: f64,
    pub send_start: f64,
    pub send_end: f64,
    pub receive_headers_end: f64,
}

impl Default for ResourceTiming {
    fn default() -> Self {
        Self {
            request_time: 0.0,
            dns_start: -1.0,
            dns_end: -1.0,
            connect_start: -1.0,
            connect_end: -1.0,
            ssl_start: -1.0,
            ssl_end: -1.0,
            send_start: -1.0,
            send_end: -1.0,
            receive_headers_end: -1.0,
        }
    }
}

/// Payload of `ResponseReceived`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseDescriptor {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub protocol: Option<String>,
    #[serde(deserialize_with = "deserialize_headers")]
    pub headers: Vec<Header>,
    pub mime_type: String,
    #[serde(rename = "remoteIPAddress")]
    pub remote_ip_address: Option<String>,
    /// Explicit redirect target; the `Location` header is used otherwise
    pub redirect_url: Option<String>,
    pub timing: Option<ResourceTiming>,
}

impl ResponseDescriptor {
    pub fn new(status: u16, status_text: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            ..Default::default()
        }
    }

    pub fn with_headers(mut self, headers: Vec<Header>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

/// A structured cookie supplied by an extra-info event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Seconds since the Unix epoch; negative for session cookies
    pub expires: Option<f64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<String>,
}

impl CookieRecord {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Default::default()
        }
    }
}

/// Headers and cookies carried by an out-of-band extra-info event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraInfo {
    #[serde(deserialize_with = "deserialize_headers")]
    pub headers: Vec<Header>,
    pub cookies: Vec<CookieRecord>,
}

impl ExtraInfo {
    pub fn new(headers: Vec<Header>, cookies: Vec<CookieRecord>) -> Self {
        Self { headers, cookies }
    }

    /// Appends another extra-info delivery for the same request
    pub fn merge(&mut self, other: ExtraInfo) {
        self.headers.extend(other.headers);
        self.cookies.extend(other.cookies);
    }
}

/// Size record for one streamed chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataChunk {
    pub data_length: u64,
    pub encoded_data_length: u64,
}

/// Event-specific payload
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    RequestStarted(RequestStarted),
    RequestExtraInfo(ExtraInfo),
    ResponseReceived(ResponseDescriptor),
    ResponseExtraInfo(ExtraInfo),
    DataChunkReceived(DataChunk),
    ServedFromCache,
    LoadingFinished { encoded_data_length: u64 },
    LoadingFailed { error_text: String, canceled: bool },
}

impl EventKind {
    /// Stable label used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::RequestStarted(_) => "request_started",
            EventKind::RequestExtraInfo(_) => "request_extra_info",
            EventKind::ResponseReceived(_) => "response_received",
            EventKind::ResponseExtraInfo(_) => "response_extra_info",
            EventKind::DataChunkReceived(_) => "data_chunk_received",
            EventKind::ServedFromCache => "served_from_cache",
            EventKind::LoadingFinished { .. } => "loading_finished",
            EventKind::LoadingFailed { .. } => "loading_failed",
        }
    }
}

/// One instrumentation event addressed to a request identifier
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkEvent {
    pub request_id: String,
    /// Host monotonic clock, seconds
    pub timestamp: Option<f64>,
    pub kind: EventKind,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssociatedCookie {
    cookie: CookieRecord,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RequestExtraInfoParams {
    #[serde(deserialize_with = "deserialize_headers")]
    headers: Vec<Header>,
    associated_cookies: Vec<AssociatedCookie>,
}

#[derive(Deserialize)]
struct ResponseReceivedParams {
    response: ResponseDescriptor,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataReceivedParams {
    #[serde(default)]
    data_length: f64,
    #[serde(default)]
    encoded_data_length: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadingFinishedParams {
    #[serde(default)]
    encoded_data_length: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadingFailedParams {
    #[serde(default)]
    error_text: String,
    #[serde(default)]
    canceled: bool,
}

fn decode<'a, T: Deserialize<'a>>(method: &str, params: &'a Value) -> Result<T> {
    T::deserialize(params).map_err(|e| EngineError::MalformedEvent(format!("{}: {}", method, e)))
}

impl NetworkEvent {
    pub fn new(request_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp: None,
            kind,
        }
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Decodes a DevTools protocol notification.
    ///
    /// Returns `Ok(None)` for methods that carry no request state (other
    /// domains, or `Network.*` notifications the engine does not track).
    pub fn from_cdp(method: &str, params: &Value) -> Result<Option<Self>> {
        let Some(name) = method.strip_prefix("Network.") else {
            return Ok(None);
        };

        let kind = match name {
            "requestWillBeSent" => EventKind::RequestStarted(decode(method, params)?),
            "requestWillBeSentExtraInfo" => {
                let p: RequestExtraInfoParams = decode(method, params)?;
                EventKind::RequestExtraInfo(ExtraInfo {
                    headers: p.headers,
                    cookies: p.associated_cookies.into_iter().map(|a| a.cookie).collect(),
                })
            }
            "responseReceived" => {
                let p: ResponseReceivedParams = decode(method, params)?;
                EventKind::ResponseReceived(p.response)
            }
            "responseReceivedExtraInfo" => EventKind::ResponseExtraInfo(decode(method, params)?),
            "dataReceived" => {
                let p: DataReceivedParams = decode(method, params)?;
                EventKind::DataChunkReceived(DataChunk {
                    data_length: p.data_length.max(0.0) as u64,
                    encoded_data_length: p.encoded_data_length.max(0.0) as u64,
                })
            }
            "requestServedFromCache" => EventKind::ServedFromCache,
            "loadingFinished" => {
                let p: LoadingFinishedParams = decode(method, params)?;
                EventKind::LoadingFinished {
                    encoded_data_length: p.encoded_data_length.max(0.0) as u64,
                }
            }
            "loadingFailed" => {
                let p: LoadingFailedParams = decode(method, params)?;
                EventKind::LoadingFailed {
                    error_text: p.error_text,
                    canceled: p.canceled,
                }
            }
            _ => return Ok(None),
        };

        let request_id = params
            .get("requestId")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::MalformedEvent(format!("{}: missing requestId", method)))?;

        Ok(Some(Self {
            request_id: request_id.to_string(),
            timestamp: params.get("timestamp").and_then(Value::as_f64),
            kind,
        }))
    }
}
