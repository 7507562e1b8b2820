// src/capture/accumulator.rs
//! Per-request accumulation state
//!
//! State machine for one request:
//!
//! ```text
//! Pending ──► ResponseReceived ──┬──► Finished
//!    │                           └──► Failed
//!    └──────────────────────────────► Finished | Failed
//! ```
//!
//! Extra-info merges and body enrichment may land in any state and never
//! move the machine. The first terminal event wins.

use crate::capture::events::{
    DataChunk, ExtraInfo, RequestDescriptor, RequestStarted, ResponseDescriptor,
};
use serde::Serialize;
use serde_json::Value;

/// Completion state of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    Pending,
    ResponseReceived,
    Finished,
    Failed,
}

impl CompletionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CompletionState::Finished | CompletionState::Failed)
    }
}

/// Rejected transition; the accumulator already reached a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyTerminal(pub CompletionState);

/// Response body returned by enrichment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseBody {
    pub text: String,
    pub base64_encoded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub error_text: String,
    pub canceled: bool,
}

/// Diagnostic record of one streamed chunk
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChunkRecord {
    pub data_length: u64,
    pub encoded_data_length: u64,
    pub timestamp: Option<f64>,
}

/// Mutable state built up from the events of one request
#[derive(Debug, Clone, Serialize)]
pub struct Accumulator {
    request_id: String,

    /// Store-assigned serial; changes whenever the identifier is reused
    #[serde(skip)]
    serial: u64,

    pub request: RequestDescriptor,
    pub initiator: Option<Value>,
    pub resource_type: Option<String>,
    pub frame_id: Option<String>,

    /// Wall-clock start, seconds since the Unix epoch
    pub wall_time: f64,

    /// Monotonic start, seconds
    pub start_timestamp: Option<f64>,

    pub extra_request_info: Option<ExtraInfo>,

    pub response: Option<ResponseDescriptor>,
    pub response_timestamp: Option<f64>,
    pub extra_response_info: Option<ExtraInfo>,

    pub state: CompletionState,
    pub encoded_data_length: Option<u64>,
    pub finished_timestamp: Option<f64>,
    pub served_from_cache: bool,

    response_body: Option<ResponseBody>,
    request_post_data: Option<String>,

    pub failure: Option<Failure>,
    pub data_chunks: Vec<ChunkRecord>,
}

impl Accumulator {
    pub(crate) fn new(
        request_id: String,
        serial: u64,
        started: RequestStarted,
        timestamp: Option<f64>,
    ) -> Self {
        Self {
            request_id,
            serial,
            request: started.request,
            initiator: started.initiator,
            resource_type: started.resource_type,
            frame_id: started.frame_id,
            wall_time: started.wall_time,
            start_timestamp: timestamp,
            extra_request_info: None,
            response: None,
            response_timestamp: None,
            extra_response_info: None,
            state: CompletionState::Pending,
            encoded_data_length: None,
            finished_timestamp: None,
            served_from_cache: false,
            response_body: None,
            request_post_data: None,
            failure: None,
            data_chunks: Vec::new(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub fn response_body(&self) -> Option<&ResponseBody> {
        self.response_body.as_ref()
    }

    pub fn request_post_data(&self) -> Option<&str> {
        self.request_post_data.as_deref()
    }

    fn ensure_open(&self) -> Result<(), AlreadyTerminal> {
        if self.state.is_terminal() {
            Err(AlreadyTerminal(self.state))
        } else {
            Ok(())
        }
    }

    pub(crate) fn merge_extra_request_info(&mut self, info: ExtraInfo) {
        match &mut self.extra_request_info {
            Some(existing) => existing.merge(info),
            None => self.extra_request_info = Some(info),
        }
    }

    pub(crate) fn merge_extra_response_info(&mut self, info: ExtraInfo) {
        match &mut self.extra_response_info {
            Some(existing) => existing.merge(info),
            None => self.extra_response_info = Some(info),
        }
    }

    pub(crate) fn record_response(
        &mut self,
        response: ResponseDescriptor,
        timestamp: Option<f64>,
    ) -> Result<(), AlreadyTerminal> {
        self.ensure_open()?;
        self.response = Some(response);
        self.response_timestamp = timestamp;
        self.state = CompletionState::ResponseReceived;
        Ok(())
    }

    pub(crate) fn record_chunk(
        &mut self,
        chunk: DataChunk,
        timestamp: Option<f64>,
    ) -> Result<(), AlreadyTerminal> {
        self.ensure_open()?;
        self.data_chunks.push(ChunkRecord {
            data_length: chunk.data_length,
            encoded_data_length: chunk.encoded_data_length,
            timestamp,
        });
        Ok(())
    }

    pub(crate) fn mark_served_from_cache(&mut self) -> Result<(), AlreadyTerminal> {
        self.ensure_open()?;
        self.served_from_cache = true;
        Ok(())
    }

    pub(crate) fn finish(
        &mut self,
        encoded_data_length: u64,
        timestamp: Option<f64>,
    ) -> Result<(), AlreadyTerminal> {
        self.ensure_open()?;
        self.encoded_data_length = Some(encoded_data_length);
        self.finished_timestamp = timestamp;
        self.state = CompletionState::Finished;
        Ok(())
    }

    pub(crate) fn fail(&mut self, error_text: String, canceled: bool) -> Result<(), AlreadyTerminal> {
        self.ensure_open()?;
        self.failure = Some(Failure {
            error_text,
            canceled,
        });
        self.state = CompletionState::Failed;
        Ok(())
    }

    /// Write-once; returns `false` when a body is already present
    pub(crate) fn set_response_body(&mut self, body: ResponseBody) -> bool {
        if self.response_body.is_some() {
            return false;
        }
        self.response_body = Some(body);
        true
    }

    /// Write-once; empty bodies are not stored
    pub(crate) fn set_request_post_data(&mut self, post_data: String) -> bool {
        if self.request_post_data.is_some() || post_data.is_empty() {
            return false;
        }
        self.request_post_data = Some(post_data);
        true
    }
}
