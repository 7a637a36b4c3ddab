//! Push-channel frame types and parser.
//!
//! The server sends flat JSON frames of the shape
//! `{"type": "<kind>", "job_id": ..., "status": ..., "result": ..., ...}`.
//! Unlike a tagged enum, unknown `type` values still parse: the dispatcher
//! decides what to do with them.

use medflow_core::job::JobUpdate;
use medflow_core::job_events::{is_terminal_status, FRAME_TYPE_PING, FRAME_TYPE_PONG};
use medflow_core::types::{DbId, JobId};
use serde::{Deserialize, Serialize};

/// One inbound or outbound push frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushFrame {
    #[serde(rename = "type")]
    pub frame_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<DbId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Any other fields the server attached.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PushFrame {
    pub fn new(frame_type: impl Into<String>) -> Self {
        Self {
            frame_type: frame_type.into(),
            job_id: None,
            order_id: None,
            status: None,
            result: None,
            error: None,
            extra: serde_json::Map::new(),
        }
    }

    /// The heartbeat request sent by the client.
    pub fn ping() -> Self {
        Self::new(FRAME_TYPE_PING)
    }

    pub fn is_pong(&self) -> bool {
        self.frame_type == FRAME_TYPE_PONG
    }

    pub fn is_terminal(&self) -> bool {
        self.status.as_deref().is_some_and(is_terminal_status)
    }

    /// Convert a terminal job frame into a [`JobUpdate`].
    ///
    /// Returns `None` when the frame has no terminal status. A `COMPLETED`
    /// frame without `result` completes with `null`.
    pub fn job_update(&self) -> Option<JobUpdate> {
        JobUpdate::from_status(
            self.status.as_deref()?,
            self.result.clone(),
            self.error.clone(),
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parse a push-channel text frame.
///
/// Returns `Err` for malformed JSON or a missing `type` field. Callers
/// should log and continue.
pub fn parse_frame(text: &str) -> Result<PushFrame, serde_json::Error> {
    serde_json::from_str(text)
}
