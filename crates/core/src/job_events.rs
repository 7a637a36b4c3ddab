//! Push-channel frame type and status constants.
//!
//! Shared by the realtime crate when parsing inbound frames and by tests
//! that script a server.

/// Client heartbeat request.
pub const FRAME_TYPE_PING: &str = "ping";

/// Server heartbeat reply. Consumed by the transport, never dispatched.
pub const FRAME_TYPE_PONG: &str = "pong";

/// Terminal result of an AI inference job (M1 / MG / MM).
pub const FRAME_TYPE_AI_INFERENCE_RESULT: &str = "AI_INFERENCE_RESULT";

/// An order changed status on the server (worklist refresh hint).
pub const FRAME_TYPE_ORDER_STATUS_CHANGED: &str = "OCS_STATUS_CHANGED";

/// A worklist entry changed owner.
pub const FRAME_TYPE_WORKLIST_ASSIGNED: &str = "WORKLIST_ASSIGNED";

/// Job finished successfully; `result` carries the payload.
pub const STATUS_COMPLETED: &str = "COMPLETED";

/// Job finished with an error; `error` carries the reason.
pub const STATUS_FAILED: &str = "FAILED";

/// Job accepted but not finished.
pub const STATUS_PENDING: &str = "PENDING";

/// Job is being processed. Informational only.
pub const STATUS_PROCESSING: &str = "PROCESSING";

/// Returns `true` if `status` names a terminal job status.
pub fn is_terminal_status(status: &str) -> bool {
    status.eq_ignore_ascii_case(STATUS_COMPLETED) || status.eq_ignore_ascii_case(STATUS_FAILED)
}
