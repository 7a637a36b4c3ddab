//! Domain types and state machines for the medflow client.
//!
//! Nothing here performs I/O. The realtime crate drives these state
//! machines from REST responses, push frames and polling.

pub mod error;
pub mod job;
pub mod job_events;
pub mod order;
pub mod order_result;
pub mod roles;
pub mod types;
