//! Side channel for unsolicited status events.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`StatusEvent`]: an order, worklist or connection status change.

pub mod bus;

pub use bus::{EventBus, StatusEvent, EVENT_CONNECTION};
