//! Real-time job and order bridge for the medflow client.
//!
//! Ties the push channel, the job correlator and the REST endpoints to
//! the state machines in `medflow-core`:
//!
//! - [`channel`]: the WebSocket transport with heartbeat.
//! - [`correlator`] and [`dispatcher`]: route push frames to waiting jobs.
//! - [`gateway`]: job submission with the cached/accepted/rejected branch.
//! - [`orders`]: hydrated orders and server-side transitions.
//! - [`session`]: owns all of the above from login to logout.

pub mod api;
pub mod channel;
pub mod client;
pub mod correlator;
pub mod dispatcher;
pub mod gateway;
pub mod messages;
pub mod orders;
pub mod reconnect;
pub mod session;

pub use api::{ApiError, ClinicalApi, HttpApi, JobRequest};
pub use channel::{ConnectionState, FrameHandler, HeartbeatConfig, TransportChannel};
pub use client::{ChannelError, PushClient};
pub use correlator::JobCorrelator;
pub use dispatcher::NotificationDispatcher;
pub use gateway::{Submission, SubmissionGateway};
pub use orders::{OrderService, OrderServiceError};
pub use reconnect::{ReconnectConfig, ReconnectOutcome};
pub use session::{Session, SessionConfig};
