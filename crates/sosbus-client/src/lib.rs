//! Client for the SOS message bus.
//!
//! A [`Client`] owns one TCP connection to the broker and one receiver
//! thread. Every decoded message is dispatched to the registered triggers in
//! registration order and then offered to the single blocking waiter used by
//! [`Client::listen`] and [`Client::post_rpc`]. Posts go straight to the
//! socket, serialized by a write lock.

pub mod client;
pub mod connection;
pub mod error;
pub mod pattern;
pub mod registry;
pub mod route;
pub mod waiter;

pub use client::{Client, ClientConfig, ConnectionState, DEFAULT_RETRY_DELAY};
pub use error::{BoxError, ClientError, PreconditionViolation, Result};
pub use pattern::{Field, Pattern};
pub use registry::{Callback, DispatchReport, TriggerId, TriggerRegistry};
pub use route::{MessageDefaults, Route};
pub use waiter::SyncWaiter;

pub use sosbus_frame::Message;
pub use sosbus_transport::Endpoint;
