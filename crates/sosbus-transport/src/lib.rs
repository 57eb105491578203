//! TCP transport for the SOS message bus.
//!
//! The broker (sossrv) is reached over one persistent TCP connection. This
//! crate owns dialing (with retries), the connected [`BusStream`], and the
//! shutdown primitive used to stop a blocked reader.
//!
//! This is the lowest layer of sosbus. Framing and client semantics build on
//! top of the [`BusStream`] type provided here.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::BusStream;
pub use tcp::{connect, connect_with_retries, Endpoint, DEFAULT_HOST, DEFAULT_PORT};
