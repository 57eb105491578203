//! Client library for the SOS sensor-network message bus.
//!
//! Applications talk to the bus through one TCP connection to the broker
//! (sossrv). Messages are small typed binary frames addressed by module id
//! and node address.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP endpoint, dialing with retries, stream shutdown
//! - [`frame`]: message header, wire codec, frame reader and writer
//! - [`client`]: triggers, blocking listen and RPC-style requests (behind `client` feature)

/// Re-export transport types.
pub mod transport {
    pub use sosbus_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use sosbus_frame::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use sosbus_client::*;
}

#[cfg(feature = "client")]
pub use sosbus_client::{
    Client, ClientConfig, ClientError, ConnectionState, Field, MessageDefaults, Pattern, Route,
    TriggerId,
};
pub use sosbus_frame::Message;
