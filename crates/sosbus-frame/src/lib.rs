//! SOS message framing over a byte stream.
//!
//! Every message on the bus is an 8-byte little-endian header followed by the
//! payload:
//! - destination and source module ids (1 byte each)
//! - destination and source node addresses (2 bytes each)
//! - message type (1 byte)
//! - payload length (1 byte, so at most 255 payload bytes)
//!
//! There is no magic number and no checksum; frame boundaries exist only
//! through the length field. [`FrameReader`] buffers partial reads so callers
//! always get complete messages.

pub mod codec;
pub mod error;
pub mod ids;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod tokio_codec;

pub use codec::{
    decode_message, encode_message, frame_remaining, FrameConfig, Header, Message, HEADER_SIZE,
    MAX_FRAME_SIZE, MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use ids::{
    is_broadcast, msg_type_class, BROADCAST_ADDRESS, DEFAULT_MODULE_ID, MOD_MSG_START,
    PC_NODE_ADDRESS,
};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use tokio_codec::BusCodec;
