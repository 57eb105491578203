//! `tokio_util::codec` adapter for use with `Framed` streams.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_message, encode_message, frame_remaining, Message};
use crate::error::FrameError;

/// Stateless codec for bus messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusCodec;

impl BusCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for BusCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        match decode_message(src) {
            Some(message) => Ok(Some(message)),
            None => {
                src.reserve(frame_remaining(src));
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionReset),
        }
    }
}

impl Encoder<Message> for BusCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_message(&item, dst)
    }
}

impl Encoder<&Message> for BusCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_message(item, dst)
    }
}
