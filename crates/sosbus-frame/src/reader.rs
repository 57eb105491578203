use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use sosbus_transport::BusStream;
use tracing::trace;

use crate::codec::{decode_message, frame_remaining, FrameConfig, Message, MAX_FRAME_SIZE};
use crate::error::{FrameError, Result};

/// Reads complete messages from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete messages.
/// Each read asks the stream for at most the bytes still missing from the
/// current frame, so the stream is never consumed past a frame boundary;
/// bytes already buffered beyond a boundary (see [`FrameReader::from_parts`])
/// are kept as the start of the next frame.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MAX_FRAME_SIZE),
            config,
        }
    }

    /// Resume reading from a stream with bytes already taken off it.
    pub fn from_parts(inner: T, leftover: BytesMut, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: leftover,
            config,
        }
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionReset)` when the stream reaches EOF
    /// before a full header or a full payload has arrived.
    pub fn read_message(&mut self) -> Result<Message> {
        let mut chunk = [0u8; MAX_FRAME_SIZE];
        loop {
            if let Some(message) = decode_message(&mut self.buf) {
                trace!(
                    msg_type = message.msg_type(),
                    len = message.payload().len(),
                    "decoded message"
                );
                return Ok(message);
            }

            let want = frame_remaining(&self.buf);
            let read = match self.inner.read(&mut chunk[..want]) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionReset);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Bytes received but not yet returned as part of a message.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Consume the reader and return the inner stream with any buffered bytes.
    pub fn into_parts(self) -> (T, BytesMut) {
        (self.inner, self.buf)
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<BusStream> {
    /// Create a frame reader for `BusStream` and apply read timeout from config.
    pub fn with_config_stream(inner: BusStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: sosbus_transport::TransportError) -> FrameError {
    match err {
        sosbus_transport::TransportError::Io(io) => FrameError::Io(io),
        sosbus_transport::TransportError::Resolve { source, .. }
        | sosbus_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        sosbus_transport::TransportError::Shutdown => FrameError::ConnectionReset,
    }
}
