use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use sosbus_transport::BusStream;

use crate::codec::{encode_message, FrameConfig, Message, MAX_FRAME_SIZE};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

/// Writes complete messages to any `Write` stream.
///
/// Each message is encoded into one contiguous buffer and written in full
/// before `send` returns. The writer does no locking of its own; share it
/// behind a mutex when several threads post on the same stream.
///
/// With a `write_timeout` configured, `WouldBlock` and `TimedOut` are
/// failures rather than retries. A frame cut off part way leaves the stream
/// without a usable boundary, so the writer is then torn and refuses
/// further sends.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    torn: bool,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MAX_FRAME_SIZE),
            config,
            torn: false,
        }
    }

    /// Encode and write a complete message (blocking).
    ///
    /// Nothing is written when the message cannot be encoded or the writer
    /// is already torn.
    pub fn send(&mut self, message: &Message) -> Result<()> {
        if self.torn {
            return Err(FrameError::ConnectionReset);
        }
        self.buf.clear();
        encode_message(message, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => {
                    self.torn = offset > 0;
                    return Err(FrameError::ConnectionReset);
                }
                Ok(n) => offset += n,
                Err(err) if self.should_retry(err.kind()) => continue,
                Err(err) => {
                    self.torn = offset > 0;
                    return Err(FrameError::Io(err));
                }
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if self.should_retry(err.kind()) => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// True once a send failed after part of its frame reached the stream.
    pub fn is_torn(&self) -> bool {
        self.torn
    }

    fn should_retry(&self, kind: ErrorKind) -> bool {
        match kind {
            ErrorKind::Interrupted => true,
            ErrorKind::WouldBlock => self.config.write_timeout.is_none(),
            _ => false,
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<BusStream> {
    /// Create a frame writer for `BusStream` and apply write timeout from config.
    pub fn with_config_stream(inner: BusStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::codec::decode_message;

    fn msg(msg_type: u8, payload: &'static [u8]) -> Message {
        Message::new(0x97, 0x80, 13, 0xFFFE, msg_type, Bytes::from_static(payload)).unwrap()
    }

    #[test]
    fn write_single_message() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(&msg(32, b"hello")).unwrap();

        let bytes = writer.into_inner().into_inner();
        assert_eq!(
            &bytes[..8],
            &[0x97, 0x80, 0x0D, 0x00, 0xFE, 0xFF, 0x20, 0x05]
        );
        assert_eq!(&bytes[8..], b"hello");
    }

    #[test]
    fn write_multiple_messages() {
        let sent = [msg(32, b"one"), msg(33, b"two"), msg(34, b"")];
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        for message in &sent {
            writer.send(message).unwrap();
        }

        let mut wire = BytesMut::from(writer.into_inner().into_inner().as_slice());
        for expected in &sent {
            assert_eq!(&decode_message(&mut wire).unwrap(), expected);
        }
        assert!(wire.is_empty());
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.send(&msg(40, b"x")).unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn partial_writes_complete_the_frame() {
        let mut writer = FrameWriter::new(TrickleWriter { data: Vec::new() });
        let message = msg(41, b"trickled payload");
        writer.send(&message).unwrap();

        let inner = writer.into_inner();
        assert_eq!(inner.data.len(), message.wire_size());
        let mut wire = BytesMut::from(inner.data.as_slice());
        assert_eq!(decode_message(&mut wire).unwrap(), message);
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let writer_impl = InterruptedWriteThenFlush {
            wrote_once: false,
            flush_interrupted: false,
            data: Vec::new(),
        };

        let mut writer = FrameWriter::new(writer_impl);
        writer.send(&msg(42, b"retry")).unwrap();

        let inner = writer.into_inner();
        assert_eq!(inner.data.len(), 8 + 5);
    }

    #[test]
    fn connection_reset_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(&msg(43, b"x")).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionReset));
    }

    #[test]
    fn would_block_without_timeout_is_retried() {
        let mut writer = FrameWriter::new(StallingWriter::new(3, 2));
        let message = msg(44, b"stalls");
        writer.send(&message).unwrap();

        assert_eq!(writer.get_ref().data.len(), message.wire_size());
        assert!(!writer.is_torn());
    }

    #[test]
    fn write_timeout_fails_and_tears_partial_frame() {
        let config = FrameConfig {
            write_timeout: Some(Duration::from_millis(50)),
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(StallingWriter::new(3, usize::MAX), config);

        let err = writer.send(&msg(45, b"blocked")).unwrap_err();
        assert!(matches!(err, FrameError::Io(ref io) if io.kind() == ErrorKind::WouldBlock));
        assert!(writer.is_torn());

        let before = writer.get_ref().data.len();
        let err = writer.send(&msg(46, b"next")).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionReset));
        assert_eq!(writer.get_ref().data.len(), before);
    }

    #[test]
    fn write_timeout_before_any_byte_keeps_writer_usable() {
        let config = FrameConfig {
            write_timeout: Some(Duration::from_millis(50)),
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(StallingWriter::new(0, 1), config);

        assert!(writer.send(&msg(47, b"first")).is_err());
        assert!(!writer.is_torn());
        writer.send(&msg(48, b"second")).unwrap();
    }

    #[test]
    fn accessors_and_into_inner() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        let _ = writer.get_ref();
        let _ = writer.get_mut();
        assert!(writer.config().write_timeout.is_none());
        let _inner = writer.into_inner();
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct TrickleWriter {
        data: Vec<u8>,
    }

    impl Write for TrickleWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(3);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct InterruptedWriteThenFlush {
        wrote_once: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    /// Accepts `accept` bytes, then reports `WouldBlock` `stalls` times,
    /// then accepts everything.
    struct StallingWriter {
        accept: usize,
        stalls: usize,
        data: Vec<u8>,
    }

    impl StallingWriter {
        fn new(accept: usize, stalls: usize) -> Self {
            Self {
                accept,
                stalls,
                data: Vec::new(),
            }
        }
    }

    impl Write for StallingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.accept > 0 {
                let n = buf.len().min(self.accept);
                self.accept -= n;
                self.data.extend_from_slice(&buf[..n]);
                return Ok(n);
            }
            if self.stalls > 0 {
                self.stalls -= 1;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
