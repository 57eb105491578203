use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Header: did (1) + sid (1) + daddr (2) + saddr (2) + type (1) + len (1) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest payload the one-byte length field can describe.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Largest complete frame on the wire.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD;

/// The fixed message header.
///
/// Wire format:
/// ```text
/// ┌──────┬──────┬───────────┬───────────┬──────┬──────┬─────────────────┐
/// │ did  │ sid  │ daddr     │ saddr     │ type │ len  │ payload         │
/// │ (1B) │ (1B) │ (2B LE)   │ (2B LE)   │ (1B) │ (1B) │ (len bytes)     │
/// └──────┴──────┴───────────┴───────────┴──────┴──────┴─────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    /// Module the message is addressed to.
    pub dest_module: u8,
    /// Module that sent the message.
    pub src_module: u8,
    /// Node the message is addressed to.
    pub dest_addr: u16,
    /// Node that sent the message.
    pub src_addr: u16,
    /// Application message kind.
    pub msg_type: u8,
    /// Number of payload bytes following the header.
    pub payload_len: u8,
}

impl Header {
    /// Parse a header from its 8 wire bytes.
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            dest_module: bytes[0],
            src_module: bytes[1],
            dest_addr: u16::from_le_bytes([bytes[2], bytes[3]]),
            src_addr: u16::from_le_bytes([bytes[4], bytes[5]]),
            msg_type: bytes[6],
            payload_len: bytes[7],
        }
    }

    /// Append the 8 wire bytes of this header to `dst`.
    pub fn write(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(self.dest_module);
        dst.put_u8(self.src_module);
        dst.put_u16_le(self.dest_addr);
        dst.put_u16_le(self.src_addr);
        dst.put_u8(self.msg_type);
        dst.put_u8(self.payload_len);
    }

    /// The 8 wire bytes of this header.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let dest = self.dest_addr.to_le_bytes();
        let src = self.src_addr.to_le_bytes();
        [
            self.dest_module,
            self.src_module,
            dest[0],
            dest[1],
            src[0],
            src[1],
            self.msg_type,
            self.payload_len,
        ]
    }
}

/// A complete bus message: header plus exactly `payload_len` payload bytes.
///
/// Messages are immutable. The length field is always derived from the
/// payload, so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: Header,
    payload: Bytes,
}

impl Message {
    /// Build a message, rejecting payloads longer than [`MAX_PAYLOAD`].
    pub fn new(
        dest_module: u8,
        src_module: u8,
        dest_addr: u16,
        src_addr: u16,
        msg_type: u8,
        payload: impl Into<Bytes>,
    ) -> Result<Self> {
        let payload = payload.into();
        let payload_len = checked_len(payload.len())?;
        Ok(Self {
            header: Header {
                dest_module,
                src_module,
                dest_addr,
                src_addr,
                msg_type,
                payload_len,
            },
            payload,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn dest_module(&self) -> u8 {
        self.header.dest_module
    }

    pub fn src_module(&self) -> u8 {
        self.header.src_module
    }

    pub fn dest_addr(&self) -> u16 {
        self.header.dest_addr
    }

    pub fn src_addr(&self) -> u16 {
        self.header.src_addr
    }

    pub fn msg_type(&self) -> u8 {
        self.header.msg_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// The total wire size of this message (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

fn checked_len(len: usize) -> Result<u8> {
    u8::try_from(len).map_err(|_| FrameError::PayloadTooLarge {
        size: len,
        max: MAX_PAYLOAD,
    })
}

/// Encode a message into the wire format.
pub fn encode_message(message: &Message, dst: &mut BytesMut) -> Result<()> {
    // Message::new already bounds the payload; re-check so a hand-built
    // header can never put a lying length byte on the wire.
    checked_len(message.payload.len())?;
    dst.reserve(message.wire_size());
    message.header.write(dst);
    dst.put_slice(&message.payload);
    Ok(())
}

/// Decode a message from a buffer.
///
/// Returns `None` if the buffer doesn't contain a complete frame yet. On
/// success, consumes exactly that frame's bytes; anything after it stays in
/// the buffer as the start of the next frame.
pub fn decode_message(src: &mut BytesMut) -> Option<Message> {
    if src.len() < HEADER_SIZE {
        return None; // Need more data
    }

    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&src[..HEADER_SIZE]);
    let header = Header::parse(&raw);

    let total = HEADER_SIZE + header.payload_len as usize;
    if src.len() < total {
        return None; // Need more data
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(header.payload_len as usize).freeze();

    Some(Message { header, payload })
}

/// Number of bytes still missing before `buffered` holds one complete frame.
///
/// Zero means a full frame is present. Before the header is complete only the
/// missing header bytes are counted, since the payload length is unknown.
pub fn frame_remaining(buffered: &[u8]) -> usize {
    if buffered.len() < HEADER_SIZE {
        return HEADER_SIZE - buffered.len();
    }
    let total = HEADER_SIZE + buffered[HEADER_SIZE - 1] as usize;
    total.saturating_sub(buffered.len())
}

/// Configuration for framed streams.
#[derive(Debug, Clone, Default)]
pub struct FrameConfig {
    /// Read timeout for blocking operations. `None` blocks until data arrives.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: [u8; 12] = [
        0x01, 0x02, 0x03, 0x00, 0x04, 0x00, 0x21, 0x04, 0xAA, 0xBB, 0xCC, 0xDD,
    ];

    #[test]
    fn decodes_reference_frame() {
        let mut buf = BytesMut::from(&SCENARIO[..]);
        let msg = decode_message(&mut buf).unwrap();

        assert_eq!(msg.dest_module(), 1);
        assert_eq!(msg.src_module(), 2);
        assert_eq!(msg.dest_addr(), 3);
        assert_eq!(msg.src_addr(), 4);
        assert_eq!(msg.msg_type(), 33);
        assert_eq!(msg.header().payload_len, 4);
        assert_eq!(msg.payload().as_ref(), &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(buf.is_empty());
    }

    #[test]
    fn encodes_reference_frame() {
        let msg = Message::new(1, 2, 3, 4, 33, vec![0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        let mut buf = BytesMut::new();
        encode_message(&msg, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &SCENARIO);
    }

    #[test]
    fn header_round_trip_at_field_limits() {
        let headers = [
            Header {
                dest_module: 0,
                src_module: 0,
                dest_addr: 0,
                src_addr: 0,
                msg_type: 0,
                payload_len: 0,
            },
            Header {
                dest_module: u8::MAX,
                src_module: u8::MAX,
                dest_addr: u16::MAX,
                src_addr: u16::MAX,
                msg_type: u8::MAX,
                payload_len: u8::MAX,
            },
            Header {
                dest_module: 0x80,
                src_module: 0x97,
                dest_addr: 0x1234,
                src_addr: 0xFFFE,
                msg_type: 32,
                payload_len: 17,
            },
        ];

        for header in headers {
            let mut buf = BytesMut::new();
            header.write(&mut buf);
            assert_eq!(buf.as_ref(), &header.to_bytes());

            let raw: [u8; HEADER_SIZE] = buf.as_ref().try_into().unwrap();
            assert_eq!(Header::parse(&raw), header);
        }
    }

    #[test]
    fn addresses_are_little_endian() {
        let msg = Message::new(0, 0, 0x0102, 0x0304, 0, Bytes::new()).unwrap();
        let bytes = msg.header().to_bytes();
        assert_eq!(&bytes[2..6], &[0x02, 0x01, 0x04, 0x03]);
    }

    #[test]
    fn decode_incomplete_header() {
        let mut buf = BytesMut::from(&SCENARIO[..5]);
        assert!(decode_message(&mut buf).is_none());
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn decode_incomplete_payload() {
        let mut buf = BytesMut::from(&SCENARIO[..HEADER_SIZE + 2]);
        assert!(decode_message(&mut buf).is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2);
    }

    #[test]
    fn decode_keeps_leftover_bytes() {
        let mut buf = BytesMut::from(&SCENARIO[..]);
        buf.extend_from_slice(&[0x09, 0x08, 0x07]);

        let msg = decode_message(&mut buf).unwrap();
        assert_eq!(msg.msg_type(), 33);
        assert_eq!(buf.as_ref(), &[0x09, 0x08, 0x07]);
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let first = Message::new(1, 1, 1, 1, 40, Bytes::from_static(b"first")).unwrap();
        let second = Message::new(2, 2, 2, 2, 41, Bytes::new()).unwrap();
        let mut buf = BytesMut::new();
        encode_message(&first, &mut buf).unwrap();
        encode_message(&second, &mut buf).unwrap();

        assert_eq!(decode_message(&mut buf).unwrap(), first);
        assert_eq!(decode_message(&mut buf).unwrap(), second);
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_payload() {
        let msg = Message::new(7, 7, 7, 7, 7, Bytes::new()).unwrap();
        let mut buf = BytesMut::new();
        encode_message(&msg, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);

        let decoded = decode_message(&mut buf).unwrap();
        assert!(decoded.payload().is_empty());
        assert_eq!(decoded.header().payload_len, 0);
    }

    #[test]
    fn max_payload_accepted_and_oversize_rejected() {
        let msg = Message::new(0, 0, 0, 0, 0, vec![0x5A; MAX_PAYLOAD]).unwrap();
        assert_eq!(msg.wire_size(), MAX_FRAME_SIZE);
        assert_eq!(msg.header().payload_len, u8::MAX);

        let err = Message::new(0, 0, 0, 0, 0, vec![0; MAX_PAYLOAD + 1]).unwrap_err();
        assert!(matches!(
            err,
            FrameError::PayloadTooLarge { size: 256, max: 255 }
        ));
    }

    #[test]
    fn frame_remaining_tracks_header_then_payload() {
        assert_eq!(frame_remaining(&[]), HEADER_SIZE);
        assert_eq!(frame_remaining(&SCENARIO[..3]), 5);
        assert_eq!(frame_remaining(&SCENARIO[..HEADER_SIZE]), 4);
        assert_eq!(frame_remaining(&SCENARIO[..10]), 2);
        assert_eq!(frame_remaining(&SCENARIO), 0);
    }
}
