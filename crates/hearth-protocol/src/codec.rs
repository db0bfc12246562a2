//! Stream codecs: turn a byte stream into discrete messages and back.
//!
//! Both decoders own a [`BytesMut`] accumulator. Callers feed whatever the
//! socket produced, in chunks of any size, and get back every message that
//! became complete. Encoding is stateless and lives on [`Protocol`], so a
//! writer can frame payloads without touching the reader-owned decoder.

use bytes::{Buf, Bytes, BytesMut};

use crate::ProtocolError;

/// Default upper bound for a single decoded message (16 MiB).
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// ASCII marker a raw client sends before its first frame.
pub const RAW_MARKER: &[u8; 2] = b"GS";

/// One unit produced by a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete application message.
    Message(Bytes),
    /// The peer asked to close the connection.
    Close,
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// The framing a connection negotiated during sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Little-endian length-prefixed frames after a `GS` marker.
    RawFramed,
    /// RFC 6455 frames after an HTTP upgrade.
    WebSocket,
}

impl Protocol {
    /// Creates a fresh decoder for this protocol.
    pub fn codec(self, max_message_len: usize) -> ProtocolCodec {
        match self {
            Self::RawFramed => {
                ProtocolCodec::RawFramed(RawFramedCodec::with_max_len(max_message_len))
            }
            Self::WebSocket => {
                ProtocolCodec::WebSocket(WebSocketCodec::with_max_len(max_message_len))
            }
        }
    }

    /// Frames an outgoing payload.
    pub fn encode(self, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::RawFramed => RawFramedCodec::encode(payload),
            Self::WebSocket => Ok(WebSocketCodec::encode(payload)),
        }
    }
}

// ---------------------------------------------------------------------------
// ProtocolCodec
// ---------------------------------------------------------------------------

/// Closed set of decoders a connection can hold.
#[derive(Debug)]
pub enum ProtocolCodec {
    RawFramed(RawFramedCodec),
    WebSocket(WebSocketCodec),
}

impl ProtocolCodec {
    /// Which protocol this decoder speaks.
    pub fn protocol(&self) -> Protocol {
        match self {
            Self::RawFramed(_) => Protocol::RawFramed,
            Self::WebSocket(_) => Protocol::WebSocket,
        }
    }

    /// Appends `data` to the accumulator and returns every complete frame.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        match self {
            Self::RawFramed(codec) => codec.decode(data),
            Self::WebSocket(codec) => codec.decode(data),
        }
    }

    /// Changes the message size limit for subsequent frames.
    pub fn set_max_len(&mut self, max_len: usize) {
        match self {
            Self::RawFramed(codec) => codec.max_len = max_len,
            Self::WebSocket(codec) => codec.max_len = max_len,
        }
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn buffered(&self) -> usize {
        match self {
            Self::RawFramed(codec) => codec.buf.len(),
            Self::WebSocket(codec) => codec.buf.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// RawFramedCodec
// ---------------------------------------------------------------------------

/// Length-prefixed framing: `u16 LE length`, or `0xFFFF` followed by a
/// `u32 LE` extended length, then the payload.
#[derive(Debug)]
pub struct RawFramedCodec {
    buf: BytesMut,
    max_len: usize,
}

impl RawFramedCodec {
    /// Short-form value announcing that a 4-byte length follows.
    pub const EXTENDED_MARKER: u16 = 0xFFFF;

    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_MESSAGE_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4 * 1024),
            max_len,
        }
    }

    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();
        while let Some(payload) = self.next_frame()? {
            frames.push(Frame::Message(payload));
        }
        Ok(frames)
    }

    fn next_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.buf.len() < 2 {
            return Ok(None);
        }
        let short = u16::from_le_bytes([self.buf[0], self.buf[1]]);
        let (header_len, len) = if short == Self::EXTENDED_MARKER {
            if self.buf.len() < 6 {
                return Ok(None);
            }
            let extended =
                u32::from_le_bytes([self.buf[2], self.buf[3], self.buf[4], self.buf[5]]);
            (6, u64::from(extended))
        } else {
            (2, u64::from(short))
        };

        if len > self.max_len as u64 {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_len,
            });
        }
        let len = len as usize;
        if self.buf.len() < header_len + len {
            return Ok(None);
        }

        self.buf.advance(header_len);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Frames `payload`, choosing the short header below `0xFFFF` bytes.
    pub fn encode(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let len = payload.len();
        let mut out;
        if len < Self::EXTENDED_MARKER as usize {
            out = Vec::with_capacity(2 + len);
            out.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            let extended = u32::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
                len: len as u64,
                max: u32::MAX as usize,
            })?;
            out = Vec::with_capacity(6 + len);
            out.extend_from_slice(&Self::EXTENDED_MARKER.to_le_bytes());
            out.extend_from_slice(&extended.to_le_bytes());
        }
        out.extend_from_slice(payload);
        Ok(out)
    }
}

impl Default for RawFramedCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// WebSocketCodec
// ---------------------------------------------------------------------------

const OP_CONTINUATION: u8 = 0x0;
const OP_TEXT: u8 = 0x1;
const OP_BINARY: u8 = 0x2;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;
const OP_PONG: u8 = 0xA;

/// Server side of RFC 6455 framing.
///
/// Decoding is permissive: unmasked client frames are accepted, unknown
/// opcodes are skipped, and ping/pong frames are consumed without a reply.
/// Fragmented messages are reassembled before they are emitted.
#[derive(Debug)]
pub struct WebSocketCodec {
    buf: BytesMut,
    max_len: usize,
    /// Opcode and payload of a fragmented message still missing its final frame.
    fragment: Option<(u8, BytesMut)>,
}

impl WebSocketCodec {
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_MESSAGE_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4 * 1024),
            max_len,
            fragment: None,
        }
    }

    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();

        while let Some((fin, opcode, payload)) = self.next_raw_frame()? {
            match opcode {
                OP_CLOSE => {
                    frames.push(Frame::Close);
                    // Nothing after a close frame is meaningful.
                    self.buf.clear();
                    self.fragment = None;
                    break;
                }
                OP_TEXT | OP_BINARY if fin => {
                    self.fragment = None;
                    frames.push(Frame::Message(finish_message(opcode, payload)));
                }
                OP_TEXT | OP_BINARY => {
                    self.fragment = Some((opcode, payload));
                }
                OP_CONTINUATION => {
                    let Some((first_opcode, mut acc)) = self.fragment.take() else {
                        continue;
                    };
                    if acc.len() + payload.len() > self.max_len {
                        return Err(ProtocolError::FrameTooLarge {
                            len: (acc.len() + payload.len()) as u64,
                            max: self.max_len,
                        });
                    }
                    acc.extend_from_slice(&payload);
                    if fin {
                        frames.push(Frame::Message(finish_message(first_opcode, acc)));
                    } else {
                        self.fragment = Some((first_opcode, acc));
                    }
                }
                OP_PING | OP_PONG => {}
                _ => {}
            }
        }

        Ok(frames)
    }

    /// Parses one complete frame off the accumulator, unmasking its payload.
    fn next_raw_frame(&mut self) -> Result<Option<(bool, u8, BytesMut)>, ProtocolError> {
        if self.buf.len() < 2 {
            return Ok(None);
        }
        let fin = self.buf[0] & 0x80 != 0;
        let opcode = self.buf[0] & 0x0F;
        let masked = self.buf[1] & 0x80 != 0;
        let len7 = self.buf[1] & 0x7F;

        let mut header_len = 2usize;
        let len = match len7 {
            126 => {
                if self.buf.len() < 4 {
                    return Ok(None);
                }
                header_len += 2;
                u64::from(u16::from_be_bytes([self.buf[2], self.buf[3]]))
            }
            127 => {
                if self.buf.len() < 10 {
                    return Ok(None);
                }
                header_len += 8;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.buf[2..10]);
                u64::from_be_bytes(raw)
            }
            n => u64::from(n),
        };

        if len > self.max_len as u64 {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_len,
            });
        }

        let mut mask = None;
        if masked {
            if self.buf.len() < header_len + 4 {
                return Ok(None);
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&self.buf[header_len..header_len + 4]);
            mask = Some(key);
            header_len += 4;
        }

        let len = len as usize;
        if self.buf.len() < header_len + len {
            return Ok(None);
        }

        self.buf.advance(header_len);
        let mut payload = self.buf.split_to(len);
        if let Some(key) = mask {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= key[i % 4];
            }
        }
        Ok(Some((fin, opcode, payload)))
    }

    /// Frames `payload` as a single unmasked binary frame with fin set.
    pub fn encode(payload: &[u8]) -> Vec<u8> {
        let len = payload.len();
        let mut out = Vec::with_capacity(len + 10);
        out.push(0x80 | OP_BINARY);
        if len < 126 {
            out.push(len as u8);
        } else if len <= u16::MAX as usize {
            out.push(126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
        out.extend_from_slice(payload);
        out
    }
}

impl Default for WebSocketCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Text payloads are re-validated as UTF-8; invalid sequences are replaced.
fn finish_message(opcode: u8, payload: BytesMut) -> Bytes {
    if opcode == OP_TEXT && std::str::from_utf8(&payload).is_err() {
        return Bytes::from(String::from_utf8_lossy(&payload).into_owned());
    }
    payload.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masked_frame(fin: bool, opcode: u8, key: [u8; 4], plaintext: &[u8]) -> Vec<u8> {
        let first = if fin { 0x80 } else { 0x00 };
        let mut out = vec![first | opcode];
        let len = plaintext.len();
        if len < 126 {
            out.push(0x80 | len as u8);
        } else if len <= u16::MAX as usize {
            out.push(0x80 | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(0x80 | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
        out.extend_from_slice(&key);
        out.extend(plaintext.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        out
    }

    // =====================================================================
    // RawFramedCodec
    // =====================================================================

    #[test]
    fn test_raw_encode_short_header() {
        let encoded = RawFramedCodec::encode(b"abc").unwrap();
        assert_eq!(encoded, vec![3, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn test_raw_encode_switches_to_extended_at_marker() {
        let below = RawFramedCodec::encode(&vec![0u8; 0xFFFE]).unwrap();
        assert_eq!(&below[..2], &0xFFFEu16.to_le_bytes());
        assert_eq!(below.len(), 2 + 0xFFFE);

        let at = RawFramedCodec::encode(&vec![0u8; 0xFFFF]).unwrap();
        assert_eq!(&at[..2], &[0xFF, 0xFF]);
        assert_eq!(&at[2..6], &0xFFFFu32.to_le_bytes());
        assert_eq!(at.len(), 6 + 0xFFFF);
    }

    #[test]
    fn test_raw_decode_waits_for_full_payload() {
        let mut codec = RawFramedCodec::new();
        assert!(codec.decode(&[5, 0, b'h', b'e']).unwrap().is_empty());
        let frames = codec.decode(b"llo").unwrap();
        assert_eq!(frames, vec![Frame::Message(Bytes::from_static(b"hello"))]);
    }

    #[test]
    fn test_raw_decode_multiple_messages_per_read() {
        let mut stream = RawFramedCodec::encode(b"one").unwrap();
        stream.extend(RawFramedCodec::encode(b"").unwrap());
        stream.extend(RawFramedCodec::encode(b"three").unwrap());
        stream.extend_from_slice(&[9, 0, b'x']); // incomplete tail

        let mut codec = RawFramedCodec::new();
        let frames = codec.decode(&stream).unwrap();
        assert_eq!(
            frames,
            vec![
                Frame::Message(Bytes::from_static(b"one")),
                Frame::Message(Bytes::new()),
                Frame::Message(Bytes::from_static(b"three")),
            ]
        );
        assert_eq!(codec.buf.len(), 3);
    }

    #[test]
    fn test_raw_decode_rejects_oversized_header_before_payload_arrives() {
        let mut codec = RawFramedCodec::with_max_len(1024);
        let mut header = vec![0xFF, 0xFF];
        header.extend_from_slice(&(1_000_000u32).to_le_bytes());
        let err = codec.decode(&header).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::FrameTooLarge { len: 1_000_000, max: 1024 }
        ));
    }

    // =====================================================================
    // WebSocketCodec
    // =====================================================================

    #[test]
    fn test_ws_decode_masked_text_frame() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let frame = masked_frame(true, OP_TEXT, key, b"Hello");
        // RFC 6455 section 5.7 example.
        assert_eq!(frame, vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]);

        let mut codec = WebSocketCodec::new();
        let frames = codec.decode(&frame).unwrap();
        assert_eq!(frames, vec![Frame::Message(Bytes::from_static(b"Hello"))]);
    }

    #[test]
    fn test_ws_decode_extended_lengths() {
        let key = [1, 2, 3, 4];
        let medium = vec![7u8; 300];
        let large = vec![9u8; 70_000];
        let mut stream = masked_frame(true, OP_BINARY, key, &medium);
        stream.extend(masked_frame(true, OP_BINARY, key, &large));

        let mut codec = WebSocketCodec::new();
        let frames = codec.decode(&stream).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Frame::Message(Bytes::from(medium)));
        assert_eq!(frames[1], Frame::Message(Bytes::from(large)));
    }

    #[test]
    fn test_ws_close_stops_processing_buffer() {
        let key = [9, 8, 7, 6];
        let mut stream = masked_frame(true, OP_BINARY, key, b"before");
        stream.extend(masked_frame(true, OP_CLOSE, key, &[0x03, 0xE8]));
        stream.extend(masked_frame(true, OP_BINARY, key, b"after"));

        let mut codec = WebSocketCodec::new();
        let frames = codec.decode(&stream).unwrap();
        assert_eq!(
            frames,
            vec![Frame::Message(Bytes::from_static(b"before")), Frame::Close]
        );
        assert!(codec.decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_ws_ping_pong_are_consumed() {
        let key = [0, 0, 0, 1];
        let mut stream = masked_frame(true, OP_PING, key, b"p");
        stream.extend(masked_frame(true, OP_PONG, key, b"q"));
        stream.extend(masked_frame(true, OP_BINARY, key, b"data"));

        let mut codec = WebSocketCodec::new();
        let frames = codec.decode(&stream).unwrap();
        assert_eq!(frames, vec![Frame::Message(Bytes::from_static(b"data"))]);
    }

    #[test]
    fn test_ws_reassembles_fragments() {
        let key = [5, 5, 5, 5];
        let mut stream = masked_frame(false, OP_TEXT, key, b"frag");
        stream.extend(masked_frame(false, OP_CONTINUATION, key, b"men"));
        stream.extend(masked_frame(true, OP_CONTINUATION, key, b"ted"));

        let mut codec = WebSocketCodec::new();
        let frames = codec.decode(&stream).unwrap();
        assert_eq!(frames, vec![Frame::Message(Bytes::from_static(b"fragmented"))]);
    }

    #[test]
    fn test_ws_invalid_utf8_text_is_replaced() {
        let frame = masked_frame(true, OP_TEXT, [0; 4], &[b'a', 0xFF, b'b']);
        let mut codec = WebSocketCodec::new();
        let frames = codec.decode(&frame).unwrap();
        assert_eq!(
            frames,
            vec![Frame::Message(Bytes::from("a\u{FFFD}b".to_string()))]
        );
    }

    #[test]
    fn test_ws_rejects_oversized_frame() {
        let mut codec = WebSocketCodec::with_max_len(10);
        let frame = masked_frame(true, OP_BINARY, [1; 4], &[0u8; 11]);
        assert!(matches!(
            codec.decode(&frame),
            Err(ProtocolError::FrameTooLarge { len: 11, max: 10 })
        ));
    }

    #[test]
    fn test_ws_encode_is_unmasked_single_frame() {
        assert_eq!(WebSocketCodec::encode(b"hi"), vec![0x82, 2, b'h', b'i']);

        let medium = WebSocketCodec::encode(&[0u8; 200]);
        assert_eq!(&medium[..4], &[0x82, 126, 0, 200]);

        let large = WebSocketCodec::encode(&vec![0u8; 70_000]);
        assert_eq!(large[1], 127);
        assert_eq!(&large[2..10], &70_000u64.to_be_bytes());
    }

    #[test]
    fn test_protocol_codec_dispatches_by_kind() {
        let mut codec = Protocol::RawFramed.codec(64);
        assert_eq!(codec.protocol(), Protocol::RawFramed);
        let encoded = Protocol::RawFramed.encode(b"ok").unwrap();
        assert_eq!(
            codec.decode(&encoded).unwrap(),
            vec![Frame::Message(Bytes::from_static(b"ok"))]
        );

        codec.set_max_len(1);
        assert!(codec.decode(&encoded).is_err());
    }
}
