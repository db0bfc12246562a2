//! Round-trip and split-delivery properties for the stream codecs.

use bytes::Bytes;
use hearth_protocol::{Frame, Protocol, RawFramedCodec, WebSocketCodec};
use proptest::prelude::*;

/// Builds a client-to-server WebSocket frame (always masked).
fn client_frame(key: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x82];
    let len = payload.len();
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
    out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
    out
}

/// Feeds `bytes` to a fresh raw decoder using the given cut points.
fn decode_in_chunks(bytes: &[u8], cuts: &[usize]) -> Vec<Frame> {
    let mut codec = RawFramedCodec::new();
    let mut frames = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        let end = cut.clamp(start, bytes.len());
        frames.extend(codec.decode(&bytes[start..end]).unwrap());
        start = end;
    }
    frames.extend(codec.decode(&bytes[start..]).unwrap());
    frames
}

// =========================================================================
// RawFramed round trip across both header forms
// =========================================================================

#[test]
fn test_raw_round_trip_boundary_sizes() {
    for size in [0usize, 1, 65_534, 65_535, 65_536, 1_000_000] {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let encoded = RawFramedCodec::encode(&payload).unwrap();

        let expected_header = if size < 0xFFFF { 2 } else { 6 };
        assert_eq!(encoded.len(), expected_header + size, "size {size}");

        let mut codec = RawFramedCodec::new();
        let frames = codec.decode(&encoded).unwrap();
        assert_eq!(frames, vec![Frame::Message(Bytes::from(payload))], "size {size}");
    }
}

#[test]
fn test_raw_byte_at_a_time_delivery() {
    let payload = vec![42u8; 70_000];
    let encoded = RawFramedCodec::encode(&payload).unwrap();

    let mut codec = RawFramedCodec::new();
    let mut frames = Vec::new();
    for byte in &encoded {
        frames.extend(codec.decode(std::slice::from_ref(byte)).unwrap());
    }
    assert_eq!(frames, vec![Frame::Message(Bytes::from(payload))]);
}

#[test]
fn test_websocket_known_mask_decodes_plaintext() {
    let key = [0xDE, 0xAD, 0xBE, 0xEF];
    let plaintext = b"the quick brown fox";
    let mut codec = WebSocketCodec::new();
    let frames = codec.decode(&client_frame(key, plaintext)).unwrap();
    assert_eq!(frames, vec![Frame::Message(Bytes::from_static(plaintext))]);
}

#[test]
fn test_protocol_encode_matches_codec_encode() {
    assert_eq!(
        Protocol::RawFramed.encode(b"abc").unwrap(),
        RawFramedCodec::encode(b"abc").unwrap()
    );
    assert_eq!(
        Protocol::WebSocket.encode(b"abc").unwrap(),
        WebSocketCodec::encode(b"abc")
    );
}

// =========================================================================
// Split delivery
// =========================================================================

proptest! {
    #[test]
    fn prop_raw_split_delivery_yields_one_identical_message(
        payload in proptest::collection::vec(any::<u8>(), 0..4096),
        mut cuts in proptest::collection::vec(0usize..4200, 1..16),
    ) {
        let encoded = RawFramedCodec::encode(&payload).unwrap();
        cuts.sort_unstable();
        let frames = decode_in_chunks(&encoded, &cuts);
        prop_assert_eq!(frames, vec![Frame::Message(Bytes::from(payload))]);
    }

    #[test]
    fn prop_websocket_split_delivery_yields_one_identical_message(
        payload in proptest::collection::vec(any::<u8>(), 0..2048),
        key in any::<[u8; 4]>(),
        mut cuts in proptest::collection::vec(0usize..2100, 1..12),
    ) {
        let encoded = client_frame(key, &payload);
        cuts.sort_unstable();

        let mut codec = WebSocketCodec::new();
        let mut frames = Vec::new();
        let mut start = 0;
        for cut in cuts {
            let end = cut.clamp(start, encoded.len());
            frames.extend(codec.decode(&encoded[start..end]).unwrap());
            start = end;
        }
        frames.extend(codec.decode(&encoded[start..]).unwrap());

        prop_assert_eq!(frames, vec![Frame::Message(Bytes::from(payload))]);
    }

    #[test]
    fn prop_raw_many_messages_in_one_buffer(
        payloads in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..300), 1..20),
    ) {
        let mut stream = Vec::new();
        for p in &payloads {
            stream.extend(RawFramedCodec::encode(p).unwrap());
        }
        let mut codec = RawFramedCodec::new();
        let frames = codec.decode(&stream).unwrap();
        let expected: Vec<Frame> = payloads
            .into_iter()
            .map(|p| Frame::Message(Bytes::from(p)))
            .collect();
        prop_assert_eq!(frames, expected);
    }
}
