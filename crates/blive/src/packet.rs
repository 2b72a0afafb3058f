//! Binary frame codec for the live message socket.
//!
//! Every frame carries a fixed 16 byte header followed by the body:
//!
//! ```text
//! [u32 total_len][u16 header_len][u16 version][u32 operation][u32 sequence][body..]
//! ```
//!
//! All integers are big-endian. Compressed bodies (zlib / brotli) expand into
//! zero or more complete frames laid out back-to-back.

use std::io::Read;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use serde_json::Value;
use tracing::warn;

use crate::error::{DanmakuError, Result};

/// Header length for the implemented protocol revision.
pub const HEADER_LEN: usize = 16;

/// Operation codes.
pub mod op {
    pub const HEARTBEAT: u32 = 2;
    pub const HEARTBEAT_REPLY: u32 = 3;
    pub const COMMAND: u32 = 5;
    pub const AUTH: u32 = 7;
    pub const AUTH_REPLY: u32 = 8;
}

/// Protocol versions.
pub mod ver {
    pub const RAW_JSON: u16 = 0;
    pub const POPULARITY: u16 = 1;
    pub const ZLIB: u16 = 2;
    pub const BROTLI: u16 = 3;
}

/// A single decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header_len: u16,
    pub version: u16,
    pub operation: u32,
    pub sequence: u32,
    pub body: Bytes,
}

impl Packet {
    /// Build a client-originated frame (uncompressed, version 1).
    pub fn new(operation: u32, sequence: u32, body: impl Into<Bytes>) -> Self {
        Self {
            header_len: HEADER_LEN as u16,
            version: ver::POPULARITY,
            operation,
            sequence,
            body: body.into(),
        }
    }

    /// Declared total length of the frame, header included.
    pub fn total_len(&self) -> usize {
        self.header_len as usize + self.body.len()
    }

    /// Parse the frame starting at `offset` inside `buf`.
    ///
    /// The body is a zero-copy slice of `buf`.
    pub fn parse_at(buf: &Bytes, offset: usize) -> Result<Self> {
        let available = buf.len().saturating_sub(offset);
        if available < HEADER_LEN {
            return Err(DanmakuError::malformed(format!(
                "buffer too short for header at offset {offset}: {available} < {HEADER_LEN} bytes"
            )));
        }

        let data = &buf[offset..];
        let total_len = BigEndian::read_u32(&data[0..4]) as usize;
        let header_len = BigEndian::read_u16(&data[4..6]);
        let version = BigEndian::read_u16(&data[6..8]);
        let operation = BigEndian::read_u32(&data[8..12]);
        let sequence = BigEndian::read_u32(&data[12..16]);

        if (header_len as usize) < HEADER_LEN || total_len < header_len as usize {
            return Err(DanmakuError::malformed(format!(
                "inconsistent lengths at offset {offset}: total={total_len}, header={header_len}"
            )));
        }
        if total_len > available {
            return Err(DanmakuError::malformed(format!(
                "declared length {total_len} at offset {offset} runs past buffer of {available} bytes"
            )));
        }

        let body = buf.slice(offset + header_len as usize..offset + total_len);
        Ok(Self {
            header_len,
            version,
            operation,
            sequence,
            body,
        })
    }

    /// Serialize the frame.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.total_len());
        out.put_u32(self.total_len() as u32);
        out.put_u16(self.header_len);
        out.put_u16(self.version);
        out.put_u32(self.operation);
        out.put_u32(self.sequence);
        out.put_slice(&self.body);
        out.freeze()
    }

    /// Decode the body according to the protocol version.
    pub fn decode_body(&self) -> Result<Body> {
        match self.version {
            ver::ZLIB => Ok(decode_nested(&decompress_zlib(&self.body)?)),
            ver::BROTLI => Ok(decode_nested(&decompress_brotli(&self.body)?)),
            _ => self.decode_single().map(Body::Single),
        }
    }

    fn decode_single(&self) -> Result<BusinessMessage> {
        let payload = match self.version {
            ver::RAW_JSON => Payload::Json(parse_json(&self.body)?),
            // Client-style frames reuse version 1 for JSON bodies; only the
            // heartbeat reply carries a bare integer.
            ver::POPULARITY
                if self.operation != op::HEARTBEAT_REPLY && self.body.first() == Some(&b'{') =>
            {
                Payload::Json(parse_json(&self.body)?)
            }
            ver::POPULARITY => {
                if self.body.len() < 4 {
                    return Err(DanmakuError::decode(format!(
                        "raw-int body too short: {} bytes",
                        self.body.len()
                    )));
                }
                Payload::Popularity(BigEndian::read_u32(&self.body[0..4]))
            }
            ver::ZLIB | ver::BROTLI => {
                return Err(DanmakuError::decode(
                    "nested frame is compressed again, only one level is supported",
                ));
            }
            other => {
                return Err(DanmakuError::decode(format!(
                    "unknown protocol version {other}"
                )));
            }
        };

        Ok(BusinessMessage {
            operation: self.operation,
            payload,
        })
    }
}

/// Decode a single frame from the start of `data`.
pub fn decode(data: &[u8]) -> Result<Packet> {
    Packet::parse_at(&Bytes::copy_from_slice(data), 0)
}

/// Serialize a client frame.
pub fn encode(operation: u32, sequence: u32, body: &[u8]) -> Bytes {
    Packet::new(operation, sequence, Bytes::copy_from_slice(body)).encode()
}

/// The application payload carried by a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Popularity(u32),
}

/// A decoded business message together with the operation of its frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BusinessMessage {
    pub operation: u32,
    pub payload: Payload,
}

/// Result of decoding a frame body.
#[derive(Debug)]
pub enum Body {
    Single(BusinessMessage),
    /// Messages recovered from a compressed body, in wire order. `errors` holds
    /// what went wrong for frames that could not be decoded; a framing error
    /// ends the walk.
    Batch {
        messages: Vec<BusinessMessage>,
        errors: Vec<DanmakuError>,
    },
}

impl Body {
    /// Flatten into the recovered messages, reporting contained errors.
    pub fn into_messages(self) -> (Vec<BusinessMessage>, Vec<DanmakuError>) {
        match self {
            Body::Single(msg) => (vec![msg], Vec::new()),
            Body::Batch { messages, errors } => (messages, errors),
        }
    }
}

/// Cursor over concatenated frames in an immutable buffer.
///
/// Stops after the first framing error, since nothing after it can be located.
pub struct Packets {
    buf: Bytes,
    offset: usize,
    failed: bool,
}

impl Packets {
    pub fn new(buf: Bytes) -> Self {
        Self {
            buf,
            offset: 0,
            failed: false,
        }
    }

    /// Current byte offset into the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total buffer length.
    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }
}

impl Iterator for Packets {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }

        match Packet::parse_at(&self.buf, self.offset) {
            Ok(packet) => {
                self.offset += packet.total_len();
                Some(Ok(packet))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn decode_nested(decompressed: &[u8]) -> Body {
    let mut messages = Vec::new();
    let mut errors = Vec::new();
    let mut packets = Packets::new(Bytes::copy_from_slice(decompressed));

    while let Some(next) = packets.next() {
        match next.and_then(|packet| packet.decode_single()) {
            Ok(msg) => messages.push(msg),
            Err(e @ DanmakuError::MalformedFrame(_)) => {
                warn!(
                    "Dropping remainder of compressed body at offset {} of {}: {}",
                    packets.offset(),
                    packets.buffer_len(),
                    e
                );
                errors.push(DanmakuError::decode(e.to_string()));
            }
            Err(e) => {
                warn!("Skipping nested frame at offset {}: {}", packets.offset(), e);
                errors.push(e);
            }
        }
    }

    Body::Batch { messages, errors }
}

fn parse_json(body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| DanmakuError::decode(format!("invalid JSON body: {e}")))
}

/// Decompress zlib data.
fn decompress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| DanmakuError::decode(format!("zlib decompression failed: {e}")))?;
    Ok(decompressed)
}

/// Decompress brotli data.
fn decompress_brotli(data: &[u8]) -> Result<Vec<u8>> {
    let mut decompressed = Vec::new();
    brotli::BrotliDecompress(&mut std::io::Cursor::new(data), &mut decompressed)
        .map_err(|e| DanmakuError::decode(format!("brotli decompression failed: {e}")))?;
    Ok(decompressed)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use rstest::rstest;
    use std::io::Write;

    /// Build a server-style frame with an explicit version.
    pub(crate) fn server_frame(version: u16, operation: u32, body: &[u8]) -> Vec<u8> {
        let mut packet = Packet::new(operation, 0, Bytes::copy_from_slice(body));
        packet.version = version;
        packet.encode().to_vec()
    }

    pub(crate) fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    pub(crate) fn brotli_compress(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
            writer.write_all(data).unwrap();
        }
        out
    }

    fn commands(n: usize) -> Vec<u8> {
        (0..n)
            .flat_map(|i| {
                let body = format!(r#"{{"cmd":"TEST","index":{i}}}"#);
                server_frame(ver::RAW_JSON, op::COMMAND, body.as_bytes())
            })
            .collect()
    }

    #[test]
    fn test_captured_frames() {
        // Auth reply followed by a heartbeat reply, as sent by the server.
        let data = hex::decode(concat!(
            "0000001a001000010000000800000001",
            "7b22636f6465223a307d",
            "00000014001000010000000300000000",
            "000004d2",
        ))
        .unwrap();
        let packets: Vec<Packet> = Packets::new(Bytes::from(data))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(packets.len(), 2);

        assert_eq!(packets[0].operation, op::AUTH_REPLY);
        assert_eq!(packets[0].sequence, 1);
        assert_eq!(&packets[0].body[..], br#"{"code":0}"#);

        let (messages, _) = packets[1].decode_body().unwrap().into_messages();
        assert_eq!(messages[0].payload, Payload::Popularity(1234));
    }

    #[rstest]
    #[case(op::AUTH, 1, br#"{"roomid":1}"#.to_vec())]
    #[case(op::HEARTBEAT, 42, b"[object Object]".to_vec())]
    #[case(op::HEARTBEAT, u32::MAX, Vec::new())]
    fn test_encode_decode_preserves_fields(
        #[case] operation: u32,
        #[case] sequence: u32,
        #[case] body: Vec<u8>,
    ) {
        let bytes = encode(operation, sequence, &body);
        let packet = decode(&bytes).unwrap();

        assert_eq!(packet.operation, operation);
        assert_eq!(packet.sequence, sequence);
        assert_eq!(&packet.body[..], &body[..]);
        assert_eq!(packet.header_len as usize, HEADER_LEN);
        assert_eq!(packet.version, ver::POPULARITY);
    }

    #[test]
    fn test_encode_layout() {
        let packet = encode(op::AUTH, 1, b"test");

        assert_eq!(BigEndian::read_u32(&packet[0..4]), 20);
        assert_eq!(BigEndian::read_u16(&packet[4..6]), 16);
        assert_eq!(BigEndian::read_u16(&packet[6..8]), 1);
        assert_eq!(BigEndian::read_u32(&packet[8..12]), op::AUTH);
        assert_eq!(BigEndian::read_u32(&packet[12..16]), 1);
        assert_eq!(&packet[16..], b"test");
    }

    #[test]
    fn test_decode_short_header() {
        let err = decode(&[0, 0, 0, 16, 0]).unwrap_err();
        assert!(matches!(err, DanmakuError::MalformedFrame(_)));
    }

    #[test]
    fn test_decode_declared_length_past_buffer() {
        let mut bytes = encode(op::COMMAND, 0, b"{}").to_vec();
        bytes.truncate(bytes.len() - 1);
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, DanmakuError::MalformedFrame(_)));
        assert!(err.to_string().contains("runs past buffer"));
    }

    #[test]
    fn test_decode_inconsistent_header_len() {
        let mut bytes = encode(op::COMMAND, 0, b"{}").to_vec();
        bytes[4..6].copy_from_slice(&40u16.to_be_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(DanmakuError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_heartbeat_reply_popularity() {
        let bytes = server_frame(ver::POPULARITY, op::HEARTBEAT_REPLY, &1234u32.to_be_bytes());
        let body = decode(&bytes).unwrap().decode_body().unwrap();

        match body {
            Body::Single(msg) => {
                assert_eq!(msg.operation, op::HEARTBEAT_REPLY);
                assert_eq!(msg.payload, Payload::Popularity(1234));
            }
            other => panic!("Unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_auth_reply_json_with_version_one() {
        let bytes = server_frame(ver::POPULARITY, op::AUTH_REPLY, br#"{"code":0}"#);
        let (messages, errors) = decode(&bytes)
            .unwrap()
            .decode_body()
            .unwrap()
            .into_messages();
        assert!(errors.is_empty());
        assert_eq!(
            messages[0].payload,
            Payload::Json(serde_json::json!({"code": 0}))
        );
    }

    #[rstest]
    #[case(ver::ZLIB)]
    #[case(ver::BROTLI)]
    fn test_compressed_body_yields_inner_frames_in_order(#[case] version: u16) {
        let inner = commands(3);
        let compressed = match version {
            ver::ZLIB => zlib(&inner),
            _ => brotli_compress(&inner),
        };
        let outer = server_frame(version, op::COMMAND, &compressed);

        let (messages, errors) = decode(&outer)
            .unwrap()
            .decode_body()
            .unwrap()
            .into_messages();

        assert!(errors.is_empty());
        assert_eq!(messages.len(), 3);
        for (i, msg) in messages.iter().enumerate() {
            match &msg.payload {
                Payload::Json(v) => assert_eq!(v["index"], i),
                other => panic!("Unexpected payload: {other:?}"),
            }
        }
    }

    #[rstest]
    #[case(ver::ZLIB)]
    #[case(ver::BROTLI)]
    fn test_truncated_inner_frame_is_contained(#[case] version: u16) {
        let mut inner = commands(3);
        inner.truncate(inner.len() - 3);
        let compressed = match version {
            ver::ZLIB => zlib(&inner),
            _ => brotli_compress(&inner),
        };
        let outer = server_frame(version, op::COMMAND, &compressed);

        let (messages, errors) = decode(&outer)
            .unwrap()
            .decode_body()
            .unwrap()
            .into_messages();

        assert_eq!(messages.len(), 2);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], DanmakuError::Decode(_)));
    }

    #[test]
    fn test_corrupt_zlib_is_decode_error() {
        let outer = server_frame(ver::ZLIB, op::COMMAND, b"definitely not zlib");
        let err = decode(&outer).unwrap().decode_body().unwrap_err();
        assert!(matches!(err, DanmakuError::Decode(_)));
    }

    #[test]
    fn test_empty_compressed_body_yields_nothing() {
        let outer = server_frame(ver::ZLIB, op::COMMAND, &zlib(&[]));
        let (messages, errors) = decode(&outer)
            .unwrap()
            .decode_body()
            .unwrap()
            .into_messages();
        assert!(messages.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn test_packets_cursor_walks_and_stops_on_error() {
        let mut buf = commands(2);
        buf.extend_from_slice(&[0, 0, 0, 99, 0, 16]);

        let mut packets = Packets::new(Bytes::from(buf));
        assert!(packets.next().unwrap().is_ok());
        assert!(packets.next().unwrap().is_ok());
        assert!(matches!(
            packets.next(),
            Some(Err(DanmakuError::MalformedFrame(_)))
        ));
        assert!(packets.next().is_none());
    }

    #[test]
    fn test_unknown_version_is_decode_error() {
        let bytes = server_frame(9, op::COMMAND, b"{}");
        assert!(matches!(
            decode(&bytes).unwrap().decode_body(),
            Err(DanmakuError::Decode(_))
        ));
    }
}
