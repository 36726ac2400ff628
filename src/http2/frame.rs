//! HTTP/2 frame wire format.
//!
//! Decoding is incremental: bytes are pushed into a `FrameDecoder` and
//! complete frames come out one at a time. Header blocks are carried as raw
//! bytes; HPACK decoding belongs to the connection state, which owns the
//! dynamic tables.

use super::{flags, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN, PREFACE};
use bytes::{Buf, BytesMut};
use thiserror::Error;

/// HTTP/2 error codes, as carried in RST_STREAM and GOAWAY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
    Unknown(u32),
}

impl StreamErrorCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => StreamErrorCode::NoError,
            0x1 => StreamErrorCode::ProtocolError,
            0x2 => StreamErrorCode::InternalError,
            0x3 => StreamErrorCode::FlowControlError,
            0x4 => StreamErrorCode::SettingsTimeout,
            0x5 => StreamErrorCode::StreamClosed,
            0x6 => StreamErrorCode::FrameSizeError,
            0x7 => StreamErrorCode::RefusedStream,
            0x8 => StreamErrorCode::Cancel,
            0x9 => StreamErrorCode::CompressionError,
            0xa => StreamErrorCode::ConnectError,
            0xb => StreamErrorCode::EnhanceYourCalm,
            0xc => StreamErrorCode::InadequateSecurity,
            0xd => StreamErrorCode::Http11Required,
            other => StreamErrorCode::Unknown(other),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            StreamErrorCode::NoError => 0x0,
            StreamErrorCode::ProtocolError => 0x1,
            StreamErrorCode::InternalError => 0x2,
            StreamErrorCode::FlowControlError => 0x3,
            StreamErrorCode::SettingsTimeout => 0x4,
            StreamErrorCode::StreamClosed => 0x5,
            StreamErrorCode::FrameSizeError => 0x6,
            StreamErrorCode::RefusedStream => 0x7,
            StreamErrorCode::Cancel => 0x8,
            StreamErrorCode::CompressionError => 0x9,
            StreamErrorCode::ConnectError => 0xa,
            StreamErrorCode::EnhanceYourCalm => 0xb,
            StreamErrorCode::InadequateSecurity => 0xc,
            StreamErrorCode::Http11Required => 0xd,
            StreamErrorCode::Unknown(other) => *other,
        }
    }
}

/// Framing and protocol errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Http2Error {
    #[error("invalid connection preface")]
    InvalidPreface,
    #[error("frame of {declared} bytes exceeds max frame size {max}")]
    FrameTooLarge { declared: usize, max: usize },
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("HPACK decoding failed")]
    HpackDecode,
    #[error("connection protocol error ({code:?}): {message}")]
    Connection {
        code: StreamErrorCode,
        message: String,
    },
    #[error("stream {stream_id} protocol error ({code:?}): {message}")]
    Stream {
        stream_id: u32,
        code: StreamErrorCode,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl FrameType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::GoAway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            other => FrameType::Unknown(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(other) => *other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: usize,
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: FramePayload,
}

impl Frame {
    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    Data(DataFrame),
    Headers(HeadersFrame),
    Priority(PriorityFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    Ping(PingFrame),
    GoAway(GoAwayFrame),
    WindowUpdate(WindowUpdateFrame),
    Continuation(ContinuationFrame),
    /// PUSH_PROMISE and unknown frame types are carried opaquely.
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub end_stream: bool,
    pub payload: Vec<u8>,
    /// Padding bytes stripped from the payload; still counted against
    /// flow-control windows.
    pub padding: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    pub end_stream: bool,
    pub end_headers: bool,
    /// Raw HPACK block fragment, padding and priority fields stripped.
    pub header_block: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationFrame {
    pub end_headers: bool,
    pub header_block: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityFrame {
    pub stream_dependency: u32,
    pub weight: u8,
    pub exclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RstStreamFrame {
    pub error_code: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFrame {
    pub settings: Vec<(u16, u32)>,
    pub ack: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingFrame {
    pub opaque_data: [u8; 8],
    pub ack: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoAwayFrame {
    pub last_stream_id: u32,
    pub error_code: u32,
    pub debug_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    pub increment: u32,
}

/// Incremental frame decoder for one direction of one connection.
pub struct FrameDecoder {
    buf: BytesMut,
    expect_preface: bool,
    preface_seen: bool,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Decoder for the client side of a connection, which starts with the
    /// connection preface.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            expect_preface: true,
            preface_seen: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Decoder for the server side, which sends frames immediately.
    pub fn without_preface() -> Self {
        Self {
            buf: BytesMut::new(),
            expect_preface: false,
            preface_seen: true,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Raise the frame-size cap after the peer advertises a larger
    /// SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes pushed but not yet consumed by decoding. Consumed bytes always
    /// end on a frame (or preface) boundary.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// True once the client preface has been consumed.
    pub fn preface_seen(&self) -> bool {
        self.preface_seen
    }

    /// Decode the next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, Http2Error> {
        if self.expect_preface && !self.preface_seen {
            if self.buf.len() < PREFACE.len() {
                return Ok(None);
            }
            if &self.buf[..PREFACE.len()] != PREFACE {
                return Err(Http2Error::InvalidPreface);
            }
            self.buf.advance(PREFACE.len());
            self.preface_seen = true;
        }

        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let length = u32::from_be_bytes([0, self.buf[0], self.buf[1], self.buf[2]]) as usize;
        if length > self.max_frame_size {
            return Err(Http2Error::FrameTooLarge {
                declared: length,
                max: self.max_frame_size,
            });
        }
        if self.buf.len() < FRAME_HEADER_LEN + length {
            return Ok(None);
        }

        let frame_type = FrameType::from_u8(self.buf[3]);
        let frame_flags = self.buf[4];
        let stream_id =
            u32::from_be_bytes([self.buf[5], self.buf[6], self.buf[7], self.buf[8]]) & 0x7fff_ffff;
        self.buf.advance(FRAME_HEADER_LEN);
        let payload = self.buf.split_to(length).to_vec();

        let header = FrameHeader {
            length,
            frame_type,
            flags: frame_flags,
            stream_id,
        };
        let payload = decode_payload(&header, payload)?;
        Ok(Some(Frame { header, payload }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_payload(header: &FrameHeader, payload: Vec<u8>) -> Result<FramePayload, Http2Error> {
    match header.frame_type {
        FrameType::Data => decode_data(header, payload),
        FrameType::Headers => decode_headers(header, payload),
        FrameType::Priority => decode_priority(header, &payload),
        FrameType::RstStream => {
            if payload.len() != 4 {
                return Err(frame_size_error(header, "RST_STREAM payload must be 4 bytes"));
            }
            Ok(FramePayload::RstStream(RstStreamFrame {
                error_code: be_u32(&payload[..4]),
            }))
        }
        FrameType::Settings => decode_settings(header, &payload),
        FrameType::Ping => {
            if payload.len() != 8 {
                return Err(frame_size_error(header, "PING payload must be 8 bytes"));
            }
            let mut opaque_data = [0u8; 8];
            opaque_data.copy_from_slice(&payload);
            Ok(FramePayload::Ping(PingFrame {
                opaque_data,
                ack: header.flags & flags::ACK != 0,
            }))
        }
        FrameType::GoAway => {
            if payload.len() < 8 {
                return Err(frame_size_error(header, "GOAWAY payload must be >= 8 bytes"));
            }
            Ok(FramePayload::GoAway(GoAwayFrame {
                last_stream_id: be_u32(&payload[..4]) & 0x7fff_ffff,
                error_code: be_u32(&payload[4..8]),
                debug_data: payload[8..].to_vec(),
            }))
        }
        FrameType::WindowUpdate => {
            if payload.len() != 4 {
                return Err(frame_size_error(header, "WINDOW_UPDATE payload must be 4 bytes"));
            }
            let increment = be_u32(&payload[..4]) & 0x7fff_ffff;
            Ok(FramePayload::WindowUpdate(WindowUpdateFrame { increment }))
        }
        FrameType::Continuation => Ok(FramePayload::Continuation(ContinuationFrame {
            end_headers: header.flags & flags::END_HEADERS != 0,
            header_block: payload,
        })),
        FrameType::PushPromise | FrameType::Unknown(_) => Ok(FramePayload::Raw(payload)),
    }
}

fn decode_data(header: &FrameHeader, mut payload: Vec<u8>) -> Result<FramePayload, Http2Error> {
    if header.stream_id == 0 {
        return Err(Http2Error::Connection {
            code: StreamErrorCode::ProtocolError,
            message: "DATA frame on stream 0".to_string(),
        });
    }
    let mut padding = 0usize;
    if header.flags & flags::PADDED != 0 {
        if payload.is_empty() {
            return Err(frame_size_error(header, "padded DATA frame with empty payload"));
        }
        let pad_len = payload[0] as usize;
        if pad_len + 1 > payload.len() {
            return Err(Http2Error::Connection {
                code: StreamErrorCode::ProtocolError,
                message: "DATA padding exceeds frame length".to_string(),
            });
        }
        payload = payload[1..payload.len() - pad_len].to_vec();
        padding = pad_len + 1;
    }
    Ok(FramePayload::Data(DataFrame {
        end_stream: header.flags & flags::END_STREAM != 0,
        payload,
        padding,
    }))
}

fn decode_headers(header: &FrameHeader, payload: Vec<u8>) -> Result<FramePayload, Http2Error> {
    if header.stream_id == 0 {
        return Err(Http2Error::Connection {
            code: StreamErrorCode::ProtocolError,
            message: "HEADERS frame on stream 0".to_string(),
        });
    }
    let mut block = payload.as_slice();
    if header.flags & flags::PADDED != 0 {
        if block.is_empty() {
            return Err(frame_size_error(header, "padded HEADERS frame with empty payload"));
        }
        let pad_len = block[0] as usize;
        block = &block[1..];
        if pad_len > block.len() {
            return Err(Http2Error::Connection {
                code: StreamErrorCode::ProtocolError,
                message: "HEADERS padding exceeds frame length".to_string(),
            });
        }
        block = &block[..block.len() - pad_len];
    }
    if header.flags & flags::PRIORITY != 0 {
        if block.len() < 5 {
            return Err(frame_size_error(header, "HEADERS priority fields truncated"));
        }
        block = &block[5..];
    }
    Ok(FramePayload::Headers(HeadersFrame {
        end_stream: header.flags & flags::END_STREAM != 0,
        end_headers: header.flags & flags::END_HEADERS != 0,
        header_block: block.to_vec(),
    }))
}

fn decode_priority(header: &FrameHeader, payload: &[u8]) -> Result<FramePayload, Http2Error> {
    if payload.len() != 5 {
        return Err(frame_size_error(header, "PRIORITY payload must be 5 bytes"));
    }
    let dependency = be_u32(&payload[..4]);
    Ok(FramePayload::Priority(PriorityFrame {
        stream_dependency: dependency & 0x7fff_ffff,
        weight: payload[4],
        exclusive: dependency & 0x8000_0000 != 0,
    }))
}

fn decode_settings(header: &FrameHeader, payload: &[u8]) -> Result<FramePayload, Http2Error> {
    let ack = header.flags & flags::ACK != 0;
    if ack && !payload.is_empty() {
        return Err(frame_size_error(header, "SETTINGS ack must be empty"));
    }
    if payload.len() % 6 != 0 {
        return Err(frame_size_error(header, "SETTINGS payload must be a multiple of 6"));
    }
    let settings = payload
        .chunks_exact(6)
        .map(|chunk| {
            (
                u16::from_be_bytes([chunk[0], chunk[1]]),
                be_u32(&chunk[2..6]),
            )
        })
        .collect();
    Ok(FramePayload::Settings(SettingsFrame { settings, ack }))
}

fn frame_size_error(header: &FrameHeader, message: &str) -> Http2Error {
    Http2Error::Connection {
        code: StreamErrorCode::FrameSizeError,
        message: format!("{message} (stream {})", header.stream_id),
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn write_frame_header(out: &mut Vec<u8>, length: usize, frame_type: FrameType, frame_flags: u8, stream_id: u32) {
    let len_bytes = (length as u32).to_be_bytes();
    out.extend_from_slice(&len_bytes[1..]);
    out.push(frame_type.as_u8());
    out.push(frame_flags);
    out.extend_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
}

/// Encode DATA, splitting at `max_frame_size`. END_STREAM goes only on the
/// final frame.
pub fn encode_data(stream_id: u32, end_stream: bool, data: &[u8], max_frame_size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + FRAME_HEADER_LEN);
    if data.is_empty() {
        let frame_flags = if end_stream { flags::END_STREAM } else { 0 };
        write_frame_header(&mut out, 0, FrameType::Data, frame_flags, stream_id);
        return out;
    }
    let mut offset = 0;
    while offset < data.len() {
        let chunk_len = (data.len() - offset).min(max_frame_size);
        let last = offset + chunk_len == data.len();
        let frame_flags = if last && end_stream { flags::END_STREAM } else { 0 };
        write_frame_header(&mut out, chunk_len, FrameType::Data, frame_flags, stream_id);
        out.extend_from_slice(&data[offset..offset + chunk_len]);
        offset += chunk_len;
    }
    out
}

/// Encode a header block as HEADERS plus CONTINUATION frames as needed.
/// END_HEADERS goes only on the final frame.
pub fn encode_headers_from_block(
    stream_id: u32,
    end_stream: bool,
    block: &[u8],
    max_frame_size: usize,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(block.len() + FRAME_HEADER_LEN);
    let mut offset = 0;
    let mut first = true;
    loop {
        let chunk_len = (block.len() - offset).min(max_frame_size);
        let last = offset + chunk_len == block.len();
        let mut frame_flags = 0u8;
        if last {
            frame_flags |= flags::END_HEADERS;
        }
        let frame_type = if first {
            if end_stream {
                frame_flags |= flags::END_STREAM;
            }
            FrameType::Headers
        } else {
            FrameType::Continuation
        };
        write_frame_header(&mut out, chunk_len, frame_type, frame_flags, stream_id);
        out.extend_from_slice(&block[offset..offset + chunk_len]);
        offset += chunk_len;
        first = false;
        if last {
            break;
        }
    }
    out
}

pub fn encode_settings(settings: &SettingsFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + settings.settings.len() * 6);
    let frame_flags = if settings.ack { flags::ACK } else { 0 };
    let length = if settings.ack { 0 } else { settings.settings.len() * 6 };
    write_frame_header(&mut out, length, FrameType::Settings, frame_flags, 0);
    if !settings.ack {
        for (id, value) in &settings.settings {
            out.extend_from_slice(&id.to_be_bytes());
            out.extend_from_slice(&value.to_be_bytes());
        }
    }
    out
}

pub fn encode_ping(frame: &PingFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + 8);
    let frame_flags = if frame.ack { flags::ACK } else { 0 };
    write_frame_header(&mut out, 8, FrameType::Ping, frame_flags, 0);
    out.extend_from_slice(&frame.opaque_data);
    out
}

pub fn encode_goaway(frame: &GoAwayFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + 8 + frame.debug_data.len());
    write_frame_header(&mut out, 8 + frame.debug_data.len(), FrameType::GoAway, 0, 0);
    out.extend_from_slice(&(frame.last_stream_id & 0x7fff_ffff).to_be_bytes());
    out.extend_from_slice(&frame.error_code.to_be_bytes());
    out.extend_from_slice(&frame.debug_data);
    out
}

pub fn encode_window_update(stream_id: u32, increment: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + 4);
    write_frame_header(&mut out, 4, FrameType::WindowUpdate, 0, stream_id);
    out.extend_from_slice(&(increment & 0x7fff_ffff).to_be_bytes());
    out
}

pub fn encode_rst_stream(stream_id: u32, error_code: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + 4);
    write_frame_header(&mut out, 4, FrameType::RstStream, 0, stream_id);
    out.extend_from_slice(&error_code.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8]) -> Frame {
        let mut decoder = FrameDecoder::without_preface();
        decoder.push(bytes);
        decoder.next_frame().unwrap().expect("expected a frame")
    }

    #[test]
    fn test_frame_header_round_trip() {
        let wire = encode_data(3, true, b"hello", DEFAULT_MAX_FRAME_SIZE);
        let frame = decode_one(&wire);
        assert_eq!(frame.header.stream_id, 3);
        assert_eq!(frame.header.frame_type, FrameType::Data);
        assert_eq!(
            frame.payload,
            FramePayload::Data(DataFrame {
                end_stream: true,
                payload: b"hello".to_vec(),
                padding: 0,
            })
        );
    }

    #[test]
    fn test_preface_required_then_consumed() {
        let mut decoder = FrameDecoder::new();
        decoder.push(super::super::PREFACE);
        decoder.push(&encode_ping(&PingFrame {
            opaque_data: [1; 8],
            ack: false,
        }));
        let frame = decoder.next_frame().unwrap().unwrap();
        assert!(decoder.preface_seen());
        assert!(matches!(frame.payload, FramePayload::Ping(_)));
    }

    #[test]
    fn test_bad_preface_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"GET / HTTP/1.1\r\nHost: not-h2\r\n\r\n");
        assert_eq!(decoder.next_frame(), Err(Http2Error::InvalidPreface));
    }

    #[test]
    fn test_incremental_frame_delivery() {
        let wire = encode_data(1, false, b"abc", DEFAULT_MAX_FRAME_SIZE);
        let mut decoder = FrameDecoder::without_preface();
        decoder.push(&wire[..5]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.push(&wire[5..]);
        assert!(decoder.next_frame().unwrap().is_some());
    }

    #[test]
    fn test_data_split_at_max_frame_size() {
        let data = vec![0u8; 40_000];
        let wire = encode_data(1, true, &data, DEFAULT_MAX_FRAME_SIZE);
        let mut decoder = FrameDecoder::without_preface();
        decoder.push(&wire);

        let mut total = 0usize;
        let mut frames = 0usize;
        let mut last_end_stream = false;
        while let Some(frame) = decoder.next_frame().unwrap() {
            if let FramePayload::Data(data) = frame.payload {
                assert!(data.payload.len() <= DEFAULT_MAX_FRAME_SIZE);
                total += data.payload.len();
                frames += 1;
                last_end_stream = data.end_stream;
            }
        }
        assert_eq!(total, 40_000);
        assert_eq!(frames, 3);
        assert!(last_end_stream);
    }

    #[test]
    fn test_headers_continuation_split() {
        let block = vec![0x42u8; 20_000];
        let wire = encode_headers_from_block(5, false, &block, DEFAULT_MAX_FRAME_SIZE);
        let mut decoder = FrameDecoder::without_preface();
        decoder.push(&wire);

        let first = decoder.next_frame().unwrap().unwrap();
        let FramePayload::Headers(headers) = first.payload else {
            panic!("expected HEADERS");
        };
        assert!(!headers.end_headers);

        let second = decoder.next_frame().unwrap().unwrap();
        let FramePayload::Continuation(cont) = second.payload else {
            panic!("expected CONTINUATION");
        };
        assert!(cont.end_headers);
        assert_eq!(headers.header_block.len() + cont.header_block.len(), 20_000);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut decoder = FrameDecoder::without_preface();
        let mut header = Vec::new();
        write_frame_header(&mut header, 100_000, FrameType::Data, 0, 1);
        decoder.push(&header);
        assert!(matches!(
            decoder.next_frame(),
            Err(Http2Error::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_padded_data_stripped() {
        // length 10: pad_len byte + 5 data bytes + 4 padding bytes
        let mut wire = Vec::new();
        write_frame_header(&mut wire, 10, FrameType::Data, flags::PADDED, 1);
        wire.push(4);
        wire.extend_from_slice(b"hello");
        wire.extend_from_slice(&[0; 4]);

        let frame = decode_one(&wire);
        let FramePayload::Data(data) = frame.payload else {
            panic!("expected DATA");
        };
        assert_eq!(data.payload, b"hello");
        assert_eq!(data.padding, 5);
    }

    #[test]
    fn test_settings_round_trip() {
        let settings = SettingsFrame {
            settings: vec![(0x4, 1_048_576), (0x5, 32_768)],
            ack: false,
        };
        let frame = decode_one(&encode_settings(&settings));
        assert_eq!(frame.payload, FramePayload::Settings(settings));
    }

    #[test]
    fn test_goaway_round_trip() {
        let goaway = GoAwayFrame {
            last_stream_id: 7,
            error_code: StreamErrorCode::ProtocolError.as_u32(),
            debug_data: b"bad frame".to_vec(),
        };
        let frame = decode_one(&encode_goaway(&goaway));
        assert_eq!(frame.payload, FramePayload::GoAway(goaway));
    }

    #[test]
    fn test_data_on_stream_zero_rejected() {
        let wire = encode_data(0, false, b"x", DEFAULT_MAX_FRAME_SIZE);
        let mut decoder = FrameDecoder::without_preface();
        decoder.push(&wire);
        assert!(matches!(
            decoder.next_frame(),
            Err(Http2Error::Connection {
                code: StreamErrorCode::ProtocolError,
                ..
            })
        ));
    }
}
