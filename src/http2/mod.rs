//! HTTP/2 Frame Codec & Stream Multiplexer
//!
//! `frame` handles the wire format: the 9-byte frame header, typed payloads
//! and frame encoding with max-frame-size splitting. `conn` layers the
//! per-connection state on top: HPACK dynamic tables for both directions,
//! the stream table, flow-control accounting and protocol-error detection.

pub mod conn;
pub mod frame;

pub use conn::{ConnectionState, Direction, StreamEvent, StreamState};
pub use frame::{
    Frame, FrameDecoder, FrameHeader, FramePayload, FrameType, Http2Error, StreamErrorCode,
};

/// Client connection preface, sent before any frame.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Fixed size of the frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// Default SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024;

/// Initial flow-control window for streams and the connection.
pub const DEFAULT_WINDOW_SIZE: i64 = 65_535;

/// Frame flag bits.
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// SETTINGS parameter identifiers.
pub mod settings {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}
