//! Per-connection HTTP/2 state.
//!
//! One `ConnectionState` sits between the two halves of an intercepted
//! connection and observes every frame in both directions. It owns the HPACK
//! dynamic tables (one decoder per direction), the stream table, and the
//! flow-control accounting, and it surfaces completed request/response pairs
//! as events. Streams never hold a reference back to the connection; the
//! stream table maps ids to state and everything is looked up by id.

use std::collections::HashMap;

use hpack::Decoder as RawHpackDecoder;
use hpack::Encoder as RawHpackEncoder;
use tracing::debug;

use super::frame::{
    Frame, FramePayload, Http2Error, SettingsFrame, StreamErrorCode,
};
use super::{settings, DEFAULT_MAX_FRAME_SIZE, DEFAULT_WINDOW_SIZE};
use crate::exchange::{HeaderList, HttpVersion, Request, Response};

const MAX_WINDOW: i64 = 0x7fff_ffff;

/// HPACK decoder with a connection-lifetime dynamic table.
pub struct HpackDecoder {
    inner: RawHpackDecoder<'static>,
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            inner: RawHpackDecoder::new(),
        }
    }

    pub fn set_max_table_size(&mut self, size: usize) {
        self.inner.set_max_table_size(size);
    }

    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Http2Error> {
        self.inner.decode(block).map_err(|_| Http2Error::HpackDecode)
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// HPACK encoder with a connection-lifetime dynamic table.
pub struct HpackEncoder {
    inner: RawHpackEncoder<'static>,
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: RawHpackEncoder::new(),
        }
    }

    pub fn encode<'a>(&mut self, fields: impl IntoIterator<Item = (&'a [u8], &'a [u8])>) -> Vec<u8> {
        self.inner.encode(fields)
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Which half of the intercepted connection a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Stream lifecycle, viewed from the client side of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    /// Client finished sending (END_STREAM client to server).
    HalfClosedLocal,
    /// Server finished sending.
    HalfClosedRemote,
    Closed,
}

#[derive(Debug, Default)]
struct PartialMessage {
    fields: Option<Vec<(String, String)>>,
    body: Vec<u8>,
    trailers: Vec<(String, String)>,
    done: bool,
}

#[derive(Debug)]
struct Stream {
    state: StreamState,
    /// Remaining bytes the client may send, granted by the server.
    send_window: i64,
    /// Remaining bytes the server may send, granted by the client.
    recv_window: i64,
    request: PartialMessage,
    response: PartialMessage,
    order: u64,
}

/// Events surfaced while applying frames.
#[derive(Debug)]
pub enum StreamEvent {
    /// Both directions finished; a full request/response pair is available.
    ExchangeComplete {
        stream_id: u32,
        request: Request,
        response: Response,
    },
    /// Stream was reset before completing. The request is included if its
    /// headers had already arrived.
    StreamReset {
        stream_id: u32,
        error_code: StreamErrorCode,
        request: Option<Request>,
    },
    /// Peer is shutting the connection down.
    GoAway {
        last_stream_id: u32,
        error_code: StreamErrorCode,
    },
}

struct PendingHeaders {
    stream_id: u32,
    direction: Direction,
    block: Vec<u8>,
    end_stream: bool,
}

/// Observed state of one intercepted HTTP/2 connection.
pub struct ConnectionState {
    streams: HashMap<u32, Stream>,
    highest_client_stream: u32,
    highest_server_stream: u32,
    /// Connection-level windows, indexed like the per-stream ones.
    conn_send_window: i64,
    conn_recv_window: i64,
    /// Initial stream window advertised by each side.
    initial_send_window: i64,
    initial_recv_window: i64,
    /// Decoders for header blocks flowing in each direction.
    hpack_client: HpackDecoder,
    hpack_server: HpackDecoder,
    /// Header block spanning CONTINUATION frames, at most one per connection.
    pending_headers: Option<PendingHeaders>,
    max_frame_size_client: usize,
    max_frame_size_server: usize,
    next_order: u64,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
            highest_client_stream: 0,
            highest_server_stream: 0,
            conn_send_window: DEFAULT_WINDOW_SIZE,
            conn_recv_window: DEFAULT_WINDOW_SIZE,
            initial_send_window: DEFAULT_WINDOW_SIZE,
            initial_recv_window: DEFAULT_WINDOW_SIZE,
            hpack_client: HpackDecoder::new(),
            hpack_server: HpackDecoder::new(),
            pending_headers: None,
            max_frame_size_client: DEFAULT_MAX_FRAME_SIZE,
            max_frame_size_server: DEFAULT_MAX_FRAME_SIZE,
            next_order: 0,
        }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn stream_state(&self, stream_id: u32) -> Option<StreamState> {
        self.streams.get(&stream_id).map(|s| s.state)
    }

    /// Remaining client-to-server connection window.
    pub fn connection_send_window(&self) -> i64 {
        self.conn_send_window
    }

    pub fn stream_send_window(&self, stream_id: u32) -> Option<i64> {
        self.streams.get(&stream_id).map(|s| s.send_window)
    }

    /// Largest frame the given direction may carry, per the receiving
    /// peer's SETTINGS_MAX_FRAME_SIZE.
    pub fn max_frame_size(&self, direction: Direction) -> usize {
        match direction {
            Direction::ClientToServer => self.max_frame_size_client,
            Direction::ServerToClient => self.max_frame_size_server,
        }
    }

    /// Apply one observed frame and return any resulting events.
    ///
    /// Connection-level protocol errors come back as `Err`; the caller is
    /// expected to tear the connection down with a GOAWAY. Stream-level
    /// errors also come back as `Err` but only doom one stream.
    pub fn apply(
        &mut self,
        direction: Direction,
        frame: &Frame,
    ) -> Result<Vec<StreamEvent>, Http2Error> {
        let stream_id = frame.header.stream_id;

        // While a header block is open, only its CONTINUATION frames may
        // arrive on this connection.
        if let Some(pending) = &self.pending_headers {
            let is_expected_continuation = matches!(frame.payload, FramePayload::Continuation(_))
                && pending.stream_id == stream_id
                && pending.direction == direction;
            if !is_expected_continuation {
                return Err(Http2Error::Connection {
                    code: StreamErrorCode::ProtocolError,
                    message: format!(
                        "expected CONTINUATION for stream {}, got {:?} on stream {}",
                        pending.stream_id, frame.header.frame_type, stream_id
                    ),
                });
            }
        }

        match &frame.payload {
            FramePayload::Headers(headers) => {
                self.begin_headers(direction, stream_id, headers.end_stream)?;
                if headers.end_headers {
                    self.finish_headers(
                        direction,
                        stream_id,
                        &headers.header_block,
                        headers.end_stream,
                    )
                } else {
                    self.pending_headers = Some(PendingHeaders {
                        stream_id,
                        direction,
                        block: headers.header_block.clone(),
                        end_stream: headers.end_stream,
                    });
                    Ok(Vec::new())
                }
            }
            FramePayload::Continuation(cont) => {
                let Some(mut pending) = self.pending_headers.take() else {
                    return Err(Http2Error::Connection {
                        code: StreamErrorCode::ProtocolError,
                        message: format!("CONTINUATION on stream {stream_id} without open header block"),
                    });
                };
                pending.block.extend_from_slice(&cont.header_block);
                if cont.end_headers {
                    let PendingHeaders {
                        stream_id,
                        direction,
                        block,
                        end_stream,
                    } = pending;
                    self.finish_headers(direction, stream_id, &block, end_stream)
                } else {
                    self.pending_headers = Some(pending);
                    Ok(Vec::new())
                }
            }
            FramePayload::Data(data) => self.apply_data(direction, stream_id, data.payload.as_slice(), data.padding, data.end_stream),
            FramePayload::WindowUpdate(update) => {
                self.apply_window_update(direction, stream_id, update.increment)?;
                Ok(Vec::new())
            }
            FramePayload::Settings(settings_frame) => {
                if !settings_frame.ack {
                    self.apply_settings(direction, settings_frame)?;
                }
                Ok(Vec::new())
            }
            FramePayload::RstStream(rst) => {
                let error_code = StreamErrorCode::from_u32(rst.error_code);
                if let Some(mut stream) = self.streams.remove(&stream_id) {
                    stream.state = StreamState::Closed;
                    debug!(stream_id, code = ?error_code, "stream reset");
                    let request = stream
                        .request
                        .fields
                        .take()
                        .map(|fields| build_request(fields, stream.request.body, stream.request.trailers));
                    Ok(vec![StreamEvent::StreamReset {
                        stream_id,
                        error_code,
                        request,
                    }])
                } else {
                    // Reset of an already-closed stream is allowed.
                    Ok(Vec::new())
                }
            }
            FramePayload::GoAway(goaway) => Ok(vec![StreamEvent::GoAway {
                last_stream_id: goaway.last_stream_id,
                error_code: StreamErrorCode::from_u32(goaway.error_code),
            }]),
            FramePayload::Ping(_) | FramePayload::Priority(_) | FramePayload::Raw(_) => {
                Ok(Vec::new())
            }
        }
    }

    /// Validate stream id rules for a HEADERS frame and create the stream
    /// if it opens one.
    fn begin_headers(
        &mut self,
        direction: Direction,
        stream_id: u32,
        _end_stream: bool,
    ) -> Result<(), Http2Error> {
        if stream_id == 0 {
            return Err(Http2Error::Connection {
                code: StreamErrorCode::ProtocolError,
                message: "HEADERS on stream 0".to_string(),
            });
        }
        match direction {
            Direction::ClientToServer => {
                if self.streams.contains_key(&stream_id) {
                    // Trailers for an open request body.
                    return Ok(());
                }
                if stream_id % 2 == 0 {
                    return Err(Http2Error::Connection {
                        code: StreamErrorCode::ProtocolError,
                        message: format!("client opened even stream id {stream_id}"),
                    });
                }
                if stream_id <= self.highest_client_stream {
                    return Err(Http2Error::Connection {
                        code: StreamErrorCode::ProtocolError,
                        message: format!(
                            "stream id {stream_id} not above highest seen {}",
                            self.highest_client_stream
                        ),
                    });
                }
                self.highest_client_stream = stream_id;
                let order = self.next_order;
                self.next_order += 1;
                self.streams.insert(
                    stream_id,
                    Stream {
                        state: StreamState::Open,
                        send_window: self.initial_send_window,
                        recv_window: self.initial_recv_window,
                        request: PartialMessage::default(),
                        response: PartialMessage::default(),
                        order,
                    },
                );
                Ok(())
            }
            Direction::ServerToClient => {
                if self.streams.contains_key(&stream_id) {
                    return Ok(());
                }
                if stream_id <= self.highest_client_stream {
                    return Err(Http2Error::Connection {
                        code: StreamErrorCode::StreamClosed,
                        message: format!("HEADERS for closed stream {stream_id}"),
                    });
                }
                Err(Http2Error::Connection {
                    code: StreamErrorCode::ProtocolError,
                    message: format!("server HEADERS for unopened stream {stream_id}"),
                })
            }
        }
    }

    fn finish_headers(
        &mut self,
        direction: Direction,
        stream_id: u32,
        block: &[u8],
        end_stream: bool,
    ) -> Result<Vec<StreamEvent>, Http2Error> {
        let decoder = match direction {
            Direction::ClientToServer => &mut self.hpack_client,
            Direction::ServerToClient => &mut self.hpack_server,
        };
        let fields: Vec<(String, String)> = decoder
            .decode(block)?
            .into_iter()
            .map(|(name, value)| {
                (
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                )
            })
            .collect();

        let stream = self.streams.get_mut(&stream_id).ok_or_else(|| {
            Http2Error::Connection {
                code: StreamErrorCode::StreamClosed,
                message: format!("header block for missing stream {stream_id}"),
            }
        })?;

        let message = match direction {
            Direction::ClientToServer => &mut stream.request,
            Direction::ServerToClient => &mut stream.response,
        };
        let stored_interim = message
            .fields
            .as_deref()
            .map(is_interim_response)
            .unwrap_or(false);
        if message.fields.is_none() || stored_interim {
            // First headers, or final headers superseding a 1xx interim.
            message.fields = Some(fields);
        } else {
            message.trailers = fields;
        }
        if end_stream {
            message.done = true;
        }
        self.advance_stream(stream_id, direction, end_stream)
    }

    fn apply_data(
        &mut self,
        direction: Direction,
        stream_id: u32,
        payload: &[u8],
        padding: usize,
        end_stream: bool,
    ) -> Result<Vec<StreamEvent>, Http2Error> {
        let flow_len = (payload.len() + padding) as i64;

        let conn_window = match direction {
            Direction::ClientToServer => &mut self.conn_send_window,
            Direction::ServerToClient => &mut self.conn_recv_window,
        };
        if flow_len > *conn_window {
            return Err(Http2Error::Connection {
                code: StreamErrorCode::FlowControlError,
                message: format!(
                    "DATA of {flow_len} bytes exceeds connection window {conn_window}"
                ),
            });
        }
        *conn_window -= flow_len;

        let stream = self.streams.get_mut(&stream_id).ok_or_else(|| {
            Http2Error::Connection {
                code: StreamErrorCode::StreamClosed,
                message: format!("DATA for closed or unopened stream {stream_id}"),
            }
        })?;
        let stream_window = match direction {
            Direction::ClientToServer => &mut stream.send_window,
            Direction::ServerToClient => &mut stream.recv_window,
        };
        if flow_len > *stream_window {
            return Err(Http2Error::Stream {
                stream_id,
                code: StreamErrorCode::FlowControlError,
                message: format!(
                    "DATA of {flow_len} bytes exceeds stream window {stream_window}"
                ),
            });
        }
        *stream_window -= flow_len;

        let message = match direction {
            Direction::ClientToServer => &mut stream.request,
            Direction::ServerToClient => &mut stream.response,
        };
        if message.fields.is_none() {
            return Err(Http2Error::Stream {
                stream_id,
                code: StreamErrorCode::ProtocolError,
                message: "DATA before HEADERS".to_string(),
            });
        }
        message.body.extend_from_slice(payload);
        if end_stream {
            message.done = true;
        }
        self.advance_stream(stream_id, direction, end_stream)
    }

    fn apply_window_update(
        &mut self,
        direction: Direction,
        stream_id: u32,
        increment: u32,
    ) -> Result<(), Http2Error> {
        // A WINDOW_UPDATE grants budget to the *other* direction's sender.
        let granted = match direction {
            Direction::ServerToClient => Direction::ClientToServer,
            Direction::ClientToServer => Direction::ServerToClient,
        };
        if increment == 0 {
            return if stream_id == 0 {
                Err(Http2Error::Connection {
                    code: StreamErrorCode::ProtocolError,
                    message: "WINDOW_UPDATE with zero increment".to_string(),
                })
            } else {
                Err(Http2Error::Stream {
                    stream_id,
                    code: StreamErrorCode::ProtocolError,
                    message: "WINDOW_UPDATE with zero increment".to_string(),
                })
            };
        }
        if stream_id == 0 {
            let window = match granted {
                Direction::ClientToServer => &mut self.conn_send_window,
                Direction::ServerToClient => &mut self.conn_recv_window,
            };
            *window += i64::from(increment);
            if *window > MAX_WINDOW {
                return Err(Http2Error::Connection {
                    code: StreamErrorCode::FlowControlError,
                    message: "connection window overflow".to_string(),
                });
            }
        } else if let Some(stream) = self.streams.get_mut(&stream_id) {
            let window = match granted {
                Direction::ClientToServer => &mut stream.send_window,
                Direction::ServerToClient => &mut stream.recv_window,
            };
            *window += i64::from(increment);
            if *window > MAX_WINDOW {
                return Err(Http2Error::Stream {
                    stream_id,
                    code: StreamErrorCode::FlowControlError,
                    message: "stream window overflow".to_string(),
                });
            }
        }
        Ok(())
    }

    fn apply_settings(
        &mut self,
        direction: Direction,
        frame: &SettingsFrame,
    ) -> Result<(), Http2Error> {
        for &(id, value) in &frame.settings {
            match id {
                settings::INITIAL_WINDOW_SIZE => {
                    if i64::from(value) > MAX_WINDOW {
                        return Err(Http2Error::Connection {
                            code: StreamErrorCode::FlowControlError,
                            message: "INITIAL_WINDOW_SIZE above 2^31-1".to_string(),
                        });
                    }
                    // The advertiser grants the opposite sender; the delta
                    // applies to every existing stream.
                    let new_initial = i64::from(value);
                    match direction {
                        Direction::ServerToClient => {
                            let delta = new_initial - self.initial_send_window;
                            self.initial_send_window = new_initial;
                            for stream in self.streams.values_mut() {
                                stream.send_window += delta;
                            }
                        }
                        Direction::ClientToServer => {
                            let delta = new_initial - self.initial_recv_window;
                            self.initial_recv_window = new_initial;
                            for stream in self.streams.values_mut() {
                                stream.recv_window += delta;
                            }
                        }
                    }
                }
                settings::MAX_FRAME_SIZE => {
                    if !(16_384..=16_777_215).contains(&value) {
                        return Err(Http2Error::Connection {
                            code: StreamErrorCode::ProtocolError,
                            message: format!("MAX_FRAME_SIZE {value} out of range"),
                        });
                    }
                    // The advertiser caps frames sent toward it.
                    match direction {
                        Direction::ServerToClient => self.max_frame_size_client = value as usize,
                        Direction::ClientToServer => self.max_frame_size_server = value as usize,
                    }
                }
                settings::HEADER_TABLE_SIZE => {
                    // The advertiser's decoder table; mirror it on the
                    // decoder covering blocks sent toward the advertiser.
                    match direction {
                        Direction::ClientToServer => {
                            self.hpack_server.set_max_table_size(value as usize)
                        }
                        Direction::ServerToClient => {
                            self.hpack_client.set_max_table_size(value as usize)
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Move the stream state machine after END_STREAM and emit the
    /// completed exchange once both directions are done.
    fn advance_stream(
        &mut self,
        stream_id: u32,
        direction: Direction,
        end_stream: bool,
    ) -> Result<Vec<StreamEvent>, Http2Error> {
        if !end_stream {
            return Ok(Vec::new());
        }
        let stream = self
            .streams
            .get_mut(&stream_id)
            .expect("advance_stream on existing stream");
        stream.state = match (stream.state, direction) {
            (StreamState::Open, Direction::ClientToServer) => StreamState::HalfClosedLocal,
            (StreamState::Open, Direction::ServerToClient) => StreamState::HalfClosedRemote,
            (StreamState::HalfClosedLocal, Direction::ServerToClient)
            | (StreamState::HalfClosedRemote, Direction::ClientToServer) => StreamState::Closed,
            (state, _) => state,
        };
        if stream.request.done && stream.response.done {
            let stream = self.streams.remove(&stream_id).expect("stream present");
            debug!(stream_id, order = stream.order, "exchange complete");
            let request_fields = stream.request.fields.ok_or_else(|| Http2Error::Stream {
                stream_id,
                code: StreamErrorCode::ProtocolError,
                message: "stream completed without request headers".to_string(),
            })?;
            let response_fields = stream.response.fields.ok_or_else(|| Http2Error::Stream {
                stream_id,
                code: StreamErrorCode::ProtocolError,
                message: "stream completed without response headers".to_string(),
            })?;
            let request = build_request(request_fields, stream.request.body, stream.request.trailers);
            let response =
                build_response(response_fields, stream.response.body, stream.response.trailers)?;
            return Ok(vec![StreamEvent::ExchangeComplete {
                stream_id,
                request,
                response,
            }]);
        }
        Ok(Vec::new())
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

fn is_interim_response(fields: &[(String, String)]) -> bool {
    fields
        .iter()
        .find(|(name, _)| name == ":status")
        .map(|(_, value)| value.starts_with('1'))
        .unwrap_or(false)
}

fn split_fields(fields: Vec<(String, String)>) -> (Vec<(String, String)>, HeaderList) {
    let mut pseudo = Vec::new();
    let mut headers = HeaderList::new();
    for (name, value) in fields {
        if name.starts_with(':') {
            pseudo.push((name, value));
        } else {
            headers.push(name, value);
        }
    }
    (pseudo, headers)
}

fn pseudo<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

fn build_request(
    fields: Vec<(String, String)>,
    body: Vec<u8>,
    trailers: Vec<(String, String)>,
) -> Request {
    let (pseudo_fields, mut headers) = split_fields(fields);
    let method = pseudo(&pseudo_fields, ":method").unwrap_or("GET").to_string();
    let target = pseudo(&pseudo_fields, ":path").unwrap_or("/").to_string();
    if let Some(authority) = pseudo(&pseudo_fields, ":authority") {
        if !headers.contains("host") {
            headers.push("host", authority);
        }
    }
    let mut trailer_list = HeaderList::new();
    for (name, value) in trailers {
        trailer_list.push(name, value);
    }
    Request {
        method,
        target,
        version: HttpVersion::H2,
        headers,
        body,
        trailers: trailer_list,
    }
}

fn build_response(
    fields: Vec<(String, String)>,
    body: Vec<u8>,
    trailers: Vec<(String, String)>,
) -> Result<Response, Http2Error> {
    let (pseudo_fields, headers) = split_fields(fields);
    let status: u16 = pseudo(&pseudo_fields, ":status")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Http2Error::MalformedFrame("response without :status".to_string()))?;
    let mut trailer_list = HeaderList::new();
    for (name, value) in trailers {
        trailer_list.push(name, value);
    }
    Ok(Response {
        version: HttpVersion::H2,
        status,
        reason: String::new(),
        headers,
        body,
        trailers: trailer_list,
    })
}
