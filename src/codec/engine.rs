use std::collections::{BTreeMap, VecDeque};

use super::callbacks::{EngineCallbacks, HeadersCategory, SendResult, SentFrame};
use super::hpack::{Header, HpackDecoder, HpackEncoder};
use super::{
    flags, frame, frame_type, settings_id, ErrorCode, FrameHeader, CONNECTION_PREFACE,
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_WINDOW_SIZE, FRAME_HEADER_LEN, MAX_HEADER_BLOCK_SIZE,
    MAX_WINDOW_SIZE,
};
use crate::error::{Error, Result};

/// Frames the engine will hold for a peer that is not reading. Inbound
/// frames arriving while this many are queued are a connection error.
pub const MAX_QUEUED_FRAMES: usize = 1000;

/// Local settings advertised to the peer.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    /// Upper bound on DATA payload per frame, on top of the peer's
    /// MAX_FRAME_SIZE. Lets the caller keep frames smaller than its send
    /// buffer.
    pub max_send_frame_payload: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 100,
            initial_window_size: DEFAULT_WINDOW_SIZE as u32,
            max_send_frame_payload: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    HalfClosedRemote,
    HalfClosedLocal,
}

#[derive(Debug)]
struct EngineStream {
    phase: Phase,
    send_window: i64,
    recv_window: i64,
    recv_unacked: i64,
    /// Response body not yet framed.
    body: VecDeque<u8>,
    /// A response has been submitted and its final frame not yet queued.
    body_pending: bool,
    responded: bool,
    /// RST_STREAM queued with this code; further frames are ignored.
    resetting: Option<ErrorCode>,
}

impl EngineStream {
    fn new(send_window: i64, recv_window: i64) -> Self {
        Self {
            phase: Phase::Open,
            send_window,
            recv_window,
            recv_unacked: 0,
            body: VecDeque::new(),
            body_pending: false,
            responded: false,
            resetting: None,
        }
    }
}

#[derive(Debug)]
struct PendingHeaders {
    stream_id: u32,
    end_stream: bool,
    category: HeadersCategory,
    /// Block is decoded for HPACK state only; the stream was refused.
    discard: bool,
    block: Vec<u8>,
}

#[derive(Debug)]
struct Outbound {
    bytes: Vec<u8>,
    header: FrameHeader,
}

#[derive(Debug)]
struct InFlight {
    frame: Outbound,
    written: usize,
}

/// Server-side HTTP/2 engine.
///
/// Feed inbound bytes with [`Engine::mem_recv`]; pull outbound frames with
/// [`Engine::send`]. Both report progress through [`EngineCallbacks`].
#[derive(Debug)]
pub struct Engine {
    settings: EngineSettings,
    recv_buf: Vec<u8>,
    preface_received: bool,
    streams: BTreeMap<u32, EngineStream>,
    last_peer_stream: u32,
    continuation: Option<PendingHeaders>,
    decoder: HpackDecoder,
    encoder: HpackEncoder,
    conn_send_window: i64,
    conn_recv_window: i64,
    conn_recv_unacked: i64,
    peer_initial_window: i64,
    peer_max_frame_size: usize,
    outbound: VecDeque<Outbound>,
    in_flight: Option<InFlight>,
    goaway_queued: bool,
    goaway_sent: bool,
    peer_goaway: Option<ErrorCode>,
}

impl Engine {
    pub fn server(settings: EngineSettings) -> Self {
        Self {
            recv_buf: Vec::new(),
            preface_received: false,
            streams: BTreeMap::new(),
            last_peer_stream: 0,
            continuation: None,
            decoder: HpackDecoder::new(),
            encoder: HpackEncoder::new(),
            conn_send_window: DEFAULT_WINDOW_SIZE,
            // the connection window only changes through WINDOW_UPDATE
            conn_recv_window: DEFAULT_WINDOW_SIZE,
            conn_recv_unacked: 0,
            peer_initial_window: DEFAULT_WINDOW_SIZE,
            peer_max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            outbound: VecDeque::new(),
            in_flight: None,
            goaway_queued: false,
            goaway_sent: false,
            peer_goaway: None,
            settings,
        }
    }

    // ---------------------------------------------------------------------
    // Inbound
    // ---------------------------------------------------------------------

    /// Buffer `data` and process every complete frame. Returns the number of
    /// bytes consumed, which is always `data.len()`.
    pub fn mem_recv(&mut self, data: &[u8], cb: &mut impl EngineCallbacks) -> Result<usize> {
        if self.goaway_queued {
            // connection is going away; input is discarded
            return Ok(data.len());
        }
        self.recv_buf.extend_from_slice(data);
        match self.process(cb) {
            Ok(()) => Ok(data.len()),
            Err(err @ Error::Protocol { .. }) | Err(err @ Error::Hpack(_)) => {
                self.recv_buf.clear();
                self.terminate_session(err.error_code());
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn process(&mut self, cb: &mut impl EngineCallbacks) -> Result<()> {
        if !self.preface_received {
            let n = self.recv_buf.len().min(CONNECTION_PREFACE.len());
            if self.recv_buf[..n] != CONNECTION_PREFACE[..n] {
                return Err(Error::protocol(ErrorCode::ProtocolError, "invalid connection preface"));
            }
            if n < CONNECTION_PREFACE.len() {
                return Ok(());
            }
            self.recv_buf.drain(..CONNECTION_PREFACE.len());
            self.preface_received = true;
        }

        let mut offset = 0;
        let result = loop {
            let Some(header) = FrameHeader::parse(&self.recv_buf[offset..]) else {
                break Ok(());
            };
            if header.length as usize > DEFAULT_MAX_FRAME_SIZE {
                break Err(Error::protocol(
                    ErrorCode::FrameSizeError,
                    format!("frame of {} bytes exceeds maximum", header.length),
                ));
            }
            let total = header.total_size();
            if self.recv_buf.len() - offset < total {
                break Ok(());
            }
            let payload = self.recv_buf[offset + FRAME_HEADER_LEN..offset + total].to_vec();
            offset += total;
            if let Err(e) = self.handle_frame(header, payload, cb) {
                break Err(e);
            }
        };
        self.recv_buf.drain(..offset);
        result
    }

    fn handle_frame(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
        cb: &mut impl EngineCallbacks,
    ) -> Result<()> {
        if self.outbound.len() >= MAX_QUEUED_FRAMES {
            return Err(Error::protocol(
                ErrorCode::EnhanceYourCalm,
                format!("{} frames queued for a peer that is not reading", self.outbound.len()),
            ));
        }
        if let Some(pending) = &self.continuation {
            if header.frame_type != frame_type::CONTINUATION {
                return Err(Error::protocol(
                    ErrorCode::ProtocolError,
                    format!(
                        "frame type {} while header block pending on stream {}",
                        header.frame_type, pending.stream_id
                    ),
                ));
            }
        }

        match header.frame_type {
            frame_type::DATA => self.on_data(header, payload, cb),
            frame_type::HEADERS => self.on_headers(header, payload, cb),
            frame_type::CONTINUATION => self.on_continuation(header, payload, cb),
            frame_type::RST_STREAM => self.on_rst_stream(header, payload, cb),
            frame_type::SETTINGS => self.on_settings(header, payload, cb),
            frame_type::PING => self.on_ping(header, payload, cb),
            frame_type::GOAWAY => self.on_goaway(header, payload, cb),
            frame_type::WINDOW_UPDATE => self.on_window_update(header, payload, cb),
            // PRIORITY, PUSH_PROMISE and unknown types are ignored
            _ => Ok(()),
        }
    }

    fn on_data(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
        cb: &mut impl EngineCallbacks,
    ) -> Result<()> {
        let stream_id = header.stream_id;
        if stream_id == 0 {
            return Err(Error::protocol(ErrorCode::ProtocolError, "DATA on stream 0"));
        }

        // padding counts against flow control
        let len = i64::from(header.length);
        self.conn_recv_window -= len;
        if self.conn_recv_window < 0 {
            return Err(Error::protocol(
                ErrorCode::FlowControlError,
                "connection receive window exceeded",
            ));
        }
        self.conn_recv_unacked += len;
        let threshold = DEFAULT_WINDOW_SIZE / 2;
        if self.conn_recv_unacked >= threshold {
            let increment = self.conn_recv_unacked;
            self.conn_recv_window += increment;
            self.conn_recv_unacked = 0;
            self.queue(frame::window_update(0, increment as u32));
        }

        let stream_threshold = i64::from(self.settings.initial_window_size) / 2;
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            self.reset_unknown(stream_id, ErrorCode::StreamClosed);
            return Ok(());
        };
        if stream.resetting.is_some() {
            return Ok(());
        }
        if stream.phase == Phase::HalfClosedRemote {
            self.submit_rst_stream(stream_id, ErrorCode::StreamClosed);
            return Ok(());
        }
        stream.recv_window -= len;
        if stream.recv_window < 0 {
            self.submit_rst_stream(stream_id, ErrorCode::FlowControlError);
            return Ok(());
        }
        if !header.is_end_stream() {
            stream.recv_unacked += len;
            if stream.recv_unacked >= stream_threshold {
                let increment = stream.recv_unacked;
                stream.recv_window += increment;
                stream.recv_unacked = 0;
                self.queue(frame::window_update(stream_id, increment as u32));
            }
        }

        let data = extract_data_payload(&header, payload)?;
        if !data.is_empty() {
            cb.on_data_chunk_recv(stream_id, header.flags, &data)?;
        }
        self.finish_recv(header, cb)
    }

    /// Shared tail of DATA and HEADERS handling: half-close the remote side
    /// on END_STREAM, report the frame and close the stream if both sides
    /// are done.
    fn finish_recv(&mut self, header: FrameHeader, cb: &mut impl EngineCallbacks) -> Result<()> {
        let mut closed = false;
        if header.is_end_stream() {
            if let Some(stream) = self.streams.get_mut(&header.stream_id) {
                match stream.phase {
                    Phase::Open => stream.phase = Phase::HalfClosedRemote,
                    Phase::HalfClosedLocal => closed = true,
                    Phase::HalfClosedRemote => {}
                }
            }
        }
        cb.on_frame_recv(&header)?;
        if closed {
            self.close_stream(header.stream_id, ErrorCode::NoError, cb)?;
        }
        Ok(())
    }

    fn on_headers(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
        cb: &mut impl EngineCallbacks,
    ) -> Result<()> {
        let stream_id = header.stream_id;
        if stream_id == 0 {
            return Err(Error::protocol(ErrorCode::ProtocolError, "HEADERS on stream 0"));
        }
        let block = extract_headers_payload(&header, payload)?;

        let existing = self
            .streams
            .get(&stream_id)
            .map(|s| (s.phase, s.resetting.is_some()));
        let (category, discard) = match existing {
            Some((Phase::HalfClosedRemote, _)) => {
                return Err(Error::protocol(
                    ErrorCode::StreamClosed,
                    format!("HEADERS on half-closed stream {stream_id}"),
                ));
            }
            Some((_, resetting)) => {
                if !header.is_end_stream() {
                    return Err(Error::protocol(
                        ErrorCode::ProtocolError,
                        format!("trailers without END_STREAM on stream {stream_id}"),
                    ));
                }
                (HeadersCategory::Trailers, resetting)
            }
            None => {
                if stream_id % 2 == 0 || stream_id <= self.last_peer_stream {
                    return Err(Error::protocol(
                        ErrorCode::ProtocolError,
                        format!("invalid new stream id {stream_id}"),
                    ));
                }
                self.last_peer_stream = stream_id;
                if self.streams.len() >= self.settings.max_concurrent_streams as usize {
                    self.reset_unknown(stream_id, ErrorCode::RefusedStream);
                    (HeadersCategory::Request, true)
                } else {
                    let stream = EngineStream::new(
                        self.peer_initial_window,
                        i64::from(self.settings.initial_window_size),
                    );
                    self.streams.insert(stream_id, stream);
                    (HeadersCategory::Request, false)
                }
            }
        };

        if !discard {
            cb.on_begin_headers(stream_id, category)?;
        }

        let pending = PendingHeaders {
            stream_id,
            end_stream: header.is_end_stream(),
            category,
            discard,
            block,
        };
        if header.is_end_headers() {
            self.complete_headers(pending, cb)
        } else {
            if pending.block.len() > MAX_HEADER_BLOCK_SIZE {
                return Err(header_block_too_large(pending.block.len()));
            }
            self.continuation = Some(pending);
            Ok(())
        }
    }

    fn on_continuation(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
        cb: &mut impl EngineCallbacks,
    ) -> Result<()> {
        let Some(mut pending) = self.continuation.take() else {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                format!("unexpected CONTINUATION for stream {}", header.stream_id),
            ));
        };
        if pending.stream_id != header.stream_id {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                format!(
                    "CONTINUATION for stream {} but pending headers on stream {}",
                    header.stream_id, pending.stream_id
                ),
            ));
        }
        let new_size = pending.block.len() + payload.len();
        if new_size > MAX_HEADER_BLOCK_SIZE {
            return Err(header_block_too_large(new_size));
        }
        pending.block.extend_from_slice(&payload);
        if header.is_end_headers() {
            self.complete_headers(pending, cb)
        } else {
            self.continuation = Some(pending);
            Ok(())
        }
    }

    fn complete_headers(
        &mut self,
        pending: PendingHeaders,
        cb: &mut impl EngineCallbacks,
    ) -> Result<()> {
        // decode even for refused streams to keep the HPACK table in sync
        let headers = self.decoder.decode(&pending.block)?;
        if pending.discard {
            return Ok(());
        }
        for h in &headers {
            cb.on_header(pending.stream_id, h)?;
        }
        let mut flags = flags::END_HEADERS;
        if pending.end_stream {
            flags |= flags::END_STREAM;
        }
        let header = FrameHeader::new(
            frame_type::HEADERS,
            flags,
            pending.stream_id,
            pending.block.len() as u32,
        );
        tracing::trace!(stream = pending.stream_id, category = ?pending.category, "header block complete");
        self.finish_recv(header, cb)
    }

    fn on_rst_stream(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
        cb: &mut impl EngineCallbacks,
    ) -> Result<()> {
        if payload.len() != 4 {
            return Err(Error::protocol(ErrorCode::FrameSizeError, "RST_STREAM frame size"));
        }
        if header.stream_id == 0 {
            return Err(Error::protocol(ErrorCode::ProtocolError, "RST_STREAM on stream 0"));
        }
        let code = ErrorCode::from_u32(u32::from_be_bytes([
            payload[0], payload[1], payload[2], payload[3],
        ]));
        cb.on_frame_recv(&header)?;
        if self.streams.contains_key(&header.stream_id) {
            self.drop_queued_for(header.stream_id);
            self.close_stream(header.stream_id, code, cb)?;
        }
        Ok(())
    }

    fn on_settings(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
        cb: &mut impl EngineCallbacks,
    ) -> Result<()> {
        if header.stream_id != 0 {
            return Err(Error::protocol(ErrorCode::ProtocolError, "SETTINGS on a stream"));
        }
        if header.is_ack() {
            if !payload.is_empty() {
                return Err(Error::protocol(ErrorCode::FrameSizeError, "SETTINGS ACK with payload"));
            }
            return cb.on_frame_recv(&header);
        }
        if payload.len() % 6 != 0 {
            return Err(Error::protocol(ErrorCode::FrameSizeError, "SETTINGS frame size"));
        }

        for entry in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([entry[0], entry[1]]);
            let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);
            match id {
                settings_id::INITIAL_WINDOW_SIZE => {
                    let value = i64::from(value);
                    if value > MAX_WINDOW_SIZE {
                        return Err(Error::protocol(
                            ErrorCode::FlowControlError,
                            "INITIAL_WINDOW_SIZE too large",
                        ));
                    }
                    let delta = value - self.peer_initial_window;
                    for stream in self.streams.values_mut() {
                        stream.send_window += delta;
                        if stream.send_window > MAX_WINDOW_SIZE {
                            return Err(Error::protocol(
                                ErrorCode::FlowControlError,
                                "stream window overflow",
                            ));
                        }
                    }
                    self.peer_initial_window = value;
                }
                settings_id::MAX_FRAME_SIZE => {
                    if !(DEFAULT_MAX_FRAME_SIZE as u32..=0xFF_FFFF).contains(&value) {
                        return Err(Error::protocol(ErrorCode::ProtocolError, "invalid MAX_FRAME_SIZE"));
                    }
                    self.peer_max_frame_size = value as usize;
                }
                settings_id::ENABLE_PUSH if value > 1 => {
                    return Err(Error::protocol(ErrorCode::ProtocolError, "invalid ENABLE_PUSH"));
                }
                _ => {}
            }
        }
        self.queue(frame::settings_ack());
        cb.on_frame_recv(&header)
    }

    fn on_ping(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
        cb: &mut impl EngineCallbacks,
    ) -> Result<()> {
        if payload.len() != 8 {
            return Err(Error::protocol(ErrorCode::FrameSizeError, "PING frame size"));
        }
        if !header.is_ack() {
            let mut data = [0u8; 8];
            data.copy_from_slice(&payload);
            self.queue(frame::ping_ack(data));
        }
        cb.on_frame_recv(&header)
    }

    fn on_goaway(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
        cb: &mut impl EngineCallbacks,
    ) -> Result<()> {
        if payload.len() < 8 {
            return Err(Error::protocol(ErrorCode::FrameSizeError, "GOAWAY frame too short"));
        }
        let code = ErrorCode::from_u32(u32::from_be_bytes([
            payload[4], payload[5], payload[6], payload[7],
        ]));
        self.peer_goaway = Some(code);
        cb.on_frame_recv(&header)
    }

    fn on_window_update(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
        cb: &mut impl EngineCallbacks,
    ) -> Result<()> {
        if payload.len() != 4 {
            return Err(Error::protocol(ErrorCode::FrameSizeError, "WINDOW_UPDATE frame size"));
        }
        let increment = i64::from(
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF,
        );

        if header.stream_id == 0 {
            if increment == 0 {
                return Err(Error::protocol(ErrorCode::ProtocolError, "zero WINDOW_UPDATE"));
            }
            self.conn_send_window += increment;
            if self.conn_send_window > MAX_WINDOW_SIZE {
                return Err(Error::protocol(
                    ErrorCode::FlowControlError,
                    "connection window overflow",
                ));
            }
        } else if let Some(stream) = self.streams.get_mut(&header.stream_id) {
            if increment == 0 {
                self.submit_rst_stream(header.stream_id, ErrorCode::ProtocolError);
                return Ok(());
            }
            stream.send_window += increment;
            if stream.send_window > MAX_WINDOW_SIZE {
                self.submit_rst_stream(header.stream_id, ErrorCode::FlowControlError);
                return Ok(());
            }
        }
        cb.on_frame_recv(&header)
    }

    // ---------------------------------------------------------------------
    // Submission
    // ---------------------------------------------------------------------

    /// Queue a SETTINGS frame with our local settings plus `extra` entries.
    pub fn submit_settings(&mut self, extra: &[(u16, u32)]) {
        let mut entries = vec![(
            settings_id::MAX_CONCURRENT_STREAMS,
            self.settings.max_concurrent_streams,
        )];
        if self.settings.initial_window_size != DEFAULT_WINDOW_SIZE as u32 {
            entries.push((settings_id::INITIAL_WINDOW_SIZE, self.settings.initial_window_size));
        }
        entries.extend_from_slice(extra);
        self.queue(frame::settings(&entries));
    }

    /// Queue a response on `stream_id`. Without a body the HEADERS frame
    /// carries END_STREAM.
    pub fn submit_response(
        &mut self,
        stream_id: u32,
        headers: &[Header],
        body: Option<Vec<u8>>,
    ) -> Result<()> {
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(Error::UnknownId(stream_id.into()))?;
        if stream.responded || stream.resetting.is_some() {
            return Err(Error::StreamError {
                stream_id,
                code: ErrorCode::StreamClosed,
            });
        }
        stream.responded = true;

        let end_stream = body.is_none();
        if let Some(body) = body {
            stream.body.extend(body);
            stream.body_pending = true;
        }
        let block = self.encoder.encode(headers);
        let bytes = frame::headers(stream_id, &block, end_stream, self.peer_max_frame_size);
        let mut flags = flags::END_HEADERS;
        if end_stream {
            flags |= flags::END_STREAM;
        }
        self.outbound.push_back(Outbound {
            bytes,
            header: FrameHeader::new(frame_type::HEADERS, flags, stream_id, block.len() as u32),
        });
        Ok(())
    }

    /// Queue RST_STREAM for an open stream. The stream closes once the frame
    /// has been sent.
    pub fn submit_rst_stream(&mut self, stream_id: u32, code: ErrorCode) {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if stream.resetting.is_some() {
                return;
            }
            stream.resetting = Some(code);
            stream.body.clear();
            stream.body_pending = false;
        }
        self.reset_unknown(stream_id, code);
    }

    fn reset_unknown(&mut self, stream_id: u32, code: ErrorCode) {
        self.queue(frame::rst_stream(stream_id, code));
    }

    /// Queue GOAWAY. Further input is discarded; repeated calls are no-ops.
    pub fn terminate_session(&mut self, code: ErrorCode) {
        if self.goaway_queued {
            return;
        }
        self.goaway_queued = true;
        self.continuation = None;
        self.queue(frame::goaway(self.last_peer_stream, code));
    }

    fn queue(&mut self, bytes: Vec<u8>) {
        let header = FrameHeader::parse(&bytes).unwrap_or(FrameHeader::new(0, 0, 0, 0));
        self.outbound.push_back(Outbound { bytes, header });
    }

    /// Remove queued, unsent frames for a stream the peer has reset.
    fn drop_queued_for(&mut self, stream_id: u32) {
        self.outbound.retain(|f| f.header.stream_id != stream_id);
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.body.clear();
            stream.body_pending = false;
        }
    }

    // ---------------------------------------------------------------------
    // Outbound
    // ---------------------------------------------------------------------

    /// Hand queued frames to `cb` until nothing is left or the callback
    /// reports `WouldBlock`.
    pub fn send(&mut self, cb: &mut impl EngineCallbacks) -> Result<()> {
        loop {
            if self.in_flight.is_none() {
                if let Some(frame) = self.outbound.pop_front() {
                    self.in_flight = Some(InFlight { frame, written: 0 });
                } else if self.goaway_sent {
                    return Ok(());
                } else {
                    match self.send_next_data(cb)? {
                        Some(true) => continue,
                        _ => return Ok(()),
                    }
                }
            }

            let Some(in_flight) = self.in_flight.as_mut() else {
                continue;
            };
            match cb.send(&in_flight.frame.bytes[in_flight.written..]) {
                SendResult::Written(0) | SendResult::WouldBlock => return Ok(()),
                SendResult::Written(n) => {
                    in_flight.written += n;
                    if in_flight.written < in_flight.frame.bytes.len() {
                        continue;
                    }
                }
                SendResult::Failure => {
                    return Err(Error::Io(std::io::Error::other("send callback failed")));
                }
            }
            if let Some(done) = self.in_flight.take() {
                self.after_send(done.frame.header, cb)?;
            }
        }
    }

    /// Frame and send the next chunk of response body.
    ///
    /// Returns `None` when no stream has sendable data, `Some(true)` when a
    /// frame went out and `Some(false)` when the callback would block.
    fn send_next_data(&mut self, cb: &mut impl EngineCallbacks) -> Result<Option<bool>> {
        let max_payload = self
            .peer_max_frame_size
            .min(self.settings.max_send_frame_payload)
            .max(1);
        let conn_window = self.conn_send_window;

        let candidate = self.streams.iter().find_map(|(id, s)| {
            if !s.body_pending {
                return None;
            }
            let credit = s.send_window.min(conn_window).max(0) as usize;
            let len = s.body.len().min(credit).min(max_payload);
            let end_stream = len == s.body.len();
            (len > 0 || s.body.is_empty()).then_some((*id, len, end_stream))
        });
        let Some((stream_id, len, end_stream)) = candidate else {
            return Ok(None);
        };

        let flags = if end_stream { flags::END_STREAM } else { 0 };
        let header = FrameHeader::new(frame_type::DATA, flags, stream_id, len as u32);
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(None);
        };
        let payload: Vec<u8> = stream.body.range(..len).copied().collect();

        match cb.on_send_data(&header.encode(), &payload) {
            SendResult::Written(_) => {}
            SendResult::WouldBlock => return Ok(Some(false)),
            SendResult::Failure => {
                return Err(Error::Io(std::io::Error::other("send_data callback failed")));
            }
        }

        stream.body.drain(..len);
        stream.send_window -= len as i64;
        if end_stream {
            stream.body_pending = false;
        }
        self.conn_send_window -= len as i64;
        self.after_send(header, cb)?;
        Ok(Some(true))
    }

    fn after_send(&mut self, header: FrameHeader, cb: &mut impl EngineCallbacks) -> Result<()> {
        let sent = SentFrame {
            header,
            stream_window: self.streams.get(&header.stream_id).map(|s| s.send_window),
            connection_window: self.conn_send_window,
        };
        cb.on_frame_send(&sent)?;

        match header.frame_type {
            frame_type::RST_STREAM => {
                let code = self
                    .streams
                    .get(&header.stream_id)
                    .and_then(|s| s.resetting);
                if let Some(code) = code {
                    self.close_stream(header.stream_id, code, cb)?;
                }
            }
            frame_type::GOAWAY => self.goaway_sent = true,
            frame_type::DATA | frame_type::HEADERS if header.is_end_stream() => {
                let mut closed = false;
                if let Some(stream) = self.streams.get_mut(&header.stream_id) {
                    match stream.phase {
                        Phase::HalfClosedRemote => closed = true,
                        Phase::Open => stream.phase = Phase::HalfClosedLocal,
                        Phase::HalfClosedLocal => {}
                    }
                }
                if closed {
                    self.close_stream(header.stream_id, ErrorCode::NoError, cb)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close_stream(
        &mut self,
        stream_id: u32,
        code: ErrorCode,
        cb: &mut impl EngineCallbacks,
    ) -> Result<()> {
        if self.streams.remove(&stream_id).is_some() {
            cb.on_stream_close(stream_id, code)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// The engine still accepts input.
    pub fn want_read(&self) -> bool {
        !self.goaway_queued
    }

    /// Frames or sendable body data are waiting.
    pub fn want_write(&self) -> bool {
        if self.in_flight.is_some() || !self.outbound.is_empty() {
            return true;
        }
        if self.goaway_sent {
            return false;
        }
        self.streams.values().any(|s| {
            s.body_pending
                && (s.body.is_empty() || (s.send_window > 0 && self.conn_send_window > 0))
        })
    }

    pub fn stream_remote_window_size(&self, stream_id: u32) -> Option<i64> {
        self.streams.get(&stream_id).map(|s| s.send_window)
    }

    pub fn remote_window_size(&self) -> i64 {
        self.conn_send_window
    }

    pub fn is_stream_open(&self, stream_id: u32) -> bool {
        self.streams.contains_key(&stream_id)
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn last_peer_stream_id(&self) -> u32 {
        self.last_peer_stream
    }

    pub fn preface_received(&self) -> bool {
        self.preface_received
    }

    /// Error code of a GOAWAY received from the peer.
    pub fn peer_goaway(&self) -> Option<ErrorCode> {
        self.peer_goaway
    }

    pub fn is_going_away(&self) -> bool {
        self.goaway_queued
    }
}

fn header_block_too_large(size: usize) -> Error {
    Error::protocol(
        ErrorCode::EnhanceYourCalm,
        format!("header block too large ({size} bytes, max {MAX_HEADER_BLOCK_SIZE})"),
    )
}

/// Extract DATA payload, handling the PADDED flag.
fn extract_data_payload(header: &FrameHeader, mut payload: Vec<u8>) -> Result<Vec<u8>> {
    if header.flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Error::protocol(ErrorCode::ProtocolError, "PADDED DATA frame with no payload"));
    }
    let pad_length = payload[0] as usize;
    if pad_length >= payload.len() {
        return Err(Error::protocol(ErrorCode::ProtocolError, "invalid padding length in DATA frame"));
    }
    payload.truncate(payload.len() - pad_length);
    payload.remove(0);
    Ok(payload)
}

/// Extract the header block fragment, handling PADDED and PRIORITY flags.
fn extract_headers_payload(header: &FrameHeader, mut payload: Vec<u8>) -> Result<Vec<u8>> {
    let mut offset = 0;
    let mut end = payload.len();

    if header.flags & flags::PADDED != 0 {
        if payload.is_empty() {
            return Err(Error::protocol(ErrorCode::ProtocolError, "PADDED HEADERS frame with no payload"));
        }
        let pad_length = payload[0] as usize;
        offset = 1;
        if pad_length >= payload.len() - offset {
            return Err(Error::protocol(ErrorCode::ProtocolError, "invalid padding length in HEADERS frame"));
        }
        end = payload.len() - pad_length;
    }

    if header.flags & flags::PRIORITY != 0 {
        if end - offset < 5 {
            return Err(Error::protocol(ErrorCode::ProtocolError, "PRIORITY HEADERS frame with insufficient data"));
        }
        offset += 5; // stream dependency (4 bytes) + weight (1 byte)
    }

    if offset == 0 && end == payload.len() {
        return Ok(payload);
    }
    payload.truncate(end);
    payload.drain(..offset);
    Ok(payload)
}
