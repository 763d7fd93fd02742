//! Frame builders.
//!
//! Each builder returns the complete wire form of one frame (or, for
//! [`headers`], a HEADERS frame followed by any CONTINUATION frames).

use super::{flags, frame_type, ErrorCode, FrameHeader, FRAME_HEADER_LEN};

fn frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader::new(frame_type, flags, stream_id, payload.len() as u32);
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

/// SETTINGS frame carrying `(identifier, value)` pairs.
pub fn settings(entries: &[(u16, u32)]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(entries.len() * 6);
    for (id, value) in entries {
        payload.extend_from_slice(&id.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
    }
    frame(frame_type::SETTINGS, 0, 0, &payload)
}

pub fn settings_ack() -> Vec<u8> {
    frame(frame_type::SETTINGS, flags::ACK, 0, &[])
}

pub fn ping(data: [u8; 8]) -> Vec<u8> {
    frame(frame_type::PING, 0, 0, &data)
}

pub fn ping_ack(data: [u8; 8]) -> Vec<u8> {
    frame(frame_type::PING, flags::ACK, 0, &data)
}

/// WINDOW_UPDATE; `stream_id` 0 targets the connection window.
pub fn window_update(stream_id: u32, increment: u32) -> Vec<u8> {
    let increment = increment & 0x7FFF_FFFF; // Clear reserved bit
    frame(frame_type::WINDOW_UPDATE, 0, stream_id, &increment.to_be_bytes())
}

pub fn rst_stream(stream_id: u32, code: ErrorCode) -> Vec<u8> {
    frame(frame_type::RST_STREAM, 0, stream_id, &code.as_u32().to_be_bytes())
}

pub fn goaway(last_stream_id: u32, code: ErrorCode) -> Vec<u8> {
    let mut payload = [0u8; 8];
    payload[..4].copy_from_slice(&(last_stream_id & 0x7FFF_FFFF).to_be_bytes());
    payload[4..].copy_from_slice(&code.as_u32().to_be_bytes());
    frame(frame_type::GOAWAY, 0, 0, &payload)
}

pub fn data(stream_id: u32, payload: &[u8], end_stream: bool) -> Vec<u8> {
    let flags = if end_stream { flags::END_STREAM } else { 0 };
    frame(frame_type::DATA, flags, stream_id, payload)
}

/// CONTINUATION frame; `end_headers` marks the last frame of the block.
pub fn continuation(stream_id: u32, payload: &[u8], end_headers: bool) -> Vec<u8> {
    let flags = if end_headers { flags::END_HEADERS } else { 0 };
    frame(frame_type::CONTINUATION, flags, stream_id, payload)
}

/// HEADERS frame for an encoded header block, split into CONTINUATION
/// frames when the block exceeds `max_frame_size`.
pub fn headers(stream_id: u32, block: &[u8], end_stream: bool, max_frame_size: usize) -> Vec<u8> {
    let max = max_frame_size.max(1);
    let first_len = block.len().min(max);
    let (first, mut rest) = block.split_at(first_len);

    let mut flags = if end_stream { flags::END_STREAM } else { 0 };
    if rest.is_empty() {
        flags |= flags::END_HEADERS;
    }
    let mut out = frame(frame_type::HEADERS, flags, stream_id, first);

    while !rest.is_empty() {
        let n = rest.len().min(max);
        let (chunk, tail) = rest.split_at(n);
        out.extend_from_slice(&continuation(stream_id, chunk, tail.is_empty()));
        rest = tail;
    }
    out
}
