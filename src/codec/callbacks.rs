use super::{ErrorCode, FrameHeader, Header};
use crate::error::Result;

/// Outcome of handing bytes to the transport side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// This many bytes were accepted.
    Written(usize),
    /// No capacity right now; the engine keeps the frame and retries later.
    WouldBlock,
    /// The transport failed; the engine stops sending.
    Failure,
}

/// Whether a header block opens a request or trails an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersCategory {
    Request,
    Trailers,
}

/// A frame that has been fully handed to the transport side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentFrame {
    pub header: FrameHeader,
    /// Remote flow-control window of the frame's stream after sending, if
    /// the stream is still tracked.
    pub stream_window: Option<i64>,
    /// Remote connection-level flow-control window after sending.
    pub connection_window: i64,
}

impl SentFrame {
    /// The peer has granted no more credit for this stream's data.
    pub fn window_exhausted(&self) -> bool {
        self.connection_window <= 0 || self.stream_window.is_some_and(|w| w <= 0)
    }
}

/// Callback table driven by the [`Engine`](super::Engine).
///
/// An `Err` from any callback aborts the current `process`/`send` call and is
/// returned to the caller.
pub trait EngineCallbacks {
    /// A HEADERS frame started a header block on `stream_id`.
    fn on_begin_headers(&mut self, _stream_id: u32, _category: HeadersCategory) -> Result<()> {
        Ok(())
    }

    /// One decoded header of the current block.
    fn on_header(&mut self, _stream_id: u32, _header: &Header) -> Result<()> {
        Ok(())
    }

    /// A frame was received. For HEADERS the block is complete and the flags
    /// carry END_STREAM from the opening frame.
    fn on_frame_recv(&mut self, _frame: &FrameHeader) -> Result<()> {
        Ok(())
    }

    /// A chunk of request body arrived.
    fn on_data_chunk_recv(&mut self, _stream_id: u32, _flags: u8, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    /// The stream left the engine's table.
    fn on_stream_close(&mut self, _stream_id: u32, _error_code: ErrorCode) -> Result<()> {
        Ok(())
    }

    /// Write serialized frame bytes. Partial writes are allowed.
    fn send(&mut self, data: &[u8]) -> SendResult;

    /// A frame was completely written.
    fn on_frame_send(&mut self, _frame: &SentFrame) -> Result<()> {
        Ok(())
    }

    /// Write one DATA frame: the 9-byte header followed by `payload`.
    ///
    /// Either the whole frame is accepted or `WouldBlock` is returned and
    /// nothing is consumed. The default copies both parts through `send`.
    fn on_send_data(&mut self, frame_header: &[u8], payload: &[u8]) -> SendResult {
        let mut frame = Vec::with_capacity(frame_header.len() + payload.len());
        frame.extend_from_slice(frame_header);
        frame.extend_from_slice(payload);
        match self.send(&frame) {
            SendResult::Written(n) if n == frame.len() => SendResult::Written(n),
            SendResult::Written(_) => SendResult::Failure,
            other => other,
        }
    }
}
