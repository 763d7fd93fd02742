//! Engine callbacks: the part of a session the codec engine drives.

use std::rc::Rc;

use super::stream::{Stream, StreamState, SETTINGS_WATCHDOG};
use super::timer::SessionTimer;
use crate::bus::EventBus;
use crate::codec::{
    frame_type, EngineCallbacks, ErrorCode, FrameHeader, Header, HeadersCategory, SendResult,
    SentFrame,
};
use crate::config::SessionConfig;
use crate::connection::Connection;
use crate::error::{fatal, invariant, Error, Result};
use crate::event::{Channel, Event, SessionId};
use crate::stream_table::{StreamId, StreamTable};
use crate::transport::Transport;
use crate::watchdog::{WatchdogId, WatchdogRegistry};

/// Session state the engine callbacks operate on, split from the engine so
/// both can be borrowed at once.
pub(crate) struct SessionCore<T> {
    pub(crate) id: SessionId,
    pub(crate) connection: Connection<T>,
    pub(crate) streams: StreamTable<Stream>,
    pub(crate) watchdogs: WatchdogRegistry<SessionTimer>,
    pub(crate) bus: Rc<EventBus<Event>>,
    pub(crate) config: Rc<SessionConfig>,
    /// Category of the header block being decoded.
    pub(crate) block: HeadersCategory,
}

impl<T: Transport> SessionCore<T> {
    /// Push back the recv watchdog of a stream that is still receiving.
    fn extend_recv_watchdog(&mut self, id: WatchdogId) {
        match self.watchdogs.restart(id) {
            // already expired; the stream is being reset
            Ok(()) | Err(Error::NotArmed(_)) => {}
            Err(err) => fatal("restart recv watchdog", &err),
        }
    }

    fn prepare_response(&mut self, stream_id: StreamId) {
        tracing::debug!(session = self.id, stream = stream_id, "prepare response");
        self.bus.broadcast(
            Channel::StreamPrepareResponse,
            Event::Stream {
                session: self.id,
                stream: stream_id,
            },
        );
    }
}

impl<T: Transport> EngineCallbacks for SessionCore<T> {
    fn on_begin_headers(&mut self, stream_id: u32, category: HeadersCategory) -> Result<()> {
        self.block = category;
        if category != HeadersCategory::Request {
            tracing::debug!(session = self.id, stream = stream_id, ?category, "not a request header block");
            return Ok(());
        }
        tracing::debug!(session = self.id, stream = stream_id, "begin headers");

        let stream = Stream::new(stream_id, self.id);
        let (recv, send) = (stream.recv_watchdog(), stream.send_watchdog());
        invariant(
            "add recv watchdog",
            self.watchdogs.add(
                recv,
                self.config.stream_recv_timeout(),
                SessionTimer::StreamRecv(stream_id),
            ),
        );
        invariant(
            "add send watchdog",
            self.watchdogs.add(
                send,
                self.config.stream_send_timeout(),
                SessionTimer::StreamSend(stream_id),
            ),
        );
        invariant("start recv watchdog", self.watchdogs.start(recv));
        invariant("insert stream", self.streams.put(stream_id, stream));
        Ok(())
    }

    fn on_header(&mut self, stream_id: u32, header: &Header) -> Result<()> {
        tracing::trace!(
            session = self.id,
            stream = stream_id,
            name = %header.name,
            value = %header.value,
            "header"
        );
        if let Some(stream) = self.streams.get_mut(stream_id) {
            match self.block {
                HeadersCategory::Request => stream.push_header(header.clone()),
                HeadersCategory::Trailers => stream.push_trailer(header.clone()),
            }
        }
        Ok(())
    }

    fn on_frame_recv(&mut self, frame: &FrameHeader) -> Result<()> {
        tracing::debug!(
            session = self.id,
            stream = frame.stream_id,
            frame_type = frame.frame_type,
            "recv frame"
        );
        match frame.frame_type {
            frame_type::DATA | frame_type::HEADERS => {
                let Some(stream) = self.streams.get_mut(frame.stream_id) else {
                    return Ok(());
                };
                let recv = stream.recv_watchdog();
                if frame.is_end_stream() {
                    stream.set_state(StreamState::HalfClosedRemote);
                    invariant("stop recv watchdog", self.watchdogs.stop(recv));
                    self.prepare_response(frame.stream_id);
                } else {
                    self.extend_recv_watchdog(recv);
                }
            }
            frame_type::SETTINGS if frame.is_ack() => {
                tracing::debug!(session = self.id, "stop settings timer");
                invariant("stop settings watchdog", self.watchdogs.stop(SETTINGS_WATCHDOG));
            }
            _ => {}
        }
        Ok(())
    }

    fn on_data_chunk_recv(&mut self, stream_id: u32, _flags: u8, data: &[u8]) -> Result<()> {
        tracing::trace!(session = self.id, stream = stream_id, bytes = data.len(), "data chunk");
        if let Some(stream) = self.streams.get(stream_id) {
            let recv = stream.recv_watchdog();
            invariant("extend recv watchdog", self.watchdogs.restart_if_started(recv));
        }
        Ok(())
    }

    fn on_stream_close(&mut self, stream_id: u32, error_code: ErrorCode) -> Result<()> {
        tracing::debug!(session = self.id, stream = stream_id, ?error_code, "close stream");
        self.connection.start_flush();

        let mut stream = invariant("pop stream", self.streams.pop(stream_id));
        invariant("remove recv watchdog", self.watchdogs.remove(stream.recv_watchdog()));
        invariant("remove send watchdog", self.watchdogs.remove(stream.send_watchdog()));
        stream.set_state(StreamState::Closed);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> SendResult {
        if self.connection.is_closed() {
            return SendResult::Failure;
        }
        let n = self.connection.send(data);
        tracing::trace!(session = self.id, bytes = n, "send http data");
        if n == 0 {
            SendResult::WouldBlock
        } else {
            SendResult::Written(n)
        }
    }

    fn on_frame_send(&mut self, frame: &SentFrame) -> Result<()> {
        let header = &frame.header;
        tracing::debug!(
            session = self.id,
            stream = header.stream_id,
            frame_type = header.frame_type,
            "sent frame"
        );
        if !matches!(header.frame_type, frame_type::DATA | frame_type::HEADERS) {
            return Ok(());
        }
        let Some(stream) = self.streams.get(header.stream_id) else {
            return Ok(());
        };
        let (recv, send) = (stream.recv_watchdog(), stream.send_watchdog());

        if header.is_end_stream() {
            invariant("stop send watchdog", self.watchdogs.stop(send));
        } else if frame.window_exhausted() {
            // blocked on flow control credit
            invariant("extend recv watchdog", self.watchdogs.restart_if_started(recv));
            invariant("start send watchdog", self.watchdogs.start(send));
        } else {
            invariant("extend recv watchdog", self.watchdogs.restart_if_started(recv));
            invariant("stop send watchdog", self.watchdogs.stop(send));
        }
        Ok(())
    }

    fn on_send_data(&mut self, frame_header: &[u8], payload: &[u8]) -> SendResult {
        if self.connection.is_closed() {
            return SendResult::Failure;
        }
        let size = frame_header.len() + payload.len();
        if size > self.connection.send_free_space() {
            self.connection.start_flush();
            return SendResult::WouldBlock;
        }

        let view = self.connection.send_view();
        view[..frame_header.len()].copy_from_slice(frame_header);
        view[frame_header.len()..size].copy_from_slice(payload);
        invariant("provide send buffer", self.connection.send_provided(size));
        tracing::trace!(session = self.id, bytes = size, "send data frame");
        SendResult::Written(size)
    }
}
