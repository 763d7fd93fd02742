//! Transport half of a session.
//!
//! A [`Connection`] owns the transport and the two flow buffers. It decides
//! readiness interest from buffer occupancy: reading pauses when the receive
//! buffer fills and resumes once it drains to the high watermark; writing
//! starts when the send buffer grows past the low watermark or when a flush
//! is requested, and stops when it is empty.
//!
//! Readiness handlers publish [`Channel::DataReceived`] after reading and
//! [`Channel::SendBufferEmptied`] after draining the send buffer.

use std::io;
use std::rc::Rc;

use crate::buffer::FlowBuffer;
use crate::bus::EventBus;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::event::{Channel, Event, SessionId};
use crate::transport::Transport;

/// Readiness the event loop should watch for.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

/// Whether the transport is still usable after a readiness handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    Open,
    /// The peer closed or reset the connection.
    Closed,
}

pub struct Connection<T> {
    id: SessionId,
    transport: T,
    recv: FlowBuffer,
    send: FlowBuffer,
    recv_high_watermark: usize,
    send_low_watermark: usize,
    interest: Interest,
    closed: bool,
    bus: Rc<EventBus<Event>>,
}

impl<T> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("recv", &self.recv)
            .field("send", &self.send)
            .field("interest", &self.interest)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<T: Transport> Connection<T> {
    pub fn new(id: SessionId, transport: T, bus: Rc<EventBus<Event>>, config: &SessionConfig) -> Self {
        tracing::debug!(session = id, "init connection");
        Self {
            id,
            transport,
            recv: FlowBuffer::with_capacity(config.recv_buffer_size),
            send: FlowBuffer::with_capacity(config.send_buffer_size),
            recv_high_watermark: config.recv_high_watermark,
            send_low_watermark: config.send_low_watermark,
            interest: Interest {
                readable: true,
                writable: false,
            },
            closed: false,
            bus,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Read until the receive buffer is full or the transport would block.
    pub fn on_readable(&mut self) -> Result<IoStatus> {
        let id = self.id;
        while !self.recv.is_full() {
            match self.recv.read_from(&mut self.transport) {
                Ok(0) => {
                    tracing::debug!(session = id, "peer closed connection");
                    return Ok(IoStatus::Closed);
                }
                Ok(n) => tracing::trace!(session = id, bytes = n, "recv"),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    tracing::debug!(session = id, "connection reset by peer");
                    return Ok(IoStatus::Closed);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if self.recv.is_full() {
            tracing::debug!(session = id, "stop receiving data");
            self.interest.readable = false;
        }
        if !self.recv.is_empty() {
            self.bus.broadcast(Channel::DataReceived, Event::Session(id));
        }
        Ok(IoStatus::Open)
    }

    /// Write until the send buffer is empty or the transport would block.
    pub fn on_writable(&mut self) -> Result<IoStatus> {
        let id = self.id;
        while !self.send.is_empty() {
            match self.send.write_to(&mut self.transport) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => tracing::trace!(session = id, bytes = n, "send"),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
                    ) =>
                {
                    tracing::debug!(session = id, "connection reset by peer");
                    return Ok(IoStatus::Closed);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if self.send.is_empty() {
            tracing::debug!(session = id, "send buffer is empty");
            self.interest.writable = false;
            self.bus.broadcast(Channel::SendBufferEmptied, Event::Session(id));
        }
        Ok(IoStatus::Open)
    }

    /// Unread received bytes.
    pub fn recv_view(&self) -> &[u8] {
        self.recv.outgoing_view()
    }

    pub fn recv_consumed(&mut self, n: usize) -> Result<()> {
        self.recv.outgoing_consumed(n)?;
        self.check_recv_watermark();
        Ok(())
    }

    /// Copy as much of `data` as fits into the send buffer.
    pub fn send(&mut self, data: &[u8]) -> usize {
        let n = self.send.incoming_mem(data);
        self.check_send_watermark();
        n
    }

    /// Free tail of the send buffer for in-place frame serialization.
    pub fn send_view(&mut self) -> &mut [u8] {
        self.send.incoming_view()
    }

    pub fn send_provided(&mut self, n: usize) -> Result<()> {
        self.send.incoming_provided(n)?;
        self.check_send_watermark();
        Ok(())
    }

    pub fn send_free_space(&self) -> usize {
        self.send.free_space()
    }

    pub fn send_used_space(&self) -> usize {
        self.send.used_space()
    }

    pub fn recv_used_space(&self) -> usize {
        self.recv.used_space()
    }

    /// Start writing whatever is buffered, regardless of the low watermark.
    pub fn start_flush(&mut self) {
        if !self.send.is_empty() && !self.interest.writable {
            tracing::debug!(session = self.id, bytes = self.send.used_space(), "flush send buffer");
            self.interest.writable = true;
        }
    }

    /// Like [`Connection::start_flush`], but publishes
    /// [`Channel::SendBufferEmptied`] right away when nothing is buffered.
    pub fn flush_send_buffer(&mut self) {
        if self.send.is_empty() {
            self.bus.broadcast(Channel::SendBufferEmptied, Event::Session(self.id));
        } else {
            self.start_flush();
        }
    }

    /// Close the transport. Later calls are no-ops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.interest = Interest::default();
        if let Err(e) = self.transport.close() {
            tracing::warn!(session = self.id, error = %e, "closing transport failed");
        }
    }

    fn check_recv_watermark(&mut self) {
        if self.closed || self.recv.used_space() > self.recv_high_watermark {
            return;
        }
        if !self.interest.readable {
            tracing::debug!(session = self.id, "re-enable receiving data");
        }
        self.interest.readable = true;
    }

    fn check_send_watermark(&mut self) {
        if self.closed || self.send.used_space() <= self.send_low_watermark {
            return;
        }
        if !self.interest.writable {
            tracing::debug!(session = self.id, "start flushing out send buffer");
        }
        self.interest.writable = true;
    }
}
