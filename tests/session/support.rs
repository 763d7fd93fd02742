//! In-memory transport and an event-loop harness for session tests

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::Duration;

use h2_session_engine::codec::{frame, FrameHeader, CONNECTION_PREFACE, FRAME_HEADER_LEN};
use h2_session_engine::{
    Channel, Event, EventBus, ManualClock, ProtocolSession, SessionConfig, SessionHandle,
    Transport,
};

/// Both directions of the fake socket, as seen from the server.
#[derive(Debug, Default)]
pub struct Wire {
    /// Bytes the client has sent and the server has not read yet.
    pub inbound: VecDeque<u8>,
    /// Bytes the server has written.
    pub outbound: Vec<u8>,
    /// Bytes the server may still write; `None` is unlimited.
    pub write_budget: Option<usize>,
    /// Reads return EOF once `inbound` is drained.
    pub peer_closed: bool,
    pub closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport(pub Rc<RefCell<Wire>>);

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut wire = self.0.borrow_mut();
        if wire.inbound.is_empty() {
            if wire.peer_closed {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(wire.inbound.len());
        for (dst, src) in buf.iter_mut().zip(wire.inbound.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut wire = self.0.borrow_mut();
        let n = match wire.write_budget.as_mut() {
            None => buf.len(),
            Some(budget) => {
                let n = buf.len().min(*budget);
                *budget -= n;
                n
            }
        };
        if n == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        wire.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn close(&mut self) -> io::Result<()> {
        self.0.borrow_mut().closed = true;
        Ok(())
    }
}

pub const SESSION: u64 = 1;

const CHANNELS: [Channel; 6] = [
    Channel::SessionInitialized,
    Channel::DataReceived,
    Channel::SessionWantWrite,
    Channel::StreamPrepareResponse,
    Channel::SendBufferEmptied,
    Channel::SessionDeleted,
];

/// One session on a mock socket, plus a recorder on every bus channel.
pub struct Harness {
    pub bus: Rc<EventBus<Event>>,
    pub clock: ManualClock,
    pub wire: Rc<RefCell<Wire>>,
    pub session: SessionHandle<MockTransport>,
    pub events: Rc<RefCell<Vec<(Channel, Event)>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let bus = Rc::new(EventBus::new());
        let events = Rc::new(RefCell::new(Vec::new()));
        for channel in CHANNELS {
            let events = events.clone();
            bus.register(
                channel,
                move |_: &EventBus<Event>, channel: Channel, event: &Event| {
                    events.borrow_mut().push((channel, *event));
                },
            );
        }

        let clock = ManualClock::new();
        let wire = Rc::new(RefCell::new(Wire::default()));
        let session = ProtocolSession::new(
            SESSION,
            MockTransport(wire.clone()),
            bus.clone(),
            Rc::new(config),
            Rc::new(clock.clone()),
        );
        Self {
            bus,
            clock,
            wire,
            session,
            events,
        }
    }

    /// A session that has exchanged prefaces and SETTINGS, with its own
    /// SETTINGS acknowledged. `client_settings` go in the client's SETTINGS.
    pub fn handshake(client_settings: &[(u16, u32)]) -> Self {
        let h = Self::new();
        h.complete_handshake(client_settings);
        h
    }

    pub fn complete_handshake(&self, client_settings: &[(u16, u32)]) {
        let mut bytes = CONNECTION_PREFACE.to_vec();
        bytes.extend_from_slice(&frame::settings(client_settings));
        bytes.extend_from_slice(&frame::settings_ack());
        self.client_sends(&bytes);
        self.pump();
        self.sent_frames();
        self.events.borrow_mut().clear();
    }

    pub fn client_sends(&self, bytes: &[u8]) {
        self.wire.borrow_mut().inbound.extend(bytes.iter().copied());
    }

    /// Act as the event loop until nothing more happens.
    pub fn pump(&self) {
        for _ in 0..256 {
            let mut progressed = false;

            let readable = {
                let wire = self.wire.borrow();
                !wire.inbound.is_empty() || wire.peer_closed
            };
            if readable && self.session.borrow().interest().readable {
                self.session.borrow_mut().on_readable().unwrap();
                progressed = true;
            }
            progressed |= self.bus.dispatch() > 0;

            let writable = self.wire.borrow().write_budget != Some(0);
            if writable && self.session.borrow().interest().writable {
                self.session.borrow_mut().on_writable().unwrap();
                progressed = true;
            }
            progressed |= self.bus.dispatch() > 0;

            if !progressed {
                return;
            }
        }
        panic!("session did not settle");
    }

    /// Move the clock forward, fire due watchdogs and run the loop.
    pub fn advance(&self, by: Duration) -> usize {
        self.clock.advance(by);
        let fired = self.session.borrow_mut().on_timeout();
        self.pump();
        fired
    }

    /// Parse and clear everything the server has written.
    pub fn sent_frames(&self) -> Vec<(FrameHeader, Vec<u8>)> {
        let bytes = std::mem::take(&mut self.wire.borrow_mut().outbound);
        let mut rest = &bytes[..];
        let mut frames = Vec::new();
        while let Some(header) = FrameHeader::parse(rest) {
            let total = header.total_size();
            frames.push((header, rest[FRAME_HEADER_LEN..total].to_vec()));
            rest = &rest[total..];
        }
        assert!(rest.is_empty(), "partial frame on the wire");
        frames
    }

    pub fn saw(&self, channel: Channel, event: Event) -> bool {
        self.events.borrow().contains(&(channel, event))
    }

    pub fn count(&self, channel: Channel) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|(c, _)| *c == channel)
            .count()
    }
}

/// GET / over https.
pub fn request(stream_id: u32, end_stream: bool) -> Vec<u8> {
    frame::headers(stream_id, &[0x82, 0x87, 0x84], end_stream, 16_384)
}

pub fn u32_at(payload: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        payload[offset],
        payload[offset + 1],
        payload[offset + 2],
        payload[offset + 3],
    ])
}
