use crate::codec::Header;
use crate::event::SessionId;
use crate::stream_table::StreamId;
use crate::watchdog::WatchdogId;

/// Watchdog id of the connection-level SETTINGS acknowledgement timer.
pub const SETTINGS_WATCHDOG: WatchdogId = 0;

/// Watchdog slots per stream: `stream_id * WATCHDOG_SLOTS + slot`.
///
/// Client stream ids start at 1, so stream watchdogs never collide with
/// [`SETTINGS_WATCHDOG`].
const WATCHDOG_SLOTS: u64 = 2;
const RECV_SLOT: u64 = 0;
const SEND_SLOT: u64 = 1;

pub fn recv_watchdog_id(stream: StreamId) -> WatchdogId {
    u64::from(stream) * WATCHDOG_SLOTS + RECV_SLOT
}

pub fn send_watchdog_id(stream: StreamId) -> WatchdogId {
    u64::from(stream) * WATCHDOG_SLOTS + SEND_SLOT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    /// The request is complete; only the response remains.
    HalfClosedRemote,
    Closed,
}

/// One request/response exchange within a session.
#[derive(Debug, Clone)]
pub struct Stream {
    id: StreamId,
    session: SessionId,
    state: StreamState,
    headers: Vec<Header>,
    trailers: Vec<Header>,
}

impl Stream {
    pub(crate) fn new(id: StreamId, session: SessionId) -> Self {
        Self {
            id,
            session,
            state: StreamState::Open,
            headers: Vec::new(),
            trailers: Vec::new(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Id of the owning session.
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: StreamState) {
        self.state = state;
    }

    /// Request headers, in arrival order.
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub(crate) fn push_header(&mut self, header: Header) {
        self.headers.push(header);
    }

    /// Trailer fields sent after the request body.
    pub fn trailers(&self) -> &[Header] {
        &self.trailers
    }

    pub(crate) fn push_trailer(&mut self, header: Header) {
        self.trailers.push(header);
    }

    /// First value of request header `name`. Trailers are not searched.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.as_str())
    }

    pub fn recv_watchdog(&self) -> WatchdogId {
        recv_watchdog_id(self.id)
    }

    pub fn send_watchdog(&self) -> WatchdogId {
        send_watchdog_id(self.id)
    }
}
