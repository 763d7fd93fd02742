//! Bus channels and payloads used by the session engine.

use crate::stream_table::StreamId;

pub type SessionId = u64;

/// Message categories routed by the [`EventBus`](crate::bus::EventBus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// A session finished initialization and is active.
    SessionInitialized,
    /// New bytes landed in a session's receive buffer.
    DataReceived,
    /// The codec engine has frames waiting to be written.
    SessionWantWrite,
    /// A request stream has been fully received.
    StreamPrepareResponse,
    /// A session's send buffer drained to empty.
    SendBufferEmptied,
    /// A session was torn down and its transport closed.
    SessionDeleted,
}

/// Payload carried by session engine messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Session(SessionId),
    Stream { session: SessionId, stream: StreamId },
}

impl Event {
    /// The session this event refers to.
    pub fn session(&self) -> SessionId {
        match *self {
            Event::Session(id) => id,
            Event::Stream { session, .. } => session,
        }
    }
}
