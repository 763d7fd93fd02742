use super::ProtocolSession;
use crate::codec::ErrorCode;
use crate::stream_table::StreamId;
use crate::transport::Transport;
use crate::watchdog::{WatchdogHandler, WatchdogId};

/// What a session watchdog guards. Expiry runs against the owning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTimer {
    /// The peer has not acknowledged our SETTINGS.
    Settings,
    /// A stream stopped delivering its request.
    StreamRecv(StreamId),
    /// A stream's response has been blocked on flow control too long.
    StreamSend(StreamId),
}

impl<T: Transport + 'static> WatchdogHandler<ProtocolSession<T>> for SessionTimer {
    fn on_expiry(&self, id: WatchdogId, session: &mut ProtocolSession<T>) {
        match *self {
            SessionTimer::Settings => {
                tracing::warn!(session = session.id(), watchdog = id, "settings timeout");
                session.terminate(ErrorCode::SettingsTimeout);
            }
            SessionTimer::StreamRecv(stream) => session.expire_stream(stream, "recv"),
            SessionTimer::StreamSend(stream) => session.expire_stream(stream, "send"),
        }
    }
}
