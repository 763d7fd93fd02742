//! HTTP/2 protocol session.
//!
//! A [`ProtocolSession`] ties one [`Connection`] to one codec [`Engine`]. It
//! keeps the open streams in a [`StreamTable`], guards them with watchdogs
//! and talks to the rest of the process through the shared [`EventBus`].
//!
//! Sessions are held as `Rc<RefCell<_>>`. Bus recipients registered by a
//! session hold only a `Weak` reference and filter on the session id, so the
//! bus must be dispatched from the event loop while no session is borrowed.
//!
//! Watchdog policy: when the peer does not acknowledge SETTINGS in time the
//! session sends GOAWAY(SETTINGS_TIMEOUT) and shuts down. A stream whose
//! request stalls, or whose response stays blocked on flow control, is reset
//! with RST_STREAM(CANCEL); the other streams are unaffected.

mod callbacks;
mod stream;
mod timer;

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Instant;

pub use stream::{recv_watchdog_id, send_watchdog_id, Stream, StreamState, SETTINGS_WATCHDOG};
pub use timer::SessionTimer;

use callbacks::SessionCore;

use crate::bus::{EventBus, RecipientHandle};
use crate::codec::{Engine, EngineSettings, ErrorCode, Header, HeadersCategory, FRAME_HEADER_LEN};
use crate::config::SessionConfig;
use crate::connection::{Connection, Interest, IoStatus};
use crate::error::{invariant, Error, Result};
use crate::event::{Channel, Event, SessionId};
use crate::stream_table::{StreamId, StreamTable};
use crate::transport::Transport;
use crate::watchdog::{Clock, WatchdogHandler, WatchdogRegistry};

pub type SessionHandle<T> = Rc<RefCell<ProtocolSession<T>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Active,
    /// Waiting for the send buffer to drain before closing.
    ShuttingDown,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Active => "active",
            SessionState::ShuttingDown => "shutting down",
            SessionState::Closed => "closed",
        }
    }
}

pub struct ProtocolSession<T: Transport + 'static> {
    core: SessionCore<T>,
    engine: Engine,
    state: SessionState,
    recipients: Vec<(Channel, RecipientHandle)>,
    shutdown: Option<RecipientHandle>,
    this: Weak<RefCell<ProtocolSession<T>>>,
}

impl<T: Transport + 'static> std::fmt::Debug for ProtocolSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("id", &self.core.id)
            .field("state", &self.state)
            .field("streams", &self.core.streams.len())
            .field("connection", &self.core.connection)
            .finish()
    }
}

/// Bus recipient that runs `action` on the session when a message for
/// session `id` arrives.
fn forward<T: Transport + 'static>(
    session: Weak<RefCell<ProtocolSession<T>>>,
    id: SessionId,
    action: fn(&mut ProtocolSession<T>),
) -> impl Fn(&EventBus<Event>, Channel, &Event) + 'static {
    move |_: &EventBus<Event>, _: Channel, event: &Event| {
        if event.session() != id {
            return;
        }
        if let Some(session) = session.upgrade() {
            action(&mut session.borrow_mut());
        }
    }
}

/// `config` with out-of-range values corrected; shared unchanged when it is
/// already valid.
fn checked_config(config: Rc<SessionConfig>) -> Rc<SessionConfig> {
    let mut checked = SessionConfig::clone(&config);
    checked.validate();
    if checked == *config {
        config
    } else {
        Rc::new(checked)
    }
}

impl<T: Transport + 'static> ProtocolSession<T> {
    /// Create a session over `transport`, submit our SETTINGS and arm the
    /// settings watchdog.
    pub fn new(
        id: SessionId,
        transport: T,
        bus: Rc<EventBus<Event>>,
        config: Rc<SessionConfig>,
        clock: Rc<dyn Clock>,
    ) -> SessionHandle<T> {
        let config = checked_config(config);
        let session = Rc::new_cyclic(|this: &Weak<RefCell<Self>>| {
            let recipients = vec![
                (
                    Channel::DataReceived,
                    bus.register(
                        Channel::DataReceived,
                        forward(this.clone(), id, Self::process_input),
                    ),
                ),
                (
                    Channel::SessionWantWrite,
                    bus.register(
                        Channel::SessionWantWrite,
                        forward(this.clone(), id, Self::flush_output),
                    ),
                ),
            ];
            let engine = Engine::server(EngineSettings {
                max_concurrent_streams: config.max_concurrent_streams,
                initial_window_size: config.initial_window_size,
                max_send_frame_payload: config.send_buffer_size.saturating_sub(FRAME_HEADER_LEN),
            });
            let core = SessionCore {
                id,
                connection: Connection::new(id, transport, bus.clone(), &config),
                streams: StreamTable::new(),
                watchdogs: WatchdogRegistry::new(clock),
                bus,
                config,
                block: HeadersCategory::Request,
            };
            RefCell::new(Self {
                core,
                engine,
                state: SessionState::Initializing,
                recipients,
                shutdown: None,
                this: this.clone(),
            })
        });
        session.borrow_mut().init();
        session
    }

    fn init(&mut self) {
        let id = self.core.id;
        invariant(
            "add settings watchdog",
            self.core.watchdogs.add(
                SETTINGS_WATCHDOG,
                self.core.config.settings_timeout(),
                SessionTimer::Settings,
            ),
        );
        invariant("start settings watchdog", self.core.watchdogs.start(SETTINGS_WATCHDOG));
        self.engine.submit_settings(&[]);

        self.state = SessionState::Active;
        tracing::info!(session = id, "session initialized");
        self.core.bus.broadcast(Channel::SessionInitialized, Event::Session(id));
        self.check_want_write();
    }

    pub fn id(&self) -> SessionId {
        self.core.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.core.streams.get(id)
    }

    pub fn streams(&self) -> &StreamTable<Stream> {
        &self.core.streams
    }

    pub fn watchdogs(&self) -> &WatchdogRegistry<SessionTimer> {
        &self.core.watchdogs
    }

    pub fn connection(&self) -> &Connection<T> {
        &self.core.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection<T> {
        &mut self.core.connection
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Readiness the loop should watch for on the transport.
    pub fn interest(&self) -> Interest {
        self.core.connection.interest()
    }

    /// When the loop should next call [`ProtocolSession::on_timeout`].
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.state == SessionState::Closed {
            return None;
        }
        self.core.watchdogs.next_deadline()
    }

    /// The transport is readable. Peer disconnects close the session.
    pub fn on_readable(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        match self.core.connection.on_readable() {
            Ok(IoStatus::Open) => Ok(()),
            Ok(IoStatus::Closed) => {
                self.close();
                Ok(())
            }
            Err(err) => {
                tracing::error!(session = self.core.id, error = %err, "recv failed");
                self.close();
                Err(err)
            }
        }
    }

    /// The transport is writable. Peer disconnects close the session.
    pub fn on_writable(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        match self.core.connection.on_writable() {
            Ok(IoStatus::Open) => {
                if self.state == SessionState::Active && self.engine.want_write() {
                    self.flush_output();
                }
                Ok(())
            }
            Ok(IoStatus::Closed) => {
                self.close();
                Ok(())
            }
            Err(err) => {
                tracing::error!(session = self.core.id, error = %err, "send failed");
                self.close();
                Err(err)
            }
        }
    }

    /// Run the handlers of every expired watchdog. Returns how many fired.
    pub fn on_timeout(&mut self) -> usize {
        let expired = self.core.watchdogs.expire();
        let fired = expired.len();
        for (id, timer) in expired {
            if self.state == SessionState::Closed {
                break;
            }
            timer.on_expiry(id, self);
        }
        fired
    }

    /// Feed buffered input to the engine, then write whatever it produced.
    pub fn process_input(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let input = self.core.connection.recv_view().to_vec();
        if input.is_empty() {
            return;
        }
        let result = self.engine.mem_recv(&input, &mut self.core);
        // the engine buffers partial frames itself, so all input is consumed
        invariant(
            "consume recv buffer",
            self.core.connection.recv_consumed(input.len()),
        );
        match result {
            Ok(consumed) => {
                tracing::debug!(session = self.core.id, bytes = consumed, "recv http data");
                self.flush_output();
            }
            Err(err) => self.fail(err),
        }
    }

    /// Move pending engine output into the send buffer and start writing.
    pub fn flush_output(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Err(err) = self.engine.send(&mut self.core) {
            self.fail(err);
            return;
        }
        self.core.connection.start_flush();
    }

    /// Queue a response for a fully received request.
    pub fn submit_response(
        &mut self,
        stream_id: StreamId,
        headers: &[Header],
        body: Option<Vec<u8>>,
    ) -> Result<()> {
        if self.state != SessionState::Active {
            return Err(Error::InvalidState(self.state.as_str()));
        }
        if !self.core.streams.contains(stream_id) {
            return Err(Error::UnknownId(stream_id.into()));
        }
        tracing::debug!(session = self.core.id, stream = stream_id, "submit response");
        self.engine.submit_response(stream_id, headers, body)?;
        self.check_want_write();
        Ok(())
    }

    /// Reset one stream, leaving the rest of the session alone.
    pub fn reset_stream(&mut self, stream_id: StreamId, code: ErrorCode) {
        if self.state == SessionState::Closed || !self.core.streams.contains(stream_id) {
            return;
        }
        tracing::debug!(session = self.core.id, stream = stream_id, ?code, "reset stream");
        self.engine.submit_rst_stream(stream_id, code);
        self.check_want_write();
    }

    pub(crate) fn expire_stream(&mut self, stream_id: StreamId, which: &'static str) {
        if !self.core.streams.contains(stream_id) {
            return;
        }
        tracing::warn!(session = self.core.id, stream = stream_id, watchdog = which, "stream timed out");
        self.reset_stream(stream_id, ErrorCode::Cancel);
    }

    /// Send GOAWAY with `code` and shut down once it is written.
    pub fn terminate(&mut self, code: ErrorCode) {
        if self.state == SessionState::Closed {
            return;
        }
        tracing::debug!(session = self.core.id, ?code, "terminate session");
        self.engine.terminate_session(code);
        self.graceful_shutdown();
    }

    /// Flush everything queued and close once the send buffer has drained.
    /// Repeated calls while a shutdown is pending do nothing.
    pub fn graceful_shutdown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.shutdown.is_some() {
            tracing::debug!(session = self.core.id, "shutdown in progress");
            return;
        }
        tracing::info!(session = self.core.id, "shutdown session");
        self.state = SessionState::ShuttingDown;

        if let Err(err) = self.engine.send(&mut self.core) {
            self.fail(err);
            return;
        }
        let handle = self.core.bus.register(
            Channel::SendBufferEmptied,
            forward(self.this.clone(), self.core.id, Self::on_send_buffer_emptied),
        );
        self.shutdown = Some(handle);
        self.core.connection.flush_send_buffer();
    }

    fn on_send_buffer_emptied(&mut self) {
        if self.state != SessionState::ShuttingDown {
            return;
        }
        // bytes appended since the event was published
        if self.core.connection.send_used_space() > 0 {
            self.core.connection.start_flush();
            return;
        }
        if self.engine.want_write() {
            if let Err(err) = self.engine.send(&mut self.core) {
                self.fail(err);
                return;
            }
            if self.core.connection.send_used_space() > 0 {
                self.core.connection.flush_send_buffer();
                return;
            }
        }
        self.close();
    }

    /// Tear the session down immediately. Later calls do nothing.
    ///
    /// Watchdogs and streams go first, then the session's bus registrations
    /// and any queued messages that refer to it, then the transport.
    /// Finally `SessionDeleted` is anycast so the owner can drop its handle.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let id = self.core.id;
        tracing::info!(session = id, streams = self.core.streams.len(), "close session");
        self.state = SessionState::Closed;

        self.core.watchdogs.clear();
        for (stream_id, mut stream) in self.core.streams.drain() {
            tracing::debug!(session = id, stream = stream_id, "remove stream from session");
            stream.set_state(StreamState::Closed);
        }

        let bus = self.core.bus.clone();
        for (channel, handle) in self.recipients.drain(..) {
            invariant("unregister session recipient", bus.unregister(channel, handle));
        }
        if let Some(handle) = self.shutdown.take() {
            invariant(
                "unregister shutdown recipient",
                bus.unregister(Channel::SendBufferEmptied, handle),
            );
        }
        let cancelled = bus.cancel_messages(|message| message.payload.session() == id);
        if cancelled > 0 {
            tracing::debug!(session = id, cancelled, "dropped queued messages");
        }

        self.core.connection.close();
        bus.anycast(Channel::SessionDeleted, Event::Session(id));
    }

    fn fail(&mut self, err: Error) {
        match err {
            Error::Protocol { .. } | Error::Hpack(_) => {
                tracing::warn!(session = self.core.id, error = %err, "protocol error");
                self.terminate(err.error_code());
            }
            err => {
                tracing::warn!(session = self.core.id, error = %err, "session failed");
                self.close();
            }
        }
    }

    fn check_want_write(&self) {
        if self.engine.want_write() {
            self.core
                .bus
                .broadcast(Channel::SessionWantWrite, Event::Session(self.core.id));
        }
    }
}
