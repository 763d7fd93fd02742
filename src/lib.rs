//! h2-session-engine: a single-threaded, event-driven HTTP/2 session engine
//!
//! This crate is the connection and session layer under a small HTTP/2
//! server. It owns no event loop and spawns no threads: the caller's reactor
//! polls readiness and deadlines and calls back into the session.
//!
//! # Components
//!
//! - [`EventBus`]: publish/subscribe with FIFO dispatch, broadcast and
//!   anycast delivery, re-entrancy-safe callbacks and message cancellation
//! - [`FlowBuffer`]: bounded byte buffer with zero-copy incoming/outgoing views
//! - [`WatchdogRegistry`]: per-id restartable expiry timers
//! - [`StreamTable`]: id-keyed registry of in-flight streams
//! - [`Connection`]: transport plus buffers, with watermark-driven interest
//! - [`ProtocolSession`]: drives the [`codec::Engine`] through callbacks,
//!   tracks streams and timeouts and shuts down gracefully
//!
//! # Quick Start
//!
//! ```no_run
//! use std::net::TcpListener;
//! use std::rc::Rc;
//!
//! use h2_session_engine::{
//!     Channel, Event, EventBus, MonotonicClock, ProtocolSession, SessionConfig,
//! };
//!
//! let bus = Rc::new(EventBus::new());
//! let config = Rc::new(SessionConfig::default());
//! let listener = TcpListener::bind("127.0.0.1:8080").unwrap();
//! let (socket, _) = listener.accept().unwrap();
//! socket.set_nonblocking(true).unwrap();
//!
//! let session = ProtocolSession::new(1, socket, bus.clone(), config, Rc::new(MonotonicClock));
//! bus.register(Channel::StreamPrepareResponse, |_: &EventBus<Event>, _: Channel, event: &Event| {
//!     println!("request complete: {event:?}");
//! });
//!
//! // Each loop iteration: wait on session.borrow().interest() and
//! // next_deadline(), call on_readable / on_writable / on_timeout, then:
//! session.borrow_mut().on_readable().unwrap();
//! bus.dispatch();
//! ```
//!
//! # Architecture
//!
//! The crate does NOT provide:
//! - an accept loop or reactor (the caller drives readiness and timers)
//! - TLS
//! - push promises or request body consumption

pub mod buffer;
pub mod bus;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod session;
pub mod stream_table;
pub mod transport;
pub mod watchdog;

pub use buffer::FlowBuffer;
#[cfg(unix)]
pub use bus::WakePipe;
pub use bus::{Delivery, EventBus, Message, Recipient, RecipientHandle, Wake};
pub use codec::{ErrorCode, Header};
pub use config::{load_config, load_config_from_path, SessionConfig};
pub use connection::{Connection, Interest, IoStatus};
pub use error::{Error, Result};
pub use event::{Channel, Event, SessionId};
pub use session::{ProtocolSession, SessionHandle, SessionState, SessionTimer, Stream, StreamState};
pub use stream_table::{StreamId, StreamTable};
pub use transport::Transport;
pub use watchdog::{
    Clock, ManualClock, MonotonicClock, WatchdogHandler, WatchdogId, WatchdogRegistry,
};
