//! In-process publish/subscribe bus.
//!
//! Publishing only enqueues; [`EventBus::dispatch`] drains the queue in FIFO
//! order. Recipients of a broadcast are resolved when the message is
//! delivered, not when it is published, in registration order. An anycast goes
//! to the first registered recipient only.
//!
//! Callbacks receive the bus and may publish, register or unregister while a
//! dispatch is in progress. The walk over a channel's recipients works on a
//! snapshot and skips any recipient unregistered before its turn. A nested
//! `dispatch` call returns immediately; the outer pass drains everything.
//!
//! Deferred delivery is driven by an optional [`Wake`] signal, notified when
//! the queue goes from empty to non-empty. Coalesced wakeups are harmless
//! because every dispatch drains the whole queue.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::event::Channel;

/// Callback registered on a channel.
pub trait Recipient<P> {
    fn receive(&self, bus: &EventBus<P>, channel: Channel, payload: &P);
}

impl<P, F> Recipient<P> for F
where
    F: Fn(&EventBus<P>, Channel, &P),
{
    fn receive(&self, bus: &EventBus<P>, channel: Channel, payload: &P) {
        self(bus, channel, payload)
    }
}

/// Identifies one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecipientHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Broadcast,
    Anycast,
}

/// A queued, undelivered message.
#[derive(Debug, Clone)]
pub struct Message<P> {
    pub channel: Channel,
    pub delivery: Delivery,
    pub payload: P,
}

/// Wakes the event loop so it calls [`EventBus::dispatch`].
pub trait Wake {
    fn wake(&self) -> io::Result<()>;
}

impl<W: Wake + ?Sized> Wake for Rc<W> {
    fn wake(&self) -> io::Result<()> {
        (**self).wake()
    }
}

type Registration<P> = (RecipientHandle, Rc<dyn Recipient<P>>);

struct State<P> {
    next_handle: u64,
    recipients: HashMap<Channel, Vec<Registration<P>>>,
    queue: VecDeque<Message<P>>,
}

pub struct EventBus<P> {
    state: RefCell<State<P>>,
    dispatching: Cell<bool>,
    waker: Option<Box<dyn Wake>>,
}

impl<P> std::fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EventBus")
            .field("channels", &state.recipients.len())
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl<P> Default for EventBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> EventBus<P> {
    /// A bus without a wake signal; the owner calls `dispatch` itself.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                next_handle: 0,
                recipients: HashMap::new(),
                queue: VecDeque::new(),
            }),
            dispatching: Cell::new(false),
            waker: None,
        }
    }

    /// A bus that notifies `waker` whenever the queue becomes non-empty.
    pub fn with_waker(waker: impl Wake + 'static) -> Self {
        Self {
            waker: Some(Box::new(waker)),
            ..Self::new()
        }
    }

    pub fn register(
        &self,
        channel: Channel,
        recipient: impl Recipient<P> + 'static,
    ) -> RecipientHandle {
        let mut state = self.state.borrow_mut();
        let handle = RecipientHandle(state.next_handle);
        state.next_handle += 1;
        state
            .recipients
            .entry(channel)
            .or_default()
            .push((handle, Rc::new(recipient)));
        handle
    }

    pub fn unregister(&self, channel: Channel, handle: RecipientHandle) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let list = state
            .recipients
            .get_mut(&channel)
            .ok_or(Error::UnknownRecipient(handle.0))?;
        let pos = list
            .iter()
            .position(|(h, _)| *h == handle)
            .ok_or(Error::UnknownRecipient(handle.0))?;
        list.remove(pos);
        Ok(())
    }

    pub fn is_registered(&self, channel: Channel, handle: RecipientHandle) -> bool {
        self.state
            .borrow()
            .recipients
            .get(&channel)
            .is_some_and(|list| list.iter().any(|(h, _)| *h == handle))
    }

    /// Queue `payload` for every recipient of `channel`.
    pub fn broadcast(&self, channel: Channel, payload: P) {
        self.publish(Message {
            channel,
            delivery: Delivery::Broadcast,
            payload,
        });
    }

    /// Queue `payload` for the first recipient of `channel`.
    pub fn anycast(&self, channel: Channel, payload: P) {
        self.publish(Message {
            channel,
            delivery: Delivery::Anycast,
            payload,
        });
    }

    fn publish(&self, message: Message<P>) {
        let was_empty = {
            let mut state = self.state.borrow_mut();
            let was_empty = state.queue.is_empty();
            state.queue.push_back(message);
            was_empty
        };
        if was_empty {
            self.notify();
        }
    }

    fn notify(&self) {
        let Some(waker) = &self.waker else {
            return;
        };
        loop {
            match waker.wake() {
                Ok(()) => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // a wakeup is already pending
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    // dispatch would stall forever without the wakeup
                    tracing::error!(error = %e, "bus wake signal failed");
                    std::process::abort();
                }
            }
        }
    }

    /// Remove undelivered messages matching `predicate`. Returns how many
    /// were removed.
    pub fn cancel_messages(&self, mut predicate: impl FnMut(&Message<P>) -> bool) -> usize {
        let mut state = self.state.borrow_mut();
        let before = state.queue.len();
        state.queue.retain(|m| !predicate(m));
        before - state.queue.len()
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Deliver every queued message, including those published while
    /// draining. Returns the number of messages processed.
    pub fn dispatch(&self) -> usize {
        if self.dispatching.replace(true) {
            return 0;
        }
        let _guard = DispatchGuard(&self.dispatching);

        let mut processed = 0;
        loop {
            let (message, targets) = {
                let mut state = self.state.borrow_mut();
                let Some(message) = state.queue.pop_front() else {
                    break;
                };
                let targets: Vec<Registration<P>> = match state.recipients.get(&message.channel) {
                    Some(list) => match message.delivery {
                        Delivery::Broadcast => list.clone(),
                        Delivery::Anycast => list.iter().take(1).cloned().collect(),
                    },
                    None => Vec::new(),
                };
                (message, targets)
            };
            processed += 1;

            if targets.is_empty() {
                tracing::debug!(channel = ?message.channel, "message has no recipient");
                continue;
            }
            for (handle, recipient) in targets {
                if !self.is_registered(message.channel, handle) {
                    continue;
                }
                recipient.receive(self, message.channel, &message.payload);
            }
        }
        processed
    }
}

struct DispatchGuard<'a>(&'a Cell<bool>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Self-pipe wake signal for readiness-based loops.
///
/// The loop watches [`WakePipe::as_raw_fd`] for readability, calls
/// [`WakePipe::drain`] and then [`EventBus::dispatch`].
#[cfg(unix)]
#[derive(Debug)]
pub struct WakePipe {
    reader: std::os::unix::net::UnixStream,
    writer: std::os::unix::net::UnixStream,
}

#[cfg(unix)]
impl WakePipe {
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = std::os::unix::net::UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self { reader, writer })
    }

    /// Consume pending wakeups. Returns the number of signal bytes read.
    pub fn drain(&self) -> io::Result<usize> {
        use std::io::Read;

        let mut total = 0;
        let mut scratch = [0u8; 64];
        loop {
            match (&self.reader).read(&mut scratch) {
                Ok(0) => return Ok(total),
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(unix)]
impl std::os::unix::io::AsRawFd for WakePipe {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.reader.as_raw_fd()
    }
}

#[cfg(unix)]
impl Wake for WakePipe {
    fn wake(&self) -> io::Result<()> {
        use std::io::Write;

        (&self.writer).write(&[1]).map(|_| ())
    }
}
