//! Per-id restartable expiry timers.
//!
//! A [`WatchdogRegistry`] keeps a flat id space of watchdogs. Each watchdog is
//! registered disarmed with a fixed timeout and a handler value; `start`
//! arms it with a fresh full timeout. The event loop asks for
//! [`WatchdogRegistry::next_deadline`] to arm its own timer and calls
//! [`WatchdogRegistry::expire`] (or [`WatchdogRegistry::fire_expired`]) when
//! that timer fires.
//!
//! Expired watchdogs are disarmed before their handler runs, so a handler may
//! re-`start` its own id. When several watchdogs share one deadline the order
//! in which they fire is not guaranteed.

use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub type WatchdogId = u64;

/// Source of the current time.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall-clock monotonic time.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests and simulation.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

/// Receives watchdog expiry.
pub trait WatchdogHandler<Ctx: ?Sized> {
    fn on_expiry(&self, id: WatchdogId, ctx: &mut Ctx);
}

struct Watchdog<H> {
    timeout: Duration,
    handler: H,
    deadline: Option<Instant>,
}

/// Registry of watchdogs sharing one clock.
pub struct WatchdogRegistry<H> {
    clock: Rc<dyn Clock>,
    watchdogs: HashMap<WatchdogId, Watchdog<H>>,
    armed: BTreeSet<(Instant, WatchdogId)>,
}

impl<H> std::fmt::Debug for WatchdogRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchdogRegistry")
            .field("registered", &self.watchdogs.len())
            .field("armed", &self.armed.len())
            .finish()
    }
}

impl<H> WatchdogRegistry<H> {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            watchdogs: HashMap::new(),
            armed: BTreeSet::new(),
        }
    }

    /// Register `id`, initially disarmed.
    pub fn add(&mut self, id: WatchdogId, timeout: Duration, handler: H) -> Result<()> {
        if self.watchdogs.contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }
        self.watchdogs.insert(
            id,
            Watchdog {
                timeout,
                handler,
                deadline: None,
            },
        );
        Ok(())
    }

    /// Arm (or re-arm) `id` with a fresh full timeout.
    pub fn start(&mut self, id: WatchdogId) -> Result<()> {
        let now = self.clock.now();
        let watchdog = self.watchdogs.get_mut(&id).ok_or(Error::UnknownId(id))?;
        if let Some(old) = watchdog.deadline.take() {
            self.armed.remove(&(old, id));
        }
        let deadline = now + watchdog.timeout;
        watchdog.deadline = Some(deadline);
        self.armed.insert((deadline, id));
        Ok(())
    }

    /// Re-arm a watchdog the caller expects to be running.
    pub fn restart(&mut self, id: WatchdogId) -> Result<()> {
        if !self.watchdogs.contains_key(&id) {
            return Err(Error::UnknownId(id));
        }
        if !self.is_armed(id) {
            return Err(Error::NotArmed(id));
        }
        self.start(id)
    }

    /// Re-arm `id` if it is armed; succeed without effect otherwise.
    pub fn restart_if_started(&mut self, id: WatchdogId) -> Result<()> {
        if !self.watchdogs.contains_key(&id) {
            return Err(Error::UnknownId(id));
        }
        if self.is_armed(id) {
            self.start(id)?;
        }
        Ok(())
    }

    /// Disarm `id`. Stopping a disarmed watchdog is a no-op.
    pub fn stop(&mut self, id: WatchdogId) -> Result<()> {
        let watchdog = self.watchdogs.get_mut(&id).ok_or(Error::UnknownId(id))?;
        if let Some(deadline) = watchdog.deadline.take() {
            self.armed.remove(&(deadline, id));
        }
        Ok(())
    }

    pub fn exists(&self, id: WatchdogId) -> bool {
        self.watchdogs.contains_key(&id)
    }

    pub fn is_armed(&self, id: WatchdogId) -> bool {
        self.deadline(id).is_some()
    }

    pub fn deadline(&self, id: WatchdogId) -> Option<Instant> {
        self.watchdogs.get(&id).and_then(|w| w.deadline)
    }

    /// Stop and unregister `id`, returning its handler.
    pub fn remove(&mut self, id: WatchdogId) -> Result<H> {
        self.stop(id)?;
        self.watchdogs
            .remove(&id)
            .map(|w| w.handler)
            .ok_or(Error::UnknownId(id))
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.armed.first().map(|(deadline, _)| *deadline)
    }

    pub fn len(&self) -> usize {
        self.watchdogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchdogs.is_empty()
    }

    /// Drop every watchdog.
    pub fn clear(&mut self) {
        self.armed.clear();
        self.watchdogs.clear();
    }

    /// Disarm every watchdog whose deadline has passed and return them in
    /// deadline order.
    pub fn expire(&mut self) -> Vec<(WatchdogId, H)>
    where
        H: Clone,
    {
        let now = self.clock.now();
        let mut expired = Vec::new();
        while let Some(&(deadline, id)) = self.armed.first() {
            if deadline > now {
                break;
            }
            self.armed.pop_first();
            if let Some(watchdog) = self.watchdogs.get_mut(&id) {
                watchdog.deadline = None;
                expired.push((id, watchdog.handler.clone()));
            }
        }
        expired
    }

    /// Expire due watchdogs and run each handler against `ctx`.
    ///
    /// Returns the number of handlers invoked.
    pub fn fire_expired<Ctx: ?Sized>(&mut self, ctx: &mut Ctx) -> usize
    where
        H: WatchdogHandler<Ctx> + Clone,
    {
        let expired = self.expire();
        let fired = expired.len();
        for (id, handler) in expired {
            tracing::debug!(watchdog = id, "watchdog expired");
            handler.on_expiry(id, ctx);
        }
        fired
    }
}
