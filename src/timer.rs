//! Timers and idle tasks.
//!
//! Both live in the reactor's scheduler tables, above the backend layer, so
//! their control surface is identical no matter which notification engine
//! drives the loop. Entries stay in the table until [`cancel`], independent
//! of how many handles refer to them; handles carry a generation tag so a
//! stale handle can never reach a recycled slot.
//!
//! [`cancel`]: Timer::cancel

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::trace;

use crate::reactor::{Core, Reactor};

type Callback = Rc<RefCell<dyn FnMut(&Reactor)>>;

/// When and how often a [`Timer`] fires.
///
/// Exactly one of `at`/`after` must be set for the first firing; `interval`
/// makes the timer repeat indefinitely until stopped or cancelled.
#[derive(Clone, Debug, Default)]
pub struct TimerSpec {
    pub at: Option<Instant>,
    pub after: Option<Duration>,
    pub interval: Option<Duration>,
}

impl TimerSpec {
    /// Fire once at an absolute time.
    pub fn at(when: Instant) -> TimerSpec {
        TimerSpec {
            at: Some(when),
            ..TimerSpec::default()
        }
    }

    /// Fire once after a relative delay.
    pub fn after(delay: Duration) -> TimerSpec {
        TimerSpec {
            after: Some(delay),
            ..TimerSpec::default()
        }
    }

    /// Repeat every `interval` after the first firing.
    pub fn interval(mut self, interval: Duration) -> TimerSpec {
        self.interval = Some(interval);
        self
    }

    fn first_deadline(&self, now: Instant) -> Instant {
        match (self.at, self.after) {
            (Some(at), None) => at,
            (None, Some(after)) => now + after,
            _ => panic!(
                "configuration error: timer spec requires exactly one of `at` and `after`"
            ),
        }
    }
}

pub(crate) struct TimerEntry {
    gen: u64,
    cb: Callback,
    spec: TimerSpec,
    deadline: Option<Instant>,
    suspended: bool,
}

/// How long the reactor must sit without other pending work before an
/// [`Idle`] task runs, and the hard deadline past which it runs regardless.
#[derive(Clone, Debug)]
pub struct IdleSpec {
    pub min: Duration,
    pub max: Duration,
    pub reentrant: bool,
}

impl IdleSpec {
    /// An idle window firing after `min` on quiet turns, forced at `max`.
    pub fn new(min: Duration, max: Duration) -> IdleSpec {
        IdleSpec {
            min,
            max,
            reentrant: false,
        }
    }

    /// Allows the task to fire again while a previous firing is still on
    /// the stack.
    pub fn reentrant(mut self, on: bool) -> IdleSpec {
        self.reentrant = on;
        self
    }
}

pub(crate) struct IdleEntry {
    gen: u64,
    cb: Callback,
    spec: IdleSpec,
    armed: Instant,
    suspended: bool,
    firing: bool,
}

/// A one-shot or repeating timer handle.
///
/// Dropping the handle does not affect the timer; only [`cancel`] removes
/// it from the scheduler.
///
/// [`cancel`]: Timer::cancel
#[derive(Clone, Debug)]
pub struct Timer {
    core: std::rc::Weak<Core>,
    key: usize,
    gen: u64,
}

impl Timer {
    /// Registers a timer; it is armed immediately per `spec`.
    ///
    /// # Panics
    ///
    /// Panics unless exactly one of `spec.at`/`spec.after` is set.
    pub fn new<F>(reactor: &Reactor, spec: TimerSpec, cb: F) -> Timer
    where
        F: FnMut(&Reactor) + 'static,
    {
        let deadline = spec.first_deadline(Instant::now());
        let core = reactor.core();
        let gen = core.gen();
        let key = core.timers.borrow_mut().insert(TimerEntry {
            gen,
            cb: Rc::new(RefCell::new(cb)),
            spec,
            deadline: Some(deadline),
            suspended: false,
        });
        trace!("timer {} armed", key);
        Timer {
            core: Rc::downgrade(core),
            key,
            gen,
        }
    }

    fn with_entry<R>(&self, f: impl FnOnce(&mut TimerEntry) -> R) -> Option<R> {
        let core = self.core.upgrade()?;
        let mut timers = core.timers.borrow_mut();
        let entry = timers.get_mut(self.key)?;
        if entry.gen != self.gen {
            return None;
        }
        Some(f(entry))
    }

    /// Re-arms the timer from its original spec (relative delays count from
    /// now) and clears suspension.
    pub fn start(&self) {
        let now = Instant::now();
        self.with_entry(|entry| {
            entry.deadline = Some(entry.spec.first_deadline(now));
            entry.suspended = false;
        });
    }

    /// Restarts the interval clock from now. Falls back to the original
    /// relative delay for one-shot timers.
    pub fn again(&self) {
        let now = Instant::now();
        self.with_entry(|entry| {
            let delay = entry
                .spec
                .interval
                .or(entry.spec.after)
                .unwrap_or_else(Duration::default);
            entry.deadline = Some(now + delay);
            entry.suspended = false;
        });
    }

    /// Invokes the callback immediately without disturbing the schedule.
    pub fn now(&self) {
        let core = match self.core.upgrade() {
            Some(core) => core,
            None => return,
        };
        let cb = {
            let timers = core.timers.borrow();
            match timers.get(self.key) {
                Some(entry) if entry.gen == self.gen => entry.cb.clone(),
                _ => return,
            }
        };
        let reactor = Reactor::from_core(core);
        (cb.borrow_mut())(&reactor);
    }

    /// Suspends future firings but keeps the timer in the scheduler.
    pub fn stop(&self) {
        self.with_entry(|entry| {
            entry.deadline = None;
            entry.suspended = true;
        });
    }

    /// Permanently removes the timer.
    pub fn cancel(&self) {
        if let Some(core) = self.core.upgrade() {
            let mut timers = core.timers.borrow_mut();
            let live = timers
                .get(self.key)
                .map_or(false, |entry| entry.gen == self.gen);
            if live {
                timers.remove(self.key);
                trace!("timer {} cancelled", self.key);
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.with_entry(|_| ()).is_none()
    }

    pub fn is_running(&self) -> bool {
        self.with_entry(|entry| !entry.suspended).unwrap_or(false)
    }

    pub fn is_suspended(&self) -> bool {
        self.with_entry(|entry| entry.suspended).unwrap_or(false)
    }

    /// Whether a future firing is scheduled.
    pub fn pending(&self) -> bool {
        self.with_entry(|entry| entry.deadline.is_some() && !entry.suspended)
            .unwrap_or(false)
    }
}

/// An idle-task handle; same control surface as [`Timer`].
#[derive(Clone, Debug)]
pub struct Idle {
    core: std::rc::Weak<Core>,
    key: usize,
    gen: u64,
}

impl Idle {
    /// Registers an idle task, armed from now.
    ///
    /// # Panics
    ///
    /// Panics if `spec.min` exceeds `spec.max`.
    pub fn new<F>(reactor: &Reactor, spec: IdleSpec, cb: F) -> Idle
    where
        F: FnMut(&Reactor) + 'static,
    {
        assert!(
            spec.min <= spec.max,
            "configuration error: idle min delay exceeds max delay"
        );
        let core = reactor.core();
        let gen = core.gen();
        let key = core.idles.borrow_mut().insert(IdleEntry {
            gen,
            cb: Rc::new(RefCell::new(cb)),
            spec,
            armed: Instant::now(),
            suspended: false,
            firing: false,
        });
        trace!("idle task {} armed", key);
        Idle {
            core: Rc::downgrade(core),
            key,
            gen,
        }
    }

    fn with_entry<R>(&self, f: impl FnOnce(&mut IdleEntry) -> R) -> Option<R> {
        let core = self.core.upgrade()?;
        let mut idles = core.idles.borrow_mut();
        let entry = idles.get_mut(self.key)?;
        if entry.gen != self.gen {
            return None;
        }
        Some(f(entry))
    }

    /// Re-arms the delay window from now and clears suspension.
    pub fn start(&self) {
        let now = Instant::now();
        self.with_entry(|entry| {
            entry.armed = now;
            entry.suspended = false;
        });
    }

    /// Restarts the delay window from now.
    pub fn again(&self) {
        self.start();
    }

    /// Invokes the callback immediately without disturbing the window.
    pub fn now(&self) {
        let core = match self.core.upgrade() {
            Some(core) => core,
            None => return,
        };
        let cb = {
            let idles = core.idles.borrow();
            match idles.get(self.key) {
                Some(entry) if entry.gen == self.gen => entry.cb.clone(),
                _ => return,
            }
        };
        let reactor = Reactor::from_core(core);
        (cb.borrow_mut())(&reactor);
    }

    /// Suspends future firings but keeps the task in the scheduler.
    pub fn stop(&self) {
        self.with_entry(|entry| entry.suspended = true);
    }

    /// Permanently removes the task.
    pub fn cancel(&self) {
        if let Some(core) = self.core.upgrade() {
            let mut idles = core.idles.borrow_mut();
            let live = idles
                .get(self.key)
                .map_or(false, |entry| entry.gen == self.gen);
            if live {
                idles.remove(self.key);
                trace!("idle task {} cancelled", self.key);
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.with_entry(|_| ()).is_none()
    }

    pub fn is_running(&self) -> bool {
        self.with_entry(|entry| !entry.suspended).unwrap_or(false)
    }

    pub fn is_suspended(&self) -> bool {
        self.with_entry(|entry| entry.suspended).unwrap_or(false)
    }

    /// Whether a future firing is scheduled.
    pub fn pending(&self) -> bool {
        self.with_entry(|entry| !entry.suspended).unwrap_or(false)
    }
}

impl Core {
    /// Fires every timer whose deadline has passed, earliest first.
    /// Repeating timers re-arm to `now + interval` before their callback
    /// runs, so a callback cancelling its own timer wins.
    pub(crate) fn fire_timers(self: &Rc<Self>, now: Instant) -> bool {
        let mut due: Vec<(Instant, usize, u64)> = self
            .timers
            .borrow()
            .iter()
            .filter_map(|(key, entry)| match entry.deadline {
                Some(deadline) if deadline <= now && !entry.suspended => {
                    Some((deadline, key, entry.gen))
                }
                _ => None,
            })
            .collect();
        due.sort_by_key(|&(deadline, key, _)| (deadline, key));

        let fired = !due.is_empty();
        for (_, key, gen) in due {
            let cb = {
                let mut timers = self.timers.borrow_mut();
                match timers.get_mut(key) {
                    Some(entry) if entry.gen == gen => {
                        entry.deadline = entry.spec.interval.map(|interval| now + interval);
                        entry.cb.clone()
                    }
                    _ => continue,
                }
            };
            trace!("timer {} fired", key);
            let reactor = Reactor::from_core(self.clone());
            (cb.borrow_mut())(&reactor);
        }
        fired
    }

    /// Runs idle tasks. On a quiet turn (no I/O, no timers, nothing
    /// queued) every task past its `min` delay fires; a task past its
    /// `max` deadline fires even on a busy turn.
    pub(crate) fn run_idles(self: &Rc<Self>, now: Instant, quiet: bool) {
        let candidates: Vec<(usize, u64)> = self
            .idles
            .borrow()
            .iter()
            .filter_map(|(key, entry)| {
                if entry.suspended || (entry.firing && !entry.spec.reentrant) {
                    return None;
                }
                let eligible = now >= entry.armed + entry.spec.min;
                let forced = now >= entry.armed + entry.spec.max;
                if forced || (quiet && eligible) {
                    Some((key, entry.gen))
                } else {
                    None
                }
            })
            .collect();

        for (key, gen) in candidates {
            let cb = {
                let mut idles = self.idles.borrow_mut();
                match idles.get_mut(key) {
                    Some(entry) if entry.gen == gen => {
                        entry.firing = true;
                        entry.armed = now;
                        entry.cb.clone()
                    }
                    _ => continue,
                }
            };
            trace!("idle task {} fired", key);
            let reactor = Reactor::from_core(self.clone());
            (cb.borrow_mut())(&reactor);
            let mut idles = self.idles.borrow_mut();
            if let Some(entry) = idles.get_mut(key) {
                if entry.gen == gen {
                    entry.firing = false;
                }
            }
        }
    }

    pub(crate) fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers
            .borrow()
            .iter()
            .filter(|(_, entry)| !entry.suspended)
            .filter_map(|(_, entry)| entry.deadline)
            .min()
    }

    pub(crate) fn next_idle_deadline(&self) -> Option<Instant> {
        self.idles
            .borrow()
            .iter()
            .filter(|(_, entry)| !entry.suspended && !entry.firing)
            .map(|(_, entry)| entry.armed + entry.spec.min)
            .min()
    }
}

impl std::fmt::Debug for TimerEntry {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("TimerEntry")
            .field("spec", &self.spec)
            .field("deadline", &self.deadline)
            .field("suspended", &self.suspended)
            .finish()
    }
}

impl std::fmt::Debug for IdleEntry {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("IdleEntry")
            .field("spec", &self.spec)
            .field("armed", &self.armed)
            .field("suspended", &self.suspended)
            .finish()
    }
}
