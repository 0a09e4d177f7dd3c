//! The reactor core.
//!
//! One [`Reactor`] per process drives every channel, timer, and idle
//! callback from a single logical thread of control. Concurrency is
//! cooperative multiplexing only: a handler occupies the thread until it
//! returns, and handler code must never block.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::panic;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, trace};
use slab::Slab;

use crate::backend::{self, Backend, BackendKind, Event};
use crate::channel::{Channel, ChannelShared};
use crate::timer::{IdleEntry, TimerEntry};

/// Reactor configuration, fixed at construction.
///
/// The backend is a process-wide, one-time choice: the first reactor pins
/// the kind, and constructing a later reactor with a different kind panics.
/// Buffer sizing defaults are deliberately explicit here rather than
/// inherited from any OS-level socket sizing.
#[derive(Clone, Debug)]
pub struct Config {
    backend: BackendKind,
    watchdog: Option<Duration>,
    read_chunk: usize,
    output_bufsize: usize,
}

impl Config {
    pub fn new(backend: BackendKind) -> Config {
        // Historical select-style loops have dropped readiness
        // notifications; the watchdog papers over that, so it defaults on
        // for the emulation and off for the native engines.
        let watchdog = match backend {
            BackendKind::Select => Some(Duration::from_millis(500)),
            _ => None,
        };
        Config {
            backend,
            watchdog,
            read_chunk: 64 * 1024,
            output_bufsize: 1024 * 1024,
        }
    }

    /// Sets the synthetic read-ready watchdog period, or disables the
    /// watchdog with `None`.
    pub fn watchdog(mut self, period: Option<Duration>) -> Config {
        self.watchdog = period;
        self
    }

    /// Sets the bound on a single read performed per readiness event.
    pub fn read_chunk(mut self, bytes: usize) -> Config {
        assert!(bytes > 0, "configuration error: zero read chunk");
        self.read_chunk = bytes;
        self
    }

    /// Sets the default output-buffer overflow threshold for new channels.
    pub fn output_bufsize(mut self, bytes: usize) -> Config {
        self.output_bufsize = bytes;
        self
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend
    }

    pub fn watchdog_period(&self) -> Option<Duration> {
        self.watchdog
    }

    pub fn read_chunk_size(&self) -> usize {
        self.read_chunk
    }

    pub fn default_output_bufsize(&self) -> usize {
        self.output_bufsize
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new(BackendKind::Epoll)
    }
}

/// A pending or in-flight handler invocation for one channel.
#[derive(Debug)]
pub(crate) enum Dispatch {
    Input,
    ReadReady,
    Connection,
    Eof,
    Connected,
    ConnectFailed(io::Error),
    WriteError(io::Error),
    OutputWritten(usize),
    OutputDrained,
    OverflowBegin,
    OverflowEnd,
    Exception,
}

impl Dispatch {
    fn method_name(&self) -> &'static str {
        match self {
            Dispatch::Input => "input",
            Dispatch::ReadReady => "read_ready",
            Dispatch::Connection => "connection",
            Dispatch::Eof => "eof",
            Dispatch::Connected => "connected",
            Dispatch::ConnectFailed(_) => "connect_failed",
            Dispatch::WriteError(_) => "write_error",
            Dispatch::OutputWritten(_) => "output_written",
            Dispatch::OutputDrained => "output_drained",
            Dispatch::OverflowBegin => "overflow_begin",
            Dispatch::OverflowEnd => "overflow_end",
            Dispatch::Exception => "exception",
        }
    }
}

pub(crate) struct Core {
    pub(crate) config: Config,
    pub(crate) backend: RefCell<Box<dyn Backend>>,
    pub(crate) channels: RefCell<Slab<Rc<ChannelShared>>>,
    pub(crate) timers: RefCell<Slab<TimerEntry>>,
    pub(crate) idles: RefCell<Slab<IdleEntry>>,
    pub(crate) next_gen: Cell<u64>,
    pending: RefCell<VecDeque<(Rc<ChannelShared>, Dispatch)>>,
    events: RefCell<Vec<Event>>,
    pub(crate) scratch: RefCell<Vec<u8>>,
    running: Cell<bool>,
    next_watchdog: Cell<Option<Instant>>,
}

impl Core {
    pub(crate) fn gen(&self) -> u64 {
        let gen = self.next_gen.get();
        self.next_gen.set(gen + 1);
        gen
    }

    /// Queues or invokes a handler callback for `chan`.
    ///
    /// While a dispatch for the channel is active and the channel is not
    /// reentrant, further dispatches are parked in the FIFO pending queue
    /// and released only when control returns to the loop. A dispatch also
    /// parks while earlier entries for the same channel sit in the queue,
    /// keeping per-channel delivery first-in-first-out even when it is
    /// issued from another channel's handler at depth zero.
    pub(crate) fn dispatch(&self, chan: &Rc<ChannelShared>, dispatch: Dispatch) {
        if chan.is_closed() {
            trace!("dropping {:?} for closed channel", dispatch);
            return;
        }
        let busy = chan.dispatch_depth() > 0 && !chan.is_reentrant();
        let parked_behind = !busy
            && self
                .pending
                .borrow()
                .iter()
                .any(|(queued, _)| Rc::ptr_eq(queued, chan));
        if busy || parked_behind {
            trace!("queueing {:?} behind earlier dispatch", dispatch);
            self.pending.borrow_mut().push_back((chan.clone(), dispatch));
            return;
        }
        self.invoke(chan, dispatch);
    }

    fn invoke(&self, chan: &Rc<ChannelShared>, dispatch: Dispatch) {
        let method = dispatch.method_name();
        let handler = chan.handler_ref();
        let channel = Channel::from_shared(chan.clone());

        trace!("dispatch `{}` for {:?}", method, channel);
        chan.enter_dispatch();
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| match dispatch {
            Dispatch::Input => handler.input(&channel),
            Dispatch::ReadReady => handler.read_ready(&channel),
            Dispatch::Connection => handler.connection(&channel),
            Dispatch::Eof => handler.eof(&channel),
            Dispatch::Connected => handler.connected(&channel),
            Dispatch::ConnectFailed(error) => handler.connect_failed(&channel, error),
            Dispatch::WriteError(error) => handler.write_error(&channel, error),
            Dispatch::OutputWritten(amount) => handler.output_written(&channel, amount),
            Dispatch::OutputDrained => handler.output_drained(&channel),
            Dispatch::OverflowBegin => handler.overflow_begin(&channel),
            Dispatch::OverflowEnd => handler.overflow_end(&channel),
            Dispatch::Exception => handler.exception(&channel),
        }));
        chan.leave_dispatch();

        if let Err(payload) = result {
            debug!("`{}` handler raised for {:?}", method, channel);
            handler.failure(&channel, method, payload);
        }
    }

    /// Releases queued callbacks in first-in-first-out order.
    ///
    /// Popped entries are invoked directly: going back through `dispatch`
    /// would park them again behind their own successors. Runs only from
    /// the loop itself, so no handler is on the stack when it starts.
    pub(crate) fn release_pending(&self) {
        loop {
            let next = self.pending.borrow_mut().pop_front();
            match next {
                Some((chan, dispatch)) => {
                    if chan.is_closed() {
                        trace!("dropping {:?} for closed channel", dispatch);
                        continue;
                    }
                    self.invoke(&chan, dispatch)
                }
                None => return,
            }
        }
    }

    fn has_pending(&self) -> bool {
        !self.pending.borrow().is_empty()
    }

    // Spent one-shot timers and suspended entries stay in their tables
    // until cancelled, but nothing can revive them once the loop is
    // otherwise empty, so they do not count as work.
    fn has_work(&self) -> bool {
        !self.channels.borrow().is_empty()
            || self.next_timer_deadline().is_some()
            || self.next_idle_deadline().is_some()
            || self.has_pending()
    }

    fn watchdog_tick(self: &Rc<Self>, now: Instant) {
        let period = match self.config.watchdog {
            Some(period) => period,
            None => return,
        };
        match self.next_watchdog.get() {
            Some(due) if due <= now => {}
            _ => return,
        }

        trace!("watchdog: injecting synthetic read-readiness");
        let chans: Vec<_> = self
            .channels
            .borrow()
            .iter()
            .map(|(_, chan)| chan.clone())
            .collect();
        for chan in chans {
            chan.watchdog_poke(self);
        }
        self.next_watchdog.set(Some(now + period));
    }

    fn turn(self: &Rc<Self>, max_wait: Option<Duration>) -> io::Result<()> {
        self.release_pending();
        self.watchdog_tick(Instant::now());

        let deadline = earliest(
            earliest(self.next_timer_deadline(), self.next_idle_deadline()),
            self.next_watchdog.get(),
        );
        let now = Instant::now();
        let mut timeout = deadline.map(|d| d.saturating_duration_since(now));
        if self.has_pending() {
            timeout = Some(Duration::from_millis(0));
        }
        if let Some(max) = max_wait {
            timeout = Some(timeout.map_or(max, |t| t.min(max)));
        }

        let mut events = std::mem::replace(&mut *self.events.borrow_mut(), Vec::new());
        self.backend.borrow_mut().poll(&mut events, timeout)?;
        let had_io = !events.is_empty();

        // Timers fire on the turn whose wait their deadline ended, which is
        // what the idle pass's quiet test hinges on.
        let timers_fired = self.fire_timers(Instant::now());

        for event in &events {
            let chan = self.channels.borrow().get(event.token().into()).cloned();
            let chan = match chan {
                Some(chan) => chan,
                // Readiness can outlive a channel torn down earlier in the
                // same batch.
                None => continue,
            };
            if event.readiness().is_priority() {
                chan.handle_exception(self);
            }
            if event.readiness().is_readable() {
                chan.handle_readable(self);
            }
            if event.readiness().is_writable() {
                chan.handle_writable(self);
            }
        }
        *self.events.borrow_mut() = events;

        self.release_pending();

        let quiet = !had_io && !timers_fired;
        self.run_idles(Instant::now(), quiet);

        Ok(())
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Handle to the reactor core.
///
/// Cheap to clone; all clones drive the same loop. Deliberately `!Send`:
/// the registration tables are mutated exclusively from the reactor thread
/// and need no locking.
#[derive(Clone)]
pub struct Reactor {
    core: Rc<Core>,
}

impl Reactor {
    /// Builds a reactor on the default configuration (native loop).
    pub fn new() -> io::Result<Reactor> {
        Reactor::with_config(Config::default())
    }

    /// Builds a reactor from an explicit configuration.
    ///
    /// # Panics
    ///
    /// Panics if a reactor with a different backend kind was already built
    /// in this process; backend selection is one-time and process-wide.
    pub fn with_config(config: Config) -> io::Result<Reactor> {
        let backend = backend::new_backend(config.backend)?;
        let next_watchdog = config.watchdog.map(|period| Instant::now() + period);
        let scratch = vec![0u8; config.read_chunk];
        debug!("reactor up on {:?} backend", config.backend);

        Ok(Reactor {
            core: Rc::new(Core {
                config,
                backend: RefCell::new(backend),
                channels: RefCell::new(Slab::new()),
                timers: RefCell::new(Slab::new()),
                idles: RefCell::new(Slab::new()),
                next_gen: Cell::new(0),
                pending: RefCell::new(VecDeque::new()),
                events: RefCell::new(Vec::with_capacity(256)),
                scratch: RefCell::new(scratch),
                running: Cell::new(false),
                next_watchdog: Cell::new(next_watchdog),
            }),
        })
    }

    pub(crate) fn from_core(core: Rc<Core>) -> Reactor {
        Reactor { core }
    }

    pub(crate) fn core(&self) -> &Rc<Core> {
        &self.core
    }

    pub fn config(&self) -> &Config {
        &self.core.config
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.core.config.backend
    }

    /// Drives the loop until [`stop`] is called or no channels, timers, or
    /// idle tasks remain.
    ///
    /// # Panics
    ///
    /// A backend fault (failed wait) is a reactor-level error and panics.
    ///
    /// [`stop`]: Reactor::stop
    pub fn run(&self) {
        self.core.running.set(true);
        while self.core.running.get() && self.core.has_work() {
            if let Err(e) = self.core.turn(None) {
                panic!("reactor fault: {}", e);
            }
        }
        self.core.running.set(false);
        debug!("reactor loop done");
    }

    /// Makes [`run`] return once the current turn completes.
    ///
    /// [`run`]: Reactor::run
    pub fn stop(&self) {
        self.core.running.set(false);
    }

    pub fn is_running(&self) -> bool {
        self.core.running.get()
    }

    /// Runs a single loop iteration, waiting at most `max_wait` for
    /// readiness.
    pub fn turn(&self, max_wait: Option<Duration>) -> io::Result<()> {
        self.core.turn(max_wait)
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Reactor")
            .field("backend", &self.core.config.backend)
            .field("channels", &self.core.channels.borrow().len())
            .field("timers", &self.core.timers.borrow().len())
            .field("idles", &self.core.idles.borrow().len())
            .field("running", &self.core.running.get())
            .finish()
    }
}
