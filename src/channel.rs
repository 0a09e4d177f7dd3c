//! Buffered channels.
//!
//! A [`Channel`] wraps one native descriptor under reactor management. The
//! reactor reports readiness, the channel performs bounded I/O against its
//! input and output buffers, and the bound [`Handler`] is told what
//! happened. The channel owns its buffers exclusively; the handler is
//! referenced, not owned, and the binding may be reassigned at any time.
//!
//! Channels are created by wrapping a descriptor ([`Channel::wrap`],
//! [`Channel::wrap_connecting`]) or by [`Channel::accept`] on a listening
//! channel, and destroyed only by explicit [`close`]/[`forceclose`]
//! completion, never implicitly.
//!
//! [`Handler`]: crate::Handler
//! [`close`]: Channel::close
//! [`forceclose`]: Channel::forceclose

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::backend::{cvt, set_cloexec, set_nonblock, Interest, Token};
use crate::buffer::{Crossing, InputBuffer, OutputBuffer};
use crate::handler::Handler;
use crate::reactor::{Core, Dispatch, Reactor};
use crate::timer::{Timer, TimerSpec};

/// Lifecycle state of a channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// An outbound connect is in flight.
    Connecting,
    /// Open for business.
    Connected,
    /// The peer closed its end; writes may continue.
    Eof,
    /// A graceful close waits for the output buffer to drain.
    Closing,
    /// Torn down; the descriptor is no longer managed.
    Closed,
    /// A connect or read fault left the channel unusable.
    Failed,
}

/// Construction options for [`Channel::wrap`].
#[derive(Clone, Debug)]
pub struct ChannelOptions {
    pub description: String,
    pub read_only: bool,
    pub write_only: bool,
    pub autoread: bool,
}

impl Default for ChannelOptions {
    fn default() -> ChannelOptions {
        ChannelOptions {
            description: String::new(),
            read_only: false,
            write_only: false,
            autoread: true,
        }
    }
}

pub(crate) struct ChannelState {
    state: State,
    description: String,
    read_only: bool,
    write_only: bool,
    autoread: bool,
    listener: bool,
    reentrant: bool,
    readevents: bool,
    inbuf: InputBuffer,
    outbuf: OutputBuffer,
    in_backend: bool,
    registered: Interest,
    eof_notified: bool,
    connect_timer: Option<Timer>,
}

pub(crate) struct ChannelShared {
    core: Weak<Core>,
    token: Cell<usize>,
    fd: Cell<RawFd>,
    fh: RefCell<Option<Rc<dyn Any>>>,
    st: RefCell<ChannelState>,
    handler: RefCell<Rc<dyn Handler>>,
    depth: Cell<u32>,
}

enum StepOutcome {
    /// Some bytes left the buffer.
    Progress,
    /// The descriptor would block; wait for the next readiness event.
    Blocked,
    /// Nothing (left) to drain.
    Empty,
    /// The write faulted; the write-error handler has been dispatched.
    Faulted,
}

/// Takes ownership of an accepted descriptor so it is closed when the last
/// channel reference goes away.
struct AcceptedFd(RawFd);

impl AsRawFd for AcceptedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for AcceptedFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

impl ChannelShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.st.borrow().state == State::Closed
    }

    pub(crate) fn is_reentrant(&self) -> bool {
        self.st.borrow().reentrant
    }

    pub(crate) fn dispatch_depth(&self) -> u32 {
        self.depth.get()
    }

    pub(crate) fn enter_dispatch(&self) {
        self.depth.set(self.depth.get() + 1);
    }

    pub(crate) fn leave_dispatch(&self) {
        self.depth.set(self.depth.get() - 1);
    }

    pub(crate) fn handler_ref(&self) -> Rc<dyn Handler> {
        self.handler.borrow().clone()
    }

    fn desired_interest(st: &ChannelState) -> Interest {
        let mut interest = Interest::empty();
        match st.state {
            State::Closed | State::Failed => {}
            State::Connecting => interest.insert(Interest::writable()),
            State::Connected if st.listener => {
                if st.readevents {
                    interest.insert(Interest::readable());
                }
            }
            State::Connected | State::Eof | State::Closing => {
                if st.state == State::Connected && st.readevents && !st.write_only {
                    interest.insert(Interest::readable() | Interest::priority());
                }
                if !st.read_only && !st.outbuf.is_empty() {
                    interest.insert(Interest::writable());
                }
            }
        }
        interest
    }

    /// Reconciles the backend registration with the channel's state: at
    /// most one live registration per event kind, write interest iff
    /// output is pending.
    fn try_update_registration(&self) -> io::Result<()> {
        let core = match self.core.upgrade() {
            Some(core) => core,
            None => return Ok(()),
        };
        let (desired, in_backend) = {
            let st = self.st.borrow();
            (Self::desired_interest(&st), st.in_backend)
        };
        let registered = self.st.borrow().registered;
        if in_backend && desired == registered {
            return Ok(());
        }

        let fd = self.fd.get();
        let token = Token(self.token.get());
        let mut backend = core.backend.borrow_mut();
        if !in_backend {
            if desired.is_empty() {
                return Ok(());
            }
            backend.register(fd, token, desired)?;
        } else if desired.is_empty() {
            backend.deregister(fd)?;
        } else {
            backend.reregister(fd, token, desired)?;
        }
        drop(backend);

        let mut st = self.st.borrow_mut();
        st.in_backend = !desired.is_empty();
        st.registered = desired;
        Ok(())
    }

    fn update_registration(&self) {
        if let Err(e) = self.try_update_registration() {
            panic!("reactor fault: registration failed: {}", e);
        }
    }

    /// One bounded read per readiness event, then exactly one input
    /// dispatch; a zero-length read runs the end-of-input sequence.
    pub(crate) fn handle_readable(self: &Rc<Self>, core: &Rc<Core>) {
        let (state, listener, autoread) = {
            let st = self.st.borrow();
            (st.state, st.listener, st.autoread)
        };
        if state != State::Connected {
            return;
        }
        if listener {
            core.dispatch(self, Dispatch::Connection);
            return;
        }
        if !autoread {
            core.dispatch(self, Dispatch::ReadReady);
            return;
        }

        let fd = self.fd.get();
        let result = {
            let mut scratch = core.scratch.borrow_mut();
            let rc = unsafe {
                libc::read(fd, scratch.as_mut_ptr() as *mut libc::c_void, scratch.len())
            };
            match cvt(rc) {
                Ok(n) => {
                    if n > 0 {
                        self.st.borrow_mut().inbuf.append(&scratch[..n as usize]);
                    }
                    Ok(n as usize)
                }
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(0) => self.end_of_input(core, State::Eof),
            Ok(n) => {
                trace!("{:?}: read {} bytes", self, n);
                core.dispatch(self, Dispatch::Input);
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("{:?}: read fault: {}", self, e);
                self.end_of_input(core, State::Failed);
            }
        }
    }

    /// Terminal input sequence: optional end-of-input dispatch, then the
    /// input handler exactly one more time, even with an empty buffer.
    fn end_of_input(self: &Rc<Self>, core: &Rc<Core>, state: State) {
        {
            let mut st = self.st.borrow_mut();
            if st.eof_notified {
                return;
            }
            st.eof_notified = true;
            st.state = state;
        }
        self.update_registration();
        if state == State::Eof {
            core.dispatch(self, Dispatch::Eof);
        }
        core.dispatch(self, Dispatch::Input);
    }

    pub(crate) fn handle_writable(self: &Rc<Self>, core: &Rc<Core>) {
        let state = self.st.borrow().state;
        match state {
            State::Connecting => self.finish_connect(core),
            State::Closed | State::Failed => {}
            _ => {
                let _ = self.drain_step(core);
            }
        }
    }

    pub(crate) fn handle_exception(self: &Rc<Self>, core: &Rc<Core>) {
        let state = self.st.borrow().state;
        if state == State::Connected {
            core.dispatch(self, Dispatch::Exception);
        }
    }

    /// Watchdog entry point: behaves like a level-triggered read-ready
    /// report for connected, read-enabled channels.
    pub(crate) fn watchdog_poke(self: &Rc<Self>, core: &Rc<Core>) {
        let poke = {
            let st = self.st.borrow();
            st.state == State::Connected && st.readevents && !st.listener && !st.write_only
        };
        if poke {
            self.handle_readable(core);
        }
    }

    /// Drains as much as one underlying write accepts. The remainder waits
    /// for the next readiness event; no alternate write primitive is tried.
    fn drain_step(self: &Rc<Self>, core: &Rc<Core>) -> StepOutcome {
        let fd = self.fd.get();
        let (result, crossing, now_empty) = {
            let mut st = self.st.borrow_mut();
            match st.state {
                State::Closed | State::Failed | State::Connecting => return StepOutcome::Empty,
                _ => {}
            }
            if st.outbuf.is_empty() {
                return StepOutcome::Empty;
            }
            let slice = st.outbuf.as_slice();
            let rc =
                unsafe { libc::write(fd, slice.as_ptr() as *const libc::c_void, slice.len()) };
            match cvt(rc) {
                Ok(n) if n > 0 => {
                    let crossing = st.outbuf.consume(n as usize);
                    (Ok(n as usize), crossing, st.outbuf.is_empty())
                }
                Ok(_) => (Err(io::ErrorKind::WouldBlock.into()), None, false),
                Err(e) => (Err(e), None, false),
            }
        };

        match result {
            Ok(n) => {
                trace!("{:?}: drained {} bytes", self, n);
                core.dispatch(self, Dispatch::OutputWritten(n));
                if crossing == Some(Crossing::End) {
                    core.dispatch(self, Dispatch::OverflowEnd);
                }
                if now_empty {
                    core.dispatch(self, Dispatch::OutputDrained);
                    self.update_registration();
                    let closing = self.st.borrow().state == State::Closing;
                    if closing {
                        self.teardown(core);
                        return StepOutcome::Empty;
                    }
                }
                StepOutcome::Progress
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => StepOutcome::Blocked,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => StepOutcome::Progress,
            Err(e) => {
                core.dispatch(self, Dispatch::WriteError(e));
                StepOutcome::Faulted
            }
        }
    }

    fn finish_connect(self: &Rc<Self>, core: &Rc<Core>) {
        let result = take_socket_error(self.fd.get());
        match result {
            Ok(()) => {
                {
                    let mut st = self.st.borrow_mut();
                    st.state = State::Connected;
                }
                self.cancel_connect_timer();
                self.update_registration();
                debug!("{:?}: connected", self);
                core.dispatch(self, Dispatch::Connected);
            }
            Err(e) => self.fail_connect(core, e),
        }
    }

    pub(crate) fn fail_connect(self: &Rc<Self>, core: &Rc<Core>, error: io::Error) {
        {
            let mut st = self.st.borrow_mut();
            if st.state != State::Connecting {
                return;
            }
            st.state = State::Failed;
        }
        self.cancel_connect_timer();
        self.update_registration();
        debug!("{:?}: connect failed: {}", self, error);
        core.dispatch(self, Dispatch::ConnectFailed(error));
    }

    fn cancel_connect_timer(&self) {
        let timer = self.st.borrow_mut().connect_timer.take();
        if let Some(timer) = timer {
            timer.cancel();
        }
    }

    /// Unconditional teardown: unregister, release buffers and the wrapped
    /// handle, leave the reactor's table.
    fn teardown(&self, core: &Rc<Core>) {
        {
            let mut st = self.st.borrow_mut();
            if st.state == State::Closed {
                return;
            }
            st.state = State::Closed;
            if st.in_backend {
                if let Err(e) = core.backend.borrow_mut().deregister(self.fd.get()) {
                    warn!("deregister failed during close: {}", e);
                }
                st.in_backend = false;
                st.registered = Interest::empty();
            }
            st.inbuf.clear();
            st.outbuf.clear();
        }
        self.cancel_connect_timer();
        *self.fh.borrow_mut() = None;

        let token = self.token.get();
        let mut channels = core.channels.borrow_mut();
        if channels.contains(token) {
            channels.remove(token);
        }
        debug!("channel token={} closed", token);
    }
}

/// A wrapped I/O descriptor managed by the reactor.
///
/// `Channel` is a cheap handle; clones refer to the same underlying
/// channel. All methods must be called from the reactor thread (the type is
/// `!Send`, so the compiler enforces this).
#[derive(Clone)]
pub struct Channel {
    shared: Rc<ChannelShared>,
}

impl Channel {
    pub(crate) fn from_shared(shared: Rc<ChannelShared>) -> Channel {
        Channel { shared }
    }

    /// Wraps an already connected (or otherwise ready) descriptor.
    ///
    /// The descriptor is switched to nonblocking mode and registered with
    /// the reactor's backend. The wrapped value is kept alive until the
    /// channel closes and is recoverable through [`filehandle`].
    ///
    /// # Panics
    ///
    /// Panics if `options` request both `read_only` and `write_only`.
    ///
    /// [`filehandle`]: Channel::filehandle
    pub fn wrap<T>(
        reactor: &Reactor,
        io: T,
        handler: Rc<dyn Handler>,
        options: ChannelOptions,
    ) -> io::Result<Channel>
    where
        T: AsRawFd + Any,
    {
        let fd = io.as_raw_fd();
        Channel::wrap_inner(
            reactor.core(),
            fd,
            Rc::new(io),
            handler,
            options,
            State::Connected,
        )
    }

    /// Wraps a descriptor with a nonblocking connect in flight.
    ///
    /// The channel starts in [`State::Connecting`] and watches for write
    /// readiness; the pending `SO_ERROR` decides between the connected and
    /// connect-failed handlers. When `timeout` is given and expires first,
    /// connect-failed receives `io::ErrorKind::TimedOut`.
    pub fn wrap_connecting<T>(
        reactor: &Reactor,
        io: T,
        handler: Rc<dyn Handler>,
        options: ChannelOptions,
        timeout: Option<Duration>,
    ) -> io::Result<Channel>
    where
        T: AsRawFd + Any,
    {
        let fd = io.as_raw_fd();
        let channel = Channel::wrap_inner(
            reactor.core(),
            fd,
            Rc::new(io),
            handler,
            options,
            State::Connecting,
        )?;

        if let Some(timeout) = timeout {
            let weak = Rc::downgrade(&channel.shared);
            let timer = Timer::new(
                reactor,
                TimerSpec::after(timeout),
                move |reactor: &Reactor| {
                    if let Some(shared) = weak.upgrade() {
                        shared.fail_connect(reactor.core(), io::ErrorKind::TimedOut.into());
                    }
                },
            );
            channel.shared.st.borrow_mut().connect_timer = Some(timer);
        }
        Ok(channel)
    }

    fn wrap_inner(
        core: &Rc<Core>,
        fd: RawFd,
        fh: Rc<dyn Any>,
        handler: Rc<dyn Handler>,
        options: ChannelOptions,
        state: State,
    ) -> io::Result<Channel> {
        assert!(
            !(options.read_only && options.write_only),
            "configuration error: channel cannot be both read_only and write_only"
        );
        set_nonblock(fd)?;
        set_cloexec(fd)?;

        let description = if options.description.is_empty() {
            format!("fd {}", fd)
        } else {
            options.description
        };

        let shared = Rc::new(ChannelShared {
            core: Rc::downgrade(core),
            token: Cell::new(usize::max_value()),
            fd: Cell::new(fd),
            fh: RefCell::new(Some(fh)),
            st: RefCell::new(ChannelState {
                state,
                description,
                read_only: options.read_only,
                write_only: options.write_only,
                autoread: options.autoread,
                listener: false,
                reentrant: false,
                readevents: true,
                inbuf: InputBuffer::new(),
                outbuf: OutputBuffer::new(core.config.default_output_bufsize()),
                in_backend: false,
                registered: Interest::empty(),
                eof_notified: false,
                connect_timer: None,
            }),
            handler: RefCell::new(handler),
            depth: Cell::new(0),
        });

        let token = core.channels.borrow_mut().insert(shared.clone());
        shared.token.set(token);
        if let Err(e) = shared.try_update_registration() {
            core.channels.borrow_mut().remove(token);
            return Err(e);
        }
        debug!("channel token={} wrapped ({:?})", token, state);
        Ok(Channel { shared })
    }

    /// Accepts one pending connection on a listening channel.
    ///
    /// The accepted channel inherits this channel's handler binding and
    /// default options; no connection-ready callback fires for it, since
    /// the caller's own connection handler already did.
    pub fn accept(&self) -> io::Result<Channel> {
        let core = self.core()?;
        let fd = cvt(unsafe {
            libc::accept(self.shared.fd.get(), std::ptr::null_mut(), std::ptr::null_mut())
        })?;
        let accepted = AcceptedFd(fd);

        let options = ChannelOptions {
            description: format!("accepted by {}", self.description()),
            ..ChannelOptions::default()
        };
        Channel::wrap_inner(
            &core,
            fd,
            Rc::new(accepted),
            self.shared.handler_ref(),
            options,
            State::Connected,
        )
    }

    fn core(&self) -> io::Result<Rc<Core>> {
        self.shared.core.upgrade().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "reactor is gone")
        })
    }

    /// Queues bytes for transmission and registers write interest.
    ///
    /// Crossing the overflow threshold upward fires the overflow-begin
    /// handler exactly once; the matching overflow-end fires when the
    /// buffer drains back to at/under the threshold.
    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        let core = self.core()?;
        let crossing = {
            let mut st = self.shared.st.borrow_mut();
            match st.state {
                State::Closed | State::Closing | State::Failed => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "channel is closed or closing",
                    ))
                }
                _ => {}
            }
            if st.read_only {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "channel is read-only",
                ));
            }
            st.outbuf.push(data)
        };
        self.shared.update_registration();
        if crossing == Some(Crossing::Begin) {
            core.dispatch(&self.shared, Dispatch::OverflowBegin);
        }
        Ok(())
    }

    /// Synchronously flushes as much pending output as the descriptor
    /// accepts right now. Anything left waits for readiness as usual.
    pub fn drain(&self) {
        let core = match self.core() {
            Ok(core) => core,
            Err(_) => return,
        };
        loop {
            match self.shared.drain_step(&core) {
                StepOutcome::Progress => continue,
                StepOutcome::Blocked | StepOutcome::Empty | StepOutcome::Faulted => return,
            }
        }
    }

    /// Whether at least `amount` input bytes are buffered.
    pub fn can_read(&self, amount: usize) -> bool {
        self.shared.st.borrow().inbuf.can_read(amount)
    }

    /// Extracts up to `amount` raw input bytes; `None` when empty.
    pub fn getsome(&self, amount: usize) -> Option<Vec<u8>> {
        self.shared.st.borrow_mut().inbuf.getsome(amount)
    }

    /// Extracts the next input record, separator stripped; `None` when no
    /// complete record is buffered.
    pub fn get(&self) -> Option<Vec<u8>> {
        self.shared.st.borrow_mut().inbuf.get()
    }

    /// Pushes a previously consumed record back for the next [`get`].
    ///
    /// [`get`]: Channel::get
    pub fn unget(&self, line: Vec<u8>) {
        self.shared.st.borrow_mut().inbuf.unget(line);
    }

    /// Prepends raw bytes (separators included) to the input buffer.
    pub fn ungets(&self, raw: &[u8]) {
        self.shared.st.borrow_mut().inbuf.ungets(raw);
    }

    /// A copy of the unconsumed input byte run, without consuming it.
    pub fn peek(&self) -> Vec<u8> {
        self.shared.st.borrow().inbuf.peek().to_vec()
    }

    /// Sets the input record separator used by [`get`].
    ///
    /// [`get`]: Channel::get
    pub fn input_record_separator(&self, separator: &[u8]) {
        self.shared.st.borrow_mut().inbuf.set_separator(separator);
    }

    /// Enables or disables read-readiness events for this channel.
    pub fn readevents(&self, on: bool) -> bool {
        let old = {
            let mut st = self.shared.st.borrow_mut();
            mem::replace(&mut st.readevents, on)
        };
        self.shared.update_registration();
        old
    }

    /// Adjusts the output-buffer overflow threshold. Crossing signals keep
    /// their strict begin/end alternation.
    pub fn output_bufsize(&self, bytes: usize) {
        let core = match self.core() {
            Ok(core) => core,
            Err(_) => return,
        };
        let crossing = self.shared.st.borrow_mut().outbuf.set_limit(bytes);
        match crossing {
            Some(Crossing::Begin) => core.dispatch(&self.shared, Dispatch::OverflowBegin),
            Some(Crossing::End) => core.dispatch(&self.shared, Dispatch::OverflowEnd),
            None => {}
        }
    }

    /// Enables or disables automatic reading on read-readiness. With
    /// autoread off, the mandatory read-ready handler fires instead.
    pub fn autoread(&self, on: bool) -> bool {
        let mut st = self.shared.st.borrow_mut();
        mem::replace(&mut st.autoread, on)
    }

    /// Opts this channel into nested dispatch. Off by default: dispatches
    /// arriving while one is active are queued FIFO.
    pub fn reentrant(&self, on: bool) -> bool {
        let mut st = self.shared.st.borrow_mut();
        mem::replace(&mut st.reentrant, on)
    }

    /// Marks or unmarks this channel as a listener; read-readiness then
    /// dispatches the connection handler instead of reading.
    pub fn listener(&self, on: bool) -> bool {
        let old = {
            let mut st = self.shared.st.borrow_mut();
            mem::replace(&mut st.listener, on)
        };
        self.shared.update_registration();
        old
    }

    /// Rebinds the handler, returning the previous binding.
    pub fn handler(&self, new: Rc<dyn Handler>) -> Rc<dyn Handler> {
        mem::replace(&mut *self.shared.handler.borrow_mut(), new)
    }

    /// The wrapped descriptor value, downcastable to its concrete type.
    /// `None` once the channel has closed.
    pub fn filehandle(&self) -> Option<Rc<dyn Any>> {
        self.shared.fh.borrow().clone()
    }

    pub fn state(&self) -> State {
        self.shared.st.borrow().state
    }

    pub fn description(&self) -> String {
        self.shared.st.borrow().description.clone()
    }

    /// The reactor this channel belongs to, while it is still alive.
    pub fn reactor(&self) -> Option<Reactor> {
        self.shared.core.upgrade().map(Reactor::from_core)
    }

    /// Graceful close: pending output drains first, then the channel is
    /// torn down. Completion happens on the drain that empties the buffer.
    pub fn close(&self) {
        let core = match self.core() {
            Ok(core) => core,
            Err(_) => return,
        };
        let immediate = {
            let mut st = self.shared.st.borrow_mut();
            match st.state {
                State::Closed | State::Closing => return,
                State::Connecting | State::Failed => true,
                _ if st.outbuf.is_empty() => true,
                _ => {
                    st.state = State::Closing;
                    false
                }
            }
        };
        if immediate {
            self.shared.teardown(&core);
        } else {
            self.shared.update_registration();
        }
    }

    /// Immediate close: pending output is discarded along with its
    /// completion notifications.
    pub fn forceclose(&self) {
        let core = match self.core() {
            Ok(core) => core,
            Err(_) => return,
        };
        self.shared.st.borrow_mut().outbuf.clear();
        self.shared.teardown(&core);
    }
}

fn take_socket_error(fd: RawFd) -> io::Result<()> {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    cvt(unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    })?;
    if err == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(err))
    }
}

impl AsRawFd for Channel {
    fn as_raw_fd(&self) -> RawFd {
        self.shared.fd.get()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.shared.st.borrow();
        fmt.debug_struct("Channel")
            .field("description", &st.description)
            .field("state", &st.state)
            .field("fd", &self.shared.fd.get())
            .finish()
    }
}

impl fmt::Debug for ChannelShared {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.st.try_borrow() {
            Ok(st) => write!(fmt, "Channel({}, {:?})", st.description, st.state),
            Err(_) => write!(fmt, "Channel(fd {})", self.fd.get()),
        }
    }
}
