//! User callbacks.
//!
//! A [`Handler`] is a caller-supplied object whose methods are invoked by
//! the reactor as events occur on a channel. Handlers are shared through
//! `Rc` and bound to channels at dispatch time, not at construction: the
//! binding can be swapped at runtime via [`Channel::handler`], and one
//! handler instance may serve many channels (a listener's handler is
//! inherited by every accepted channel).
//!
//! Methods take `&self`; a handler keeps its own mutable state behind
//! `Cell`/`RefCell`. The reactor is single-threaded, so this is cheap.
//!
//! Four methods are mandatory *when the corresponding situation can occur*:
//! [`input`], [`connection`], [`read_ready`] and [`write_error`]. Their
//! default bodies treat invocation as a fatal configuration error. The
//! remaining methods default to no-ops. [`failure`] receives panics raised
//! inside any other method of the same channel's handler; its default body
//! resumes the unwind, so an unhandled callback panic still terminates the
//! process rather than being swallowed.
//!
//! [`Channel::handler`]: crate::Channel::handler
//! [`input`]: Handler::input
//! [`connection`]: Handler::connection
//! [`read_ready`]: Handler::read_ready
//! [`write_error`]: Handler::write_error
//! [`failure`]: Handler::failure

use std::any::Any;
use std::io;
use std::panic;

use crate::channel::Channel;

fn missing(method: &str) -> ! {
    panic!(
        "configuration error: no `{}` handler defined for a channel that requires one",
        method
    )
}

pub trait Handler {
    /// New input is buffered.
    ///
    /// Fires once per non-empty read, and exactly one final time after end
    /// of input, even if the buffer is then empty. Mandatory for readable
    /// channels.
    fn input(&self, channel: &Channel) {
        let _ = channel;
        missing("input")
    }

    /// A connection is ready to be accepted on a listening channel.
    /// Mandatory for listeners; the handler is expected to call
    /// [`Channel::accept`].
    ///
    /// [`Channel::accept`]: crate::Channel::accept
    fn connection(&self, channel: &Channel) {
        let _ = channel;
        missing("connection")
    }

    /// The descriptor is read-ready but autoread is disabled. Mandatory
    /// whenever autoread is switched off.
    fn read_ready(&self, channel: &Channel) {
        let _ = channel;
        missing("read_ready")
    }

    /// Draining the output buffer failed. Mandatory for writable channels.
    fn write_error(&self, channel: &Channel, error: io::Error) {
        let _ = channel;
        missing(&format!("write_error ({})", error))
    }

    /// The peer closed its end; fires once, before the terminal `input`.
    fn eof(&self, _channel: &Channel) {}

    /// An outbound channel finished connecting.
    fn connected(&self, _channel: &Channel) {}

    /// An outbound connect failed. A connection timeout is reported with
    /// `io::ErrorKind::TimedOut`.
    fn connect_failed(&self, _channel: &Channel, _error: io::Error) {}

    /// `amount` buffered bytes were flushed to the descriptor.
    fn output_written(&self, _channel: &Channel, _amount: usize) {}

    /// The output buffer just became empty.
    fn output_drained(&self, _channel: &Channel) {}

    /// The output buffer crossed its overflow threshold upward.
    fn overflow_begin(&self, _channel: &Channel) {}

    /// The output buffer returned to at/under its overflow threshold.
    fn overflow_end(&self, _channel: &Channel) {}

    /// The backend reported an exceptional (priority/out-of-band) condition.
    fn exception(&self, _channel: &Channel) {}

    /// A panic escaped the handler method named `method` while it ran for
    /// `channel`. Overriding this contains the failure to the channel; the
    /// default resumes the unwind and terminates the process.
    fn failure(&self, channel: &Channel, method: &'static str, payload: Box<dyn Any + Send>) {
        let _ = (channel, method);
        panic::resume_unwind(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::os::unix::net::UnixStream;
    use std::rc::Rc;

    use crate::channel::ChannelOptions;
    use crate::reactor::Reactor;

    struct Bare;
    impl Handler for Bare {}

    fn bare_channel(reactor: &Reactor) -> Channel {
        let (ours, theirs) = UnixStream::pair().unwrap();
        // The peer end is irrelevant here; the loop never runs.
        drop(theirs);
        Channel::wrap(reactor, ours, Rc::new(Bare), ChannelOptions::default()).unwrap()
    }

    #[test]
    fn optional_handlers_default_to_noops() {
        let reactor = Reactor::new().unwrap();
        let channel = bare_channel(&reactor);

        let handler: &dyn Handler = &Bare;
        handler.eof(&channel);
        handler.connected(&channel);
        handler.connect_failed(&channel, io::ErrorKind::ConnectionRefused.into());
        handler.output_written(&channel, 0);
        handler.output_drained(&channel);
        handler.overflow_begin(&channel);
        handler.overflow_end(&channel);
        handler.exception(&channel);
    }

    #[test]
    #[should_panic(expected = "no `input` handler")]
    fn missing_mandatory_handler_is_fatal() {
        let reactor = Reactor::new().unwrap();
        let channel = bare_channel(&reactor);
        Bare.input(&channel);
    }
}
