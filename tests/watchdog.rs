//! The dropped-event watchdog: a configured period injects synthetic
//! read-readiness into connected, read-enabled channels, and nothing else.

use std::cell::Cell;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

use io_events::{
    BackendKind, Channel, ChannelOptions, Config, Handler, Reactor, Timer, TimerSpec,
};

struct CountPokes {
    pokes: Cell<usize>,
}

impl Handler for CountPokes {
    // autoread is off, so a poke surfaces as read-ready; nothing was ever
    // written to the peer, so only the watchdog can get us here.
    fn read_ready(&self, channel: &Channel) {
        self.pokes.set(self.pokes.get() + 1);
        if self.pokes.get() == 3 {
            channel.reactor().expect("reactor").stop();
        }
    }

    fn write_error(&self, _channel: &Channel, error: std::io::Error) {
        panic!("unexpected write error: {}", error);
    }
}

// Every mandatory default panics, so any stray poke fails the test.
struct MustStaySilent;

impl Handler for MustStaySilent {}

#[test]
fn watchdog_pokes_read_enabled_channels_and_skips_the_rest() {
    let _ = env_logger::try_init();
    let config = Config::new(BackendKind::Epoll).watchdog(Some(Duration::from_millis(10)));
    let reactor = Reactor::with_config(config).unwrap();

    let handler = Rc::new(CountPokes {
        pokes: Cell::new(0),
    });
    let (watched, _watched_peer) = UnixStream::pair().unwrap();
    let options = ChannelOptions {
        autoread: false,
        ..ChannelOptions::default()
    };
    let _watched = Channel::wrap(&reactor, watched, handler.clone(), options).unwrap();

    let (listener_io, _listener_peer) = UnixStream::pair().unwrap();
    let listener = Channel::wrap(
        &reactor,
        listener_io,
        Rc::new(MustStaySilent),
        ChannelOptions::default(),
    )
    .unwrap();
    listener.listener(true);

    let (sink, _sink_peer) = UnixStream::pair().unwrap();
    let write_only = ChannelOptions {
        write_only: true,
        ..ChannelOptions::default()
    };
    let _sink = Channel::wrap(&reactor, sink, Rc::new(MustStaySilent), write_only).unwrap();

    let (muted, _muted_peer) = UnixStream::pair().unwrap();
    let muted = Channel::wrap(
        &reactor,
        muted,
        Rc::new(MustStaySilent),
        ChannelOptions::default(),
    )
    .unwrap();
    muted.readevents(false);

    // Backstop so a broken watchdog fails fast instead of hanging.
    let _backstop = Timer::new(
        &reactor,
        TimerSpec::after(Duration::from_secs(2)),
        |reactor: &Reactor| reactor.stop(),
    );

    reactor.run();

    assert!(
        handler.pokes.get() >= 3,
        "watchdog never drove read-readiness (pokes: {})",
        handler.pokes.get()
    );
}
