//! Channel behavior against live descriptors on the default (epoll)
//! backend. Peer ends run on plain std threads so the reactor side stays
//! single-threaded.

use std::cell::{Cell, RefCell};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use io_events::{Channel, ChannelOptions, Handler, Reactor, State};

fn init_logging() {
    let _ = env_logger::try_init();
}

#[derive(Default)]
struct Recorder {
    connections: Cell<usize>,
    inputs: Cell<usize>,
    eofs: Cell<usize>,
    lines: RefCell<Vec<Vec<u8>>>,
    overflow_begins: Cell<usize>,
    overflow_ends: Cell<usize>,
    drains: Cell<usize>,
}

struct HelloHandler {
    rec: Rc<Recorder>,
}

impl Handler for HelloHandler {
    fn connection(&self, channel: &Channel) {
        self.rec.connections.set(self.rec.connections.get() + 1);
        channel.accept().expect("accept");
    }

    fn input(&self, channel: &Channel) {
        self.rec.inputs.set(self.rec.inputs.get() + 1);
        if let Some(line) = channel.get() {
            self.rec.lines.borrow_mut().push(line);
            channel.reactor().expect("reactor").stop();
        } else if channel.state() == State::Eof {
            channel.reactor().expect("reactor").stop();
        }
    }

    fn write_error(&self, _channel: &Channel, error: std::io::Error) {
        panic!("unexpected write error: {}", error);
    }
}

#[test]
fn hello_scenario() {
    init_logging();
    let reactor = Reactor::new().unwrap();
    let rec = Rc::new(Recorder::default());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let channel = Channel::wrap(
        &reactor,
        listener,
        Rc::new(HelloHandler { rec: rec.clone() }),
        ChannelOptions::default(),
    )
    .unwrap();
    channel.listener(true);

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"hello\n").unwrap();
        // Hold the connection open until the reactor has seen the line.
        thread::sleep(Duration::from_millis(200));
    });

    reactor.run();
    client.join().unwrap();

    assert_eq!(rec.connections.get(), 1);
    assert_eq!(rec.inputs.get(), 1);
    assert_eq!(&*rec.lines.borrow(), &[b"hello".to_vec()]);
}

struct Quiet;

impl Handler for Quiet {
    fn input(&self, _channel: &Channel) {}
    fn write_error(&self, _channel: &Channel, error: std::io::Error) {
        panic!("unexpected write error: {}", error);
    }
}

#[test]
fn queued_writes_arrive_in_order_exactly_once() {
    init_logging();
    let reactor = Reactor::new().unwrap();
    let (ours, theirs) = UnixStream::pair().unwrap();

    let peer = thread::spawn(move || {
        let mut theirs = theirs;
        let mut collected = Vec::new();
        theirs.read_to_end(&mut collected).unwrap();
        collected
    });

    let channel = Channel::wrap(&reactor, ours, Rc::new(Quiet), ChannelOptions::default()).unwrap();

    let chunks: Vec<Vec<u8>> = (0u8..20)
        .map(|i| std::iter::repeat(i).take(3_000).collect())
        .collect();
    let mut expected = Vec::new();
    for chunk in &chunks {
        channel.write(chunk).unwrap();
        expected.extend_from_slice(chunk);
    }
    // Graceful close completes once the buffer drains, which ends the loop.
    channel.close();
    reactor.run();

    let collected = peer.join().unwrap();
    assert_eq!(collected, expected);
}

struct OverflowHandler {
    rec: Rc<Recorder>,
}

impl Handler for OverflowHandler {
    fn input(&self, _channel: &Channel) {}

    fn overflow_begin(&self, _channel: &Channel) {
        self.rec.overflow_begins.set(self.rec.overflow_begins.get() + 1);
    }

    fn overflow_end(&self, _channel: &Channel) {
        self.rec.overflow_ends.set(self.rec.overflow_ends.get() + 1);
    }

    fn output_drained(&self, channel: &Channel) {
        self.rec.drains.set(self.rec.drains.get() + 1);
        channel.close();
    }

    fn write_error(&self, _channel: &Channel, error: std::io::Error) {
        panic!("unexpected write error: {}", error);
    }
}

#[test]
fn overflow_begin_and_end_fire_exactly_once_around_a_big_write() {
    init_logging();
    let reactor = Reactor::new().unwrap();
    let rec = Rc::new(Recorder::default());
    let (ours, theirs) = UnixStream::pair().unwrap();

    let payload: Vec<u8> = {
        use rand::RngCore;
        let mut payload = vec![0u8; 256 * 1024];
        rand::thread_rng().fill_bytes(&mut payload);
        payload
    };
    let expected = payload.clone();

    let peer = thread::spawn(move || {
        let mut theirs = theirs;
        let mut collected = Vec::new();
        let mut chunk = [0u8; 8 * 1024];
        loop {
            match theirs.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    collected.extend_from_slice(&chunk[..n]);
                    // Slow reader so the output buffer backs up.
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => panic!("peer read failed: {}", e),
            }
        }
        collected
    });

    let channel = Channel::wrap(
        &reactor,
        ours,
        Rc::new(OverflowHandler { rec: rec.clone() }),
        ChannelOptions::default(),
    )
    .unwrap();
    channel.output_bufsize(64 * 1024);

    channel.write(&payload).unwrap();
    assert_eq!(rec.overflow_begins.get(), 1);
    assert_eq!(rec.overflow_ends.get(), 0);

    reactor.run();

    assert_eq!(peer.join().unwrap(), expected);
    assert_eq!(rec.overflow_begins.get(), 1);
    assert_eq!(rec.overflow_ends.get(), 1);
    assert_eq!(rec.drains.get(), 1);
}

struct EofHandler {
    rec: Rc<Recorder>,
}

impl Handler for EofHandler {
    fn input(&self, channel: &Channel) {
        self.rec.inputs.set(self.rec.inputs.get() + 1);
        if channel.state() == State::Eof {
            channel.close();
        }
    }

    fn eof(&self, _channel: &Channel) {
        self.rec.eofs.set(self.rec.eofs.get() + 1);
    }

    fn write_error(&self, _channel: &Channel, error: std::io::Error) {
        panic!("unexpected write error: {}", error);
    }
}

#[test]
fn terminal_input_fires_exactly_once_after_eof() {
    init_logging();
    let reactor = Reactor::new().unwrap();
    let rec = Rc::new(Recorder::default());
    let (ours, theirs) = UnixStream::pair().unwrap();

    let _channel = Channel::wrap(
        &reactor,
        ours,
        Rc::new(EofHandler { rec: rec.clone() }),
        ChannelOptions::default(),
    )
    .unwrap();

    let peer = thread::spawn(move || {
        let mut theirs = theirs;
        // Unterminated record, then close: one data input, one terminal.
        theirs.write_all(b"partial").unwrap();
    });

    reactor.run();
    peer.join().unwrap();

    assert_eq!(rec.eofs.get(), 1);
    assert_eq!(rec.inputs.get(), 2);
}

#[test]
fn terminal_input_fires_even_with_an_empty_buffer() {
    init_logging();
    let reactor = Reactor::new().unwrap();
    let rec = Rc::new(Recorder::default());
    let (ours, theirs) = UnixStream::pair().unwrap();

    let _channel = Channel::wrap(
        &reactor,
        ours,
        Rc::new(EofHandler { rec: rec.clone() }),
        ChannelOptions::default(),
    )
    .unwrap();

    drop(theirs);
    reactor.run();

    assert_eq!(rec.eofs.get(), 1);
    assert_eq!(rec.inputs.get(), 1);
}

struct UngetHandler {
    rec: Rc<Recorder>,
}

impl Handler for UngetHandler {
    fn input(&self, channel: &Channel) {
        while let Some(line) = channel.get() {
            channel.unget(line.clone());
            assert_eq!(channel.get(), Some(line.clone()));
            self.rec.lines.borrow_mut().push(line);
        }
        if self.rec.lines.borrow().len() == 2 || channel.state() == State::Eof {
            channel.reactor().expect("reactor").stop();
        }
    }

    fn write_error(&self, _channel: &Channel, error: std::io::Error) {
        panic!("unexpected write error: {}", error);
    }
}

#[test]
fn unget_restores_the_next_get() {
    init_logging();
    let reactor = Reactor::new().unwrap();
    let rec = Rc::new(Recorder::default());
    let (ours, theirs) = UnixStream::pair().unwrap();

    let _channel = Channel::wrap(
        &reactor,
        ours,
        Rc::new(UngetHandler { rec: rec.clone() }),
        ChannelOptions::default(),
    )
    .unwrap();

    let peer = thread::spawn(move || {
        let mut theirs = theirs;
        theirs.write_all(b"alpha\nbeta\n").unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    reactor.run();
    peer.join().unwrap();

    assert_eq!(
        &*rec.lines.borrow(),
        &[b"alpha".to_vec(), b"beta".to_vec()]
    );
}

struct ReadReadyHandler {
    fired: Cell<usize>,
    rec: Rc<Recorder>,
}

impl Handler for ReadReadyHandler {
    fn read_ready(&self, channel: &Channel) {
        self.fired.set(self.fired.get() + 1);
        // Nothing was buffered on our behalf.
        assert!(!channel.can_read(1));
        channel.autoread(true);
    }

    fn input(&self, channel: &Channel) {
        if let Some(line) = channel.get() {
            self.rec.lines.borrow_mut().push(line);
            channel.reactor().expect("reactor").stop();
        } else if channel.state() == State::Eof {
            channel.reactor().expect("reactor").stop();
        }
    }

    fn write_error(&self, _channel: &Channel, error: std::io::Error) {
        panic!("unexpected write error: {}", error);
    }
}

#[test]
fn read_ready_fires_instead_of_reading_when_autoread_is_off() {
    init_logging();
    let reactor = Reactor::new().unwrap();
    let rec = Rc::new(Recorder::default());
    let (ours, theirs) = UnixStream::pair().unwrap();

    let handler = Rc::new(ReadReadyHandler {
        fired: Cell::new(0),
        rec: rec.clone(),
    });
    let options = ChannelOptions {
        autoread: false,
        ..ChannelOptions::default()
    };
    let _channel = Channel::wrap(&reactor, ours, handler.clone(), options).unwrap();

    let peer = thread::spawn(move || {
        let mut theirs = theirs;
        theirs.write_all(b"later\n").unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    reactor.run();
    peer.join().unwrap();

    assert_eq!(handler.fired.get(), 1);
    assert_eq!(&*rec.lines.borrow(), &[b"later".to_vec()]);
}

struct FailingHandler {
    failures: RefCell<Vec<&'static str>>,
}

impl Handler for FailingHandler {
    fn input(&self, _channel: &Channel) {
        panic!("boom");
    }

    fn write_error(&self, _channel: &Channel, error: std::io::Error) {
        panic!("unexpected write error: {}", error);
    }

    fn failure(
        &self,
        channel: &Channel,
        method: &'static str,
        payload: Box<dyn std::any::Any + Send>,
    ) {
        let msg = payload.downcast_ref::<&str>().copied().unwrap_or("?");
        assert_eq!(msg, "boom");
        self.failures.borrow_mut().push(method);
        channel.forceclose();
        channel.reactor().expect("reactor").stop();
    }
}

#[test]
fn handler_panics_are_redirected_to_the_failure_hook() {
    init_logging();
    let reactor = Reactor::new().unwrap();
    let (ours, theirs) = UnixStream::pair().unwrap();

    let handler = Rc::new(FailingHandler {
        failures: RefCell::new(Vec::new()),
    });
    let _channel =
        Channel::wrap(&reactor, ours, handler.clone(), ChannelOptions::default()).unwrap();

    let peer = thread::spawn(move || {
        let mut theirs = theirs;
        theirs.write_all(b"data\n").unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    reactor.run();
    peer.join().unwrap();

    assert_eq!(&*handler.failures.borrow(), &["input"]);
}

struct UnguardedHandler;

impl Handler for UnguardedHandler {
    fn input(&self, _channel: &Channel) {
        panic!("unhandled");
    }

    fn write_error(&self, _channel: &Channel, error: std::io::Error) {
        panic!("unexpected write error: {}", error);
    }
}

#[test]
#[should_panic]
fn handler_panics_propagate_without_a_failure_hook() {
    init_logging();
    let reactor = Reactor::new().unwrap();
    let (ours, theirs) = UnixStream::pair().unwrap();

    let _channel = Channel::wrap(
        &reactor,
        ours,
        Rc::new(UnguardedHandler),
        ChannelOptions::default(),
    )
    .unwrap();

    let _peer = thread::spawn(move || {
        let mut theirs = theirs;
        let _ = theirs.write_all(b"data\n");
        thread::sleep(Duration::from_millis(500));
    });

    reactor.run();
}

struct CongestedWriter {
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl Handler for CongestedWriter {
    fn input(&self, channel: &Channel) {
        self.log.borrow_mut().push("c-input");
        let _ = channel.get();
        // Past the 16-byte threshold while this handler is on the stack,
        // so the begin notification lands in the pending queue.
        channel.write(&[b'x'; 64]).unwrap();
    }

    fn overflow_begin(&self, _channel: &Channel) {
        self.log.borrow_mut().push("begin");
    }

    fn overflow_end(&self, _channel: &Channel) {
        self.log.borrow_mut().push("end");
    }

    fn output_drained(&self, _channel: &Channel) {
        self.log.borrow_mut().push("drained");
    }

    fn write_error(&self, _channel: &Channel, error: std::io::Error) {
        panic!("unexpected write error: {}", error);
    }
}

struct NeighborDrainer {
    congested: Channel,
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl Handler for NeighborDrainer {
    fn input(&self, channel: &Channel) {
        self.log.borrow_mut().push("d-input");
        let _ = channel.get();
        // Drain-step notifications for the other channel must queue behind
        // its parked overflow-begin, not run inline here at depth zero.
        self.congested.drain();
        channel.reactor().expect("reactor").stop();
    }

    fn write_error(&self, _channel: &Channel, error: std::io::Error) {
        panic!("unexpected write error: {}", error);
    }
}

#[test]
fn drain_from_another_handler_cannot_overtake_queued_overflow_begin() {
    init_logging();
    let reactor = Reactor::new().unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));

    let (c_ours, c_theirs) = UnixStream::pair().unwrap();
    let (d_ours, d_theirs) = UnixStream::pair().unwrap();

    let congested = Channel::wrap(
        &reactor,
        c_ours,
        Rc::new(CongestedWriter { log: log.clone() }),
        ChannelOptions::default(),
    )
    .unwrap();
    congested.output_bufsize(16);

    let _drainer = Channel::wrap(
        &reactor,
        d_ours,
        Rc::new(NeighborDrainer {
            congested: congested.clone(),
            log: log.clone(),
        }),
        ChannelOptions::default(),
    )
    .unwrap();

    // Both peers are readable before the first poll, so both inputs land
    // in one event batch.
    let peer = thread::spawn(move || {
        let mut c_theirs = c_theirs;
        let mut d_theirs = d_theirs;
        c_theirs.write_all(b"go\n").unwrap();
        d_theirs.write_all(b"go\n").unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    reactor.run();
    peer.join().unwrap();

    let log = log.borrow();
    let begin = log
        .iter()
        .position(|&entry| entry == "begin")
        .expect("overflow-begin fired");
    if let Some(end) = log.iter().position(|&entry| entry == "end") {
        assert!(begin < end, "overflow-end overtook begin: {:?}", *log);
    }
    if let Some(drained) = log.iter().position(|&entry| entry == "drained") {
        assert!(begin < drained, "drained overtook begin: {:?}", *log);
    }
}

struct NestedHandler {
    order: RefCell<Vec<&'static str>>,
}

impl Handler for NestedHandler {
    fn input(&self, channel: &Channel) {
        self.order.borrow_mut().push("input-start");
        // Tiny output buffer: this write overflows and triggers a nested
        // dispatch while we are still inside the input handler.
        channel.write(b"0123456789abcdef0123456789abcdef").unwrap();
        self.order.borrow_mut().push("input-end");
    }

    fn overflow_begin(&self, channel: &Channel) {
        self.order.borrow_mut().push("overflow");
        channel.reactor().expect("reactor").stop();
    }

    fn write_error(&self, _channel: &Channel, error: std::io::Error) {
        panic!("unexpected write error: {}", error);
    }
}

fn run_nested(reentrant: bool) -> Vec<&'static str> {
    let reactor = Reactor::new().unwrap();
    let (ours, theirs) = UnixStream::pair().unwrap();

    let handler = Rc::new(NestedHandler {
        order: RefCell::new(Vec::new()),
    });
    let channel =
        Channel::wrap(&reactor, ours, handler.clone(), ChannelOptions::default()).unwrap();
    channel.output_bufsize(16);
    channel.reentrant(reentrant);

    let peer = thread::spawn(move || {
        let mut theirs = theirs;
        theirs.write_all(b"go\n").unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    reactor.run();
    peer.join().unwrap();
    let order = handler.order.borrow().clone();
    order
}

#[test]
fn nested_dispatches_are_deferred_on_a_nonreentrant_channel() {
    init_logging();
    assert_eq!(run_nested(false), ["input-start", "input-end", "overflow"]);
}

#[test]
fn nested_dispatches_run_inline_on_a_reentrant_channel() {
    init_logging();
    assert_eq!(run_nested(true), ["input-start", "overflow", "input-end"]);
}

#[test]
fn filehandle_downcasts_to_the_wrapped_type() {
    init_logging();
    let reactor = Reactor::new().unwrap();
    let (ours, _theirs) = UnixStream::pair().unwrap();

    let original: Rc<Quiet> = Rc::new(Quiet);
    let channel = Channel::wrap(
        &reactor,
        ours,
        original.clone(),
        ChannelOptions::default(),
    )
    .unwrap();

    let fh = channel.filehandle().expect("filehandle");
    assert!(fh.downcast::<UnixStream>().is_ok());

    let old = channel.listener(true);
    assert!(!old);
    assert!(channel.listener(false));

    // Rebinding the handler hands back the previous one.
    let original_dyn: Rc<dyn Handler> = original.clone();
    let replaced = channel.handler(Rc::new(Quiet));
    assert!(Rc::ptr_eq(&replaced, &original_dyn));

    channel.forceclose();
    assert_eq!(channel.state(), State::Closed);
    assert!(channel.filehandle().is_none());
}
