//! Connect-in-flight channels: completion through `SO_ERROR` and the
//! internal connect timeout.

use std::cell::{Cell, RefCell};
use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::Duration;

use io_events::{Channel, ChannelOptions, Handler, Reactor};

fn init_logging() {
    let _ = env_logger::try_init();
}

struct ConnectHandler {
    connected: Cell<usize>,
    failed: RefCell<Vec<io::ErrorKind>>,
}

impl Handler for ConnectHandler {
    fn input(&self, _channel: &Channel) {}

    fn connected(&self, channel: &Channel) {
        self.connected.set(self.connected.get() + 1);
        channel.forceclose();
        channel.reactor().expect("reactor").stop();
    }

    fn connect_failed(&self, channel: &Channel, error: io::Error) {
        self.failed.borrow_mut().push(error.kind());
        channel.forceclose();
        channel.reactor().expect("reactor").stop();
    }

    fn write_error(&self, _channel: &Channel, error: io::Error) {
        panic!("unexpected write error: {}", error);
    }
}

#[test]
fn connect_completion_reports_connected() {
    init_logging();
    let reactor = Reactor::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    // The connect finishes before wrapping; the first write-readiness turn
    // still goes through the SO_ERROR check.
    let stream = TcpStream::connect(addr).unwrap();

    let handler = Rc::new(ConnectHandler {
        connected: Cell::new(0),
        failed: RefCell::new(Vec::new()),
    });
    let _channel = Channel::wrap_connecting(
        &reactor,
        stream,
        handler.clone(),
        ChannelOptions::default(),
        Some(Duration::from_secs(10)),
    )
    .unwrap();

    reactor.run();

    assert_eq!(handler.connected.get(), 1);
    assert!(handler.failed.borrow().is_empty());
}

/// One end of a pipe, owned. A pipe read end never reports write
/// readiness, which makes a connect that can only end by timeout.
struct PipeEnd(RawFd);

impl AsRawFd for PipeEnd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for PipeEnd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

fn pipe_ends() -> (PipeEnd, PipeEnd) {
    let mut fds = [0; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe(2) failed");
    (PipeEnd(fds[0]), PipeEnd(fds[1]))
}

#[test]
fn connect_timeout_reports_timed_out() {
    init_logging();
    let reactor = Reactor::new().unwrap();
    let (read_end, _write_end) = pipe_ends();

    let handler = Rc::new(ConnectHandler {
        connected: Cell::new(0),
        failed: RefCell::new(Vec::new()),
    });
    let _channel = Channel::wrap_connecting(
        &reactor,
        read_end,
        handler.clone(),
        ChannelOptions::default(),
        Some(Duration::from_millis(50)),
    )
    .unwrap();

    reactor.run();

    assert_eq!(handler.connected.get(), 0);
    assert_eq!(&*handler.failed.borrow(), &[io::ErrorKind::TimedOut]);
}
