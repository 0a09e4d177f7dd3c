//! Native multiplexed loop backed by `epoll(7)`.

use std::os::unix::io::RawFd;
use std::time::Duration;
use std::io;

use log::trace;

use super::{cvt, millis, Backend, Event, Interest, Token};

pub(crate) struct EpollBackend {
    epfd: RawFd,
}

impl EpollBackend {
    pub(crate) fn new() -> io::Result<EpollBackend> {
        let epfd = unsafe { cvt(libc::epoll_create1(libc::EPOLL_CLOEXEC))? };
        Ok(EpollBackend { epfd })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: event_bits(interest),
            u64: token.0 as u64,
        };
        unsafe { cvt(libc::epoll_ctl(self.epfd, op, fd, &mut ev)).map(|_| ()) }
    }
}

fn event_bits(interest: Interest) -> u32 {
    // Level-triggered on purpose: the reactor performs one bounded I/O step
    // per event and relies on being re-notified for the remainder.
    let mut bits = 0;
    if interest.is_readable() {
        bits |= libc::EPOLLIN;
    }
    if interest.is_writable() {
        bits |= libc::EPOLLOUT;
    }
    if interest.is_priority() {
        bits |= libc::EPOLLPRI;
    }
    bits as u32
}

fn readiness(events: u32) -> Interest {
    let events = events as libc::c_int;
    let mut readiness = Interest::empty();
    if events & (libc::EPOLLIN | libc::EPOLLHUP | libc::EPOLLERR) != 0 {
        readiness.insert(Interest::readable());
    }
    if events & (libc::EPOLLOUT | libc::EPOLLERR) != 0 {
        readiness.insert(Interest::writable());
    }
    if events & libc::EPOLLPRI != 0 {
        readiness.insert(Interest::priority());
    }
    readiness
}

impl Backend for EpollBackend {
    fn register(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        trace!("epoll: register fd={} token={:?} {:?}", fd, token, interest);
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
    }

    fn reregister(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        trace!("epoll: reregister fd={} token={:?} {:?}", fd, token, interest);
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        trace!("epoll: deregister fd={}", fd);
        self.ctl(libc::EPOLL_CTL_DEL, fd, Token(0), Interest::empty())
    }

    fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();

        const CAP: usize = 256;
        let mut raw: [libc::epoll_event; CAP] = unsafe { std::mem::zeroed() };

        let n = loop {
            let rc = unsafe {
                libc::epoll_wait(self.epfd, raw.as_mut_ptr(), CAP as libc::c_int, millis(timeout))
            };
            match cvt(rc) {
                Ok(n) => break n as usize,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        for ev in raw.iter().take(n) {
            events.push(Event::new(readiness(ev.events), Token(ev.u64 as usize)));
        }
        Ok(())
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

#[test]
fn test_event_bits_roundtrip() {
    let interest = Interest::readable() | Interest::writable();
    assert_eq!(interest, readiness(event_bits(interest)));
    assert!(readiness(libc::EPOLLHUP as u32).is_readable());
    assert!(readiness(libc::EPOLLERR as u32).is_writable());
}
