//! Generic adapter over `poll(2)`.
//!
//! The most portable engine without the `FD_SETSIZE` ceiling. The pollfd
//! array is rebuilt from the registration table on every wait, which keeps
//! the adapter trivially correct at the cost of a little per-turn work.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use log::trace;

use super::{cvt, millis, Backend, Event, Interest, Token};

pub(crate) struct PollBackend {
    registrations: HashMap<RawFd, (Token, Interest)>,
    pollfds: Vec<libc::pollfd>,
}

impl PollBackend {
    pub(crate) fn new() -> PollBackend {
        PollBackend {
            registrations: HashMap::new(),
            pollfds: Vec::new(),
        }
    }
}

fn event_bits(interest: Interest) -> libc::c_short {
    let mut bits = 0;
    if interest.is_readable() {
        bits |= libc::POLLIN;
    }
    if interest.is_writable() {
        bits |= libc::POLLOUT;
    }
    if interest.is_priority() {
        bits |= libc::POLLPRI;
    }
    bits
}

fn readiness(revents: libc::c_short) -> Interest {
    let mut readiness = Interest::empty();
    if revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
        readiness.insert(Interest::readable());
    }
    if revents & (libc::POLLOUT | libc::POLLERR) != 0 {
        readiness.insert(Interest::writable());
    }
    if revents & libc::POLLPRI != 0 {
        readiness.insert(Interest::priority());
    }
    readiness
}

impl Backend for PollBackend {
    fn register(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        trace!("poll: register fd={} token={:?} {:?}", fd, token, interest);
        self.registrations.insert(fd, (token, interest));
        Ok(())
    }

    fn reregister(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        trace!("poll: reregister fd={} token={:?} {:?}", fd, token, interest);
        match self.registrations.get_mut(&fd) {
            Some(slot) => {
                *slot = (token, interest);
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "descriptor is not registered",
            )),
        }
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        trace!("poll: deregister fd={}", fd);
        match self.registrations.remove(&fd) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "descriptor is not registered",
            )),
        }
    }

    fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();
        self.pollfds.clear();

        for (&fd, &(_, interest)) in &self.registrations {
            if interest.is_empty() {
                continue;
            }
            self.pollfds.push(libc::pollfd {
                fd,
                events: event_bits(interest),
                revents: 0,
            });
        }

        loop {
            let rc = unsafe {
                libc::poll(
                    self.pollfds.as_mut_ptr(),
                    self.pollfds.len() as libc::nfds_t,
                    millis(timeout),
                )
            };
            match cvt(rc) {
                Ok(_) => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        for pollfd in &self.pollfds {
            if pollfd.revents == 0 {
                continue;
            }
            let readiness = readiness(pollfd.revents);
            if readiness.is_empty() {
                continue;
            }
            let (token, _) = self.registrations[&pollfd.fd];
            events.push(Event::new(readiness, token));
        }
        Ok(())
    }
}

#[test]
fn test_readiness_mapping() {
    assert!(readiness(libc::POLLIN).is_readable());
    assert!(readiness(libc::POLLOUT).is_writable());
    assert!(readiness(libc::POLLPRI).is_priority());

    // Errors surface on both paths so whichever side is waiting notices.
    assert!(readiness(libc::POLLERR).is_readable());
    assert!(readiness(libc::POLLERR).is_writable());
    assert!(readiness(libc::POLLHUP).is_readable());
}
