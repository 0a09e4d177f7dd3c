//! Portable emulation over `select(2)`.
//!
//! Exists for platforms and descriptor types where the native loop is
//! unavailable. Descriptors are bounded by `FD_SETSIZE`; registering past
//! that limit fails. Historical `select`-based loops have been observed to
//! drop readiness notifications under load, which is why the reactor arms
//! its watchdog by default on this backend.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::time::Duration;

use log::trace;

use super::{cvt, Backend, Event, Interest, Token};

pub(crate) struct SelectBackend {
    registrations: HashMap<RawFd, (Token, Interest)>,
}

impl SelectBackend {
    pub(crate) fn new() -> SelectBackend {
        SelectBackend {
            registrations: HashMap::new(),
        }
    }
}

fn timeval(timeout: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: libc::suseconds_t::from(timeout.subsec_micros()),
    }
}

impl Backend for SelectBackend {
    fn register(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        if fd as usize >= libc::FD_SETSIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "descriptor exceeds FD_SETSIZE, not watchable via select",
            ));
        }
        trace!("select: register fd={} token={:?} {:?}", fd, token, interest);
        self.registrations.insert(fd, (token, interest));
        Ok(())
    }

    fn reregister(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        trace!("select: reregister fd={} token={:?} {:?}", fd, token, interest);
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
        trace!("select: deregister fd={}", fd);
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

        let mut readfds: libc::fd_set = unsafe { mem::zeroed() };
        let mut writefds: libc::fd_set = unsafe { mem::zeroed() };
        let mut exceptfds: libc::fd_set = unsafe { mem::zeroed() };

        // select mutates the sets in place, so they are rebuilt on every
        // attempt, including EINTR retries.
        loop {
            unsafe {
                libc::FD_ZERO(&mut readfds);
                libc::FD_ZERO(&mut writefds);
                libc::FD_ZERO(&mut exceptfds);
            }

            let mut nfds = 0;
            for (&fd, &(_, interest)) in &self.registrations {
                unsafe {
                    if interest.is_readable() {
                        libc::FD_SET(fd, &mut readfds);
                    }
                    if interest.is_writable() {
                        libc::FD_SET(fd, &mut writefds);
                    }
                    if interest.is_priority() {
                        libc::FD_SET(fd, &mut exceptfds);
                    }
                }
                if !interest.is_empty() && fd >= nfds {
                    nfds = fd + 1;
                }
            }

            let mut tv = timeout.map(timeval);
            let tv_ptr = tv
                .as_mut()
                .map(|tv| tv as *mut libc::timeval)
                .unwrap_or(std::ptr::null_mut());

            let rc = unsafe {
                libc::select(nfds, &mut readfds, &mut writefds, &mut exceptfds, tv_ptr)
            };
            match cvt(rc) {
                Ok(_) => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        for (&fd, &(token, interest)) in &self.registrations {
            let mut readiness = Interest::empty();
            unsafe {
                if interest.is_readable() && libc::FD_ISSET(fd, &readfds) {
                    readiness.insert(Interest::readable());
                }
                if interest.is_writable() && libc::FD_ISSET(fd, &writefds) {
                    readiness.insert(Interest::writable());
                }
                if interest.is_priority() && libc::FD_ISSET(fd, &exceptfds) {
                    readiness.insert(Interest::priority());
                }
            }
            if !readiness.is_empty() {
                events.push(Event::new(readiness, token));
            }
        }
        Ok(())
    }
}

#[test]
fn test_reregister_unknown_fd_fails() {
    let mut backend = SelectBackend::new();
    assert!(backend
        .reregister(7, Token(0), Interest::readable())
        .is_err());
    assert!(backend.deregister(7).is_err());
}
