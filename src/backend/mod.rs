//! Notification backends.
//!
//! A [`Backend`] watches a set of descriptors for readiness and reports
//! [`Event`]s. Three interchangeable engines are provided: a native
//! multiplexed loop backed by `epoll(7)`, a portable emulation over
//! `select(2)`, and a generic adapter over `poll(2)`. The reactor talks to
//! all of them through the same trait; timers and idle tasks are scheduled
//! above this layer, so their control surface is identical no matter which
//! engine is driving.
//!
//! The backend is a process-wide, one-time choice: the first reactor built
//! in a process pins the [`BackendKind`], and building a later reactor with
//! a different kind is a configuration error.

use std::os::unix::io::RawFd;
use std::time::Duration;
use std::{fmt, io, ops};

use lazy_static::lazy_static;
use parking_lot::Mutex;

mod epoll;
mod poll;
mod select;

pub(crate) use self::epoll::EpollBackend;
pub(crate) use self::poll::PollBackend;
pub(crate) use self::select::SelectBackend;

/// Associates a registered descriptor with the events it produces.
///
/// Tokens are slab keys handed out by the reactor; the backend treats them
/// as opaque.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

impl From<usize> for Token {
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    fn from(val: Token) -> usize {
        val.0
    }
}

/// A set of readiness kinds a descriptor can be watched for.
///
/// `Interest` values combine with the usual bitwise operators:
///
/// ```
/// use io_events::backend::Interest;
///
/// let interest = Interest::readable() | Interest::writable();
///
/// assert!(interest.is_readable());
/// assert!(interest.is_writable());
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interest(usize);

const READABLE: usize = 0b001;
const WRITABLE: usize = 0b010;
const PRIORITY: usize = 0b100;

impl Interest {
    /// Returns the empty set.
    #[inline]
    pub fn empty() -> Interest {
        Interest(0)
    }

    /// Readable readiness.
    #[inline]
    pub fn readable() -> Interest {
        Interest(READABLE)
    }

    /// Writable readiness.
    #[inline]
    pub fn writable() -> Interest {
        Interest(WRITABLE)
    }

    /// Priority (out-of-band) readiness.
    #[inline]
    pub fn priority() -> Interest {
        Interest(PRIORITY)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        self.contains(Interest::readable())
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.contains(Interest::writable())
    }

    #[inline]
    pub fn is_priority(&self) -> bool {
        self.contains(Interest::priority())
    }

    /// Returns true if `self` is a superset of `other`.
    #[inline]
    pub fn contains(&self, other: Interest) -> bool {
        (*self & other) == other
    }

    /// Adds all kinds in `other` to `self`.
    #[inline]
    pub fn insert(&mut self, other: Interest) {
        self.0 |= other.0;
    }

    /// Removes all kinds in `other` from `self`.
    #[inline]
    pub fn remove(&mut self, other: Interest) {
        self.0 &= !other.0;
    }
}

impl ops::BitOr for Interest {
    type Output = Interest;

    #[inline]
    fn bitor(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }
}

impl ops::BitOrAssign for Interest {
    #[inline]
    fn bitor_assign(&mut self, other: Interest) {
        self.0 |= other.0;
    }
}

impl ops::BitAnd for Interest {
    type Output = Interest;

    #[inline]
    fn bitand(self, other: Interest) -> Interest {
        Interest(self.0 & other.0)
    }
}

impl ops::Sub for Interest {
    type Output = Interest;

    #[inline]
    fn sub(self, other: Interest) -> Interest {
        Interest(self.0 & !other.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut one = false;
        let flags = [
            (Interest::readable(), "Readable"),
            (Interest::writable(), "Writable"),
            (Interest::priority(), "Priority"),
        ];

        for &(flag, msg) in &flags {
            if self.contains(flag) {
                if one {
                    write!(fmt, " | ")?
                }
                write!(fmt, "{}", msg)?;

                one = true
            }
        }

        if !one {
            fmt.write_str("(empty)")?;
        }

        Ok(())
    }
}

/// A readiness event reported by [`Backend::poll`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Event {
    readiness: Interest,
    token: Token,
}

impl Event {
    pub fn new(readiness: Interest, token: Token) -> Event {
        Event { readiness, token }
    }

    pub fn readiness(&self) -> Interest {
        self.readiness
    }

    pub fn token(&self) -> Token {
        self.token
    }
}

/// A pluggable notification engine.
///
/// Implementations watch raw descriptors for the registered interest and
/// report readiness through `poll`. All engines are level-triggered: a
/// descriptor that stays ready keeps being reported until the condition
/// clears or the interest is removed.
pub(crate) trait Backend {
    /// Start watching `fd` for `interest`, tagging its events with `token`.
    fn register(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()>;

    /// Change the interest set of an already registered descriptor.
    fn reregister(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()>;

    /// Stop watching `fd` entirely.
    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;

    /// Wait for readiness, up to `timeout` (`None` blocks indefinitely).
    /// Events are appended to `events`, which is cleared first.
    fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()>;
}

/// The notification engines a reactor can be built on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Native multiplexed loop backed by `epoll(7)`.
    Epoll,
    /// Portable emulation over `select(2)`, bounded by `FD_SETSIZE`.
    Select,
    /// Generic adapter over `poll(2)`.
    Poll,
}

lazy_static! {
    static ref SELECTED: Mutex<Option<BackendKind>> = Mutex::new(None);
}

/// Pins the process-wide backend choice.
///
/// The first call records `kind`; a later call with a different kind is a
/// configuration error and panics.
pub(crate) fn select_kind(kind: BackendKind) {
    let mut selected = SELECTED.lock();
    match *selected {
        None => *selected = Some(kind),
        Some(prev) if prev == kind => {}
        Some(prev) => panic!(
            "configuration error: backend already selected as {:?}, cannot reselect as {:?}",
            prev, kind
        ),
    }
}

pub(crate) fn new_backend(kind: BackendKind) -> io::Result<Box<dyn Backend>> {
    select_kind(kind);
    match kind {
        BackendKind::Epoll => Ok(Box::new(EpollBackend::new()?)),
        BackendKind::Select => Ok(Box::new(SelectBackend::new())),
        BackendKind::Poll => Ok(Box::new(PollBackend::new())),
    }
}

/*
 *
 * ===== Descriptor helpers =====
 *
 */

pub(crate) fn set_nonblock(fd: libc::c_int) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        cvt(libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK)).map(|_| ())
    }
}

pub(crate) fn set_cloexec(fd: libc::c_int) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        cvt(libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC)).map(|_| ())
    }
}

pub(crate) trait IsMinusOne {
    fn is_minus_one(&self) -> bool;
}

impl IsMinusOne for i32 {
    fn is_minus_one(&self) -> bool {
        *self == -1
    }
}
impl IsMinusOne for isize {
    fn is_minus_one(&self) -> bool {
        *self == -1
    }
}

pub(crate) fn cvt<T: IsMinusOne>(t: T) -> io::Result<T> {
    if t.is_minus_one() {
        Err(io::Error::last_os_error())
    } else {
        Ok(t)
    }
}

/// Converts a poll timeout to whole milliseconds, rounding up so a short
/// positive timeout never becomes a busy-spin zero.
pub(crate) fn millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_secs() * 1_000 + u64::from(d.subsec_millis());
            let ms = if d.subsec_nanos() % 1_000_000 != 0 {
                ms + 1
            } else {
                ms
            };
            if ms > libc::c_int::max_value() as u64 {
                libc::c_int::max_value()
            } else {
                ms as libc::c_int
            }
        }
    }
}

#[test]
fn test_debug_interest() {
    assert_eq!("(empty)", format!("{:?}", Interest::empty()));
    assert_eq!("Readable", format!("{:?}", Interest::readable()));
    assert_eq!("Writable", format!("{:?}", Interest::writable()));
    assert_eq!(
        "Readable | Writable",
        format!("{:?}", Interest::readable() | Interest::writable())
    );
}

#[test]
fn test_interest_ops() {
    let mut interest = Interest::readable();
    interest.insert(Interest::writable());
    assert!(interest.contains(Interest::readable() | Interest::writable()));

    interest.remove(Interest::readable());
    assert!(!interest.is_readable());
    assert!(interest.is_writable());

    assert!((interest - Interest::writable()).is_empty());
}

#[test]
fn test_millis_rounds_up() {
    use std::time::Duration;

    assert_eq!(-1, millis(None));
    assert_eq!(0, millis(Some(Duration::from_millis(0))));
    assert_eq!(1, millis(Some(Duration::from_nanos(1))));
    assert_eq!(2, millis(Some(Duration::from_micros(1_500))));
}
