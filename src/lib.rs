//! # Callback-driven nonblocking I/O
//!
//! A reactor that multiplexes many socket-like descriptors, timers, and
//! idle tasks from a single thread of control. Descriptors are wrapped in
//! buffered [`Channel`]s; a caller-supplied [`Handler`] is invoked as
//! events occur. Buffering, flow control, and backend selection stay out
//! of the caller's way.
//!
//! # Examples
//! __Echo server__
//! ```rust,no_run
//! use std::net::TcpListener;
//! use std::rc::Rc;
//! use io_events::{Channel, ChannelOptions, Handler, Reactor, State};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn connection(&self, channel: &Channel) {
//!         // The accepted channel inherits this handler.
//!         channel.accept().expect("accept");
//!     }
//!
//!     fn input(&self, channel: &Channel) {
//!         while let Some(mut line) = channel.get() {
//!             line.extend_from_slice(b"\n");
//!             channel.write(&line).expect("write");
//!         }
//!         if channel.state() == State::Eof {
//!             channel.close();
//!         }
//!     }
//!
//!     fn write_error(&self, channel: &Channel, error: std::io::Error) {
//!         eprintln!("write error on {:?}: {}", channel, error);
//!         channel.forceclose();
//!     }
//! }
//!
//! fn main() -> std::io::Result<()> {
//!     let reactor = Reactor::new()?;
//!     let listener = TcpListener::bind("127.0.0.1:8080")?;
//!     let channel = Channel::wrap(&reactor, listener, Rc::new(Echo), ChannelOptions::default())?;
//!     channel.listener(true);
//!     reactor.run();
//!     Ok(())
//! }
//! ```
//! __Timers__
//! ```rust,no_run
//! use std::time::Duration;
//! use io_events::{Reactor, Timer, TimerSpec};
//!
//! fn main() -> std::io::Result<()> {
//!     let reactor = Reactor::new()?;
//!     let timer = Timer::new(
//!         &reactor,
//!         TimerSpec::after(Duration::from_secs(2)).interval(Duration::from_secs(5)),
//!         |reactor| println!("tick on {:?}", reactor),
//!     );
//!     reactor.run();
//!     timer.cancel();
//!     Ok(())
//! }
//! ```

#![warn(
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![allow(
    clippy::type_complexity,
    clippy::needless_doctest_main,
    clippy::new_without_default
)]

pub mod backend;
pub mod buffer;
pub mod channel;
pub mod handler;
pub mod reactor;
pub mod timer;

#[doc(inline)]
pub use crate::backend::BackendKind;
#[doc(inline)]
pub use crate::channel::{Channel, ChannelOptions, State};
#[doc(inline)]
pub use crate::handler::Handler;
#[doc(inline)]
pub use crate::reactor::{Config, Reactor};
#[doc(inline)]
pub use crate::timer::{Idle, IdleSpec, Timer, TimerSpec};
