//! Sloth Transport Layer
//!
//! This crate provides the socket plumbing for the sloth slow HTTP tester:
//! non-blocking TCP streams whose readiness is multiplexed through a single
//! poll instance, so one thread can keep thousands of half-finished requests
//! open at the same time.
//!
//! ## I/O Multiplexer Selection
//!
//! The multiplexer backend can be selected at runtime:
//! - `Epoll`: Linux-only, default, scales to large connection counts
//! - `Poll`: Linux-only portable fallback, rebuilds the fd list each wait
//! - `Mio`: every other platform (kqueue on macOS/BSD)
//!
//! ## Connection Group API
//!
//! A [`ConnectionGroup`] owns every socket of a test run. Connections are
//! addressed by the index the caller assigns when opening them, and a single
//! `wait()` call reports readiness for the whole group.
//!
//! ```rust,no_run
//! use sloth_transport::{ConnectionGroup, Interest, TcpConnectionGroup};
//! use std::net::SocketAddr;
//! use std::time::Duration;
//!
//! let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
//! let mut group = TcpConnectionGroup::new(vec![addr]).unwrap();
//!
//! group.open(0).unwrap();
//! group.set_interest(0, Interest::BOTH).unwrap();
//!
//! for event in group.wait(Duration::from_millis(100)).unwrap() {
//!     if event.writable {
//!         let _ = group.send(event.id, b"GET / HTTP/1.1\r\n");
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use std::time::Duration;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transport layer error types
#[derive(Debug)]
pub enum Error {
    /// I/O errors from the socket or multiplexer
    Io(io::Error),

    /// Connection establishment errors
    Connection(String),

    /// Configuration errors
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Connection(msg) => write!(f, "Connection error: {msg}"),
            Error::Config(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<nix::Error> for Error {
    fn from(err: nix::Error) -> Self {
        Error::Io(io::Error::from(err))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// A set of sockets addressed by caller-chosen indices and polled together
///
/// Every method that touches a single connection takes its index. Indices
/// that were never opened, or that have been closed, behave like a closed
/// socket: `send`/`recv` fail with `NotConnected` and `set_interest` is a
/// no-op.
///
/// `send` and `recv` surface raw `io::Result`s so the caller can tell a
/// would-block apart from a hard failure.
pub trait ConnectionGroup {
    /// Start a non-blocking connect for connection `id`
    ///
    /// Returns as soon as the connect has been issued. The socket is watched
    /// for read readiness from the start, which is how refused connects and
    /// peer resets surface.
    fn open(&mut self, id: usize) -> Result<()>;

    /// Replace the readiness interest of an open connection
    fn set_interest(&mut self, id: usize, interest: Interest) -> Result<()>;

    /// One non-blocking write; may complete partially
    fn send(&mut self, id: usize, data: &[u8]) -> io::Result<usize>;

    /// One non-blocking read
    fn recv(&mut self, id: usize, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the socket of connection `id`
    fn close(&mut self, id: usize);

    /// Block until at least one socket is ready or `timeout` elapses
    ///
    /// An interrupted wait yields an empty ready set rather than an error.
    fn wait(&mut self, timeout: Duration) -> Result<Vec<Event>>;

    /// Number of sockets currently open
    fn open_count(&self) -> usize;

    /// Release every open socket
    fn close_all(&mut self);
}

pub mod mux;
pub mod tcp;

pub use mux::{Event, Interest, Multiplexer, MultiplexerType};
pub use tcp::TcpConnectionGroup;
