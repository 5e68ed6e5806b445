//! Readiness multiplexing with runtime-selectable backends
//!
//! **Linux:**
//! - `Epoll`: kernel-side registration, default
//! - `Poll`: rebuilds the pollfd list from the registration table on every wait
//!
//! **Non-Linux (macOS, BSD):**
//! - `Mio`: kqueue through mio
//!
//! Registrations are keyed by the caller's connection index. The table is a
//! `Vec` indexed by that id, so register/modify/deregister are O(1) even with
//! tens of thousands of sockets.
//!
//! # Example
//!
//! ```rust,no_run
//! use sloth_transport::mux::{Interest, Multiplexer, MultiplexerType};
//! use std::net::TcpStream;
//! use std::time::Duration;
//!
//! let stream = TcpStream::connect("127.0.0.1:8080").unwrap();
//! stream.set_nonblocking(true).unwrap();
//!
//! let mut mux = Multiplexer::new(MultiplexerType::default()).unwrap();
//! mux.register_fd(&stream, 0, Interest::BOTH).unwrap();
//!
//! for event in mux.wait(Some(Duration::from_millis(100))).unwrap() {
//!     println!("conn {} ready: read={}, write={}", event.id, event.readable, event.writable);
//! }
//! ```

use crate::{Error, Result};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

#[cfg(target_os = "linux")]
use nix::poll::{PollFd, PollFlags, PollTimeout};
#[cfg(target_os = "linux")]
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
#[cfg(target_os = "linux")]
use std::os::fd::BorrowedFd;

#[cfg(not(target_os = "linux"))]
use mio::{Events, Interest as MioInterest, Poll, Token};

/// Events fetched per epoll/mio wait; level-triggered, so leftovers show up next wait
const EVENT_BATCH: usize = 1024;

/// Available multiplexer backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplexerType {
    #[cfg(target_os = "linux")]
    Epoll,
    #[cfg(target_os = "linux")]
    Poll,
    #[cfg(not(target_os = "linux"))]
    Mio,
}

#[allow(clippy::derivable_impls)]
impl Default for MultiplexerType {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        {
            MultiplexerType::Epoll
        }
        #[cfg(not(target_os = "linux"))]
        {
            MultiplexerType::Mio
        }
    }
}

impl std::fmt::Display for MultiplexerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(target_os = "linux")]
            MultiplexerType::Epoll => write!(f, "epoll"),
            #[cfg(target_os = "linux")]
            MultiplexerType::Poll => write!(f, "poll"),
            #[cfg(not(target_os = "linux"))]
            MultiplexerType::Mio => write!(f, "mio"),
        }
    }
}

impl std::str::FromStr for MultiplexerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            #[cfg(target_os = "linux")]
            "epoll" => Ok(MultiplexerType::Epoll),
            #[cfg(target_os = "linux")]
            "poll" => Ok(MultiplexerType::Poll),
            #[cfg(not(target_os = "linux"))]
            "mio" => Ok(MultiplexerType::Mio),
            _ => Err(Error::Config(format!("Unknown multiplexer type: {s}"))),
        }
    }
}

/// Readiness a connection wants to be told about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest { readable: true, writable: false };
    pub const BOTH: Interest = Interest { readable: true, writable: true };
}

/// Readiness reported by `wait()`
///
/// Error and hang-up conditions are folded into `readable` so the owner
/// performs a read and observes the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub id: usize,
    pub readable: bool,
    pub writable: bool,
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    fd: RawFd,
    interest: Interest,
}

/// Unified multiplexer over the platform backends
pub struct Multiplexer {
    backend: Backend,
    registrations: Vec<Option<Registration>>,
    registered: usize,
}

enum Backend {
    #[cfg(target_os = "linux")]
    Epoll(EpollBackend),
    #[cfg(target_os = "linux")]
    Poll,
    #[cfg(not(target_os = "linux"))]
    Mio(MioBackend),
}

// =============================================================================
// Epoll Backend (Linux only)
// =============================================================================

#[cfg(target_os = "linux")]
struct EpollBackend {
    epoll: Epoll,
    events: Vec<EpollEvent>,
}

#[cfg(target_os = "linux")]
fn epoll_flags(interest: Interest) -> EpollFlags {
    let mut flags = EpollFlags::empty();
    if interest.readable {
        flags |= EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP;
    }
    if interest.writable {
        flags |= EpollFlags::EPOLLOUT;
    }
    flags
}

#[cfg(target_os = "linux")]
impl EpollBackend {
    fn new() -> Result<Self> {
        Ok(Self {
            epoll: Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?,
            events: vec![EpollEvent::empty(); EVENT_BATCH],
        })
    }

    fn add(&self, fd: RawFd, id: usize, interest: Interest) -> Result<()> {
        let event = EpollEvent::new(epoll_flags(interest), id as u64);
        // SAFETY: the caller keeps the socket open while it is registered
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        self.epoll.add(fd, event)?;
        Ok(())
    }

    fn modify(&self, fd: RawFd, id: usize, interest: Interest) -> Result<()> {
        let mut event = EpollEvent::new(epoll_flags(interest), id as u64);
        // SAFETY: see `add`
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        self.epoll.modify(fd, &mut event)?;
        Ok(())
    }

    fn delete(&self, fd: RawFd) -> Result<()> {
        // SAFETY: see `add`
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        self.epoll.delete(fd)?;
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<Event>> {
        let timeout = match timeout {
            Some(d) => {
                let ms = d.as_millis().min(i32::MAX as u128) as u32;
                EpollTimeout::try_from(ms).unwrap_or(EpollTimeout::NONE)
            }
            None => EpollTimeout::NONE,
        };

        let n = match self.epoll.wait(&mut self.events, timeout) {
            Ok(n) => n,
            Err(nix::Error::EINTR) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(self.events[..n]
            .iter()
            .map(|e| {
                let flags = e.events();
                Event {
                    id: e.data() as usize,
                    readable: flags.intersects(
                        EpollFlags::EPOLLIN
                            | EpollFlags::EPOLLHUP
                            | EpollFlags::EPOLLERR
                            | EpollFlags::EPOLLRDHUP,
                    ),
                    writable: flags.contains(EpollFlags::EPOLLOUT),
                }
            })
            .collect())
    }
}

// =============================================================================
// Poll Backend (Linux only)
// =============================================================================

#[cfg(target_os = "linux")]
fn poll_wait(registrations: &[Option<Registration>], timeout: Option<Duration>) -> Result<Vec<Event>> {
    let mut ids = Vec::new();
    let mut poll_fds = Vec::new();
    for (id, reg) in registrations.iter().enumerate() {
        let Some(reg) = reg else { continue };
        let mut flags = PollFlags::empty();
        if reg.interest.readable {
            flags |= PollFlags::POLLIN;
        }
        if reg.interest.writable {
            flags |= PollFlags::POLLOUT;
        }
        // SAFETY: registered sockets stay open until deregistered
        poll_fds.push(PollFd::new(unsafe { BorrowedFd::borrow_raw(reg.fd) }, flags));
        ids.push(id);
    }

    if poll_fds.is_empty() {
        // Nothing to watch; still honour the timeout so callers don't spin
        if let Some(d) = timeout {
            std::thread::sleep(d);
        }
        return Ok(Vec::new());
    }

    let timeout = match timeout {
        Some(d) => PollTimeout::try_from(d).unwrap_or(PollTimeout::MAX),
        None => PollTimeout::NONE,
    };

    match nix::poll::poll(&mut poll_fds, timeout) {
        Ok(_) => {}
        Err(nix::Error::EINTR) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    Ok(poll_fds
        .iter()
        .zip(ids)
        .filter_map(|(pfd, id)| {
            let revents = pfd.revents()?;
            if revents.is_empty() {
                return None;
            }
            Some(Event {
                id,
                readable: revents
                    .intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR),
                writable: revents.contains(PollFlags::POLLOUT),
            })
        })
        .collect())
}

// =============================================================================
// Mio Backend (Non-Linux)
// =============================================================================

#[cfg(not(target_os = "linux"))]
struct MioBackend {
    poll: Poll,
    events: Events,
}

#[cfg(not(target_os = "linux"))]
fn mio_interest(interest: Interest) -> MioInterest {
    match (interest.readable, interest.writable) {
        (_, false) => MioInterest::READABLE,
        (false, true) => MioInterest::WRITABLE,
        (true, true) => MioInterest::READABLE | MioInterest::WRITABLE,
    }
}

#[cfg(not(target_os = "linux"))]
impl MioBackend {
    fn new() -> Result<Self> {
        Ok(Self { poll: Poll::new()?, events: Events::with_capacity(EVENT_BATCH) })
    }

    fn add(&self, fd: RawFd, id: usize, interest: Interest) -> Result<()> {
        let mut source = mio::unix::SourceFd(&fd);
        self.poll.registry().register(&mut source, Token(id), mio_interest(interest))?;
        Ok(())
    }

    fn modify(&self, fd: RawFd, id: usize, interest: Interest) -> Result<()> {
        let mut source = mio::unix::SourceFd(&fd);
        self.poll.registry().reregister(&mut source, Token(id), mio_interest(interest))?;
        Ok(())
    }

    fn delete(&self, fd: RawFd) -> Result<()> {
        let mut source = mio::unix::SourceFd(&fd);
        self.poll.registry().deregister(&mut source)?;
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<Event>> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }

        Ok(self
            .events
            .iter()
            .map(|e| Event {
                id: e.token().0,
                readable: e.is_readable() || e.is_read_closed() || e.is_error(),
                writable: e.is_writable(),
            })
            .collect())
    }
}

// =============================================================================
// Unified Multiplexer
// =============================================================================

impl Multiplexer {
    /// Create a new multiplexer with the specified backend
    pub fn new(mux_type: MultiplexerType) -> Result<Self> {
        let backend = match mux_type {
            #[cfg(target_os = "linux")]
            MultiplexerType::Epoll => Backend::Epoll(EpollBackend::new()?),
            #[cfg(target_os = "linux")]
            MultiplexerType::Poll => Backend::Poll,
            #[cfg(not(target_os = "linux"))]
            MultiplexerType::Mio => Backend::Mio(MioBackend::new()?),
        };

        Ok(Self { backend, registrations: Vec::new(), registered: 0 })
    }

    /// Get the multiplexer type
    pub fn mux_type(&self) -> MultiplexerType {
        match &self.backend {
            #[cfg(target_os = "linux")]
            Backend::Epoll(_) => MultiplexerType::Epoll,
            #[cfg(target_os = "linux")]
            Backend::Poll => MultiplexerType::Poll,
            #[cfg(not(target_os = "linux"))]
            Backend::Mio(_) => MultiplexerType::Mio,
        }
    }

    /// Register a file descriptor under connection index `id`
    pub fn register(&mut self, fd: RawFd, id: usize, interest: Interest) -> Result<()> {
        if matches!(self.registrations.get(id), Some(Some(_))) {
            return Err(Error::Config(format!("connection {id} is already registered")));
        }

        match &self.backend {
            #[cfg(target_os = "linux")]
            Backend::Epoll(epoll) => epoll.add(fd, id, interest)?,
            #[cfg(target_os = "linux")]
            Backend::Poll => {}
            #[cfg(not(target_os = "linux"))]
            Backend::Mio(mio) => mio.add(fd, id, interest)?,
        }

        if self.registrations.len() <= id {
            self.registrations.resize(id + 1, None);
        }
        self.registrations[id] = Some(Registration { fd, interest });
        self.registered += 1;
        Ok(())
    }

    /// Change the interest of connection `id`; unchanged interest costs no syscall
    pub fn modify(&mut self, id: usize, interest: Interest) -> Result<()> {
        let Some(Some(reg)) = self.registrations.get_mut(id) else {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("connection {id} is not registered"),
            )));
        };
        if reg.interest == interest {
            return Ok(());
        }

        match &self.backend {
            #[cfg(target_os = "linux")]
            Backend::Epoll(epoll) => epoll.modify(reg.fd, id, interest)?,
            #[cfg(target_os = "linux")]
            Backend::Poll => {}
            #[cfg(not(target_os = "linux"))]
            Backend::Mio(mio) => mio.modify(reg.fd, id, interest)?,
        }
        reg.interest = interest;
        Ok(())
    }

    /// Remove connection `id`; must happen before its socket is closed
    pub fn deregister(&mut self, id: usize) -> Result<()> {
        let Some(reg) = self.registrations.get_mut(id).and_then(Option::take) else {
            return Ok(());
        };
        self.registered -= 1;

        match &self.backend {
            #[cfg(target_os = "linux")]
            Backend::Epoll(epoll) => epoll.delete(reg.fd),
            #[cfg(target_os = "linux")]
            Backend::Poll => Ok(()),
            #[cfg(not(target_os = "linux"))]
            Backend::Mio(mio) => mio.delete(reg.fd),
        }
    }

    /// Wait for readiness
    ///
    /// `None` blocks indefinitely. An interrupted wait returns no events.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<Event>> {
        match &mut self.backend {
            #[cfg(target_os = "linux")]
            Backend::Epoll(epoll) => epoll.wait(timeout),
            #[cfg(target_os = "linux")]
            Backend::Poll => poll_wait(&self.registrations, timeout),
            #[cfg(not(target_os = "linux"))]
            Backend::Mio(mio) => mio.wait(timeout),
        }
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.registered
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.registered == 0
    }

    /// Register any socket type that exposes a raw fd
    pub fn register_fd<F: AsRawFd>(&mut self, source: &F, id: usize, interest: Interest) -> Result<()> {
        self.register(source.as_raw_fd(), id, interest)
    }
}
