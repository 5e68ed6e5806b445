//! TCP connection group using non-blocking mio streams

use crate::mux::{Event, Interest, Multiplexer, MultiplexerType};
use crate::{ConnectionGroup, Error, Result};
use mio::net::TcpStream;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Every socket of one test run, sharing a single multiplexer
///
/// Streams live in a `Vec` indexed by connection id. A closed connection
/// leaves a `None` hole behind so ids are never reused.
pub struct TcpConnectionGroup {
    targets: Vec<SocketAddr>,
    mux: Multiplexer,
    streams: Vec<Option<TcpStream>>,
    open: usize,
}

impl TcpConnectionGroup {
    /// Group connecting to the first usable address in `targets`
    pub fn new(targets: Vec<SocketAddr>) -> Result<Self> {
        Self::with_multiplexer(targets, MultiplexerType::default())
    }

    pub fn with_multiplexer(targets: Vec<SocketAddr>, mux_type: MultiplexerType) -> Result<Self> {
        if targets.is_empty() {
            return Err(Error::Config("no target addresses to connect to".to_string()));
        }

        Ok(Self { targets, mux: Multiplexer::new(mux_type)?, streams: Vec::new(), open: 0 })
    }

    /// Non-blocking connect to the first address a socket can be created for
    fn connect_any(&self) -> Result<TcpStream> {
        let mut last_err = None;
        for addr in &self.targets {
            match TcpStream::connect(*addr) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => Error::Io(e),
            None => Error::Connection("no target addresses".to_string()),
        })
    }

    fn stream_mut(&mut self, id: usize) -> io::Result<&mut TcpStream> {
        self.streams
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }

    /// Multiplexer backend in use
    pub fn mux_type(&self) -> MultiplexerType {
        self.mux.mux_type()
    }
}

impl ConnectionGroup for TcpConnectionGroup {
    fn open(&mut self, id: usize) -> Result<()> {
        if matches!(self.streams.get(id), Some(Some(_))) {
            return Err(Error::Connection(format!("connection {id} is already open")));
        }

        let stream = self.connect_any()?;
        self.mux.register_fd(&stream, id, Interest::READABLE)?;

        if self.streams.len() <= id {
            self.streams.resize_with(id + 1, || None);
        }
        self.streams[id] = Some(stream);
        self.open += 1;
        Ok(())
    }

    fn set_interest(&mut self, id: usize, interest: Interest) -> Result<()> {
        if !matches!(self.streams.get(id), Some(Some(_))) {
            return Ok(());
        }
        self.mux.modify(id, interest)
    }

    fn send(&mut self, id: usize, data: &[u8]) -> io::Result<usize> {
        self.stream_mut(id)?.write(data)
    }

    fn recv(&mut self, id: usize, buf: &mut [u8]) -> io::Result<usize> {
        self.stream_mut(id)?.read(buf)
    }

    fn close(&mut self, id: usize) {
        let Some(stream) = self.streams.get_mut(id).and_then(Option::take) else {
            return;
        };
        if let Err(e) = self.mux.deregister(id) {
            tracing::debug!("deregistering socket {} failed: {}", stream.as_raw_fd(), e);
        }
        self.open -= 1;
        // stream dropped here, releasing the descriptor
    }

    fn wait(&mut self, timeout: Duration) -> Result<Vec<Event>> {
        let events = self.mux.wait(Some(timeout))?;
        // A connection closed earlier in the same tick may still be reported
        Ok(events
            .into_iter()
            .filter(|e| matches!(self.streams.get(e.id), Some(Some(_))))
            .collect())
    }

    fn open_count(&self) -> usize {
        self.open
    }

    fn close_all(&mut self) {
        for id in 0..self.streams.len() {
            self.close(id);
        }
    }
}

impl Drop for TcpConnectionGroup {
    fn drop(&mut self) {
        self.close_all();
    }
}
