//! Common test utilities for scheduler integration tests
//!
//! Provides a scripted connection group that never touches the network and
//! small loopback servers that either hold or drop every connection.

#![allow(dead_code)]

use nix::errno::Errno;
use sloth_core::{
    component_rng, components, AttackMode, FollowUpSource, RequestTemplate, RunConfig, Target,
};
use sloth_transport::{ConnectionGroup, Event, Interest};
use std::collections::BTreeSet;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// How a scripted connection behaves after its connect was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Connect never completes; the socket never becomes ready
    Pending,
    /// Connect fails; the socket reports a refused error when read
    Refuse,
}

/// Connection group whose sockets follow a per-id script
pub struct ScriptedGroup {
    script: fn(usize) -> Behavior,
    open: BTreeSet<usize>,
    pub opened_total: usize,
    /// Socket creation fails for this id and every later one
    open_fails_from: Option<usize>,
    wait_fails: bool,
}

impl ScriptedGroup {
    pub fn new(script: fn(usize) -> Behavior) -> Self {
        Self { script, open: BTreeSet::new(), opened_total: 0, open_fails_from: None, wait_fails: false }
    }

    pub fn failing_open_from(mut self, id: usize) -> Self {
        self.open_fails_from = Some(id);
        self
    }

    pub fn failing_wait(mut self) -> Self {
        self.wait_fails = true;
        self
    }
}

impl ConnectionGroup for ScriptedGroup {
    fn open(&mut self, id: usize) -> sloth_transport::Result<()> {
        if self.open_fails_from.is_some_and(|from| id >= from) {
            return Err(Errno::EMFILE.into());
        }
        self.open.insert(id);
        self.opened_total += 1;
        Ok(())
    }

    fn set_interest(&mut self, _id: usize, _interest: Interest) -> sloth_transport::Result<()> {
        Ok(())
    }

    fn send(&mut self, _id: usize, _data: &[u8]) -> io::Result<usize> {
        Err(io::ErrorKind::WouldBlock.into())
    }

    fn recv(&mut self, id: usize, _buf: &mut [u8]) -> io::Result<usize> {
        match (self.script)(id) {
            Behavior::Refuse => Err(io::ErrorKind::ConnectionRefused.into()),
            Behavior::Pending => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn close(&mut self, id: usize) {
        self.open.remove(&id);
    }

    fn wait(&mut self, timeout: Duration) -> sloth_transport::Result<Vec<Event>> {
        if self.wait_fails {
            return Err(Errno::EBADF.into());
        }
        let events: Vec<Event> = self
            .open
            .iter()
            .filter(|&&id| (self.script)(id) == Behavior::Refuse)
            .map(|&id| Event { id, readable: true, writable: true })
            .collect();
        if events.is_empty() {
            thread::sleep(timeout);
        }
        Ok(events)
    }

    fn open_count(&self) -> usize {
        self.open.len()
    }

    fn close_all(&mut self) {
        self.open.clear();
    }
}

/// Loopback server that accepts connections and keeps every byte it receives
///
/// Each accepted connection gets its own reader thread; the buffers stay
/// available after the client side closes.
pub struct HoldingServer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Arc<Mutex<Vec<u8>>>>>>,
}

impl HoldingServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let received: Arc<Mutex<Vec<Arc<Mutex<Vec<u8>>>>>> = Arc::default();

        let accepted = received.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let buf: Arc<Mutex<Vec<u8>>> = Arc::default();
                accepted.lock().unwrap().push(buf.clone());
                thread::spawn(move || {
                    let mut chunk = [0u8; 4096];
                    loop {
                        match stream.read(&mut chunk) {
                            Ok(0) | Err(_) => break,
                            Ok(n) => buf.lock().unwrap().extend_from_slice(&chunk[..n]),
                        }
                    }
                });
            }
        });

        Self { addr, received }
    }

    /// Bytes received so far, one entry per accepted connection
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().iter().map(|buf| buf.lock().unwrap().clone()).collect()
    }
}

/// Loopback server that closes every connection right after accepting it
pub fn start_closing_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local addr");
    thread::spawn(move || {
        for stream in listener.incoming() {
            drop(stream);
        }
    });
    addr
}

pub fn header_parts(addr: SocketAddr, seed: u64) -> (RequestTemplate, FollowUpSource) {
    let target = Target::parse(&format!("http://{addr}/")).unwrap();
    let template = RequestTemplate::build(AttackMode::Headers, "GET", &target, "sloth-test", 0);
    let followups =
        FollowUpSource::new(AttackMode::Headers, component_rng(Some(seed), components::FOLLOWUP_TOKENS));
    (template, followups)
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub fn config(connections: usize, duration: u64, interval: u64, grace: u64) -> RunConfig {
    RunConfig {
        connections,
        rate: 50,
        duration: secs(duration),
        followup_interval: secs(interval),
        liveness_grace: secs(grace),
        max_fragment_len: 24,
    }
}
