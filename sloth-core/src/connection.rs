//! Per-socket slow connection state machine
//!
//! A [`SlowConnection`] is the record for one admitted socket. The socket
//! itself lives in the [`ConnectionGroup`] under the same index; the record
//! tracks where the connection is in its lifecycle, how much of the request
//! template is still unsent and how many follow-up fragments it may still
//! trickle out.
//!
//! ```text
//! Init ──open ok──▶ Connecting ──first write > 0──▶ Connected
//!   │                   │                              │
//!   └─open failed─▶ Error  └──eof / hard error──▶ Closed ◀─┘
//! ```
//!
//! Records are never removed: closed and errored connections stay in the
//! scheduler's arena so the final statistics can see them.

use sloth_transport::{ConnectionGroup, Interest};
use std::io;
use std::time::{Duration, Instant};

/// Lifecycle state of a slow connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Record created, no socket yet
    Init,
    /// Non-blocking connect issued
    Connecting,
    /// At least one byte of the request template was written
    Connected,
    /// Peer or local side ended the stream
    Closed,
    /// The socket could not be created
    Error,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Error)
    }

    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// What one non-blocking read or write achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// Bytes moved
    Progress(usize),
    /// Socket not ready; try again on a later tick
    WouldBlock,
    /// The connection was closed as a result of this call
    Closed,
    /// The connection had nothing to do
    Idle,
}

/// One slow connection
#[derive(Debug, Clone)]
pub struct SlowConnection {
    id: usize,
    state: ConnectionState,
    created_at: Instant,
    connected_at: Option<Instant>,
    closed_at: Option<Instant>,
    template_len: usize,
    template_sent: usize,
    followups_left: u32,
    last_followup_sec: Option<u64>,
    followup_pending: bool,
}

impl SlowConnection {
    pub fn new(id: usize, template_len: usize, followup_budget: u32, now: Instant) -> Self {
        Self {
            id,
            state: ConnectionState::Init,
            created_at: now,
            connected_at: None,
            closed_at: None,
            template_len,
            template_sent: 0,
            followups_left: followup_budget,
            last_followup_sec: None,
            followup_pending: false,
        }
    }

    /// Issue the non-blocking connect
    ///
    /// On failure the connection moves to `Error` and the group error is
    /// returned; it never gets a socket.
    pub fn open<G: ConnectionGroup + ?Sized>(&mut self, group: &mut G) -> crate::Result<()> {
        debug_assert_eq!(self.state, ConnectionState::Init);
        match group.open(self.id) {
            Ok(()) => {
                self.state = ConnectionState::Connecting;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Error;
                Err(e.into())
            }
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn connected_at(&self) -> Option<Instant> {
        self.connected_at
    }

    pub fn closed_at(&self) -> Option<Instant> {
        self.closed_at
    }

    /// Request template bytes not yet written
    pub fn template_remaining(&self) -> usize {
        self.template_len - self.template_sent
    }

    pub fn followups_left(&self) -> u32 {
        self.followups_left
    }

    /// Elapsed second at which the last follow-up was scheduled
    pub fn last_followup_sec(&self) -> Option<u64> {
        self.last_followup_sec
    }

    /// A follow-up was scheduled for this tick and not yet written
    pub fn followup_pending(&self) -> bool {
        self.followup_pending
    }

    /// Time from creation until the first successful template write
    pub fn connect_latency(&self) -> Option<Duration> {
        self.connected_at.map(|t| t.saturating_duration_since(self.created_at))
    }

    /// Time from creation until close, or until `now` if still open
    ///
    /// Connections that never got a socket have no lifetime.
    pub fn lifetime(&self, now: Instant) -> Option<Duration> {
        match self.state {
            ConnectionState::Init | ConnectionState::Error => None,
            _ => Some(self.closed_at.unwrap_or(now).saturating_duration_since(self.created_at)),
        }
    }

    /// Whether a follow-up fragment is due at `elapsed_secs`
    pub fn is_followup_due(&self, elapsed_secs: u64, interval_secs: u64) -> bool {
        self.is_open()
            && self.template_remaining() == 0
            && self.followups_left > 0
            && interval_secs > 0
            && elapsed_secs > 0
            && elapsed_secs % interval_secs == 0
            && self.last_followup_sec != Some(elapsed_secs)
    }

    /// Decide this tick's readiness interest
    ///
    /// Open connections are always read-watched. Write interest is added
    /// while template bytes remain, or when a follow-up is due; in that case
    /// the follow-up is claimed for `elapsed_secs` right away, so it is sent
    /// at most once per interval window even if the socket is not writable
    /// this tick.
    pub fn plan_tick(&mut self, elapsed_secs: u64, interval_secs: u64) -> Option<Interest> {
        self.followup_pending = false;
        if !self.is_open() {
            return None;
        }

        if self.template_remaining() > 0 {
            return Some(Interest::BOTH);
        }

        if self.is_followup_due(elapsed_secs, interval_secs) {
            self.last_followup_sec = Some(elapsed_secs);
            self.followup_pending = true;
            return Some(Interest::BOTH);
        }

        Some(Interest::READABLE)
    }

    /// Handle read readiness with one non-blocking receive
    pub fn on_readable<G: ConnectionGroup + ?Sized>(
        &mut self,
        group: &mut G,
        buf: &mut [u8],
        now: Instant,
    ) -> IoOutcome {
        if !self.is_open() {
            return IoOutcome::Idle;
        }

        match group.recv(self.id, buf) {
            Ok(0) => {
                tracing::debug!("connection {}: peer closed connection", self.id);
                self.close(group, now);
                IoOutcome::Closed
            }
            Ok(n) => {
                tracing::debug!(
                    "connection {}: peer replied {:?}",
                    self.id,
                    String::from_utf8_lossy(&buf[..n])
                );
                IoOutcome::Progress(n)
            }
            Err(e) if is_transient(&e) => IoOutcome::WouldBlock,
            Err(e) => {
                tracing::debug!("connection {}: closed on read: {}", self.id, e);
                self.close(group, now);
                IoOutcome::Closed
            }
        }
    }

    /// Continue writing the request template
    ///
    /// The first write that moves any bytes marks the connection connected.
    pub fn send_template<G: ConnectionGroup + ?Sized>(
        &mut self,
        group: &mut G,
        template: &[u8],
        now: Instant,
    ) -> IoOutcome {
        if !self.is_open() || self.template_remaining() == 0 {
            return IoOutcome::Idle;
        }

        match group.send(self.id, &template[self.template_sent..self.template_len]) {
            Ok(0) => {
                tracing::debug!("connection {}: zero-length write of initial request", self.id);
                self.close(group, now);
                IoOutcome::Closed
            }
            Ok(n) => {
                self.template_sent += n;
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Connected;
                    self.connected_at = Some(now);
                }
                tracing::debug!(
                    "connection {}: initial {} of {} bytes sent",
                    self.id,
                    self.template_sent,
                    self.template_len
                );
                IoOutcome::Progress(n)
            }
            Err(e) if is_transient(&e) => IoOutcome::WouldBlock,
            Err(e) => {
                tracing::debug!("connection {}: error sending initial request: {}", self.id, e);
                self.close(group, now);
                IoOutcome::Closed
            }
        }
    }

    /// Write the follow-up fragment claimed by [`plan_tick`](Self::plan_tick)
    ///
    /// A partially written fragment still counts against the budget; the
    /// rest of it is dropped.
    pub fn send_followup<G: ConnectionGroup + ?Sized>(
        &mut self,
        group: &mut G,
        fragment: &[u8],
        now: Instant,
    ) -> IoOutcome {
        if !self.is_open() || !self.followup_pending {
            return IoOutcome::Idle;
        }

        match group.send(self.id, fragment) {
            Ok(0) => {
                self.close(group, now);
                IoOutcome::Closed
            }
            Ok(n) => {
                self.followup_pending = false;
                self.followups_left -= 1;
                tracing::debug!(
                    "connection {}: {} of {} follow-up bytes sent, {} follow-ups left",
                    self.id,
                    n,
                    fragment.len(),
                    self.followups_left
                );
                IoOutcome::Progress(n)
            }
            Err(e) if is_transient(&e) => IoOutcome::WouldBlock,
            Err(e) => {
                tracing::debug!("connection {}: error sending follow-up data: {}", self.id, e);
                self.close(group, now);
                IoOutcome::Closed
            }
        }
    }

    /// Release the socket and mark the connection closed
    pub fn close<G: ConnectionGroup + ?Sized>(&mut self, group: &mut G, now: Instant) {
        if !self.is_open() {
            return;
        }
        group.close(self.id);
        self.state = ConnectionState::Closed;
        self.closed_at = Some(now);
        self.followup_pending = false;
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sloth_transport::Event;
    use std::collections::VecDeque;

    /// Group whose send/recv results are scripted per call
    #[derive(Default)]
    struct Script {
        open_fails: bool,
        sends: VecDeque<io::Result<usize>>,
        recvs: VecDeque<io::Result<usize>>,
        written: Vec<Vec<u8>>,
        closed: Vec<usize>,
        open: usize,
    }

    impl ConnectionGroup for Script {
        fn open(&mut self, _id: usize) -> sloth_transport::Result<()> {
            if self.open_fails {
                return Err(sloth_transport::Error::Io(io::Error::from_raw_os_error(24)));
            }
            self.open += 1;
            Ok(())
        }

        fn set_interest(&mut self, _id: usize, _interest: Interest) -> sloth_transport::Result<()> {
            Ok(())
        }

        fn send(&mut self, _id: usize, data: &[u8]) -> io::Result<usize> {
            let result = self.sends.pop_front().unwrap_or(Ok(data.len()));
            if let Ok(n) = result {
                self.written.push(data[..n.min(data.len())].to_vec());
            }
            result
        }

        fn recv(&mut self, _id: usize, _buf: &mut [u8]) -> io::Result<usize> {
            self.recvs.pop_front().unwrap_or_else(|| Err(io::ErrorKind::WouldBlock.into()))
        }

        fn close(&mut self, id: usize) {
            self.closed.push(id);
            self.open -= 1;
        }

        fn wait(&mut self, _timeout: Duration) -> sloth_transport::Result<Vec<Event>> {
            Ok(Vec::new())
        }

        fn open_count(&self) -> usize {
            self.open
        }

        fn close_all(&mut self) {}
    }

    fn opened(group: &mut Script, template_len: usize, budget: u32) -> SlowConnection {
        let mut conn = SlowConnection::new(0, template_len, budget, Instant::now());
        conn.open(group).unwrap();
        conn
    }

    #[test]
    fn test_open_failure_goes_to_error() {
        let mut group = Script { open_fails: true, ..Default::default() };
        let mut conn = SlowConnection::new(4, 10, 3, Instant::now());
        assert!(conn.open(&mut group).is_err());
        assert_eq!(conn.state(), ConnectionState::Error);
        assert!(conn.lifetime(Instant::now()).is_none());
        assert_eq!(conn.plan_tick(10, 10), None);
    }

    #[test]
    fn test_partial_template_write_connects_and_resumes() {
        let mut group = Script::default();
        group.sends.push_back(Ok(4));
        group.sends.push_back(Err(io::ErrorKind::WouldBlock.into()));
        let template = b"GET / HTTP/1.1\r\n";
        let mut conn = opened(&mut group, template.len(), 3);
        assert_eq!(conn.state(), ConnectionState::Connecting);

        let now = Instant::now();
        assert_eq!(conn.send_template(&mut group, template, now), IoOutcome::Progress(4));
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.connected_at(), Some(now));
        assert!(conn.connected_at().unwrap() >= conn.created_at());
        assert_eq!(conn.template_remaining(), template.len() - 4);

        assert_eq!(conn.send_template(&mut group, template, Instant::now()), IoOutcome::WouldBlock);
        assert_eq!(conn.send_template(&mut group, template, Instant::now()), IoOutcome::Progress(12));
        assert_eq!(conn.template_remaining(), 0);
        assert_eq!(group.written.concat(), template.to_vec());
        // connected timestamp is only taken once
        assert_eq!(conn.connected_at(), Some(now));
    }

    #[test]
    fn test_would_block_while_connecting_keeps_state() {
        let mut group = Script::default();
        group.sends.push_back(Err(io::ErrorKind::WouldBlock.into()));
        let mut conn = opened(&mut group, 8, 1);
        assert_eq!(conn.send_template(&mut group, b"12345678", Instant::now()), IoOutcome::WouldBlock);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.connected_at().is_none());
    }

    #[test]
    fn test_write_error_closes() {
        let mut group = Script::default();
        group.sends.push_back(Err(io::ErrorKind::ConnectionRefused.into()));
        let mut conn = opened(&mut group, 8, 1);
        assert_eq!(conn.send_template(&mut group, b"12345678", Instant::now()), IoOutcome::Closed);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(group.closed, vec![0]);
        assert!(conn.closed_at().unwrap() >= conn.created_at());
        // terminal: nothing is ever sent again
        assert_eq!(conn.send_template(&mut group, b"12345678", Instant::now()), IoOutcome::Idle);
        assert_eq!(conn.plan_tick(5, 5), None);
    }

    #[test]
    fn test_read_eof_and_data() {
        let mut group = Script::default();
        group.recvs.push_back(Ok(5));
        group.recvs.push_back(Err(io::ErrorKind::WouldBlock.into()));
        group.recvs.push_back(Ok(0));
        let mut conn = opened(&mut group, 8, 1);
        let mut buf = [b'x'; 16];

        assert_eq!(conn.on_readable(&mut group, &mut buf, Instant::now()), IoOutcome::Progress(5));
        assert!(conn.is_open());
        assert_eq!(conn.on_readable(&mut group, &mut buf, Instant::now()), IoOutcome::WouldBlock);
        assert_eq!(conn.on_readable(&mut group, &mut buf, Instant::now()), IoOutcome::Closed);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_followup_claimed_once_per_window() {
        let mut group = Script::default();
        let mut conn = opened(&mut group, 4, 2);
        conn.send_template(&mut group, b"abcd", Instant::now());

        // not a multiple of the interval
        assert_eq!(conn.plan_tick(3, 2), Some(Interest::READABLE));
        assert!(!conn.followup_pending());

        assert_eq!(conn.plan_tick(4, 2), Some(Interest::BOTH));
        assert!(conn.followup_pending());
        assert_eq!(conn.send_followup(&mut group, b"X-a: b\r\n", Instant::now()), IoOutcome::Progress(8));
        assert_eq!(conn.followups_left(), 1);

        // same second again: no second fragment
        assert_eq!(conn.plan_tick(4, 2), Some(Interest::READABLE));
        assert_eq!(conn.send_followup(&mut group, b"X-a: b\r\n", Instant::now()), IoOutcome::Idle);

        assert_eq!(conn.plan_tick(6, 2), Some(Interest::BOTH));
        conn.send_followup(&mut group, b"X-c: d\r\n", Instant::now());
        assert_eq!(conn.followups_left(), 0);

        // budget exhausted: connection stays open, no more follow-ups
        assert_eq!(conn.plan_tick(8, 2), Some(Interest::READABLE));
        assert!(conn.is_open());
    }

    #[test]
    fn test_missed_followup_window_is_not_retried() {
        let mut group = Script::default();
        let mut conn = opened(&mut group, 1, 3);
        conn.send_template(&mut group, b"a", Instant::now());

        assert_eq!(conn.plan_tick(5, 5), Some(Interest::BOTH));
        // socket was not writable this tick; the next tick in the same second must not re-claim
        assert_eq!(conn.plan_tick(5, 5), Some(Interest::READABLE));
        assert_eq!(conn.followups_left(), 3);
        assert_eq!(conn.last_followup_sec(), Some(5));
    }

    #[test]
    fn test_no_followup_at_second_zero() {
        let mut group = Script::default();
        let mut conn = opened(&mut group, 1, 3);
        conn.send_template(&mut group, b"a", Instant::now());
        assert!(!conn.is_followup_due(0, 1));
        assert!(conn.is_followup_due(1, 1));
    }

    #[test]
    fn test_template_takes_priority_over_followups() {
        let mut group = Script::default();
        let mut conn = opened(&mut group, 10, 3);
        assert_eq!(conn.plan_tick(10, 10), Some(Interest::BOTH));
        assert!(!conn.followup_pending());
    }
}
