//! Connection tallies, run outcome and the final summary

use crate::connection::{ConnectionState, SlowConnection};
use std::fmt;
use std::time::{Duration, Instant};

/// Per-state connection counts at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionCounts {
    pub initializing: usize,
    pub connecting: usize,
    pub connected: usize,
    pub errored: usize,
    pub closed: usize,
    /// Connections that ever completed a template write, in any state
    pub established: usize,
}

impl ConnectionCounts {
    /// Count every connection by state
    ///
    /// The per-state counts always add up to the number of connections.
    pub fn tally<'a, I>(connections: I) -> Self
    where
        I: IntoIterator<Item = &'a SlowConnection>,
    {
        let mut counts = Self::default();
        for conn in connections {
            match conn.state() {
                ConnectionState::Init => counts.initializing += 1,
                ConnectionState::Connecting => counts.connecting += 1,
                ConnectionState::Connected => counts.connected += 1,
                ConnectionState::Error => counts.errored += 1,
                ConnectionState::Closed => counts.closed += 1,
            }
            if conn.connected_at().is_some() {
                counts.established += 1;
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.initializing + self.connecting + self.connected + self.errored + self.closed
    }

    /// Connections that still hold a socket
    pub fn open(&self) -> usize {
        self.connecting + self.connected
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Duration elapsed with connections still open
    TimeLimit,
    /// Every admitted connection was closed
    AllClosed,
    /// Nothing connected within the grace period and nothing was refused
    HostUnreachable,
    /// Nothing connected within the grace period and connections were closed
    ConnectionRefused,
    /// The multiplexer failed
    UnexpectedError,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::TimeLimit => "Hit test time limit",
            Outcome::AllClosed => "No open connections left",
            Outcome::HostUnreachable => "Cannot establish connection",
            Outcome::ConnectionRefused => "Connection refused",
            Outcome::UnexpectedError => "Unexpected error",
        }
    }

    /// Whether the server held out until the end of the test
    pub fn is_vulnerable(&self) -> bool {
        matches!(self, Outcome::TimeLimit)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Figures reported once a run has ended
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub outcome: Outcome,
    pub elapsed_secs: u64,
    /// Connection target after any init failure shrank it
    pub target_connections: usize,
    pub counts: ConnectionCounts,
    /// Mean time to first template write, over established connections
    pub avg_connect: Duration,
    /// Mean open time, counting still-open connections up to the end
    pub avg_lifetime: Duration,
}

impl RunSummary {
    pub fn collect(
        connections: &[SlowConnection],
        outcome: Outcome,
        elapsed_secs: u64,
        target_connections: usize,
        now: Instant,
    ) -> Self {
        let avg_connect = mean(connections.iter().filter_map(SlowConnection::connect_latency));
        let avg_lifetime = mean(connections.iter().filter_map(|c| c.lifetime(now)));

        Self {
            outcome,
            elapsed_secs,
            target_connections,
            counts: ConnectionCounts::tally(connections),
            avg_connect,
            avg_lifetime,
        }
    }

    pub fn avg_connect_ms(&self) -> f64 {
        self.avg_connect.as_secs_f64() * 1000.0
    }

    pub fn avg_lifetime_ms(&self) -> f64 {
        self.avg_lifetime.as_secs_f64() * 1000.0
    }
}

/// Mean of `samples`, zero when there are none
fn mean(samples: impl Iterator<Item = Duration>) -> Duration {
    let (sum, n) = samples.fold((Duration::ZERO, 0u32), |(sum, n), d| (sum + d, n + 1));
    if n == 0 {
        Duration::ZERO
    } else {
        sum / n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::TimeLimit.to_string(), "Hit test time limit");
        assert_eq!(Outcome::AllClosed.label(), "No open connections left");
        assert_eq!(Outcome::HostUnreachable.label(), "Cannot establish connection");
        assert_eq!(Outcome::ConnectionRefused.label(), "Connection refused");
        assert_eq!(Outcome::UnexpectedError.label(), "Unexpected error");
        assert!(Outcome::TimeLimit.is_vulnerable());
        assert!(!Outcome::AllClosed.is_vulnerable());
    }

    #[test]
    fn test_mean_empty_is_zero() {
        assert_eq!(mean(std::iter::empty()), Duration::ZERO);
        let summary = RunSummary::collect(&[], Outcome::AllClosed, 0, 0, Instant::now());
        assert_eq!(summary.avg_connect_ms(), 0.0);
        assert_eq!(summary.avg_lifetime_ms(), 0.0);
        assert_eq!(summary.counts.total(), 0);
    }

    #[test]
    fn test_mean() {
        let samples = [Duration::from_millis(10), Duration::from_millis(30)];
        assert_eq!(mean(samples.into_iter()), Duration::from_millis(20));
    }

    #[test]
    fn test_tally_fresh_records() {
        let now = Instant::now();
        let conns: Vec<_> = (0..3).map(|i| SlowConnection::new(i, 10, 1, now)).collect();
        let counts = ConnectionCounts::tally(&conns);
        assert_eq!(counts.initializing, 3);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.open(), 0);
        assert_eq!(counts.established, 0);
    }
}
