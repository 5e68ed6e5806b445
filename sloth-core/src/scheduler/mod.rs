//! Single-threaded slow connection scheduler
//!
//! One loop drives every connection of a run. Each tick it:
//!
//! 1. admits at most one new connection, paced by [`RateController`]
//! 2. recomputes elapsed whole seconds since the start
//! 3. rebuilds read/write interest for every open connection
//! 4. tallies connection states and reports them
//! 5. checks the termination conditions, in fixed priority order
//! 6. waits for readiness: not at all while still admitting, otherwise up
//!    to one second but never past the next whole-second boundary
//! 7. dispatches reads and writes in ascending connection order
//! 8. sleeps the pacing delay while still admitting
//!
//! Connections live in an arena indexed by id; the id is also the socket's
//! key in the [`ConnectionGroup`].

mod admission;

pub use admission::RateController;

use crate::config::RunConfig;
use crate::connection::{IoOutcome, SlowConnection};
use crate::followup::FollowUpSource;
use crate::report::{ReportSink, StatusSample};
use crate::request::RequestTemplate;
use crate::stats::{ConnectionCounts, Outcome, RunSummary};
use crate::Result;
use sloth_transport::{ConnectionGroup, Event};
use std::time::{Duration, Instant};

/// Longest single readiness wait once admission is over
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Heartbeat period in elapsed seconds
const HEARTBEAT_SECS: u64 = 5;

const RECV_BUFFER_SIZE: usize = 4096;

/// Progress of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    /// Connections the run aims for; shrinks to `admitted` on init failure
    pub target_connections: usize,
    /// Connections admitted so far, failed ones excluded
    pub admitted: usize,
    pub elapsed_secs: u64,
    pub counts: ConnectionCounts,
    pub outcome: Option<Outcome>,
}

impl TestRun {
    fn new(target_connections: usize) -> Self {
        Self {
            target_connections,
            admitted: 0,
            elapsed_secs: 0,
            counts: ConnectionCounts::default(),
            outcome: None,
        }
    }

    pub fn is_admitting(&self) -> bool {
        self.admitted < self.target_connections
    }
}

/// Drives a set of slow connections against one target
pub struct Scheduler<G: ConnectionGroup> {
    group: G,
    config: RunConfig,
    template: RequestTemplate,
    followups: FollowUpSource,
    rate: RateController,
    connections: Vec<SlowConnection>,
    run: TestRun,
    recv_buf: Vec<u8>,
}

impl<G: ConnectionGroup> Scheduler<G> {
    pub fn new(
        group: G,
        config: RunConfig,
        template: RequestTemplate,
        followups: FollowUpSource,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            group,
            rate: RateController::new(config.rate),
            run: TestRun::new(config.connections),
            connections: Vec::with_capacity(config.connections),
            config,
            template,
            followups,
            recv_buf: vec![0u8; RECV_BUFFER_SIZE],
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn test_run(&self) -> &TestRun {
        &self.run
    }

    pub fn connections(&self) -> &[SlowConnection] {
        &self.connections
    }

    pub fn group(&self) -> &G {
        &self.group
    }

    /// Run until a termination condition holds, then release every socket
    pub fn run<S: ReportSink + ?Sized>(&mut self, sink: &mut S) -> RunSummary {
        let started = Instant::now();
        let mut sampled_sec: Option<u64> = None;
        let mut heartbeat_sec: Option<u64> = None;

        tracing::info!(
            "starting run: {} connections at {}/s for {}s, follow-up every {}s",
            self.config.connections,
            self.config.rate,
            self.config.duration_secs(),
            self.config.interval_secs()
        );

        let outcome = loop {
            if self.rate.may_admit(Instant::now(), self.run.admitted, self.run.target_connections) {
                self.admit();
            }

            self.run.elapsed_secs = self.run.elapsed_secs.max(started.elapsed().as_secs());
            let elapsed = self.run.elapsed_secs;

            self.plan_interest(elapsed);

            self.run.counts = ConnectionCounts::tally(&self.connections);
            let sample = StatusSample { elapsed_secs: elapsed, counts: self.run.counts };
            if sampled_sec != Some(elapsed) {
                sampled_sec = Some(elapsed);
                sink.on_sample(&sample);
            }
            if elapsed % HEARTBEAT_SECS == 0 && heartbeat_sec != Some(elapsed) {
                heartbeat_sec = Some(elapsed);
                sink.on_heartbeat(&sample);
            }

            if let Some(outcome) = self.check_termination() {
                break outcome;
            }

            let admitting = self.run.is_admitting();
            let timeout = if admitting {
                Duration::ZERO
            } else {
                idle_timeout(started.elapsed())
            };

            let events = match self.group.wait(timeout) {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!("readiness wait failed: {}", e);
                    break Outcome::UnexpectedError;
                }
            };
            self.dispatch(events);

            if admitting {
                let delay = self.rate.pacing_delay(Instant::now());
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
        };

        self.finish(outcome, sink)
    }

    fn admit(&mut self) {
        let now = Instant::now();
        let id = self.connections.len();
        let mut conn =
            SlowConnection::new(id, self.template.len(), self.config.followup_budget(), now);

        match conn.open(&mut self.group) {
            Ok(()) => {
                self.run.admitted += 1;
                self.rate.on_admitted(now);
                tracing::debug!(
                    "connection {}: connecting ({} of {})",
                    id,
                    self.run.admitted,
                    self.run.target_connections
                );
            }
            Err(e) => {
                tracing::error!(
                    "unable to initialize connection {}: {}; stopping at {} connections",
                    id,
                    e,
                    self.run.admitted
                );
                self.run.target_connections = self.run.admitted;
            }
        }
        self.connections.push(conn);
    }

    fn plan_interest(&mut self, elapsed: u64) {
        let interval = self.config.interval_secs();
        let now = Instant::now();
        for conn in self.connections.iter_mut() {
            let Some(interest) = conn.plan_tick(elapsed, interval) else {
                continue;
            };
            if let Err(e) = self.group.set_interest(conn.id(), interest) {
                tracing::debug!("connection {}: cannot update interest: {}", conn.id(), e);
                conn.close(&mut self.group, now);
            }
        }
    }

    /// Termination conditions in priority order
    fn check_termination(&self) -> Option<Outcome> {
        let elapsed = self.run.elapsed_secs;
        let counts = &self.run.counts;

        if elapsed > self.config.duration_secs() {
            return Some(Outcome::TimeLimit);
        }
        if counts.open() == 0 {
            return Some(Outcome::AllClosed);
        }
        if elapsed > self.config.grace_secs() && counts.established == 0 {
            return Some(if counts.connecting > 0 && counts.closed == 0 {
                Outcome::HostUnreachable
            } else {
                Outcome::ConnectionRefused
            });
        }
        None
    }

    fn dispatch(&mut self, mut events: Vec<Event>) {
        events.sort_unstable_by_key(|ev| ev.id);
        let now = Instant::now();
        let max_fragment_len = self.config.max_fragment_len;

        for event in events {
            let Some(conn) = self.connections.get_mut(event.id) else {
                tracing::warn!("readiness for unknown connection {}", event.id);
                continue;
            };

            if event.readable
                && conn.on_readable(&mut self.group, &mut self.recv_buf, now) == IoOutcome::Closed
            {
                continue;
            }

            if event.writable {
                if conn.template_remaining() > 0 {
                    conn.send_template(&mut self.group, self.template.as_bytes(), now);
                } else if conn.followup_pending() {
                    let fragment = self.followups.generate(max_fragment_len);
                    conn.send_followup(&mut self.group, &fragment, now);
                }
            }
        }
    }

    fn finish<S: ReportSink + ?Sized>(&mut self, outcome: Outcome, sink: &mut S) -> RunSummary {
        let now = Instant::now();
        self.run.outcome = Some(outcome);
        self.run.counts = ConnectionCounts::tally(&self.connections);

        let summary = RunSummary::collect(
            &self.connections,
            outcome,
            self.run.elapsed_secs,
            self.run.target_connections,
            now,
        );
        self.group.close_all();

        tracing::info!("run finished after {}s: {}", summary.elapsed_secs, outcome);
        sink.on_finish(&summary);
        summary
    }
}

/// Wait budget up to the next whole second of `elapsed`
///
/// Rounded up to whole milliseconds so millisecond-resolution backends do
/// not wake just short of the boundary.
fn idle_timeout(elapsed: Duration) -> Duration {
    let next_second = Duration::from_secs(elapsed.as_secs() + 1);
    let remaining = IDLE_WAIT.min(next_second - elapsed);
    Duration::from_millis(remaining.as_micros().div_ceil(1000) as u64)
}
