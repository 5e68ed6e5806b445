//! Connection admission pacing
//!
//! Admits at most one connection per tick and spaces admissions at least
//! `1s / rate` apart, so no one-second window sees more than `rate` new
//! connections. Once the admitted count reaches the target, admission stops
//! for good.

use std::time::{Duration, Instant};

/// Fixed-rate gate for new connections
#[derive(Debug, Clone)]
pub struct RateController {
    rate: u32,
    inter_admission: Duration,
    next_admission: Option<Instant>,
    exhausted: bool,
}

impl RateController {
    /// `rate` is connections per second and must be at least 1
    pub fn new(rate: u32) -> Self {
        let rate = rate.max(1);
        Self {
            rate,
            inter_admission: Duration::from_secs(1) / rate,
            next_admission: None,
            exhausted: false,
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn inter_admission(&self) -> Duration {
        self.inter_admission
    }

    /// Whether one more connection may be admitted at `now`
    pub fn may_admit(&mut self, now: Instant, admitted: usize, target: usize) -> bool {
        if self.exhausted {
            return false;
        }
        if admitted >= target {
            self.exhausted = true;
            return false;
        }
        self.next_admission.map_or(true, |next| now >= next)
    }

    /// Record an admission at `now`
    pub fn on_admitted(&mut self, now: Instant) {
        self.next_admission = Some(now + self.inter_admission);
    }

    /// Admission has stopped permanently
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Time to sleep before the next admission is allowed
    pub fn pacing_delay(&self, now: Instant) -> Duration {
        self.next_admission
            .map_or(Duration::ZERO, |next| next.saturating_duration_since(now))
    }
}
