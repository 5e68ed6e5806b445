//! Run configuration for the slow connection scheduler

use crate::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which part of the request is delivered slowly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AttackMode {
    /// Header block never terminated; follow-ups are extra header lines
    #[default]
    Headers,
    /// Headers complete, body trickles in as url-encoded parameters
    Body,
}

impl AttackMode {
    /// Verb used when the profile does not name one
    pub fn default_verb(&self) -> &'static str {
        match self {
            AttackMode::Headers => "GET",
            AttackMode::Body => "POST",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttackMode::Headers => "headers",
            AttackMode::Body => "body",
        }
    }
}

impl std::fmt::Display for AttackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters the scheduler needs for one run
///
/// All durations are counted in whole seconds by the scheduler; sub-second
/// parts are rejected by [`RunConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Target number of concurrent connections
    pub connections: usize,
    /// New connections admitted per second
    pub rate: u32,
    /// Test length
    pub duration: Duration,
    /// Gap between follow-up fragments on one connection
    pub followup_interval: Duration,
    /// How long to wait for a first established connection before giving up
    pub liveness_grace: Duration,
    /// Upper bound on the length of a follow-up fragment's random parts
    pub max_fragment_len: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            connections: 50,
            rate: 50,
            duration: Duration::from_secs(240),
            followup_interval: Duration::from_secs(10),
            liveness_grace: Duration::from_secs(10),
            max_fragment_len: 24,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connections == 0 {
            return Err(Error::Config("connection count must be > 0".to_string()));
        }
        if self.rate == 0 {
            return Err(Error::Config("connection rate must be > 0".to_string()));
        }
        for (name, d) in [
            ("duration", self.duration),
            ("follow-up interval", self.followup_interval),
            ("liveness grace", self.liveness_grace),
        ] {
            if d.as_secs() == 0 || d.subsec_nanos() != 0 {
                return Err(Error::Config(format!(
                    "{name} must be a whole number of seconds >= 1s, got {d:?}"
                )));
            }
        }
        if self.max_fragment_len < 2 {
            return Err(Error::Config("max fragment length must be >= 2".to_string()));
        }
        Ok(())
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration.as_secs()
    }

    pub fn interval_secs(&self) -> u64 {
        self.followup_interval.as_secs()
    }

    pub fn grace_secs(&self) -> u64 {
        self.liveness_grace.as_secs()
    }

    /// Follow-up fragments each connection may send over the whole run
    pub fn followup_budget(&self) -> u32 {
        match self.interval_secs() {
            0 => 0,
            interval => (self.duration_secs() / interval).min(u32::MAX as u64) as u32,
        }
    }
}
