//! Reporting hooks called by the scheduler

use crate::stats::{ConnectionCounts, RunSummary};

/// Connection counts at one elapsed second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSample {
    pub elapsed_secs: u64,
    pub counts: ConnectionCounts,
}

/// Receives progress from a running scheduler
///
/// `on_sample` is called once per elapsed second, starting at second 0.
/// `on_heartbeat` is called once for every elapsed second that is a multiple
/// of five. `on_finish` is called exactly once, after the run ended.
pub trait ReportSink {
    fn on_sample(&mut self, _sample: &StatusSample) {}

    fn on_heartbeat(&mut self, _sample: &StatusSample) {}

    fn on_finish(&mut self, _summary: &RunSummary) {}
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullSink;

impl ReportSink for NullSink {}

/// Keeps every report in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub samples: Vec<StatusSample>,
    pub heartbeats: Vec<StatusSample>,
    pub summary: Option<RunSummary>,
    pub finishes: usize,
}

impl ReportSink for RecordingSink {
    fn on_sample(&mut self, sample: &StatusSample) {
        self.samples.push(*sample);
    }

    fn on_heartbeat(&mut self, sample: &StatusSample) {
        self.heartbeats.push(*sample);
    }

    fn on_finish(&mut self, summary: &RunSummary) {
        self.finishes += 1;
        self.summary = Some(summary.clone());
    }
}

impl<S: ReportSink + ?Sized> ReportSink for Box<S> {
    fn on_sample(&mut self, sample: &StatusSample) {
        (**self).on_sample(sample)
    }

    fn on_heartbeat(&mut self, sample: &StatusSample) {
        (**self).on_heartbeat(sample)
    }

    fn on_finish(&mut self, summary: &RunSummary) {
        (**self).on_finish(summary)
    }
}
