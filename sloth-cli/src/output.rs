//! Run reporting: log lines, CSV samples and the HTML chart page

pub mod html;

use anyhow::{Context, Result};
use serde::Serialize;
use sloth_core::{ReportSink, RunSummary, StatusSample};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub use html::HtmlReporter;

/// Parameters logged when a run starts and again when it ends
#[derive(Debug, Clone, Serialize)]
pub struct TestParameters {
    pub name: String,
    pub mode: String,
    pub url: String,
    pub verb: String,
    pub connections: usize,
    pub content_length: usize,
    pub followup_interval_secs: u64,
    pub rate: u32,
    pub duration_secs: u64,
}

impl TestParameters {
    pub fn log(&self) {
        tracing::info!("=== Test Parameters ===");
        tracing::info!("Name: {}", self.name);
        tracing::info!("Mode: slow {}", self.mode);
        tracing::info!("Connections: {}", self.connections);
        tracing::info!("URL: {}", self.url);
        tracing::info!("Verb: {}", self.verb);
        if self.mode == "body" {
            tracing::info!("Content-Length: {}", self.content_length);
        }
        tracing::info!("Follow-up interval: {}s", self.followup_interval_secs);
        tracing::info!("Connections per second: {}", self.rate);
        tracing::info!("Test duration: {}s", self.duration_secs);
        tracing::info!("=======================");
    }
}

/// Human-readable heartbeat and summary through `tracing`
#[derive(Debug, Default)]
pub struct LogReporter;

impl ReportSink for LogReporter {
    fn on_heartbeat(&mut self, sample: &StatusSample) {
        let c = &sample.counts;
        tracing::info!(
            "slow HTTP test status on {}th second: initializing {}, pending {}, connected {}, error {}, closed {}",
            sample.elapsed_secs,
            c.initializing,
            c.connecting,
            c.connected,
            c.errored,
            c.closed
        );
    }

    fn on_finish(&mut self, summary: &RunSummary) {
        let c = &summary.counts;
        tracing::info!("=== Test Results ===");
        tracing::info!("Exit status: {}", summary.outcome);
        tracing::info!("Elapsed: {}s", summary.elapsed_secs);
        tracing::info!(
            "Connections: {} connected, {} pending, {} closed, {} error (target {})",
            c.connected,
            c.connecting,
            c.closed,
            c.errored,
            summary.target_connections
        );
        tracing::info!("Average connect time: {:.2} ms", summary.avg_connect_ms());
        tracing::info!("Average connection lifetime: {:.2} ms", summary.avg_lifetime_ms());
        if summary.outcome.is_vulnerable() {
            tracing::warn!("Connections were still held open when the test ended");
        }
        tracing::info!("====================");
    }
}

/// One CSV row per elapsed second
#[derive(Debug, Serialize)]
struct CsvRow {
    seconds: u64,
    error: usize,
    closed: usize,
    pending: usize,
    connected: usize,
}

impl From<&StatusSample> for CsvRow {
    fn from(sample: &StatusSample) -> Self {
        Self {
            seconds: sample.elapsed_secs,
            error: sample.counts.errored,
            closed: sample.counts.closed,
            pending: sample.counts.connecting,
            connected: sample.counts.connected,
        }
    }
}

/// Writes `seconds,error,closed,pending,connected` rows as samples arrive
pub struct CsvReporter<W: Write> {
    writer: csv::Writer<W>,
    failed: bool,
}

impl CsvReporter<File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
        Ok(Self::new(file))
    }
}

impl<W: Write> CsvReporter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: csv::Writer::from_writer(writer), failed: false }
    }

    /// Flush and hand back the underlying writer
    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner().map_err(|e| anyhow::anyhow!("Failed to flush CSV: {}", e.error()))
    }

    fn write_row(&mut self, row: CsvRow) -> csv::Result<()> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write> ReportSink for CsvReporter<W> {
    fn on_sample(&mut self, sample: &StatusSample) {
        if self.failed {
            return;
        }
        if let Err(e) = self.write_row(sample.into()) {
            tracing::error!("CSV output disabled after write error: {}", e);
            self.failed = true;
        }
    }
}

/// Forwards every report to each configured reporter
#[derive(Default)]
pub struct Reporters {
    sinks: Vec<Box<dyn ReportSink>>,
}

impl Reporters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<S: ReportSink + 'static>(&mut self, sink: S) {
        self.sinks.push(Box::new(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ReportSink for Reporters {
    fn on_sample(&mut self, sample: &StatusSample) {
        self.sinks.iter_mut().for_each(|s| s.on_sample(sample));
    }

    fn on_heartbeat(&mut self, sample: &StatusSample) {
        self.sinks.iter_mut().for_each(|s| s.on_heartbeat(sample));
    }

    fn on_finish(&mut self, summary: &RunSummary) {
        self.sinks.iter_mut().for_each(|s| s.on_finish(summary));
    }
}

/// Reporters for a profile: always the log, plus CSV and HTML when configured
pub fn build_reporters(
    params: &TestParameters,
    csv: Option<&PathBuf>,
    html: Option<&PathBuf>,
) -> Result<Reporters> {
    let mut reporters = Reporters::new();
    reporters.push(LogReporter);
    if let Some(path) = csv {
        reporters.push(CsvReporter::create(path)?);
        tracing::info!("Writing per-second counts to: {}", path.display());
    }
    if let Some(path) = html {
        reporters.push(HtmlReporter::new(path.clone(), params.clone()));
    }
    Ok(reporters)
}
