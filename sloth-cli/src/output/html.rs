//! HTML report with a connection-state chart

use super::TestParameters;
use anyhow::{Context, Result};
use sloth_core::{ReportSink, RunSummary, StatusSample};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Collects samples during the run and renders the page when it ends
pub struct HtmlReporter {
    path: PathBuf,
    params: TestParameters,
    samples: Vec<StatusSample>,
}

impl HtmlReporter {
    pub fn new(path: PathBuf, params: TestParameters) -> Self {
        Self { path, params, samples: Vec::new() }
    }

    pub fn write(&self, summary: &RunSummary) -> Result<()> {
        let html = render(&self.params, &self.samples, summary);
        let mut file = File::create(&self.path)
            .with_context(|| format!("Failed to create HTML report: {}", self.path.display()))?;
        file.write_all(html.as_bytes())?;
        Ok(())
    }
}

impl ReportSink for HtmlReporter {
    fn on_sample(&mut self, sample: &StatusSample) {
        self.samples.push(*sample);
    }

    fn on_finish(&mut self, summary: &RunSummary) {
        match self.write(summary) {
            Ok(()) => tracing::info!("HTML report written to: {}", self.path.display()),
            Err(e) => tracing::error!("{:#}", e),
        }
    }
}

fn series<F: Fn(&StatusSample) -> usize>(samples: &[StatusSample], f: F) -> String {
    samples.iter().map(|s| f(s).to_string()).collect::<Vec<_>>().join(", ")
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

/// Render the complete page
pub fn render(params: &TestParameters, samples: &[StatusSample], summary: &RunSummary) -> String {
    let labels = samples.iter().map(|s| s.elapsed_secs.to_string()).collect::<Vec<_>>().join(", ");

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Sloth Report: {name}</title>
    <script src="https://cdn.jsdelivr.net/npm/chart.js@4.4.0/dist/chart.umd.min.js"></script>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            margin: 0;
            padding: 20px;
            background: #f5f5f5;
        }}
        .container {{
            max-width: 1200px;
            margin: 0 auto;
            background: white;
            padding: 30px;
            border-radius: 8px;
            box-shadow: 0 2px 4px rgba(0,0,0,0.1);
        }}
        h1 {{ color: #333; border-bottom: 3px solid #6f42c1; padding-bottom: 10px; }}
        table {{ border-collapse: collapse; margin: 20px 0; }}
        th, td {{ padding: 8px 16px; text-align: left; border-bottom: 1px solid #ddd; }}
        th {{ background: #f8f9fa; font-weight: 600; }}
        .outcome {{ font-size: 20px; font-weight: bold; color: {outcome_color}; }}
        .chart-container {{ position: relative; height: 420px; margin: 30px 0; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Slow {mode} test: {name}</h1>
        <p class="outcome">{outcome} after {elapsed}s</p>
        <table>
            <tr><th>URL</th><td>{url}</td></tr>
            <tr><th>Verb</th><td>{verb}</td></tr>
            <tr><th>Connections</th><td>{connections} (reached {target})</td></tr>
            <tr><th>Rate</th><td>{rate} connections/s</td></tr>
            <tr><th>Follow-up interval</th><td>{interval}s</td></tr>
            <tr><th>Duration</th><td>{duration}s</td></tr>
            <tr><th>Average connect time</th><td>{avg_connect:.2} ms</td></tr>
            <tr><th>Average lifetime</th><td>{avg_lifetime:.2} ms</td></tr>
        </table>
        <div class="chart-container">
            <canvas id="connectionChart"></canvas>
        </div>
    </div>

    <script>
        new Chart(document.getElementById('connectionChart'), {{
            type: 'line',
            data: {{
                labels: [{labels}],
                datasets: [
                    {{ label: 'connected', data: [{connected}], borderColor: 'rgba(40, 167, 69, 1)', fill: false }},
                    {{ label: 'pending', data: [{pending}], borderColor: 'rgba(255, 193, 7, 1)', fill: false }},
                    {{ label: 'closed', data: [{closed}], borderColor: 'rgba(220, 53, 69, 1)', fill: false }},
                    {{ label: 'error', data: [{error}], borderColor: 'rgba(108, 117, 125, 1)', fill: false }}
                ]
            }},
            options: {{
                responsive: true,
                maintainAspectRatio: false,
                scales: {{
                    x: {{ title: {{ display: true, text: 'Seconds' }} }},
                    y: {{ beginAtZero: true, title: {{ display: true, text: 'Connections' }} }}
                }}
            }}
        }});
    </script>
</body>
</html>"#,
        name = escape(&params.name),
        mode = params.mode,
        outcome = summary.outcome,
        outcome_color = if summary.outcome.is_vulnerable() { "#dc3545" } else { "#28a745" },
        elapsed = summary.elapsed_secs,
        url = escape(&params.url),
        verb = escape(&params.verb),
        connections = params.connections,
        target = summary.target_connections,
        rate = params.rate,
        interval = params.followup_interval_secs,
        duration = params.duration_secs,
        avg_connect = summary.avg_connect_ms(),
        avg_lifetime = summary.avg_lifetime_ms(),
        labels = labels,
        connected = series(samples, |s| s.counts.connected),
        pending = series(samples, |s| s.counts.connecting),
        closed = series(samples, |s| s.counts.closed),
        error = series(samples, |s| s.counts.errored),
    )
}
