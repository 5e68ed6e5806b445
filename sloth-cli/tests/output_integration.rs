//! End-to-end runs writing CSV and HTML reports

mod common;

use common::{minimal_profile, scratch_path, start_holding_server, write_profile};
use sloth_cli::config::ProfileConfig;
use sloth_cli::output::{build_reporters, TestParameters};
use sloth_core::{
    component_rng, components, FollowUpSource, Outcome, RequestTemplate, Scheduler,
};
use sloth_transport::TcpConnectionGroup;

#[test]
fn test_short_run_writes_reports() {
    let addr = start_holding_server();
    let (_dir, csv_path) = scratch_path("run.csv");
    let html_path = csv_path.with_extension("html");

    let file = write_profile(&minimal_profile(&format!("http://{addr}/")));
    let overrides = vec![
        "experiment.duration=1s".to_string(),
        "experiment.seed=5".to_string(),
        "pacing.connections=4".to_string(),
        "pacing.followup_interval=1s".to_string(),
        format!("output.csv={}", csv_path.display()),
        format!("output.html={}", html_path.display()),
    ];
    let config = ProfileConfig::from_file_with_overrides(file.path(), &overrides).unwrap();

    let target = config.target().unwrap();
    let run_config = config.run_config();
    let params = TestParameters {
        name: config.experiment.name.clone(),
        mode: config.experiment.mode.to_string(),
        url: target.to_string(),
        verb: config.verb(),
        connections: run_config.connections,
        content_length: config.payload.content_length,
        followup_interval_secs: run_config.interval_secs(),
        rate: run_config.rate,
        duration_secs: run_config.duration_secs(),
    };
    let mut reporters =
        build_reporters(&params, config.output.csv.as_ref(), config.output.html.as_ref()).unwrap();
    assert_eq!(reporters.len(), 3);

    let template = RequestTemplate::build(
        config.experiment.mode,
        &config.verb(),
        &target,
        "sloth-test",
        config.payload.content_length,
    );
    let followups = FollowUpSource::new(
        config.experiment.mode,
        component_rng(config.experiment.seed, components::FOLLOWUP_TOKENS),
    );
    let group = TcpConnectionGroup::new(target.resolve().unwrap()).unwrap();
    let mut scheduler = Scheduler::new(group, run_config, template, followups).unwrap();

    let summary = scheduler.run(&mut reporters);
    drop(reporters);

    assert_eq!(summary.outcome, Outcome::TimeLimit);
    assert_eq!(summary.elapsed_secs, 2);

    let csv = std::fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "seconds,error,closed,pending,connected");
    assert_eq!(lines.len(), 4, "{csv}");
    assert!(lines[1].starts_with("0,"));
    assert_eq!(lines[3], "2,0,0,0,4");

    let html = std::fs::read_to_string(&html_path).unwrap();
    assert!(html.contains("Hit test time limit after 2s"));
    assert!(html.contains("labels: [0, 1, 2]"));
}
