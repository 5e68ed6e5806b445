use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use schemars::schema_for;
use sloth_cli::completions;
use sloth_cli::config::ProfileConfig;
use sloth_cli::output::{build_reporters, TestParameters};
use sloth_core::{
    component_rng, components, pick_user_agent, FollowUpSource, ProcessLimits,
    RequestTemplate, Scheduler,
};
use sloth_transport::TcpConnectionGroup;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sloth: slow HTTP denial-of-service resilience tester
///
/// Sloth opens many connections to an HTTP server and sends each request at
/// a crawl, either never finishing the header block or trickling the body,
/// to see whether the server runs out of connection slots first.
///
/// Example usage:
///   sloth run -P profiles/slow-headers.toml
///   sloth run -P profiles/slow-body.toml --set target.url=http://10.0.0.5:8080/form
///   sloth run -P profiles/slow-headers.toml --set pacing.connections=1000 --set experiment.duration=120s
///   sloth completions bash > ~/.local/share/bash-completion/completions/sloth
///
/// See the profiles/ directory for example configurations.
#[derive(Parser)]
#[command(name = "sloth")]
#[command(version, about = "Slow HTTP resilience tester with config-first design", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a slow HTTP test
    Run {
        /// Path to TOML profile configuration file
        #[arg(short = 'P', long, required = true)]
        profile: PathBuf,

        /// Override any configuration value using dot notation (repeatable)
        ///
        /// Examples:
        ///   --set target.url=http://127.0.0.1:8080/
        ///   --set experiment.mode=body
        ///   --set experiment.seed=999
        ///   --set pacing.rate=200
        ///   --set output.csv=/tmp/sloth.csv
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Generate JSON Schema for profile files
    Schema,

    /// List all valid config paths for --set flag (used by shell completions)
    #[command(hide = true)]
    CompletePaths,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Completions { shell } => {
            let bin_name = "sloth";
            if shell == Shell::Bash {
                println!("{}", completions::generate_bash_completion(bin_name));
            } else {
                let mut cmd = Cli::command();
                generate(shell, &mut cmd, bin_name.to_string(), &mut io::stdout());
            }
            Ok(())
        }
        Commands::Schema => {
            let schema = schema_for!(ProfileConfig);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
        Commands::CompletePaths => {
            for path in completions::get_config_paths() {
                println!("{}", path);
            }
            Ok(())
        }
        Commands::Run { profile, set } => run_test(profile, set),
    }
}

fn run_test(profile: PathBuf, set: Vec<String>) -> anyhow::Result<()> {
    tracing::info!("Loading profile: {}", profile.display());
    let config = ProfileConfig::from_file_with_overrides(&profile, &set)?;

    let target = config.target()?;
    let addrs = target.resolve()?;
    tracing::info!("Target {} resolved to {:?}", target, addrs);

    let run_config = config.negotiated_run_config(&mut ProcessLimits)?;

    let seed = config.experiment.seed;
    if let Some(seed) = seed {
        tracing::info!("Seed: {} (reproducible mode)", seed);
    }
    let mode = config.experiment.mode;
    let verb = config.verb();
    let user_agent = pick_user_agent(&mut component_rng(seed, components::USER_AGENT));
    let template =
        RequestTemplate::build(mode, &verb, &target, user_agent, config.payload.content_length);
    let followups = FollowUpSource::new(mode, component_rng(seed, components::FOLLOWUP_TOKENS));

    let params = TestParameters {
        name: config.experiment.name.clone(),
        mode: mode.to_string(),
        url: target.to_string(),
        verb,
        connections: run_config.connections,
        content_length: config.payload.content_length,
        followup_interval_secs: run_config.interval_secs(),
        rate: run_config.rate,
        duration_secs: run_config.duration_secs(),
    };
    params.log();

    let mut reporters =
        build_reporters(&params, config.output.csv.as_ref(), config.output.html.as_ref())?;

    let mux_type = config.multiplexer()?;
    tracing::info!("Multiplexer: {}", mux_type);
    let group = TcpConnectionGroup::with_multiplexer(addrs, mux_type)
        .context("Failed to set up connection group")?;
    let mut scheduler = Scheduler::new(group, run_config, template, followups)?;

    let summary = scheduler.run(&mut reporters);

    params.log();
    println!("Test ended on {}th second, exit status: {}", summary.elapsed_secs, summary.outcome);
    Ok(())
}
