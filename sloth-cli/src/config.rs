//! Profile configuration for sloth
//!
//! A profile is a TOML file describing one slow HTTP test. Any value can be
//! overridden from the command line with `--set dotted.path=value`.

use anyhow::{bail, Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sloth_core::{negotiate, AttackMode, DescriptorLimits, RunConfig, Target};
use sloth_transport::MultiplexerType;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level profile configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ProfileConfig {
    pub experiment: ExperimentConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub payload: PayloadConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Experiment metadata
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ExperimentConfig {
    /// Experiment name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Random seed for reproducibility (None = use entropy)
    #[serde(default)]
    pub seed: Option<u64>,
    /// Test duration
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub duration: Duration,
    /// Slow headers or slow body
    #[serde(default)]
    pub mode: AttackMode,
}

/// Server under test
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct TargetConfig {
    /// Plain http URL, e.g. "http://127.0.0.1:8080/login"
    pub url: String,
    /// Request verb; GET for headers mode and POST for body mode when unset
    #[serde(default)]
    pub verb: Option<String>,
}

/// Connection admission and follow-up pacing
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct PacingConfig {
    /// Target number of concurrent connections
    #[serde(default = "default_connections")]
    pub connections: usize,
    /// New connections per second
    #[serde(default = "default_rate")]
    pub rate: u32,
    /// Gap between follow-up fragments on one connection
    #[serde(with = "humantime_serde", default = "default_followup_interval")]
    #[schemars(with = "String")]
    pub followup_interval: Duration,
    /// Give up when nothing connected within this period
    #[serde(with = "humantime_serde", default = "default_liveness_grace")]
    #[schemars(with = "String")]
    pub liveness_grace: Duration,
}

fn default_connections() -> usize {
    50
}

fn default_rate() -> u32 {
    50
}

fn default_followup_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_liveness_grace() -> Duration {
    Duration::from_secs(10)
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            connections: default_connections(),
            rate: default_rate(),
            followup_interval: default_followup_interval(),
            liveness_grace: default_liveness_grace(),
        }
    }
}

/// What gets sent
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct PayloadConfig {
    /// Upper bound on the random part of each follow-up fragment
    #[serde(default = "default_max_fragment_len")]
    pub max_fragment_len: usize,
    /// Content-Length announced in body mode
    #[serde(default = "default_content_length")]
    pub content_length: usize,
}

fn default_max_fragment_len() -> usize {
    24
}

fn default_content_length() -> usize {
    4096
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            max_fragment_len: default_max_fragment_len(),
            content_length: default_content_length(),
        }
    }
}

/// Socket plumbing
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct TransportConfig {
    /// Readiness backend: epoll, poll or mio (platform default when unset)
    #[serde(default)]
    pub multiplexer: Option<String>,
}

/// Report files
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct OutputConfig {
    /// Per-second connection counts as CSV
    #[serde(default)]
    pub csv: Option<PathBuf>,
    /// Chart page rendered when the run ends
    #[serde(default)]
    pub html: Option<PathBuf>,
}

impl ProfileConfig {
    /// Load profile from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file_with_overrides(path, &[])
    }

    /// Load profile from TOML file with --set style overrides, then validate
    pub fn from_file_with_overrides<P: AsRef<Path>>(path: P, overrides: &[String]) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str_with_overrides(&content, overrides)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse profile text with --set style overrides, then validate
    pub fn from_str_with_overrides(content: &str, overrides: &[String]) -> Result<Self> {
        let mut value: toml::Value = toml::from_str(content).context("Failed to parse TOML")?;

        for override_str in overrides {
            let (key, val) = parse_key_value(override_str)
                .with_context(|| format!("Invalid override format: {}", override_str))?;
            set_toml_path(&mut value, key, val)
                .with_context(|| format!("Failed to apply override: {}", override_str))?;
        }

        let config: ProfileConfig =
            value.try_into().context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.experiment.name.is_empty() {
            bail!("Experiment name cannot be empty");
        }

        self.target()?;
        if let Some(verb) = &self.target.verb {
            if verb.is_empty() || !verb.bytes().all(|b| b.is_ascii_alphabetic()) {
                bail!("Invalid verb '{}'", verb);
            }
        }

        self.multiplexer()?;
        self.run_config().validate()?;
        Ok(())
    }

    pub fn target(&self) -> Result<Target> {
        Target::parse(&self.target.url)
            .with_context(|| format!("Invalid target url '{}'", self.target.url))
    }

    pub fn verb(&self) -> String {
        match &self.target.verb {
            Some(verb) => verb.to_ascii_uppercase(),
            None => self.experiment.mode.default_verb().to_string(),
        }
    }

    pub fn multiplexer(&self) -> Result<MultiplexerType> {
        match &self.transport.multiplexer {
            Some(name) => name
                .parse::<MultiplexerType>()
                .with_context(|| format!("Invalid multiplexer '{}'", name)),
            None => Ok(MultiplexerType::default()),
        }
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            connections: self.pacing.connections,
            rate: self.pacing.rate,
            duration: self.experiment.duration,
            followup_interval: self.pacing.followup_interval,
            liveness_grace: self.pacing.liveness_grace,
            max_fragment_len: self.payload.max_fragment_len,
        }
    }

    /// Run parameters with the connection count fitted to the open file limit
    pub fn negotiated_run_config<L: DescriptorLimits + ?Sized>(
        &self,
        limits: &mut L,
    ) -> Result<RunConfig> {
        let negotiated = negotiate(limits, self.pacing.connections);
        if negotiated.connections == 0 {
            bail!("Open file limit leaves no room for connections");
        }
        let mut run_config = self.run_config();
        run_config.connections = negotiated.connections;
        Ok(run_config)
    }
}

/// Split "key=value" at the first '='
fn parse_key_value(override_str: &str) -> Result<(&str, &str)> {
    match override_str.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("Invalid override format '{}'. Expected 'key=value'", override_str),
    }
}

/// Set a value in TOML using dot-notation path, creating tables on the way
fn set_toml_path(root: &mut toml::Value, path: &str, value_str: &str) -> Result<()> {
    let keys: Vec<&str> = path.split('.').filter(|k| !k.is_empty()).collect();
    let Some((last, parents)) = keys.split_last() else {
        bail!("Empty path");
    };

    let mut current = root;
    for key in parents {
        let toml::Value::Table(table) = current else {
            bail!("Cannot navigate through non-table value at key '{}'", key);
        };
        current = table
            .entry(key.to_string())
            .or_insert_with(|| toml::Value::Table(Default::default()));
    }

    let toml::Value::Table(table) = current else {
        bail!("Cannot set key '{}' on non-table value", last);
    };
    table.insert(last.to_string(), parse_value(value_str));
    Ok(())
}

/// Parse a string value with type inference
fn parse_value(value_str: &str) -> toml::Value {
    let trimmed = value_str.trim();

    match trimmed {
        "true" => return toml::Value::Boolean(true),
        "false" => return toml::Value::Boolean(false),
        _ => {}
    }

    if let Ok(int_val) = trimmed.parse::<i64>() {
        return toml::Value::Integer(int_val);
    }
    if let Ok(float_val) = trimmed.parse::<f64>() {
        return toml::Value::Float(float_val);
    }

    let unquoted = if trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')))
    {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };
    toml::Value::String(unquoted.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_types() {
        assert_eq!(parse_value("true"), toml::Value::Boolean(true));
        assert_eq!(parse_value("42"), toml::Value::Integer(42));
        assert_eq!(parse_value("0.5"), toml::Value::Float(0.5));
        assert_eq!(parse_value("30s"), toml::Value::String("30s".into()));
        assert_eq!(parse_value("'GET'"), toml::Value::String("GET".into()));
        assert_eq!(parse_value("\""), toml::Value::String("\"".into()));
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(parse_key_value("target.url=http://a/?x=1").unwrap(), ("target.url", "http://a/?x=1"));
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=3").is_err());
    }

    #[test]
    fn test_set_creates_tables() {
        let mut value: toml::Value = toml::from_str("[experiment]\nname = \"x\"").unwrap();
        set_toml_path(&mut value, "pacing.rate", "7").unwrap();
        assert_eq!(value["pacing"]["rate"], toml::Value::Integer(7));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut value: toml::Value = toml::from_str("[experiment]\nname = \"x\"").unwrap();
        assert!(set_toml_path(&mut value, "experiment.name.inner", "1").is_err());
        assert!(set_toml_path(&mut value, "", "1").is_err());
    }
}
