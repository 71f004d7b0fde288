//! Runtime configuration
//!
//! Layering, lowest to highest priority: built-in defaults, the TOML file
//! (`~/.procshield/config.toml` unless a path is given), then
//! `PROCSHIELD_*` environment variables (`__` separates nested keys, e.g.
//! `PROCSHIELD_THRESHOLDS__CRITICAL=0.8`). CLI flags are applied on top by
//! the binary before [`ShieldConfig::validate`] runs.

use crate::error::ConfigError;
use crate::policy::Thresholds;
use crate::utils::config_paths::ConfigPaths;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const ENV_PREFIX: &str = "PROCSHIELD";

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(4);
pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_SCORING_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_PENDING_PROMPTS: usize = 16;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// OS-owned locations whose processes are not worth scoring.
pub const DEFAULT_PATH_EXCLUSIONS: &[&str] = &[
    r"[\\/]windows[\\/]",
    r"^/usr/lib/systemd/",
    r"^/usr/libexec/",
    r"^/System/Library/",
];
pub const DEFAULT_TEMP_MARKERS: &[&str] = &["temp", "tmp", "appdata", ".cache"];
pub const DEFAULT_INTERPRETER_MARKERS: &[&str] = &["powershell", "cmd"];

/// How SUSPICIOUS verdicts are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Ask on the terminal.
    #[default]
    Prompt,
    /// Always terminate.
    Allow,
    /// Never terminate; every prompt adds the name to the ignore-list.
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShieldConfig {
    pub tick_interval_ms: u64,
    pub worker_count: usize,
    pub thresholds: Thresholds,
    pub scoring_timeout_ms: u64,
    /// Case-insensitive regular expressions matched against executable paths.
    pub path_exclusions: Vec<String>,
    pub temp_markers: Vec<String>,
    pub interpreter_markers: Vec<String>,
    pub gate: GateMode,
    /// Move a dismissed SUSPICIOUS record to TRUSTED instead of leaving it.
    pub dismiss_marks_trusted: bool,
    /// Drop rows for processes that vanished from the latest listing.
    pub prune_exited: bool,
    pub max_pending_prompts: usize,
    pub shutdown_grace_ms: u64,
    pub logging: LoggingConfig,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            worker_count: DEFAULT_WORKER_COUNT,
            thresholds: Thresholds::default(),
            scoring_timeout_ms: DEFAULT_SCORING_TIMEOUT.as_millis() as u64,
            path_exclusions: to_string_vec(DEFAULT_PATH_EXCLUSIONS),
            temp_markers: to_string_vec(DEFAULT_TEMP_MARKERS),
            interpreter_markers: to_string_vec(DEFAULT_INTERPRETER_MARKERS),
            gate: GateMode::default(),
            dismiss_marks_trusted: false,
            prune_exited: true,
            max_pending_prompts: DEFAULT_MAX_PENDING_PROMPTS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE.as_millis() as u64,
            logging: LoggingConfig::default(),
        }
    }
}

fn to_string_vec(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl ShieldConfig {
    /// Load defaults, then the config file, then environment overrides.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (file, required) = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound {
                        path: path.display().to_string(),
                    });
                }
                (Some(path.to_path_buf()), true)
            }
            None => (ConfigPaths::new().ok().map(|paths| paths.config_file), false),
        };

        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&ShieldConfig::default())?);

        if let Some(file) = file {
            debug!("Reading config from {}", file.display());
            builder = builder.add_source(
                config::File::from(file)
                    .format(config::FileFormat::Toml)
                    .required(required),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: ShieldConfig = builder.build()?.try_deserialize()?;
        Ok(loaded)
    }

    /// Parse a TOML document on top of the defaults (no file or env lookup).
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let loaded = config::Config::builder()
            .add_source(config::Config::try_from(&ShieldConfig::default())?)
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(loaded)
    }

    /// Startup validation; the only place a bad value aborts the program.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;

        if self.worker_count == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        if self.scoring_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.max_pending_prompts == 0 {
            return Err(ConfigError::InvalidPromptBound);
        }

        self.compiled_exclusions()?;
        Ok(())
    }

    pub fn compiled_exclusions(&self) -> Result<Vec<Regex>, ConfigError> {
        self.path_exclusions
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|err| ConfigError::InvalidExclusion {
                        pattern: pattern.clone(),
                        message: err.to_string(),
                    })
            })
            .collect()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn scoring_timeout(&self) -> Duration {
        Duration::from_millis(self.scoring_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
