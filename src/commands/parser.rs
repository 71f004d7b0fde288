//! CLI argument parsing
//!
//! `clap` derive definitions plus the mapping from flags onto
//! [`ShieldConfig`]. Flags win over the file and the environment.

use crate::config::{GateMode, ShieldConfig};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "procshield",
    about = "Process risk monitor: scores running processes and flags or terminates risky ones",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct ConfigArgs {
    /// Config file (default: ~/.procshield/config.toml)
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct LogArgs {
    /// Level or filter directive, e.g. `debug` or `procshield=trace,info`
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Also append logs to this file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub log: LogArgs,

    /// Number of scorer workers
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Discovery interval in milliseconds
    #[arg(long = "interval-ms", value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// How SUSPICIOUS processes are resolved
    #[arg(long, value_enum)]
    pub gate: Option<GateMode>,

    /// Log terminations instead of performing them
    #[arg(long)]
    pub dry_run: bool,
}

impl RunArgs {
    pub fn apply(&self, config: &mut ShieldConfig) {
        if let Some(workers) = self.workers {
            config.worker_count = workers;
        }
        if let Some(interval) = self.interval_ms {
            config.tick_interval_ms = interval;
        }
        if let Some(gate) = self.gate {
            config.gate = gate;
        }
        self.log.apply(config);
    }
}

impl LogArgs {
    pub fn apply(&self, config: &mut ShieldConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = Some(level.clone());
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Monitor continuously until Ctrl-C
    Run(RunArgs),

    /// Load and validate the configuration, then print it
    #[command(name = "check-config")]
    CheckConfig {
        #[command(flatten)]
        config: ConfigArgs,

        /// Write the defaults to ~/.procshield/config.toml if it does not exist
        #[arg(long)]
        init: bool,
    },

    /// Discover and score once with a deny-all gate, print the results
    #[command(name = "scan-once")]
    ScanOnce {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        log: LogArgs,

        /// Log terminations instead of performing them
        #[arg(long)]
        dry_run: bool,

        /// Print records as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}
