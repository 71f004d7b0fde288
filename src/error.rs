//! Unified error handling for procshield
//!
//! Every failure the pipeline can hit maps onto one of the enums below.
//! Only [`ConfigError`] is fatal, and only at startup; everything else is
//! logged and absorbed by the component that observed it.

use crate::process_record::ProcessStatus;
use std::time::Duration;
use thiserror::Error;

/// A single process entry could not be read from the OS process table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("failed to query process {pid}: {message}")]
    TransientOsQuery { pid: u32, message: String },
    #[error("process table listing failed: {0}")]
    Listing(String),
}

/// The risk scorer could not produce a usable score.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScoringError {
    #[error("scoring unavailable: {0}")]
    Unavailable(String),
    #[error("scoring timed out after {0:?}")]
    Timeout(Duration),
    #[error("scorer returned a non-finite score: {0}")]
    NonFinite(f64),
}

/// Process Control could not kill the target.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TerminationError {
    #[error("process {0} not found (already exited?)")]
    NotFound(u32),
    #[error("permission denied terminating process {0}")]
    PermissionDenied(u32),
    #[error("failed to terminate process {pid}: {message}")]
    Os { pid: u32, message: String },
}

impl TerminationError {
    pub fn pid(&self) -> u32 {
        match self {
            TerminationError::NotFound(pid) | TerminationError::PermissionDenied(pid) => *pid,
            TerminationError::Os { pid, .. } => *pid,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("rejected transition for pid {pid}: {from} -> {to}")]
    Conflict {
        pid: u32,
        from: ProcessStatus,
        to: ProcessStatus,
    },
    #[error("process not found: {0}")]
    NotFound(u32),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid thresholds: suspicious={suspicious}, critical={critical} (need 0 <= suspicious < critical <= 1)")]
    InvalidThresholds { suspicious: f64, critical: f64 },
    #[error("worker_count must be at least 1")]
    InvalidWorkerCount,
    #[error("tick_interval_ms must be greater than zero")]
    InvalidInterval,
    #[error("scoring_timeout_ms must be greater than zero")]
    InvalidTimeout,
    #[error("max_pending_prompts must be at least 1")]
    InvalidPromptBound,
    #[error("invalid path exclusion rule '{pattern}': {message}")]
    InvalidExclusion { pattern: String, message: String },
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("config file not found: {path}")]
    FileNotFound { path: String },
}

/// Coarse classification used when deciding how loudly to log a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Skipped entry, pipeline unaffected.
    Transient,
    /// A verdict was produced with reduced confidence.
    Degraded,
    /// An action on the host did not take effect.
    Action,
    /// An invariant check rejected an update.
    Consistency,
    /// Startup cannot continue.
    Fatal,
}

pub trait Categorized {
    fn category(&self) -> ErrorCategory;
}

impl Categorized for SourceError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Transient
    }
}

impl Categorized for ScoringError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Degraded
    }
}

impl Categorized for TerminationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Action
    }
}

impl Categorized for RegistryError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Consistency
    }
}

impl Categorized for ConfigError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Fatal
    }
}
