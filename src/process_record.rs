//! Per-process records, their status lifecycle and the views handed to the
//! presentation layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Opaque reference to a presentation-layer row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowHandle(pub u64);

impl fmt::Display for RowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    #[default]
    Scanning,
    Trusted,
    Suspicious,
    Critical,
}

impl ProcessStatus {
    /// Forward-only lifecycle: Scanning resolves once, Suspicious may be
    /// resolved again by the operator, Trusted and Critical are terminal.
    pub fn can_transition_to(self, next: ProcessStatus) -> bool {
        use ProcessStatus::*;
        matches!(
            (self, next),
            (Scanning, Trusted)
                | (Scanning, Suspicious)
                | (Scanning, Critical)
                | (Suspicious, Critical)
                | (Suspicious, Trusted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessStatus::Trusted | ProcessStatus::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStatus::Scanning => "SCANNING",
            ProcessStatus::Trusted => "TRUSTED",
            ProcessStatus::Suspicious => "SUSPICIOUS",
            ProcessStatus::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marks a verdict the presentation layer must not treat as a normal outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Annotation {
    /// Scoring errored or timed out; the verdict is low-confidence.
    ScoringUnavailable,
    /// A termination was attempted and did not succeed.
    TerminationFailed,
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annotation::ScoringUnavailable => f.write_str("scoring unavailable"),
            Annotation::TerminationFailed => f.write_str("termination failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub executable_path: PathBuf,
    pub display_name: String,
    /// `None` while the score is pending.
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub status: ProcessStatus,
    pub row: RowHandle,
    #[serde(default)]
    pub annotations: BTreeSet<Annotation>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessRecord {
    pub fn new(pid: u32, executable_path: PathBuf, display_name: String, row: RowHandle) -> Self {
        let now = Utc::now();
        Self {
            pid,
            executable_path,
            display_name,
            score: None,
            status: ProcessStatus::Scanning,
            row,
            annotations: BTreeSet::new(),
            discovered_at: now,
            updated_at: now,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.annotations.contains(&Annotation::ScoringUnavailable)
    }

    pub fn view(&self) -> RowView {
        RowView {
            pid: self.pid,
            display_name: self.display_name.clone(),
            score: self.score,
            status: self.status,
            annotations: self.annotations.iter().copied().collect(),
        }
    }
}

/// What a presentation row shows for one process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowView {
    pub pid: u32,
    pub display_name: String,
    pub score: Option<f64>,
    pub status: ProcessStatus,
    pub annotations: Vec<Annotation>,
}

impl RowView {
    pub fn score_label(&self) -> String {
        match self.score {
            Some(score) => format!("{:.1}%", score * 100.0),
            None => "...".to_string(),
        }
    }
}

/// Unit of scoring work for one newly discovered process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub pid: u32,
    pub executable_path: PathBuf,
    pub display_name: String,
    pub row: RowHandle,
}
