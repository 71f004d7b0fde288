//! procshield
//!
//! Process risk monitor: discovers running processes, scores them on a pool
//! of concurrent workers and flags, prompts for or terminates the risky ones,
//! while keeping a race-free registry of process state for display.

pub mod commands;
pub mod config;
pub mod control;
pub mod discovery;
pub mod error;
pub mod gate;
pub mod logging;
pub mod pipeline;
pub mod platform;
pub mod policy;
pub mod pool;
pub mod presentation;
pub mod process_record;
pub mod queue;
pub mod registry;
pub mod scoring;
pub mod signal;
pub mod source;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::{GateMode, ShieldConfig};
pub use control::{DryRunControl, ProcessControl, SystemProcessControl};
pub use error::{
    Categorized, ConfigError, ErrorCategory, RegistryError, ScoringError, SourceError,
    TerminationError,
};
pub use gate::{ConsoleGate, OperatorGate, StaticGate};
pub use pipeline::{Pipeline, PipelineBuilder, RunSummary};
pub use policy::{decide, Thresholds, Verdict};
pub use presentation::{ChannelSink, CounterKind, NullSink, PresentationEvent, PresentationSink};
pub use process_record::{Annotation, ProcessRecord, ProcessStatus, RowHandle, RowView, WorkItem};
pub use registry::{Counters, ProcessRegistry};
pub use scoring::{HeuristicScorer, RiskScorer};
pub use signal::Shutdown;
pub use source::{ObservedProcess, ProcessSource, StaticSource, SystemProcessSource};
