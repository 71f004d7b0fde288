//! Discovery Filter
//!
//! Turns a process listing into work: skips what cannot or should not be
//! scored, registers the rest as SCANNING and queues them. Registration is a
//! check-and-insert on the registry, so overlapping ticks never queue the
//! same pid twice.

use crate::config::ShieldConfig;
use crate::error::{ConfigError, SourceError};
use crate::queue::WorkQueue;
use crate::registry::ProcessRegistry;
use crate::source::{ObservedProcess, ProcessListing, ProcessSource};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// What one tick did with the listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub observed: usize,
    pub queued: usize,
    pub already_known: usize,
    pub excluded: usize,
    pub missing_path: usize,
    pub query_errors: usize,
    pub pruned: usize,
}

pub struct DiscoveryFilter {
    registry: Arc<ProcessRegistry>,
    exclusions: Vec<Regex>,
    prune_exited: bool,
}

impl DiscoveryFilter {
    pub fn new(registry: Arc<ProcessRegistry>, exclusions: Vec<Regex>, prune_exited: bool) -> Self {
        Self {
            registry,
            exclusions,
            prune_exited,
        }
    }

    pub fn from_config(
        registry: Arc<ProcessRegistry>,
        config: &ShieldConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            registry,
            config.compiled_exclusions()?,
            config.prune_exited,
        ))
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.exclusions.iter().any(|rule| rule.is_match(&path))
    }

    /// List the source once and apply [`DiscoveryFilter::apply`]. Blocking.
    pub fn tick(&self, source: &dyn ProcessSource, queue: &WorkQueue) -> Result<TickReport, SourceError> {
        let listing = source.list()?;
        Ok(self.apply(listing, queue))
    }

    pub fn apply(&self, listing: ProcessListing, queue: &WorkQueue) -> TickReport {
        let mut report = TickReport::default();
        let mut alive = HashSet::with_capacity(listing.len());

        for entry in listing {
            report.observed += 1;
            match entry {
                Ok(process) => {
                    alive.insert(process.pid);
                    self.consider(process, queue, &mut report);
                }
                Err(err) => {
                    report.query_errors += 1;
                    if let SourceError::TransientOsQuery { pid, .. } = &err {
                        // Unreadable is not the same as gone.
                        if *pid != 0 {
                            alive.insert(*pid);
                        }
                    }
                    debug!("skipping process entry: {}", err);
                }
            }
        }

        if self.prune_exited {
            let pruned = self.registry.retain_alive(&alive);
            if !pruned.is_empty() {
                debug!("pruned {} exited process(es): {:?}", pruned.len(), pruned);
            }
            report.pruned = pruned.len();
        }
        report
    }

    fn consider(&self, process: ObservedProcess, queue: &WorkQueue, report: &mut TickReport) {
        let Some(path) = process.executable_path else {
            debug!("pid {} ({}) has no executable path", process.pid, process.name);
            report.missing_path += 1;
            return;
        };

        if self.is_excluded(&path) {
            report.excluded += 1;
            return;
        }

        match self.registry.register(process.pid, path, process.name) {
            Some(item) => {
                let pid = item.pid;
                if queue.push(item).is_err() {
                    debug!("queue closed; pid {} left in SCANNING", pid);
                    return;
                }
                report.queued += 1;
            }
            None => report.already_known += 1,
        }
    }
}
