//! Process Source
//!
//! The only code that reads the OS process table. Platform strategy:
//! - Linux: `psutil` for the listing and the executable path
//! - other Unix: `psutil` for the listing, `/proc/<pid>/exe` where procfs exists
//! - Windows: `sysinfo`
//!
//! The display name is the executable's file name. The kernel's `comm` is cut
//! at 15 bytes, so it is only used when no path resolves.
//!
//! A failure on a single entry is reported inline as
//! [`SourceError::TransientOsQuery`]; only a failure to list at all fails the
//! whole call.

use crate::error::SourceError;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

#[cfg(test)]
use mockall::automock;

/// One entry of a process listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedProcess {
    pub pid: u32,
    pub name: String,
    /// `None` when the path could not be resolved (kernel threads, access denied).
    pub executable_path: Option<PathBuf>,
}

impl ObservedProcess {
    pub fn new(pid: u32, name: impl Into<String>, executable_path: Option<PathBuf>) -> Self {
        Self {
            pid,
            name: name.into(),
            executable_path,
        }
    }
}

pub type ProcessListing = Vec<Result<ObservedProcess, SourceError>>;

#[cfg_attr(test, automock)]
pub trait ProcessSource: Send + Sync {
    /// Snapshot of the observable processes. Blocking.
    fn list(&self) -> Result<ProcessListing, SourceError>;
}

/// Reads the host's process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessSource;

impl ProcessSource for SystemProcessSource {
    fn list(&self) -> Result<ProcessListing, SourceError> {
        list_system_processes()
    }
}

#[cfg(unix)]
fn list_system_processes() -> Result<ProcessListing, SourceError> {
    let processes =
        psutil::process::processes().map_err(|err| SourceError::Listing(format!("{:?}", err)))?;

    Ok(processes
        .into_iter()
        .map(|entry| {
            let process = entry.map_err(|err| SourceError::TransientOsQuery {
                pid: 0,
                message: format!("{:?}", err),
            })?;
            let pid = process.pid();
            let comm = process.name().map_err(|err| SourceError::TransientOsQuery {
                pid,
                message: format!("{:?}", err),
            })?;
            let executable_path = executable_path(&process);
            Ok(ObservedProcess {
                pid,
                name: display_name(executable_path.as_deref(), comm),
                executable_path,
            })
        })
        .collect())
}

#[cfg(target_os = "linux")]
fn executable_path(process: &psutil::process::Process) -> Option<PathBuf> {
    process.exe().ok()
}

// psutil has no `exe` outside Linux.
#[cfg(all(unix, not(target_os = "linux")))]
fn executable_path(process: &psutil::process::Process) -> Option<PathBuf> {
    std::fs::read_link(format!("/proc/{}/exe", process.pid())).ok()
}

/// File name of the executable, falling back to the OS-reported name.
pub fn display_name(executable_path: Option<&Path>, fallback: String) -> String {
    executable_path
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or(fallback)
}

#[cfg(windows)]
fn list_system_processes() -> Result<ProcessListing, SourceError> {
    use sysinfo::{ProcessesToUpdate, System};

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    Ok(system
        .processes()
        .iter()
        .map(|(pid, process)| {
            let executable_path = process.exe().map(|path| path.to_path_buf());
            Ok(ObservedProcess {
                pid: pid.as_u32(),
                name: display_name(
                    executable_path.as_deref(),
                    process.name().to_string_lossy().into_owned(),
                ),
                executable_path,
            })
        })
        .collect())
}

/// A listing set by hand; every call returns the current one.
#[derive(Debug, Default)]
pub struct StaticSource {
    listing: Mutex<ProcessListing>,
}

impl StaticSource {
    pub fn new(processes: Vec<ObservedProcess>) -> Self {
        Self {
            listing: Mutex::new(processes.into_iter().map(Ok).collect()),
        }
    }

    pub fn set(&self, processes: Vec<ObservedProcess>) {
        *self.listing.lock() = processes.into_iter().map(Ok).collect();
    }

    pub fn set_listing(&self, listing: ProcessListing) {
        *self.listing.lock() = listing;
    }
}

impl ProcessSource for StaticSource {
    fn list(&self) -> Result<ProcessListing, SourceError> {
        Ok(self.listing.lock().clone())
    }
}
