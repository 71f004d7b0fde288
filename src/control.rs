//! Process Control: terminate a process by pid.

use crate::error::TerminationError;
use crate::logging::info;
use crate::platform;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

/// How long a SIGTERM'd process gets before it is killed outright.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

#[cfg_attr(test, automock)]
pub trait ProcessControl: Send + Sync {
    /// Blocking; may wait up to the implementation's grace period.
    fn terminate(&self, pid: u32) -> Result<(), TerminationError>;
}

#[derive(Debug, Clone)]
pub struct SystemProcessControl {
    grace: Duration,
}

impl SystemProcessControl {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }
}

impl Default for SystemProcessControl {
    fn default() -> Self {
        Self::new(DEFAULT_KILL_GRACE)
    }
}

impl ProcessControl for SystemProcessControl {
    fn terminate(&self, pid: u32) -> Result<(), TerminationError> {
        platform::terminate_process(pid, self.grace)
    }
}

/// Logs instead of killing; reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunControl;

impl ProcessControl for DryRunControl {
    fn terminate(&self, pid: u32) -> Result<(), TerminationError> {
        info(format!("dry run: would terminate pid={}", pid));
        Ok(())
    }
}

/// Run [`ProcessControl::terminate`] on the blocking pool.
pub async fn terminate_off_runtime(
    control: Arc<dyn ProcessControl>,
    pid: u32,
) -> Result<(), TerminationError> {
    match tokio::task::spawn_blocking(move || control.terminate(pid)).await {
        Ok(result) => result,
        Err(join_err) => Err(TerminationError::Os {
            pid,
            message: format!("terminate task failed: {join_err}"),
        }),
    }
}
