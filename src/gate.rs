//! Operator Gate
//!
//! SUSPICIOUS verdicts are handed to a human (or a fixed policy) as alerts.
//! Each alert runs on its own task so workers never wait on an answer; a
//! semaphore caps how many are in flight at once, and shutdown abandons the
//! ones still waiting after the grace period.

use crate::config::GateMode;
use crate::control::{terminate_off_runtime, ProcessControl};
use crate::error::RegistryError;
use crate::process_record::{Annotation, ProcessStatus, RowHandle};
use crate::registry::ProcessRegistry;
use async_trait::async_trait;
use dialoguer::Confirm;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait OperatorGate: Send + Sync {
    /// `true` means terminate, `false` means "not a threat".
    async fn ask(&self, pid: u32, display_name: &str, score: f64) -> bool;
}

/// Interactive yes/no prompt on the controlling terminal.
///
/// One prompt at a time; the blocking read runs on the blocking pool.
#[derive(Debug, Default)]
pub struct ConsoleGate {
    turn: tokio::sync::Mutex<()>,
}

impl ConsoleGate {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperatorGate for ConsoleGate {
    async fn ask(&self, pid: u32, display_name: &str, score: f64) -> bool {
        let _turn = self.turn.lock().await;
        let prompt = format!(
            "Suspicious process {} (pid {}) scored {:.1}%. Terminate it?",
            display_name,
            pid,
            score * 100.0
        );

        let answer = tokio::task::spawn_blocking(move || {
            Confirm::new().with_prompt(prompt).default(false).interact()
        })
        .await;

        match answer {
            Ok(Ok(terminate)) => terminate,
            Ok(Err(err)) => {
                warn!("Operator prompt failed for pid {}: {}", pid, err);
                false
            }
            Err(err) => {
                warn!("Operator prompt task failed for pid {}: {}", pid, err);
                false
            }
        }
    }
}

/// Gives the same answer to every alert.
#[derive(Debug, Clone, Copy)]
pub struct StaticGate {
    terminate: bool,
}

impl StaticGate {
    pub fn allow() -> Self {
        Self { terminate: true }
    }

    pub fn deny() -> Self {
        Self { terminate: false }
    }
}

#[async_trait]
impl OperatorGate for StaticGate {
    async fn ask(&self, _pid: u32, _display_name: &str, _score: f64) -> bool {
        self.terminate
    }
}

pub fn gate_for_mode(mode: GateMode) -> Arc<dyn OperatorGate> {
    match mode {
        GateMode::Prompt => Arc::new(ConsoleGate::new()),
        GateMode::Allow => Arc::new(StaticGate::allow()),
        GateMode::Deny => Arc::new(StaticGate::deny()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub pid: u32,
    /// Row of the record that raised the alert; a reused pid has another.
    pub row: RowHandle,
    pub display_name: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    Terminated,
    TerminationFailed,
    Dismissed,
    /// The record left SUSPICIOUS (or the registry) before the answer landed.
    Stale,
    /// Shutdown began before a slot was free.
    Abandoned,
}

struct AlertContext {
    gate: Arc<dyn OperatorGate>,
    control: Arc<dyn ProcessControl>,
    registry: Arc<ProcessRegistry>,
    dismiss_marks_trusted: bool,
}

impl AlertContext {
    async fn resolve(&self, alert: Alert) -> AlertOutcome {
        let terminate = self
            .gate
            .ask(alert.pid, &alert.display_name, alert.score)
            .await;

        if terminate {
            self.terminate(alert).await
        } else {
            self.dismiss(alert)
        }
    }

    async fn terminate(&self, alert: Alert) -> AlertOutcome {
        match self.registry.get_row(alert.pid, alert.row) {
            Some(record) if record.status == ProcessStatus::Suspicious => {}
            _ => {
                debug!("pid {} no longer suspicious; skipping termination", alert.pid);
                return AlertOutcome::Stale;
            }
        }

        match terminate_off_runtime(Arc::clone(&self.control), alert.pid).await {
            Ok(()) => match self.registry.transition_row(
                alert.pid,
                alert.row,
                ProcessStatus::Critical,
                None,
                &[],
            ) {
                Ok(_) => {
                    info!("Operator terminated {} (pid {})", alert.display_name, alert.pid);
                    AlertOutcome::Terminated
                }
                Err(err) => {
                    warn!("Terminated pid {} but could not record it: {}", alert.pid, err);
                    AlertOutcome::Stale
                }
            },
            Err(err) => {
                warn!(
                    "Operator-approved termination of {} failed: {}",
                    alert.display_name, err
                );
                match self
                    .registry
                    .annotate_row(alert.pid, alert.row, Annotation::TerminationFailed)
                {
                    Ok(()) => AlertOutcome::TerminationFailed,
                    Err(RegistryError::NotFound(_)) => AlertOutcome::Stale,
                    Err(err) => {
                        warn!("{}", err);
                        AlertOutcome::TerminationFailed
                    }
                }
            }
        }
    }

    fn dismiss(&self, alert: Alert) -> AlertOutcome {
        if self.registry.ignore_name(&alert.display_name) {
            info!("'{}' added to the ignore-list", alert.display_name);
        }

        if self.dismiss_marks_trusted {
            if let Err(err) = self.registry.transition_row(
                alert.pid,
                alert.row,
                ProcessStatus::Trusted,
                None,
                &[],
            ) {
                debug!("dismissed pid {} kept its status: {}", alert.pid, err);
            }
        }
        AlertOutcome::Dismissed
    }
}

/// Spawns and tracks alert tasks.
pub struct AlertDispatcher {
    context: Arc<AlertContext>,
    slots: Arc<Semaphore>,
    tasks: Mutex<Vec<JoinHandle<AlertOutcome>>>,
}

impl AlertDispatcher {
    pub fn new(
        gate: Arc<dyn OperatorGate>,
        control: Arc<dyn ProcessControl>,
        registry: Arc<ProcessRegistry>,
        max_pending: usize,
        dismiss_marks_trusted: bool,
    ) -> Self {
        Self {
            context: Arc::new(AlertContext {
                gate,
                control,
                registry,
                dismiss_marks_trusted,
            }),
            slots: Arc::new(Semaphore::new(max_pending.max(1))),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start resolving an alert without waiting for it.
    pub fn dispatch(&self, alert: Alert) {
        let context = Arc::clone(&self.context);
        let slots = Arc::clone(&self.slots);

        let handle = tokio::spawn(async move {
            let Ok(_permit) = slots.acquire_owned().await else {
                debug!("alert for pid {} abandoned during shutdown", alert.pid);
                return AlertOutcome::Abandoned;
            };
            context.resolve(alert).await
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Alerts spawned and not yet finished.
    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Wait for every alert dispatched so far, including ones spawned while
    /// waiting.
    pub async fn wait_all(&self) -> Vec<AlertOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let batch = std::mem::take(&mut *self.tasks.lock());
            if batch.is_empty() {
                return outcomes;
            }
            for result in futures::future::join_all(batch).await {
                match result {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(err) => warn!("alert task failed: {}", err),
                }
            }
        }
    }

    /// Refuse new slots, give in-flight alerts `grace` to finish, then abort
    /// the rest. Returns how many were aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.slots.close();
        let batch = std::mem::take(&mut *self.tasks.lock());
        let aborts: Vec<_> = batch.iter().map(|task| task.abort_handle()).collect();

        if tokio::time::timeout(grace, futures::future::join_all(batch))
            .await
            .is_ok()
        {
            return 0;
        }

        let mut aborted = 0;
        for abort in aborts {
            if !abort.is_finished() {
                abort.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            warn!("Abandoned {} unanswered alert(s) at shutdown", aborted);
        }
        aborted
    }
}
