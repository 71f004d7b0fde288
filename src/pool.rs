//! Scorer Pool
//!
//! N workers pull [`WorkItem`]s off the shared queue, score each one under a
//! timeout and apply the verdict. Workers only ever wait on the queue or on
//! scoring; terminations go to the blocking pool and operator prompts to
//! their own tasks.

use crate::control::{terminate_off_runtime, ProcessControl};
use crate::error::{RegistryError, ScoringError};
use crate::gate::{Alert, AlertDispatcher};
use crate::policy::{decide, Thresholds, Verdict};
use crate::process_record::{Annotation, ProcessStatus, RowHandle, WorkItem};
use crate::queue::WorkQueue;
use crate::registry::ProcessRegistry;
use crate::scoring::{score_within, RiskScorer};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything a worker needs to turn a work item into a final status.
pub struct ScoringWorker {
    registry: Arc<ProcessRegistry>,
    scorer: Arc<dyn RiskScorer>,
    control: Arc<dyn ProcessControl>,
    alerts: Arc<AlertDispatcher>,
    thresholds: Thresholds,
    scoring_timeout: Duration,
}

impl ScoringWorker {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        scorer: Arc<dyn RiskScorer>,
        control: Arc<dyn ProcessControl>,
        alerts: Arc<AlertDispatcher>,
        thresholds: Thresholds,
        scoring_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            scorer,
            control,
            alerts,
            thresholds,
            scoring_timeout,
        }
    }

    /// Score one item and record the verdict.
    ///
    /// Returns the status written, or `None` when the record vanished or the
    /// registry rejected the update.
    pub async fn process_item(&self, item: WorkItem) -> Option<ProcessStatus> {
        if !self.registry.exists_row(item.row) {
            debug!("pid {} was pruned before scoring", item.pid);
            return None;
        }

        let scored = AssertUnwindSafe(score_within(
            self.scorer.as_ref(),
            &item.executable_path,
            &item.display_name,
            self.scoring_timeout,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(ScoringError::Unavailable("scorer panicked".to_string())));

        let (score, degraded) = match scored {
            Ok(score) => (score, false),
            Err(err) => {
                warn!("Scoring {} (pid {}) failed: {}", item.display_name, item.pid, err);
                (0.0, true)
            }
        };

        let verdict = if degraded {
            Verdict::Trusted
        } else {
            decide(
                score,
                self.registry.is_ignored(&item.display_name),
                &self.thresholds,
            )
        };

        match verdict {
            Verdict::Critical => self.block(&item, score).await,
            Verdict::Suspicious => {
                let status = self.record(&item, ProcessStatus::Suspicious, score, &[])?;
                self.alerts.dispatch(Alert {
                    pid: item.pid,
                    row: item.row,
                    display_name: item.display_name.clone(),
                    score,
                });
                Some(status)
            }
            Verdict::Trusted => {
                let annotations: &[Annotation] = if degraded {
                    &[Annotation::ScoringUnavailable]
                } else {
                    &[]
                };
                self.record(&item, ProcessStatus::Trusted, score, annotations)
            }
        }
    }

    /// Terminate first, then mark CRITICAL whether or not the kill worked.
    async fn block(&self, item: &WorkItem, score: f64) -> Option<ProcessStatus> {
        if !self.still_scanning(item.pid, item.row) {
            debug!("pid {} changed hands while scoring; not terminating", item.pid);
            return None;
        }

        let annotations: &[Annotation] =
            match terminate_off_runtime(Arc::clone(&self.control), item.pid).await {
                Ok(()) => {
                    info!(
                        "Terminated {} (pid {}), score {:.2}",
                        item.display_name, item.pid, score
                    );
                    &[]
                }
                Err(err) => {
                    warn!("Automatic termination of {} failed: {}", item.display_name, err);
                    &[Annotation::TerminationFailed]
                }
            };
        self.record(item, ProcessStatus::Critical, score, annotations)
    }

    fn still_scanning(&self, pid: u32, row: RowHandle) -> bool {
        self.registry
            .get_row(pid, row)
            .is_some_and(|record| record.status == ProcessStatus::Scanning)
    }

    fn record(
        &self,
        item: &WorkItem,
        status: ProcessStatus,
        score: f64,
        annotations: &[Annotation],
    ) -> Option<ProcessStatus> {
        match self
            .registry
            .transition_row(item.pid, item.row, status, Some(score), annotations)
        {
            Ok(record) => Some(record.status),
            Err(RegistryError::NotFound(pid)) => {
                debug!("pid {} was pruned or reused while scoring", pid);
                None
            }
            // Already logged by the registry.
            Err(RegistryError::Conflict { .. }) => None,
        }
    }
}

/// Fixed set of worker tasks draining one queue.
pub struct ScorerPool {
    workers: Vec<JoinHandle<()>>,
}

impl ScorerPool {
    pub fn spawn(count: usize, queue: WorkQueue, worker: Arc<ScoringWorker>) -> Self {
        let workers = (0..count)
            .map(|index| {
                let queue = queue.clone();
                let worker = Arc::clone(&worker);
                tokio::spawn(async move {
                    while let Some(item) = queue.pop().await {
                        let pid = item.pid;
                        if AssertUnwindSafe(worker.process_item(item))
                            .catch_unwind()
                            .await
                            .is_err()
                        {
                            warn!("scorer worker {} panicked on pid {}", index, pid);
                        }
                        queue.done();
                    }
                    debug!("scorer worker {} exiting", index);
                })
            })
            .collect();
        Self { workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every worker to exit; they do once the queue is closed and
    /// drained.
    pub async fn join(self) {
        for result in futures::future::join_all(self.workers).await {
            if let Err(err) = result {
                warn!("scorer worker failed: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::MockProcessControl;
    use crate::error::{ScoringError, TerminationError};
    use crate::gate::MockOperatorGate;
    use crate::presentation::NullSink;
    use crate::scoring::MockRiskScorer;
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use std::path::{Path, PathBuf};
    use test_case::test_case;

    struct Harness {
        registry: Arc<ProcessRegistry>,
        alerts: Arc<AlertDispatcher>,
        worker: ScoringWorker,
    }

    fn harness(score: Result<f64, ScoringError>, control: MockProcessControl, gate: MockOperatorGate) -> Harness {
        let registry = Arc::new(ProcessRegistry::new(Arc::new(NullSink::new())));
        let mut scorer = MockRiskScorer::new();
        scorer.expect_score().returning(move |_, _| score.clone());
        harness_with(registry, Arc::new(scorer), control, gate)
    }

    fn harness_with(
        registry: Arc<ProcessRegistry>,
        scorer: Arc<dyn RiskScorer>,
        control: MockProcessControl,
        gate: MockOperatorGate,
    ) -> Harness {
        let control: Arc<dyn ProcessControl> = Arc::new(control);
        let alerts = Arc::new(AlertDispatcher::new(
            Arc::new(gate),
            Arc::clone(&control),
            Arc::clone(&registry),
            4,
            false,
        ));
        let worker = ScoringWorker::new(
            Arc::clone(&registry),
            scorer,
            control,
            Arc::clone(&alerts),
            Thresholds::default(),
            Duration::from_millis(200),
        );
        Harness {
            registry,
            alerts,
            worker,
        }
    }

    fn discover(registry: &ProcessRegistry, pid: u32, name: &str) -> WorkItem {
        registry
            .register(pid, PathBuf::from(format!("/opt/{name}")), name.to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn test_low_score_is_trusted_without_side_effects() {
        let mut control = MockProcessControl::new();
        control.expect_terminate().never();
        let mut gate = MockOperatorGate::new();
        gate.expect_ask().never();
        let h = harness(Ok(0.10), control, gate);

        let item = discover(&h.registry, 100, "app");
        assert_eq!(h.worker.process_item(item).await, Some(ProcessStatus::Trusted));
        assert_eq!(h.registry.get(100).unwrap().score, Some(0.10));
        assert_eq!(h.registry.counters().trusted, 1);
        assert_eq!(h.registry.counters().scanning, 0);
    }

    #[tokio::test]
    async fn test_critical_kill_failure_is_annotated() {
        let mut control = MockProcessControl::new();
        control
            .expect_terminate()
            .with(eq(300))
            .times(1)
            .returning(|pid| Err(TerminationError::NotFound(pid)));
        let mut gate = MockOperatorGate::new();
        gate.expect_ask().never();
        let h = harness(Ok(0.90), control, gate);

        let item = discover(&h.registry, 300, "bad");
        assert_eq!(h.worker.process_item(item).await, Some(ProcessStatus::Critical));
        let record = h.registry.get(300).unwrap();
        assert!(record.annotations.contains(&Annotation::TerminationFailed));
        assert_eq!(h.registry.counters().blocked, 1);
    }

    #[tokio::test]
    async fn test_suspicious_dispatches_alert() {
        let mut control = MockProcessControl::new();
        control.expect_terminate().never();
        let mut gate = MockOperatorGate::new();
        gate.expect_ask()
            .withf(|pid, name, score| *pid == 5 && name == "foo.exe" && (*score - 0.55).abs() < 1e-9)
            .times(1)
            .returning(|_, _, _| false);
        let h = harness(Ok(0.55), control, gate);

        let item = discover(&h.registry, 5, "foo.exe");
        assert_eq!(h.worker.process_item(item).await, Some(ProcessStatus::Suspicious));
        h.alerts.wait_all().await;
        assert!(h.registry.is_ignored("foo.exe"));
    }

    #[tokio::test]
    async fn test_scoring_error_degrades_to_trusted() {
        let mut control = MockProcessControl::new();
        control.expect_terminate().never();
        let mut gate = MockOperatorGate::new();
        gate.expect_ask().never();
        let h = harness(Err(ScoringError::Unavailable("no model".into())), control, gate);

        let item = discover(&h.registry, 400, "x");
        assert_eq!(h.worker.process_item(item).await, Some(ProcessStatus::Trusted));
        let record = h.registry.get(400).unwrap();
        assert_eq!(record.score, Some(0.0));
        assert!(record.is_degraded());
    }

    #[tokio::test]
    async fn test_pruned_item_is_a_no_op() {
        let mut control = MockProcessControl::new();
        control.expect_terminate().never();
        let mut gate = MockOperatorGate::new();
        gate.expect_ask().never();
        let h = harness(Ok(0.95), control, gate);

        let item = discover(&h.registry, 9, "gone");
        h.registry.remove(9);
        assert_eq!(h.worker.process_item(item).await, None);
        assert!(h.registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_drains_queue_and_exits_on_close() {
        let mut control = MockProcessControl::new();
        control.expect_terminate().never();
        let mut gate = MockOperatorGate::new();
        gate.expect_ask().never();
        let h = harness(Ok(0.2), control, gate);

        let queue = WorkQueue::new();
        let pool = ScorerPool::spawn(4, queue.clone(), Arc::new(h.worker));
        assert_eq!(pool.size(), 4);
        for pid in 0..50 {
            queue.push(discover(&h.registry, pid, "p")).unwrap();
        }
        queue.close();
        pool.join().await;

        assert_eq!(queue.outstanding(), 0);
        assert_eq!(h.registry.counters().trusted, 50);
    }

    /// Simulates the pid exiting and being reused while its score is computed.
    struct ReusesPidWhileScoring {
        registry: Arc<ProcessRegistry>,
        score: f64,
    }

    #[async_trait]
    impl RiskScorer for ReusesPidWhileScoring {
        async fn score(&self, _path: &Path, display_name: &str) -> Result<f64, ScoringError> {
            if let Some(record) = self
                .registry
                .snapshot()
                .into_iter()
                .find(|record| record.display_name == display_name)
            {
                self.registry.remove(record.pid);
                self.registry
                    .register(record.pid, PathBuf::from("/usr/bin/innocent"), "innocent".to_string());
            }
            Ok(self.score)
        }
    }

    #[test_case(0.90; "critical")]
    #[test_case(0.55; "suspicious")]
    #[test_case(0.10; "trusted")]
    #[tokio::test]
    async fn test_reused_pid_is_left_alone(score: f64) {
        let registry = Arc::new(ProcessRegistry::new(Arc::new(NullSink::new())));
        let mut control = MockProcessControl::new();
        control.expect_terminate().never();
        let mut gate = MockOperatorGate::new();
        gate.expect_ask().never();
        let scorer = Arc::new(ReusesPidWhileScoring {
            registry: Arc::clone(&registry),
            score,
        });
        let h = harness_with(Arc::clone(&registry), scorer, control, gate);

        let item = discover(&registry, 2, "dropper");
        let stale_row = item.row;
        assert_eq!(h.worker.process_item(item).await, None);
        h.alerts.wait_all().await;

        let record = registry.get(2).unwrap();
        assert_eq!(record.display_name, "innocent");
        assert_ne!(record.row, stale_row);
        assert_eq!(record.status, ProcessStatus::Scanning);
        assert_eq!(record.score, None);
        assert_eq!(registry.counters().scanning, 1);
    }

    #[tokio::test]
    async fn test_panicking_scorer_degrades_to_trusted() {
        let registry = Arc::new(ProcessRegistry::new(Arc::new(NullSink::new())));
        let mut scorer = MockRiskScorer::new();
        scorer
            .expect_score()
            .returning(|_, _| panic!("model crashed"));
        let mut control = MockProcessControl::new();
        control.expect_terminate().never();
        let mut gate = MockOperatorGate::new();
        gate.expect_ask().never();
        let h = harness_with(Arc::clone(&registry), Arc::new(scorer), control, gate);

        let item = discover(&registry, 13, "boom");
        assert_eq!(h.worker.process_item(item).await, Some(ProcessStatus::Trusted));
        let record = registry.get(13).unwrap();
        assert!(record.is_degraded());
        assert_eq!(record.score, Some(0.0));
    }
}
