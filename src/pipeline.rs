//! Pipeline wiring
//!
//! Builds every component from a [`ShieldConfig`] plus optional collaborator
//! overrides and drives them:
//! producer tick → discovery → queue → scorer pool → registry / alerts.
//!
//! Shutdown order: stop the producer, close the queue, let the workers
//! finish what is queued, then give pending alerts `shutdown_grace` before
//! abandoning them.

use crate::config::ShieldConfig;
use crate::control::{ProcessControl, SystemProcessControl};
use crate::discovery::{DiscoveryFilter, TickReport};
use crate::error::{ConfigError, SourceError};
use crate::gate::{gate_for_mode, AlertDispatcher, OperatorGate};
use crate::pool::{ScorerPool, ScoringWorker};
use crate::presentation::{NullSink, PresentationSink};
use crate::process_record::ProcessRecord;
use crate::queue::WorkQueue;
use crate::registry::{Counters, ProcessRegistry};
use crate::scoring::{HeuristicScorer, RiskScorer};
use crate::signal::Shutdown;
use crate::source::{ProcessSource, SystemProcessSource};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub struct PipelineBuilder {
    config: ShieldConfig,
    sink: Option<Arc<dyn PresentationSink>>,
    source: Option<Arc<dyn ProcessSource>>,
    scorer: Option<Arc<dyn RiskScorer>>,
    control: Option<Arc<dyn ProcessControl>>,
    gate: Option<Arc<dyn OperatorGate>>,
}

impl PipelineBuilder {
    pub fn new(config: ShieldConfig) -> Self {
        Self {
            config,
            sink: None,
            source: None,
            scorer: None,
            control: None,
            gate: None,
        }
    }

    pub fn sink(mut self, sink: Arc<dyn PresentationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn source(mut self, source: Arc<dyn ProcessSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn scorer(mut self, scorer: Arc<dyn RiskScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn control(mut self, control: Arc<dyn ProcessControl>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn gate(mut self, gate: Arc<dyn OperatorGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Validate the config and assemble the pipeline. Nothing is spawned yet.
    pub fn build(self) -> Result<Pipeline, ConfigError> {
        let config = self.config;
        config.validate()?;

        let sink = self.sink.unwrap_or_else(|| Arc::new(NullSink::new()));
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(SystemProcessSource));
        let scorer = self
            .scorer
            .unwrap_or_else(|| Arc::new(HeuristicScorer::from_config(&config)));
        let control = self
            .control
            .unwrap_or_else(|| Arc::new(SystemProcessControl::default()));
        let gate = self.gate.unwrap_or_else(|| gate_for_mode(config.gate));

        let registry = Arc::new(ProcessRegistry::new(sink));
        let discovery = Arc::new(DiscoveryFilter::from_config(Arc::clone(&registry), &config)?);
        let alerts = Arc::new(AlertDispatcher::new(
            gate,
            Arc::clone(&control),
            Arc::clone(&registry),
            config.max_pending_prompts,
            config.dismiss_marks_trusted,
        ));
        let worker = Arc::new(ScoringWorker::new(
            Arc::clone(&registry),
            scorer,
            control,
            Arc::clone(&alerts),
            config.thresholds,
            config.scoring_timeout(),
        ));

        Ok(Pipeline {
            config,
            registry,
            source,
            discovery,
            queue: WorkQueue::new(),
            alerts,
            worker,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub counters: Counters,
    pub abandoned_alerts: usize,
}

pub struct Pipeline {
    config: ShieldConfig,
    registry: Arc<ProcessRegistry>,
    source: Arc<dyn ProcessSource>,
    discovery: Arc<DiscoveryFilter>,
    queue: WorkQueue,
    alerts: Arc<AlertDispatcher>,
    worker: Arc<ScoringWorker>,
}

impl Pipeline {
    pub fn builder(config: ShieldConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &ShieldConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn spawn_workers(&self) -> ScorerPool {
        ScorerPool::spawn(
            self.config.worker_count,
            self.queue.clone(),
            Arc::clone(&self.worker),
        )
    }

    /// One discovery pass; the listing runs on the blocking pool.
    pub async fn tick_once(&self) -> Result<TickReport, SourceError> {
        let discovery = Arc::clone(&self.discovery);
        let source = Arc::clone(&self.source);
        let queue = self.queue.clone();

        tokio::task::spawn_blocking(move || discovery.tick(source.as_ref(), &queue))
            .await
            .map_err(|err| SourceError::Listing(format!("discovery task failed: {err}")))?
    }

    /// Wait until every queued item is processed and every alert resolved.
    /// Needs running workers.
    pub async fn wait_idle(&self) {
        loop {
            self.queue.drained().await;
            self.alerts.wait_all().await;
            if self.queue.outstanding() == 0 {
                return;
            }
        }
    }

    /// Close the queue, drain the workers, then bound the wait on alerts.
    /// Returns the number of alerts abandoned.
    pub async fn shutdown(&self, pool: ScorerPool) -> usize {
        self.queue.close();
        pool.join().await;
        self.alerts.shutdown(self.config.shutdown_grace()).await
    }

    /// Discover, score and resolve once, then shut down.
    pub async fn scan_once(&self) -> Result<(TickReport, Vec<ProcessRecord>), SourceError> {
        let pool = self.spawn_workers();
        let report = self.tick_once().await;
        if report.is_ok() {
            self.wait_idle().await;
        }
        self.shutdown(pool).await;
        Ok((report?, self.registry.snapshot()))
    }

    /// Tick on the configured interval until `shutdown` fires.
    pub async fn run(&self, shutdown: Shutdown) -> RunSummary {
        info!(
            "Monitoring processes every {:?} with {} scorer worker(s)",
            self.config.tick_interval(),
            self.config.worker_count
        );
        let pool = self.spawn_workers();

        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    ticks += 1;
                    match self.tick_once().await {
                        Ok(report) => debug!(
                            "tick {}: observed={} queued={} pruned={}",
                            ticks, report.observed, report.queued, report.pruned
                        ),
                        Err(err) => warn!("Process listing failed: {}", err),
                    }
                }
            }
        }

        info!("Stopping: draining {} queued item(s)", self.queue.outstanding());
        let abandoned_alerts = self.shutdown(pool).await;
        let summary = RunSummary {
            ticks,
            counters: self.registry.counters(),
            abandoned_alerts,
        };
        info!(
            "Stopped after {} tick(s): trusted={} suspicious={} blocked={}",
            summary.ticks,
            summary.counters.trusted,
            summary.counters.suspicious,
            summary.counters.blocked
        );
        summary
    }
}
