//! Presentation callback surface
//!
//! The core never renders. It calls a [`PresentationSink`] from inside the
//! registry's critical section, so callbacks arrive in registry order; a
//! sink that owns a UI marshals them onto its own loop. [`ChannelSink`]
//! does exactly that with an unbounded channel and a single consumer.

use crate::process_record::{Annotation, ProcessStatus, RowHandle, RowView};
use colored::Colorize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    Scanning,
    Trusted,
    Suspicious,
    Blocked,
}

impl CounterKind {
    pub const ALL: [CounterKind; 4] = [
        CounterKind::Scanning,
        CounterKind::Trusted,
        CounterKind::Suspicious,
        CounterKind::Blocked,
    ];

    pub fn for_status(status: ProcessStatus) -> Self {
        match status {
            ProcessStatus::Scanning => CounterKind::Scanning,
            ProcessStatus::Trusted => CounterKind::Trusted,
            ProcessStatus::Suspicious => CounterKind::Suspicious,
            ProcessStatus::Critical => CounterKind::Blocked,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CounterKind::Scanning => "scanning",
            CounterKind::Trusted => "trusted",
            CounterKind::Suspicious => "suspicious",
            CounterKind::Blocked => "blocked",
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub trait PresentationSink: Send + Sync {
    /// Allocate a row for a newly discovered process.
    fn row_created(&self, pid: u32) -> RowHandle;
    fn row_updated(&self, row: RowHandle, view: &RowView);
    fn counter_changed(&self, counter: CounterKind, value: u64);
    fn row_removed(&self, _row: RowHandle) {}
}

/// Hands out row handles and drops every update.
#[derive(Debug, Default)]
pub struct NullSink {
    next_row: AtomicU64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresentationSink for NullSink {
    fn row_created(&self, _pid: u32) -> RowHandle {
        RowHandle(self.next_row.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn row_updated(&self, _row: RowHandle, _view: &RowView) {}

    fn counter_changed(&self, _counter: CounterKind, _value: u64) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresentationEvent {
    RowCreated { row: RowHandle, pid: u32 },
    RowUpdated { row: RowHandle, view: RowView },
    CounterChanged { counter: CounterKind, value: u64 },
    RowRemoved { row: RowHandle },
}

/// Forwards callbacks as [`PresentationEvent`]s to one consumer.
#[derive(Debug)]
pub struct ChannelSink {
    next_row: AtomicU64,
    tx: mpsc::UnboundedSender<PresentationEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PresentationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                next_row: AtomicU64::new(0),
                tx,
            },
            rx,
        )
    }

    fn emit(&self, event: PresentationEvent) {
        // A closed receiver means the UI is gone; the pipeline keeps going.
        let _ = self.tx.send(event);
    }
}

impl PresentationSink for ChannelSink {
    fn row_created(&self, pid: u32) -> RowHandle {
        let row = RowHandle(self.next_row.fetch_add(1, Ordering::Relaxed) + 1);
        self.emit(PresentationEvent::RowCreated { row, pid });
        row
    }

    fn row_updated(&self, row: RowHandle, view: &RowView) {
        self.emit(PresentationEvent::RowUpdated {
            row,
            view: view.clone(),
        });
    }

    fn counter_changed(&self, counter: CounterKind, value: u64) {
        self.emit(PresentationEvent::CounterChanged { counter, value });
    }

    fn row_removed(&self, row: RowHandle) {
        self.emit(PresentationEvent::RowRemoved { row });
    }
}

/// One console line for a row, colored by status.
pub fn format_row(view: &RowView) -> String {
    let status = match view.status {
        ProcessStatus::Scanning => view.status.as_str().blue(),
        ProcessStatus::Trusted => view.status.as_str().green(),
        ProcessStatus::Suspicious => view.status.as_str().yellow().bold(),
        ProcessStatus::Critical => view.status.as_str().red().bold(),
    };

    let mut line = format!(
        "{:>7}  {:<32}  {:>7}  {}",
        view.pid,
        truncate(&view.display_name, 32),
        view.score_label(),
        status
    );

    if !view.annotations.is_empty() {
        let notes: Vec<String> = view.annotations.iter().map(Annotation::to_string).collect();
        line.push_str(&format!("  [{}]", notes.join(", ")).dimmed().to_string());
    }
    line
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let head: String = value.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

/// Single-writer console loop: the only place that prints pipeline state.
pub async fn run_console_renderer(mut rx: mpsc::UnboundedReceiver<PresentationEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PresentationEvent::RowCreated { .. } | PresentationEvent::RowRemoved { .. } => {}
            PresentationEvent::RowUpdated { view, .. } => {
                if view.status != ProcessStatus::Scanning {
                    println!("{}", format_row(&view));
                }
            }
            PresentationEvent::CounterChanged { counter, value } => {
                tracing::debug!(counter = counter.name(), value, "counter changed");
            }
        }
    }
}
