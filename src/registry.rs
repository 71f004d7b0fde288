//! Process Registry
//!
//! Single source of truth for what the pipeline knows about each pid. Every
//! mutation takes the same lock, updates the record, the derived counters and
//! the row index together, and notifies the presentation sink before
//! releasing it. Readers only ever get clones.

use crate::{
    error::RegistryError,
    logging::{debug, warn},
    presentation::{CounterKind, PresentationSink},
    process_record::{Annotation, ProcessRecord, ProcessStatus, RowHandle, WorkItem},
};
use chrono::Utc;
use dashmap::DashSet;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Per-status tallies; always equal to the number of records in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub scanning: u64,
    pub trusted: u64,
    pub suspicious: u64,
    pub blocked: u64,
}

impl Counters {
    pub fn get(&self, kind: CounterKind) -> u64 {
        match kind {
            CounterKind::Scanning => self.scanning,
            CounterKind::Trusted => self.trusted,
            CounterKind::Suspicious => self.suspicious,
            CounterKind::Blocked => self.blocked,
        }
    }

    fn slot_mut(&mut self, kind: CounterKind) -> &mut u64 {
        match kind {
            CounterKind::Scanning => &mut self.scanning,
            CounterKind::Trusted => &mut self.trusted,
            CounterKind::Suspicious => &mut self.suspicious,
            CounterKind::Blocked => &mut self.blocked,
        }
    }

    pub fn total(&self) -> u64 {
        self.scanning + self.trusted + self.suspicious + self.blocked
    }
}

#[derive(Default)]
struct RegistryState {
    records: HashMap<u32, ProcessRecord>,
    rows: HashMap<RowHandle, u32>,
    counters: Counters,
}

pub struct ProcessRegistry {
    state: Mutex<RegistryState>,
    ignore: DashSet<String>,
    sink: Arc<dyn PresentationSink>,
}

impl std::fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("counters", &self.counters())
            .field("ignored", &self.ignore.len())
            .finish()
    }
}

impl ProcessRegistry {
    pub fn new(sink: Arc<dyn PresentationSink>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            ignore: DashSet::new(),
            sink,
        }
    }

    fn bump(&self, counters: &mut Counters, status: ProcessStatus, up: bool) {
        let kind = CounterKind::for_status(status);
        let slot = counters.slot_mut(kind);
        *slot = if up { *slot + 1 } else { slot.saturating_sub(1) };
        self.sink.counter_changed(kind, *slot);
    }

    /// Check-and-insert a freshly discovered process.
    ///
    /// Returns the work item to enqueue, or `None` when the pid is already
    /// known in any status.
    pub fn register(&self, pid: u32, executable_path: PathBuf, display_name: String) -> Option<WorkItem> {
        let mut state = self.state.lock();
        if state.records.contains_key(&pid) {
            return None;
        }

        let row = self.sink.row_created(pid);
        let record = ProcessRecord::new(pid, executable_path, display_name, row);
        let item = WorkItem {
            pid,
            executable_path: record.executable_path.clone(),
            display_name: record.display_name.clone(),
            row,
        };

        self.sink.row_updated(row, &record.view());
        state.rows.insert(row, pid);
        state.records.insert(pid, record);
        self.bump(&mut state.counters, ProcessStatus::Scanning, true);
        Some(item)
    }

    /// Insert a record, or merge it into the existing one for that pid.
    ///
    /// A status change on an existing record must pass the forward-only
    /// check; the existing row handle is kept.
    pub fn upsert(&self, record: ProcessRecord) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        let state = &mut *state;

        match state.records.get_mut(&record.pid) {
            None => {
                let pid = record.pid;
                let status = record.status;
                state.rows.insert(record.row, pid);
                self.sink.row_updated(record.row, &record.view());
                state.records.insert(pid, record);
                self.bump(&mut state.counters, status, true);
            }
            Some(existing) => {
                let from = existing.status;
                if from != record.status && !from.can_transition_to(record.status) {
                    warn(format!(
                        "upsert rejected for pid={}: {} -> {}",
                        record.pid, from, record.status
                    ));
                    return Err(RegistryError::Conflict {
                        pid: record.pid,
                        from,
                        to: record.status,
                    });
                }

                existing.executable_path = record.executable_path;
                existing.display_name = record.display_name;
                if record.score.is_some() {
                    existing.score = record.score;
                }
                existing.annotations.extend(record.annotations);
                existing.status = record.status;
                existing.updated_at = Utc::now();
                self.sink.row_updated(existing.row, &existing.view());

                if from != record.status {
                    self.bump(&mut state.counters, from, false);
                    self.bump(&mut state.counters, record.status, true);
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, pid: u32) -> Option<ProcessRecord> {
        self.state.lock().records.get(&pid).cloned()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.state.lock().records.contains_key(&pid)
    }

    /// Move a record to `to`, recording the score and any annotations.
    ///
    /// Backward or sideways moves are rejected and leave the record as it was.
    pub fn transition(
        &self,
        pid: u32,
        to: ProcessStatus,
        score: Option<f64>,
        annotations: &[Annotation],
    ) -> Result<ProcessRecord, RegistryError> {
        self.apply_transition(pid, None, to, score, annotations)
    }

    /// [`ProcessRegistry::transition`] for the record discovered on `row`.
    ///
    /// A pid that was pruned and discovered again has a new row; the old
    /// holder gets `NotFound` and the new record is left alone.
    pub fn transition_row(
        &self,
        pid: u32,
        row: RowHandle,
        to: ProcessStatus,
        score: Option<f64>,
        annotations: &[Annotation],
    ) -> Result<ProcessRecord, RegistryError> {
        self.apply_transition(pid, Some(row), to, score, annotations)
    }

    fn apply_transition(
        &self,
        pid: u32,
        row: Option<RowHandle>,
        to: ProcessStatus,
        score: Option<f64>,
        annotations: &[Annotation],
    ) -> Result<ProcessRecord, RegistryError> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let record = state
            .records
            .get_mut(&pid)
            .filter(|record| row.map_or(true, |row| record.row == row))
            .ok_or(RegistryError::NotFound(pid))?;

        let from = record.status;
        if !from.can_transition_to(to) {
            warn(format!("transition rejected for pid={pid}: {from} -> {to}"));
            return Err(RegistryError::Conflict { pid, from, to });
        }

        if score.is_some() {
            record.score = score;
        }
        record.annotations.extend(annotations.iter().copied());
        record.status = to;
        record.updated_at = Utc::now();
        self.sink.row_updated(record.row, &record.view());
        let snapshot = record.clone();

        self.bump(&mut state.counters, from, false);
        self.bump(&mut state.counters, to, true);
        debug(format!("pid={pid} {from} -> {to}"));
        Ok(snapshot)
    }

    /// Attach an annotation without changing status.
    pub fn annotate(&self, pid: u32, annotation: Annotation) -> Result<(), RegistryError> {
        self.apply_annotation(pid, None, annotation)
    }

    /// [`ProcessRegistry::annotate`], only if `pid` is still the record on `row`.
    pub fn annotate_row(
        &self,
        pid: u32,
        row: RowHandle,
        annotation: Annotation,
    ) -> Result<(), RegistryError> {
        self.apply_annotation(pid, Some(row), annotation)
    }

    fn apply_annotation(
        &self,
        pid: u32,
        row: Option<RowHandle>,
        annotation: Annotation,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        let record = state
            .records
            .get_mut(&pid)
            .filter(|record| row.map_or(true, |row| record.row == row))
            .ok_or(RegistryError::NotFound(pid))?;
        if record.annotations.insert(annotation) {
            record.updated_at = Utc::now();
            self.sink.row_updated(record.row, &record.view());
        }
        Ok(())
    }

    /// The record for `pid`, if it is still the one discovered on `row`.
    pub fn get_row(&self, pid: u32, row: RowHandle) -> Option<ProcessRecord> {
        self.state
            .lock()
            .records
            .get(&pid)
            .filter(|record| record.row == row)
            .cloned()
    }

    pub fn exists_row(&self, row: RowHandle) -> bool {
        self.state.lock().rows.contains_key(&row)
    }

    pub fn counters(&self) -> Counters {
        self.state.lock().counters
    }

    pub fn remove(&self, pid: u32) -> Option<ProcessRecord> {
        let mut state = self.state.lock();
        let record = state.records.remove(&pid)?;
        state.rows.remove(&record.row);
        self.bump(&mut state.counters, record.status, false);
        self.sink.row_removed(record.row);
        Some(record)
    }

    /// Drop every record whose pid is not in `alive`; returns the removed pids.
    pub fn retain_alive(&self, alive: &HashSet<u32>) -> Vec<u32> {
        let mut state = self.state.lock();
        let state = &mut *state;

        let gone: Vec<u32> = state
            .records
            .keys()
            .filter(|pid| !alive.contains(*pid))
            .copied()
            .collect();

        for pid in &gone {
            if let Some(record) = state.records.remove(pid) {
                state.rows.remove(&record.row);
                self.bump(&mut state.counters, record.status, false);
                self.sink.row_removed(record.row);
            }
        }
        gone
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records, ordered by pid.
    pub fn snapshot(&self) -> Vec<ProcessRecord> {
        let state = self.state.lock();
        let mut records: Vec<ProcessRecord> = state.records.values().cloned().collect();
        records.sort_by_key(|record| record.pid);
        records
    }

    /// Add a name to the session ignore-list; returns false if already present.
    pub fn ignore_name(&self, name: &str) -> bool {
        self.ignore.insert(name.to_string())
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignore.contains(name)
    }

    pub fn ignored_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ignore.iter().map(|name| name.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::NullSink;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::thread;

    fn registry() -> ProcessRegistry {
        ProcessRegistry::new(Arc::new(NullSink::new()))
    }

    fn register(reg: &ProcessRegistry, pid: u32) -> WorkItem {
        reg.register(pid, PathBuf::from(format!("/opt/bin/p{pid}")), format!("p{pid}"))
            .expect("new pid registers")
    }

    #[test]
    fn test_register_is_idempotent_per_pid() {
        let reg = registry();
        let item = register(&reg, 100);
        assert_eq!(item.pid, 100);
        assert!(reg.register(100, PathBuf::from("/other"), "other".into()).is_none());

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.counters().scanning, 1);
        assert_eq!(reg.get(100).unwrap().display_name, "p100");
    }

    #[test]
    fn test_transition_moves_counters() {
        let reg = registry();
        register(&reg, 1);
        register(&reg, 2);

        reg.transition(1, ProcessStatus::Critical, Some(0.9), &[]).unwrap();
        reg.transition(2, ProcessStatus::Suspicious, Some(0.5), &[]).unwrap();

        assert_eq!(
            reg.counters(),
            Counters {
                scanning: 0,
                trusted: 0,
                suspicious: 1,
                blocked: 1
            }
        );

        reg.transition(2, ProcessStatus::Critical, None, &[]).unwrap();
        let record = reg.get(2).unwrap();
        assert_eq!(record.status, ProcessStatus::Critical);
        assert_eq!(record.score, Some(0.5));
        assert_eq!(reg.counters().blocked, 2);
        assert_eq!(reg.counters().suspicious, 0);
    }

    #[test]
    fn test_backward_transition_is_rejected_and_state_kept() {
        let reg = registry();
        register(&reg, 7);
        reg.transition(7, ProcessStatus::Critical, Some(0.8), &[]).unwrap();
        let before = reg.counters();

        let err = reg
            .transition(7, ProcessStatus::Trusted, Some(0.1), &[])
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Conflict {
                pid: 7,
                from: ProcessStatus::Critical,
                to: ProcessStatus::Trusted
            }
        );
        let record = reg.get(7).unwrap();
        assert_eq!(record.status, ProcessStatus::Critical);
        assert_eq!(record.score, Some(0.8));
        assert_eq!(reg.counters(), before);
    }

    #[test]
    fn test_transition_unknown_pid() {
        let reg = registry();
        assert_eq!(
            reg.transition(1, ProcessStatus::Trusted, None, &[]).unwrap_err(),
            RegistryError::NotFound(1)
        );
    }

    #[test]
    fn test_annotations_accumulate() {
        let reg = registry();
        register(&reg, 3);
        reg.transition(3, ProcessStatus::Trusted, Some(0.0), &[Annotation::ScoringUnavailable])
            .unwrap();
        assert!(reg.get(3).unwrap().is_degraded());
        reg.annotate(3, Annotation::TerminationFailed).unwrap();
        assert_eq!(reg.get(3).unwrap().annotations.len(), 2);
    }

    #[test]
    fn test_upsert_inserts_and_guards_status() {
        let reg = registry();
        let mut record = ProcessRecord::new(50, PathBuf::from("/a"), "a".into(), RowHandle(99));
        reg.upsert(record.clone()).unwrap();
        assert!(reg.exists_row(RowHandle(99)));
        assert_eq!(reg.counters().scanning, 1);

        record.status = ProcessStatus::Trusted;
        record.score = Some(0.2);
        reg.upsert(record.clone()).unwrap();
        assert_eq!(reg.counters().trusted, 1);
        assert_eq!(reg.counters().scanning, 0);

        record.status = ProcessStatus::Scanning;
        assert!(matches!(reg.upsert(record), Err(RegistryError::Conflict { .. })));
        assert_eq!(reg.get(50).unwrap().status, ProcessStatus::Trusted);
    }

    #[test]
    fn test_retain_alive_prunes_rows_and_counters() {
        let reg = registry();
        let a = register(&reg, 1);
        register(&reg, 2);
        reg.transition(2, ProcessStatus::Critical, Some(0.9), &[]).unwrap();

        let removed = reg.retain_alive(&HashSet::from([2]));
        assert_eq!(removed, vec![1]);
        assert!(!reg.exists_row(a.row));
        assert_eq!(reg.counters().scanning, 0);
        assert_eq!(reg.counters().blocked, 1);

        // A reused pid is a fresh discovery.
        assert!(reg.register(1, PathBuf::from("/new"), "new".into()).is_some());
    }

    #[test]
    fn test_row_guarded_updates_skip_reused_pid() {
        let reg = registry();
        let stale = register(&reg, 2);
        reg.remove(2);
        let fresh = reg
            .register(2, PathBuf::from("/usr/bin/innocent"), "innocent".into())
            .unwrap();
        assert_ne!(stale.row, fresh.row);

        assert_eq!(
            reg.transition_row(2, stale.row, ProcessStatus::Critical, Some(0.9), &[])
                .unwrap_err(),
            RegistryError::NotFound(2)
        );
        assert_eq!(
            reg.annotate_row(2, stale.row, Annotation::TerminationFailed),
            Err(RegistryError::NotFound(2))
        );
        assert!(reg.get_row(2, stale.row).is_none());

        let record = reg.get_row(2, fresh.row).unwrap();
        assert_eq!(record.status, ProcessStatus::Scanning);
        assert!(record.annotations.is_empty());
        assert_eq!(reg.counters().scanning, 1);
        assert_eq!(reg.counters().blocked, 0);

        reg.transition_row(2, fresh.row, ProcessStatus::Trusted, Some(0.1), &[])
            .unwrap();
        assert_eq!(reg.counters().trusted, 1);
    }

    #[test]
    fn test_ignore_set() {
        let reg = registry();
        assert!(!reg.is_ignored("foo.exe"));
        assert!(reg.ignore_name("foo.exe"));
        assert!(!reg.ignore_name("foo.exe"));
        assert!(reg.is_ignored("foo.exe"));
        assert_eq!(reg.ignored_names(), vec!["foo.exe".to_string()]);
    }

    #[test]
    fn test_concurrent_register_same_pids_never_duplicates() {
        const THREADS: usize = 8;
        const PIDS: u32 = 500;

        let reg = Arc::new(registry());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    (0..PIDS)
                        .filter(|pid| {
                            reg.register(*pid, PathBuf::from("/p"), "p".into()).is_some()
                        })
                        .count()
                })
            })
            .collect();

        let created: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(created, PIDS as usize);
        assert_eq!(reg.len(), PIDS as usize);
        assert_eq!(reg.counters().scanning, PIDS as u64);
    }

    #[test]
    fn test_concurrent_transitions_no_lost_updates() {
        const THREADS: u32 = 8;
        const PER_THREAD: u32 = 250;

        let reg = Arc::new(registry());
        for pid in 0..THREADS * PER_THREAD {
            register(&reg, pid);
        }

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let pid = t * PER_THREAD + i;
                        let to = match pid % 3 {
                            0 => ProcessStatus::Trusted,
                            1 => ProcessStatus::Suspicious,
                            _ => ProcessStatus::Critical,
                        };
                        reg.transition(pid, to, Some(0.5), &[]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let counters = reg.counters();
        let total = (THREADS * PER_THREAD) as u64;
        assert_eq!(counters.scanning, 0);
        assert_eq!(counters.total(), total);
        let critical = reg
            .snapshot()
            .iter()
            .filter(|r| r.status == ProcessStatus::Critical)
            .count() as u64;
        assert_eq!(counters.blocked, critical);
    }

    fn status_strategy() -> impl Strategy<Value = ProcessStatus> {
        prop_oneof![
            Just(ProcessStatus::Scanning),
            Just(ProcessStatus::Trusted),
            Just(ProcessStatus::Suspicious),
            Just(ProcessStatus::Critical),
        ]
    }

    proptest! {
        #[test]
        fn prop_counters_match_records_after_any_transition_sequence(
            steps in proptest::collection::vec((0u32..5, status_strategy()), 0..60)
        ) {
            let reg = registry();
            for pid in 0..5 {
                register(&reg, pid);
            }
            for (pid, to) in steps {
                let before = reg.get(pid).unwrap().status;
                let result = reg.transition(pid, to, None, &[]);
                prop_assert_eq!(result.is_ok(), before.can_transition_to(to));
            }

            let records = reg.snapshot();
            let count = |s: ProcessStatus| records.iter().filter(|r| r.status == s).count() as u64;
            let counters = reg.counters();
            prop_assert_eq!(counters.scanning, count(ProcessStatus::Scanning));
            prop_assert_eq!(counters.trusted, count(ProcessStatus::Trusted));
            prop_assert_eq!(counters.suspicious, count(ProcessStatus::Suspicious));
            prop_assert_eq!(counters.blocked, count(ProcessStatus::Critical));
            prop_assert_eq!(counters.total(), records.len() as u64);
        }
    }
}
