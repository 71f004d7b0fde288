//! Work Queue: unbounded FIFO from discovery to the scorer workers.
//!
//! Any number of producers push; any number of workers pop. The receiver is
//! shared behind an async mutex, so each item is handed to exactly one
//! worker. Closing drops the sender: workers drain what is left and then see
//! `None`. Workers call [`WorkQueue::done`] after finishing an item so
//! [`WorkQueue::outstanding`] covers both queued and in-hand items, and
//! [`WorkQueue::drained`] can wait for it to reach zero.

use crate::process_record::WorkItem;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

struct QueueInner {
    tx: Mutex<Option<mpsc::UnboundedSender<WorkItem>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    outstanding: AtomicUsize,
    drained: Notify,
}

impl QueueInner {
    fn release(&self) {
        let released = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if released == Ok(1) {
            self.drained.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("outstanding", &self.outstanding())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                tx: Mutex::new(Some(tx)),
                rx: tokio::sync::Mutex::new(rx),
                outstanding: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        }
    }

    /// Enqueue an item; hands it back if the queue is closed.
    pub fn push(&self, item: WorkItem) -> Result<(), WorkItem> {
        let guard = self.inner.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(item);
        };
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        tx.send(item).map_err(|err| {
            self.inner.release();
            err.0
        })
    }

    /// Next item, or `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<WorkItem> {
        let mut rx = self.inner.rx.lock().await;
        rx.recv().await
    }

    /// Mark one popped item as finished.
    pub fn done(&self) {
        self.inner.release();
    }

    /// Resolves once every pushed item has been marked done.
    pub async fn drained(&self) {
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        self.inner.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.tx.lock().is_none()
    }

    /// Items pushed and not yet marked done.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }
}
