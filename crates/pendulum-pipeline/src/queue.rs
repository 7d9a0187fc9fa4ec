//! Bounded multi-producer/multi-consumer queue with batched, time-bounded
//! retrieval.
//!
//! Built on crossbeam's bounded channel. A second, never-written channel acts
//! as the shutdown signal: dropping its only sender disconnects it, which
//! wakes every producer blocked on a full queue and every consumer blocked
//! waiting for items.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Select, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueueError<T> {
    #[error("Queue is shut down")]
    Closed(T),

    #[error("Queue is full")]
    Full(T),
}

impl<T> QueueError<T> {
    /// Recover the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            QueueError::Closed(item) | QueueError::Full(item) => item,
        }
    }
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    closed: AtomicBool,
    capacity: usize,
}

impl<T> WorkQueue<T> {
    /// Create a queue holding at most `capacity` items (at least 1).
    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = channel::bounded(capacity);
        let (stop_tx, stop_rx) = channel::bounded(0);
        Self {
            tx,
            rx,
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// Enqueue `item`, blocking while the queue is at capacity.
    ///
    /// Fails with [`QueueError::Closed`] once [`shutdown`](Self::shutdown)
    /// has been called, including for callers already blocked.
    pub fn put(&self, item: T) -> Result<(), QueueError<T>> {
        if self.is_closed() {
            return Err(QueueError::Closed(item));
        }
        let mut sel = Select::new();
        let send = sel.send(&self.tx);
        let stop = sel.recv(&self.stop_rx);
        let oper = sel.select();
        match oper.index() {
            i if i == send => oper
                .send(&self.tx, item)
                .map_err(|e| QueueError::Closed(e.into_inner())),
            i => {
                debug_assert_eq!(i, stop);
                let _ = oper.recv(&self.stop_rx);
                Err(QueueError::Closed(item))
            }
        }
    }

    /// Enqueue without blocking.
    pub fn try_put(&self, item: T) -> Result<(), QueueError<T>> {
        if self.is_closed() {
            return Err(QueueError::Closed(item));
        }
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) => QueueError::Full(item),
            TrySendError::Disconnected(item) => QueueError::Closed(item),
        })
    }

    /// Take up to `max_items`, waiting at most `max_wait` for them to arrive.
    ///
    /// Returns early with a full batch, or at the deadline with whatever has
    /// arrived (possibly nothing). After shutdown, queued items are still
    /// handed out; once drained the call returns an empty batch immediately.
    pub fn take_batch(&self, max_items: usize, max_wait: Duration) -> Vec<T> {
        self.take_batch_with(max_items, max_wait, || {})
    }

    /// Like [`take_batch`](Self::take_batch), calling `on_first` as soon as the
    /// first item is in hand, before waiting for the rest of the batch.
    pub fn take_batch_with<F: FnOnce()>(
        &self,
        max_items: usize,
        max_wait: Duration,
        on_first: F,
    ) -> Vec<T> {
        let deadline = Instant::now() + max_wait;
        let mut batch = Vec::new();
        let mut on_first = Some(on_first);
        let mut push = |batch: &mut Vec<T>, item: T| {
            batch.push(item);
            if let Some(f) = on_first.take() {
                f();
            }
        };

        while batch.len() < max_items {
            match self.rx.try_recv() {
                Ok(item) => {
                    push(&mut batch, item);
                    continue;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => break,
            }
            if self.is_closed() {
                break;
            }

            let mut sel = Select::new();
            let recv = sel.recv(&self.rx);
            let stop = sel.recv(&self.stop_rx);
            let oper = match sel.select_deadline(deadline) {
                Ok(oper) => oper,
                Err(_) => break,
            };
            if oper.index() == recv {
                match oper.recv(&self.rx) {
                    Ok(item) => push(&mut batch, item),
                    Err(_) => break,
                }
            } else {
                debug_assert_eq!(oper.index(), stop);
                // Disconnected: loop once more to drain, then observe `closed`.
                let _ = oper.recv(&self.stop_rx);
            }
        }
        batch
    }

    /// Reject further puts and wake every blocked caller.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stop_tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
