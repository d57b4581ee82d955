use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Determines how a full queue treats a new item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discipline {
    /// Block the producer until space is available
    #[default]
    Block,
    /// Drop the oldest item to make room; the new item is always admitted
    Sliding,
    /// Silently discard the new item
    Dropping,
}

/// Create a bounded queue of the given capacity and overflow discipline.
///
/// The sender side may be cloned freely; the receiver side is owned by the
/// single consumer. Dropping the receiver (or calling [`QueueReceiver::close`])
/// fails all current and future puts.
pub fn bounded_queue<T>(capacity: usize, discipline: Discipline) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = bounded(capacity.max(1));
    let closed = Arc::new(AtomicBool::new(false));
    // Sliding producers displace the oldest item themselves when full.
    let steal = matches!(discipline, Discipline::Sliding).then(|| rx.clone());
    let sender = QueueSender {
        tx,
        steal,
        discipline,
        closed: Arc::clone(&closed),
        dropped: Arc::new(AtomicU64::new(0)),
        blocked: Arc::new(AtomicU64::new(0)),
    };
    (sender, QueueReceiver { rx, closed })
}

/// Producer endpoint of a bounded queue
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: Sender<T>,
    steal: Option<Receiver<T>>,
    discipline: Discipline,
    closed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    blocked: Arc<AtomicU64>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            steal: self.steal.clone(),
            discipline: self.discipline,
            closed: Arc::clone(&self.closed),
            dropped: Arc::clone(&self.dropped),
            blocked: Arc::clone(&self.blocked),
        }
    }
}

impl<T> QueueSender<T> {
    /// Put an item into the queue, honoring the overflow discipline.
    ///
    /// Returns the item back when the queue is closed.
    pub fn put(&self, item: T) -> std::result::Result<(), T> {
        if self.closed.load(Ordering::Acquire) {
            return Err(item);
        }
        match self.discipline {
            Discipline::Block => match self.tx.try_send(item) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(item)) => {
                    self.blocked.fetch_add(1, Ordering::Relaxed);
                    self.tx.send(item).map_err(|e| e.into_inner())
                }
                Err(TrySendError::Disconnected(item)) => Err(item),
            },
            Discipline::Sliding => {
                let mut item = item;
                loop {
                    match self.tx.try_send(item) {
                        Ok(()) => return Ok(()),
                        Err(TrySendError::Full(back)) => {
                            item = back;
                            if let Some(steal) = &self.steal {
                                if steal.try_recv().is_ok() {
                                    self.dropped.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                            if self.closed.load(Ordering::Acquire) {
                                return Err(item);
                            }
                        }
                        Err(TrySendError::Disconnected(back)) => return Err(back),
                    }
                }
            }
            Discipline::Dropping => match self.tx.try_send(item) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(TrySendError::Disconnected(item)) => Err(item),
            },
        }
    }

    /// Current number of queued items
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Whether the queue is currently empty
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Capacity the queue was created with
    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }

    /// Overflow discipline of this queue
    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// Number of items displaced or discarded by the overflow discipline
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared handle on the dropped counter, for owners that outlive the
    /// sender itself
    pub(crate) fn dropped_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    /// Number of puts that had to wait for space
    pub fn blocked_count(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }
}

/// Consumer endpoint of a bounded queue
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: Receiver<T>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T> QueueReceiver<T> {
    /// Blocking take. Returns `None` once the queue is drained and every
    /// sender is gone.
    pub fn take(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Non-blocking take
    pub fn try_take(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Mark the queue closed. Subsequent puts fail; producers blocked on a
    /// full queue are released when the receiver is dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Raw channel endpoint, used to select over several queues at once
    pub(crate) fn inner(&self) -> &Receiver<T> {
        &self.rx
    }
}
