//! Subscriber registry for log fan-out.
//!
//! Delivery is best-effort: every subscriber owns a bounded buffer, and a
//! record that does not fit is dropped for that subscriber only. Publishing
//! never waits, so a slow WebSocket client cannot stall reconciliation.

use crate::record::LogRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Accepts one structured record per call.
pub trait LogPublisher: Send + Sync {
    fn publish(&self, record: LogRecord);
}

impl<P: LogPublisher + ?Sized> LogPublisher for Arc<P> {
    fn publish(&self, record: LogRecord) {
        (**self).publish(record);
    }
}

#[derive(Debug)]
struct Registry {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<LogRecord>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
    capacity: usize,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, mpsc::Sender<LogRecord>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fans log records out to attached subscribers.
#[derive(Debug, Clone)]
pub struct LogHub {
    registry: Arc<Registry>,
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl LogHub {
    /// Per-subscriber buffer size used by [`LogHub::default`].
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Attaches a subscriber. It is detached when the [`Subscription`] drops.
    pub fn subscribe(&self) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.registry.capacity);
        self.registry.lock().insert(id, tx);
        Subscription {
            id,
            receiver: rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Detaches a subscriber by id. Returns false if it was not attached.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.registry.lock().remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Records dropped because a subscriber's buffer was full.
    pub fn dropped(&self) -> u64 {
        self.registry.dropped.load(Ordering::Relaxed)
    }
}

impl LogPublisher for LogHub {
    fn publish(&self, record: LogRecord) {
        let mut subscribers = self.registry.lock();
        subscribers.retain(|_, tx| match tx.try_send(record.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.registry.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

/// A live attachment to a [`LogHub`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<LogRecord>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next record. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<LogRecord> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LogRecord> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(&self.id);
        }
    }
}
