//! Snapshot fan-out to independent consumers.
//!
//! Every consumer owns a bounded queue. Publishing never waits: when a queue is
//! full its oldest intermediate snapshot is dropped. Final snapshots are never
//! dropped and are redelivered until the consumer acknowledges them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::snapshot::Snapshot;

const DEFAULT_REDELIVERY: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Unacked {
    snapshot: Arc<Snapshot>,
    due: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Arc<Snapshot>>,
    unacked: Vec<Unacked>,
    dropped: u64,
    closed: bool,
}

#[derive(Debug)]
struct ConsumerQueue {
    id: u64,
    name: String,
    capacity: usize,
    redelivery: Duration,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl ConsumerQueue {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, snapshot: &Arc<Snapshot>) {
        let mut st = self.state();
        if st.items.len() >= self.capacity
            && let Some(idx) = st.items.iter().position(|s| !s.is_final())
        {
            st.items.remove(idx);
            st.dropped += 1;
            tracing::trace!(consumer = %self.name, "queue full, dropped oldest intermediate snapshot");
        }
        st.items.push_back(Arc::clone(snapshot));
        drop(st);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.state().closed = true;
        self.notify.notify_one();
    }
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    redelivery: Duration,
    next_id: AtomicU64,
    consumers: Mutex<Vec<Arc<ConsumerQueue>>>,
}

impl Shared {
    fn consumers(&self) -> MutexGuard<'_, Vec<Arc<ConsumerQueue>>> {
        self.consumers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let consumers = self.consumers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for queue in consumers.iter() {
            queue.close();
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self::with_redelivery(queue_capacity, DEFAULT_REDELIVERY)
    }

    /// `redelivery` is how long an unacknowledged final snapshot waits before
    /// it is handed out again.
    #[must_use]
    pub fn with_redelivery(queue_capacity: usize, redelivery: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: queue_capacity.max(1),
                redelivery,
                next_id: AtomicU64::new(0),
                consumers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a consumer. It receives snapshots published from now on.
    #[must_use]
    pub fn subscribe(&self, name: impl Into<String>) -> Subscription {
        let queue = Arc::new(ConsumerQueue {
            id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            capacity: self.shared.capacity,
            redelivery: self.shared.redelivery,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        });
        self.shared.consumers().push(Arc::clone(&queue));
        tracing::debug!(consumer = %queue.name, "consumer registered");
        Subscription {
            queue,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn publish(&self, snapshot: Arc<Snapshot>) {
        let consumers = self.shared.consumers().clone();
        for queue in consumers {
            queue.push(&snapshot);
        }
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.shared.consumers().len()
    }
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub snapshot: Arc<Snapshot>,
    /// Set when a final snapshot is handed out again because it was not acked.
    pub redelivered: bool,
}

/// A registered consumer. Dropping it deregisters the consumer.
#[derive(Debug)]
pub struct Subscription {
    queue: Arc<ConsumerQueue>,
    shared: Weak<Shared>,
}

impl Subscription {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.queue.name
    }

    /// Wait for the next snapshot. Returns `None` once the dispatcher is gone
    /// and nothing is left to deliver.
    pub async fn recv(&self) -> Option<Delivery> {
        loop {
            let due = {
                let mut st = self.queue.state();
                if let Some(snapshot) = st.items.pop_front() {
                    if snapshot.is_final() {
                        st.unacked.push(Unacked {
                            snapshot: Arc::clone(&snapshot),
                            due: Instant::now() + self.queue.redelivery,
                        });
                    }
                    return Some(Delivery {
                        snapshot,
                        redelivered: false,
                    });
                }

                let now = Instant::now();
                if let Some(pending) = st.unacked.iter_mut().find(|u| u.due <= now) {
                    pending.due = now + self.queue.redelivery;
                    return Some(Delivery {
                        snapshot: Arc::clone(&pending.snapshot),
                        redelivered: true,
                    });
                }

                if st.closed && st.unacked.is_empty() {
                    return None;
                }
                st.unacked.iter().map(|u| u.due).min()
            };

            match due {
                Some(deadline) => {
                    let _ = tokio::time::timeout_at(deadline, self.queue.notify.notified()).await;
                }
                None => self.queue.notify.notified().await,
            }
        }
    }

    /// Acknowledge a final snapshot so it is not redelivered.
    pub fn ack(&self, session_id: Uuid, seq: u64) {
        self.queue
            .state()
            .unacked
            .retain(|u| !(u.snapshot.session_id == session_id && u.snapshot.seq == seq));
    }

    /// Intermediate snapshots discarded because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.queue.state().dropped
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.state().items.len()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.consumers().retain(|q| q.id != self.queue.id);
        }
        tracing::debug!(consumer = %self.queue.name, "consumer deregistered");
    }
}
