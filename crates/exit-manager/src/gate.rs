//! Priority admission for monitor ticks.
//!
//! Every position worker takes a [`TickPermit`] before it ticks. The gate
//! holds a fixed number of slots; when they run out, waiters are served
//! earliest deadline first. An urgent request's deadline is its due time; a
//! normal request gets one normal interval of grace on top. Ties go to the
//! request closest to a threshold. A request that keeps losing ages past
//! every newer one, so it falls behind schedule but is always served.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// How often a position is ticked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Normal,
    /// Near a threshold or executing an exit.
    Urgent,
}

/// Scheduling priority of one tick request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickPriority {
    pub frequency: Frequency,
    /// Relative distance from the bid to the nearest exit threshold.
    pub distance: Decimal,
    pub due: Instant,
}

impl Ord for TickPriority {
    /// Greater means served first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.frequency
            .cmp(&other.frequency)
            .then_with(|| other.distance.cmp(&self.distance))
            .then_with(|| other.due.cmp(&self.due))
    }
}

impl PartialOrd for TickPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TickPriority {
    /// Latest time this request should be served, given the grace normal
    /// requests get.
    #[must_use]
    pub fn deadline(&self, normal_grace: Duration) -> Instant {
        match self.frequency {
            Frequency::Urgent => self.due,
            Frequency::Normal => self.due + normal_grace,
        }
    }
}

struct Waiter {
    deadline: Instant,
    priority: TickPriority,
    seq: u64,
    tx: oneshot::Sender<()>,
}

impl Ord for Waiter {
    /// Greater is popped first: earliest deadline, then priority, then FIFO.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Waiter {}

struct GateInner {
    available: usize,
    waiters: BinaryHeap<Waiter>,
    next_seq: u64,
}

/// Bounded, priority-ordered tick admission shared by every worker.
pub struct TickGate {
    capacity: usize,
    normal_grace: Duration,
    inner: Mutex<GateInner>,
}

impl std::fmt::Debug for TickGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TickGate")
            .field("capacity", &self.capacity)
            .field("normal_grace", &self.normal_grace)
            .field("available", &inner.available)
            .field("waiting", &inner.waiters.len())
            .finish()
    }
}

impl TickGate {
    /// Creates a gate with `capacity` concurrent tick slots (at least one).
    /// Queued normal requests rank `normal_grace` behind urgent ones due at
    /// the same time.
    #[must_use]
    pub fn new(capacity: usize, normal_grace: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            normal_grace,
            inner: Mutex::new(GateInner {
                available: capacity,
                waiters: BinaryHeap::new(),
                next_seq: 0,
            }),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.lock().available
    }

    /// Requests queued behind the slots.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Waits for a slot.
    ///
    /// Cancel-safe: dropping the future gives back a slot it was handed but
    /// never observed.
    pub async fn acquire(self: &Arc<Self>, priority: TickPriority) -> TickPermit {
        let rx = {
            let mut inner = self.inner.lock();
            if inner.available > 0 && inner.waiters.is_empty() {
                inner.available -= 1;
                return TickPermit {
                    gate: Arc::clone(self),
                };
            }
            let (tx, rx) = oneshot::channel();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.waiters.push(Waiter {
                deadline: priority.deadline(self.normal_grace),
                priority,
                seq,
                tx,
            });
            rx
        };

        let mut pending = PendingPermit {
            gate: Arc::clone(self),
            rx: Some(rx),
        };
        if let Some(rx) = pending.rx.as_mut() {
            // The sender lives in the heap until `release` sends on it, and
            // the heap lives as long as `self`.
            let _ = rx.await;
        }
        pending.rx = None;
        TickPermit {
            gate: Arc::clone(self),
        }
    }

    /// Hands a freed slot to the best live waiter, or returns it to the pool.
    fn release(&self) {
        let mut inner = self.inner.lock();
        while let Some(waiter) = inner.waiters.pop() {
            if waiter.tx.send(()).is_ok() {
                return;
            }
        }
        inner.available = (inner.available + 1).min(self.capacity);
    }
}

/// Guard over a queued request. Gives the slot back if the request is
/// dropped after the gate sent it.
struct PendingPermit {
    gate: Arc<TickGate>,
    rx: Option<oneshot::Receiver<()>>,
}

impl Drop for PendingPermit {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.gate.release();
            }
        }
    }
}

/// One tick slot. Released on drop.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct TickPermit {
    gate: Arc<TickGate>,
}

impl std::fmt::Debug for TickPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickPermit").finish_non_exhaustive()
    }
}

impl Drop for TickPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
