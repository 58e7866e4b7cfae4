//! Capacity-one coalescing handoff.
//!
//! [`signal_slot`] returns a [`SlotSender`] / [`SlotReceiver`] pair bound to a
//! [`LifecycleContext`]. An offer first drains whatever is still sitting in the
//! slot (handing it back to the caller), then parks its own value and waits
//! until the receiver takes it or the lifecycle is cancelled. At most one value
//! is ever pending, and no offer waits past cancellation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{oneshot, Notify};
use tracing::trace;

use crate::lifecycle::LifecycleContext;
use crate::sequence::SequenceSource;

/// Result of [`SlotSender::offer`].
#[derive(Debug, Clone, PartialEq)]
pub struct Offer<T> {
    /// The value reached the receiver before cancellation.
    pub delivered: bool,
    /// An older unconsumed value displaced by this offer, if any.
    pub replaced: Option<T>,
}

struct Pending<T> {
    /// Slot-local identity of the offer that parked this value.
    ticket: u64,
    value: T,
    accepted: oneshot::Sender<()>,
}

impl<T> Pending<T> {
    /// Hand the value out, releasing the offer that parked it.
    fn accept(self) -> T {
        let _ = self.accepted.send(());
        self.value
    }
}

struct Shared<T> {
    pending: Mutex<Option<Pending<T>>>,
    available: Notify,
    /// Owner tickets for pending entries. Never repeats within a slot.
    tickets: AtomicU64,
    lifecycle: LifecycleContext,
    /// Labels offers in traces only.
    sequence: Arc<dyn SequenceSource>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Option<Pending<T>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remove the pending entry if it is still the one parked under `ticket`.
    fn withdraw(&self, ticket: u64) -> Option<T> {
        let mut pending = self.lock();
        match pending.as_ref() {
            Some(p) if p.ticket == ticket => pending.take().map(|p| p.value),
            _ => None,
        }
    }
}

/// Create a slot whose handoffs end when `lifecycle` is cancelled.
pub fn signal_slot<T>(
    lifecycle: LifecycleContext,
    sequence: Arc<dyn SequenceSource>,
) -> (SlotSender<T>, SlotReceiver<T>) {
    let shared = Arc::new(Shared {
        pending: Mutex::new(None),
        available: Notify::new(),
        tickets: AtomicU64::new(0),
        lifecycle,
        sequence,
    });
    (
        SlotSender {
            shared: Arc::clone(&shared),
        },
        SlotReceiver { shared },
    )
}

/// Producer half. Owned by the dispatcher side.
pub struct SlotSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> SlotSender<T> {
    /// Drain any unconsumed value, then hand `value` over.
    ///
    /// Waits until the receiver takes `value` or the lifecycle is cancelled,
    /// whichever happens first. Never waits once the lifecycle is cancelled.
    /// Dropping the returned future withdraws `value` if it was not yet taken.
    pub async fn offer(&self, value: T) -> Offer<T> {
        let shared = &self.shared;
        let ticket = shared.tickets.fetch_add(1, Ordering::Relaxed);
        let seq = shared.sequence.next_id();
        let (accepted_tx, mut accepted_rx) = oneshot::channel();

        let replaced = {
            let mut pending = shared.lock();
            let replaced = pending.take().map(Pending::accept);
            if shared.lifecycle.is_cancelled() {
                return Offer {
                    delivered: false,
                    replaced,
                };
            }
            *pending = Some(Pending {
                ticket,
                value,
                accepted: accepted_tx,
            });
            replaced
        };
        if replaced.is_some() {
            trace!(seq, "offer replaced an unconsumed value");
        }
        shared.available.notify_one();

        let mut guard = WithdrawOnDrop {
            shared,
            ticket,
            seq,
            armed: true,
        };

        let delivered = tokio::select! {
            biased;
            accepted = &mut accepted_rx => accepted.is_ok(),
            _ = shared.lifecycle.done() => {
                // Taken between cancellation and this point counts as delivered.
                shared.withdraw(ticket).is_none() && accepted_rx.try_recv().is_ok()
            }
        };
        guard.armed = false;

        Offer {
            delivered,
            replaced,
        }
    }

    /// Whether a value is parked and not yet taken.
    #[cfg(test)]
    fn has_pending(&self) -> bool {
        self.shared.lock().is_some()
    }
}

struct WithdrawOnDrop<'a, T> {
    shared: &'a Shared<T>,
    ticket: u64,
    seq: u64,
    armed: bool,
}

impl<T> Drop for WithdrawOnDrop<'_, T> {
    fn drop(&mut self) {
        if self.armed && self.shared.withdraw(self.ticket).is_some() {
            trace!(seq = self.seq, "abandoned offer withdrawn");
        }
    }
}

/// Consumer half. Owned by the evaluation routine.
pub struct SlotReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> SlotReceiver<T> {
    /// Take the pending value, if any. Returns `None` once the lifecycle is cancelled.
    pub fn try_take(&self) -> Option<T> {
        let mut pending = self.shared.lock();
        if self.shared.lifecycle.is_cancelled() {
            return None;
        }
        pending.take().map(Pending::accept)
    }

    /// Resolves when a value may have become available.
    ///
    /// Wakeups can be spurious; callers loop on [`try_take`](Self::try_take).
    pub async fn available(&self) {
        self.shared.available.notified().await;
    }

    /// Wait for the next value, or `None` once the lifecycle is cancelled.
    #[cfg(test)]
    async fn recv(&self) -> Option<T> {
        loop {
            if self.shared.lifecycle.is_cancelled() {
                return None;
            }
            if let Some(value) = self.try_take() {
                return Some(value);
            }
            tokio::select! {
                _ = self.shared.lifecycle.done() => {}
                _ = self.available() => {}
            }
        }
    }
}
