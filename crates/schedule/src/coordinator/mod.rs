//! Per-rule signal routing.
//!
//! A [`RuleCoordinator`] is the dispatcher's handle on one scheduled rule. It
//! owns two coalescing slots (evaluations and version updates) and the rule's
//! [`LifecycleContext`]. The matching [`RuleReceiver`] goes to the rule's
//! evaluation routine. The coordinator only carries signals; it never looks
//! inside them.

mod receiver;


use std::sync::Arc;

use alertsched_core::{EvaluationSignal, RuleKey, StopReason, VersionSignal};
use tracing::debug;

use crate::lifecycle::LifecycleContext;
use crate::sequence::SequenceSource;
use crate::slot::{signal_slot, Offer, SlotSender};

pub use self::receiver::{RuleMessage, RuleReceiver};

/// Dispatcher-side handle for one rule.
///
/// Not reusable: once [`stop`](Self::stop) is called every later `trigger` or
/// `reconfigure` reports `false`. A rule that comes back needs a new coordinator.
pub struct RuleCoordinator {
    key: RuleKey,
    evaluations: SlotSender<EvaluationSignal>,
    updates: SlotSender<VersionSignal>,
    lifecycle: LifecycleContext,
}

impl RuleCoordinator {
    /// Create a coordinator whose lifecycle is a child of `parent`.
    pub fn new(
        key: RuleKey,
        parent: &LifecycleContext,
        sequence: Arc<dyn SequenceSource>,
    ) -> (Self, RuleReceiver) {
        let lifecycle = parent.child();
        let (evaluations, eval_rx) = signal_slot(lifecycle.clone(), Arc::clone(&sequence));
        let (updates, update_rx) = signal_slot(lifecycle.clone(), sequence);

        let receiver = RuleReceiver::new(key.clone(), lifecycle.clone(), eval_rx, update_rx);
        let coordinator = Self {
            key,
            evaluations,
            updates,
            lifecycle,
        };
        (coordinator, receiver)
    }

    pub fn key(&self) -> &RuleKey {
        &self.key
    }

    /// Ask the routine to evaluate.
    ///
    /// Returns whether the signal was delivered, plus any older evaluation that
    /// was still unconsumed and got dropped in favour of this one.
    pub async fn trigger(&self, signal: EvaluationSignal) -> (bool, Option<EvaluationSignal>) {
        let Offer {
            delivered,
            replaced,
        } = self.evaluations.offer(signal).await;
        if let Some(dropped) = &replaced {
            debug!(
                rule = %self.key,
                dropped_tick = %dropped.scheduled_at,
                "unconsumed evaluation replaced by a newer tick"
            );
        }
        (delivered, replaced)
    }

    /// Ask the routine to move to a newer rule version.
    ///
    /// The caller is responsible for only sending versions newer than the last one.
    /// Any unconsumed older update is discarded.
    pub async fn reconfigure(&self, version: VersionSignal) -> bool {
        self.updates.offer(version).await.delivered
    }

    /// Cancel the rule's lifecycle. Idempotent; only the first cause is kept.
    ///
    /// Does not wait for the routine to exit.
    pub fn stop(&self, reason: StopReason) {
        if self.lifecycle.cancel(reason.clone()) {
            debug!(rule = %self.key, cause = %reason, "rule coordinator stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.lifecycle.is_cancelled()
    }

    /// Cause recorded by the first [`stop`](Self::stop) (or by the parent).
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.lifecycle.cause()
    }

    pub fn lifecycle(&self) -> &LifecycleContext {
        &self.lifecycle
    }
}

impl std::fmt::Debug for RuleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleCoordinator")
            .field("key", &self.key)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
