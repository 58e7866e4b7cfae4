use alertsched_core::{EvaluationSignal, RuleKey, StopReason, VersionSignal};

use crate::lifecycle::LifecycleContext;
use crate::slot::SlotReceiver;

/// What the evaluation routine should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleMessage {
    Evaluate(EvaluationSignal),
    Update(VersionSignal),
    Stopped(StopReason),
}

/// Routine-side half of a [`RuleCoordinator`](super::RuleCoordinator).
pub struct RuleReceiver {
    key: RuleKey,
    lifecycle: LifecycleContext,
    evaluations: SlotReceiver<EvaluationSignal>,
    updates: SlotReceiver<VersionSignal>,
}

impl RuleReceiver {
    pub(super) fn new(
        key: RuleKey,
        lifecycle: LifecycleContext,
        evaluations: SlotReceiver<EvaluationSignal>,
        updates: SlotReceiver<VersionSignal>,
    ) -> Self {
        Self {
            key,
            lifecycle,
            evaluations,
            updates,
        }
    }

    pub fn key(&self) -> &RuleKey {
        &self.key
    }

    pub fn lifecycle(&self) -> &LifecycleContext {
        &self.lifecycle
    }

    /// Wait for the next signal.
    ///
    /// Cancellation wins over anything pending, and once `Stopped` is returned
    /// every later call returns it again. When both slots hold a value the
    /// version update is handed out first.
    pub async fn recv(&mut self) -> RuleMessage {
        loop {
            if let Some(cause) = self.lifecycle.cause() {
                return RuleMessage::Stopped(cause);
            }
            if let Some(version) = self.updates.try_take() {
                return RuleMessage::Update(version);
            }
            if let Some(signal) = self.evaluations.try_take() {
                return RuleMessage::Evaluate(signal);
            }
            tokio::select! {
                _ = self.lifecycle.done() => {}
                _ = self.updates.available() => {}
                _ = self.evaluations.available() => {}
            }
        }
    }

    /// Non-waiting variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<RuleMessage> {
        if let Some(cause) = self.lifecycle.cause() {
            return Some(RuleMessage::Stopped(cause));
        }
        self.updates
            .try_take()
            .map(RuleMessage::Update)
            .or_else(|| self.evaluations.try_take().map(RuleMessage::Evaluate))
    }
}

impl std::fmt::Debug for RuleReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleReceiver")
            .field("key", &self.key)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}
