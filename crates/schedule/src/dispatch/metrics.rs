use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Dispatcher and routine counters. Shared via `Arc`, updated lock-free.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    evaluations_scheduled: AtomicU64,
    evaluations_missed: AtomicU64,
    evaluations_cancelled: AtomicU64,
    evaluations_completed: AtomicU64,
    evaluation_failures: AtomicU64,
    updates_sent: AtomicU64,
    rules_started: AtomicU64,
    rules_stopped: AtomicU64,
}

/// Point-in-time copy of [`DispatchMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Triggers handed to a coordinator.
    pub evaluations_scheduled: u64,
    /// Triggers replaced before the routine consumed them.
    pub evaluations_missed: u64,
    /// Triggers that never landed because the rule was stopped.
    pub evaluations_cancelled: u64,
    pub evaluations_completed: u64,
    /// Evaluations that failed after all attempts.
    pub evaluation_failures: u64,
    pub updates_sent: u64,
    pub rules_started: u64,
    pub rules_stopped: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl DispatchMetrics {
    pub fn record_scheduled(&self) {
        bump(&self.evaluations_scheduled);
    }

    pub fn record_missed(&self) {
        bump(&self.evaluations_missed);
    }

    pub fn record_cancelled(&self) {
        bump(&self.evaluations_cancelled);
    }

    pub fn record_completed(&self) {
        bump(&self.evaluations_completed);
    }

    pub fn record_failure(&self) {
        bump(&self.evaluation_failures);
    }

    pub fn record_update(&self) {
        bump(&self.updates_sent);
    }

    pub fn record_rule_started(&self) {
        bump(&self.rules_started);
    }

    pub fn record_rule_stopped(&self) {
        bump(&self.rules_stopped);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            evaluations_scheduled: self.evaluations_scheduled.load(Ordering::Relaxed),
            evaluations_missed: self.evaluations_missed.load(Ordering::Relaxed),
            evaluations_cancelled: self.evaluations_cancelled.load(Ordering::Relaxed),
            evaluations_completed: self.evaluations_completed.load(Ordering::Relaxed),
            evaluation_failures: self.evaluation_failures.load(Ordering::Relaxed),
            updates_sent: self.updates_sent.load(Ordering::Relaxed),
            rules_started: self.rules_started.load(Ordering::Relaxed),
            rules_stopped: self.rules_stopped.load(Ordering::Relaxed),
        }
    }
}
