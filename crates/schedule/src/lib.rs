//! Per-rule signaling and lifecycle for periodic alert rule evaluation.
//!
//! This crate provides:
//! - [`slot`]: capacity-one coalescing handoff (newest signal wins)
//! - [`lifecycle`]: cancellation scopes that carry a [`StopReason`](alertsched_core::StopReason)
//! - [`coordinator`]: the per-rule `trigger` / `reconfigure` / `stop` handle
//! - [`registry`]: one coordinator per live rule key
//! - [`dispatch`]: tick-driven dispatcher and the per-rule evaluation routine

pub mod coordinator;
pub mod dispatch;
pub mod lifecycle;
pub mod registry;
pub mod sequence;
pub mod slot;

pub use coordinator::{RuleCoordinator, RuleMessage, RuleReceiver};
pub use dispatch::{
    DispatchMetrics, Dispatcher, FileRuleSource, MetricsSnapshot, RuleEvaluator, RuleSource,
    StaticRuleSource, TickOutcome,
};
pub use lifecycle::LifecycleContext;
pub use registry::RuleRegistry;
pub use sequence::{AtomicSequence, SequenceSource};
pub use slot::{signal_slot, Offer, SlotReceiver, SlotSender};
