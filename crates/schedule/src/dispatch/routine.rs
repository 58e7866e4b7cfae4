use std::sync::Arc;

use alertsched_core::{EvaluationSignal, RuleKey, ScheduleError, StopReason, VersionSignal};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::metrics::DispatchMetrics;
use crate::coordinator::{RuleMessage, RuleReceiver};

/// The actual rule work, plugged into the evaluation routine.
#[async_trait]
pub trait RuleEvaluator: Send + Sync {
    /// Evaluate the rule for one scheduled tick.
    async fn evaluate(&self, signal: &EvaluationSignal) -> Result<(), ScheduleError>;

    /// The rule moved to a new version; drop any state tied to the old one.
    async fn reset(&self, _key: &RuleKey, _version: VersionSignal) {}

    /// The rule's routine is exiting for `reason`.
    async fn retire(&self, _key: &RuleKey, _reason: &StopReason) {}
}

/// Consume signals for one rule until its lifecycle is cancelled.
///
/// Returns the cancellation cause.
pub async fn run_rule_routine(
    mut receiver: RuleReceiver,
    evaluator: Arc<dyn RuleEvaluator>,
    metrics: Arc<DispatchMetrics>,
    max_attempts: u32,
) -> StopReason {
    let key = receiver.key().clone();
    let lifecycle = receiver.lifecycle().clone();
    let mut current: Option<VersionSignal> = None;
    info!(rule = %key, "evaluation routine started");

    loop {
        match receiver.recv().await {
            RuleMessage::Update(version) => {
                if current.is_some_and(|c| c.version >= version.version) {
                    debug!(rule = %key, version = version.version, "ignoring stale version update");
                    continue;
                }
                debug!(
                    rule = %key,
                    version = version.version,
                    paused = version.is_paused,
                    "rule version changed"
                );
                current = Some(version);
                evaluator.reset(&key, version).await;
            }
            RuleMessage::Evaluate(signal) => {
                let snapshot = VersionSignal::from(signal.rule.as_ref());
                match current {
                    Some(c) if snapshot.version < c.version => {
                        debug!(
                            rule = %key,
                            version = snapshot.version,
                            current = c.version,
                            "skipping evaluation of outdated rule snapshot"
                        );
                        continue;
                    }
                    Some(c) if snapshot.version == c.version => {}
                    _ => {
                        if current.is_some() {
                            evaluator.reset(&key, snapshot).await;
                        }
                        current = Some(snapshot);
                    }
                }
                if current.is_some_and(|c| c.is_paused) {
                    debug!(rule = %key, "rule is paused, skipping evaluation");
                    continue;
                }

                for attempt in 1..=max_attempts {
                    let result = tokio::select! {
                        biased;
                        _ = lifecycle.done() => None,
                        r = evaluator.evaluate(&signal) => Some(r),
                    };
                    match result {
                        None => {
                            debug!(rule = %key, "evaluation aborted, rule stopped");
                            break;
                        }
                        Some(Ok(())) => {
                            metrics.record_completed();
                            break;
                        }
                        Some(Err(e)) if attempt < max_attempts => {
                            debug!(rule = %key, attempt, error = %e, "evaluation failed, retrying");
                        }
                        Some(Err(e)) => {
                            metrics.record_failure();
                            warn!(
                                rule = %key,
                                tick = %signal.scheduled_at,
                                attempts = max_attempts,
                                error = %e,
                                "evaluation failed"
                            );
                        }
                    }
                }
            }
            RuleMessage::Stopped(reason) => {
                evaluator.retire(&key, &reason).await;
                metrics.record_rule_stopped();
                info!(rule = %key, cause = %reason, "evaluation routine stopped");
                return reason;
            }
        }
    }
}
