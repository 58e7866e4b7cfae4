//! Tick-driven dispatcher that feeds rule coordinators.
//!
//! On every tick the [`Dispatcher`] reconciles the registry against the current
//! rule set: it starts a routine for each new rule, forwards version bumps via
//! `reconfigure`, triggers the rules that are due, and stops rules that
//! disappeared. All handoffs run in spawned tasks so one slow rule never
//! stalls the tick loop.

mod metrics;
mod routine;
mod source;


use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alertsched_core::{
    EvaluationSignal, RuleDefinition, RuleKey, SchedulerConfig, StopReason, VersionSignal,
};
use chrono::{DateTime, Utc};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::coordinator::{RuleCoordinator, RuleReceiver};
use crate::lifecycle::LifecycleContext;
use crate::registry::RuleRegistry;
use crate::sequence::SequenceSource;

pub use self::metrics::{DispatchMetrics, MetricsSnapshot};
pub use self::routine::{run_rule_routine, RuleEvaluator};
pub use self::source::{FileRuleSource, RuleSource, StaticRuleSource};

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Rules whose routine was started on this tick.
    pub started: Vec<RuleKey>,
    /// Rules that were sent a newer version.
    pub updated: Vec<RuleKey>,
    /// Rules that were triggered.
    pub scheduled: Vec<RuleKey>,
    /// Rules that were removed and stopped.
    pub stopped: Vec<RuleKey>,
    /// Re-added rules whose previous routine has not exited yet.
    pub deferred: Vec<RuleKey>,
}

/// Drives the coordinators of all rules from a periodic tick.
pub struct Dispatcher {
    config: SchedulerConfig,
    lifecycle: LifecycleContext,
    registry: RuleRegistry,
    evaluator: Arc<dyn RuleEvaluator>,
    metrics: Arc<DispatchMetrics>,
    /// Last version sent (or observed at creation) per rule.
    known_versions: HashMap<RuleKey, VersionSignal>,
    routines: JoinSet<(RuleKey, StopReason)>,
    /// Latest routine per rule, kept until it finishes.
    routine_handles: HashMap<RuleKey, AbortHandle>,
}

impl Dispatcher {
    pub fn new(
        config: SchedulerConfig,
        evaluator: Arc<dyn RuleEvaluator>,
        sequence: Arc<dyn SequenceSource>,
    ) -> Self {
        let lifecycle = LifecycleContext::new();
        Self {
            registry: RuleRegistry::new(lifecycle.clone(), sequence),
            lifecycle,
            config,
            evaluator,
            metrics: Arc::new(DispatchMetrics::default()),
            known_versions: HashMap::new(),
            routines: JoinSet::new(),
            routine_handles: HashMap::new(),
        }
    }

    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Root lifecycle; cancelling it stops the dispatcher and every rule.
    pub fn lifecycle(&self) -> &LifecycleContext {
        &self.lifecycle
    }

    /// Number of evaluation routines that have not been reaped yet.
    pub fn running_routines(&self) -> usize {
        self.routines.len()
    }

    /// Reconcile the registry with `rules` and trigger the ones due at `tick`.
    ///
    /// A rule re-added while its previous routine is still exiting is deferred
    /// to a later tick, so at most one routine per key is ever alive.
    ///
    /// Must be called from within a tokio runtime.
    pub fn process_tick(&mut self, tick: DateTime<Utc>, rules: &[RuleDefinition]) -> TickOutcome {
        let base = self.config.base_interval.as_secs().max(1);
        let tick_num = tick.timestamp().max(0) as u64 / base;
        let mut outcome = TickOutcome::default();
        if self.lifecycle.is_cancelled() {
            return outcome;
        }
        self.reap_routines();
        let mut live = HashSet::with_capacity(rules.len());

        for rule in rules {
            if !live.insert(rule.key.clone()) {
                warn!(rule = %rule.key, "duplicate rule in rule set, ignoring");
                continue;
            }
            if !self.registry.exists(&rule.key) && self.is_retiring(&rule.key) {
                debug!(rule = %rule.key, "previous routine still exiting, deferring restart");
                outcome.deferred.push(rule.key.clone());
                continue;
            }

            let (coordinator, receiver) = self.registry.get_or_create(&rule.key);
            let version = VersionSignal::from(rule);
            if let Some(receiver) = receiver {
                self.spawn_routine(receiver);
                self.known_versions.insert(rule.key.clone(), version);
                outcome.started.push(rule.key.clone());
            } else if let Some(known) = self.known_versions.get(&rule.key).copied() {
                if version.version > known.version {
                    self.known_versions.insert(rule.key.clone(), version);
                    self.spawn_reconfigure(Arc::clone(&coordinator), version);
                    outcome.updated.push(rule.key.clone());
                } else if version.version < known.version {
                    warn!(
                        rule = %rule.key,
                        version = version.version,
                        known = known.version,
                        "rule version went backwards, ignoring"
                    );
                }
            }

            let frequency = (rule.interval_seconds / base).max(1);
            if rule.interval_seconds % base != 0 {
                debug!(
                    rule = %rule.key,
                    interval = rule.interval_seconds,
                    base,
                    "interval is not a multiple of the base interval"
                );
            }
            if !rule.is_paused && tick_num % frequency == 0 {
                let signal = EvaluationSignal::new(tick, Arc::new(rule.clone()));
                self.spawn_trigger(coordinator, signal);
                outcome.scheduled.push(rule.key.clone());
            }
        }

        for key in self.registry.keys() {
            if live.contains(&key) {
                continue;
            }
            if let Some(coordinator) = self.registry.remove(&key) {
                coordinator.stop(StopReason::RuleDeleted);
                self.known_versions.remove(&key);
                outcome.stopped.push(key);
            }
        }

        self.reap_routines();
        outcome
    }

    /// Tick every base interval, pulling rules from `source`, until the root
    /// lifecycle is cancelled.
    pub async fn run(&mut self, source: &dyn RuleSource) {
        let mut ticker = tokio::time::interval(self.config.base_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let lifecycle = self.lifecycle.clone();
        info!(base_interval = ?self.config.base_interval, "dispatcher started");

        loop {
            tokio::select! {
                biased;
                _ = lifecycle.done() => break,
                _ = ticker.tick() => {
                    let tick = Utc::now();
                    match source.fetch().await {
                        Ok(rules) => {
                            let outcome = self.process_tick(tick, &rules);
                            debug!(
                                rules = rules.len(),
                                started = outcome.started.len(),
                                updated = outcome.updated.len(),
                                scheduled = outcome.scheduled.len(),
                                stopped = outcome.stopped.len(),
                                deferred = outcome.deferred.len(),
                                "tick processed"
                            );
                        }
                        Err(e) => warn!(error = %e, "failed to fetch rules, skipping tick"),
                    }
                }
            }
        }
        info!("dispatcher loop exited");
    }

    /// Cancel every rule with `reason` and wait for their routines to exit.
    ///
    /// Routines still running after the configured shutdown timeout are aborted.
    /// Returns how many routines exited on their own.
    pub async fn shutdown(&mut self, reason: StopReason) -> usize {
        if self.lifecycle.cancel(reason.clone()) {
            info!(cause = %reason, rules = self.registry.len(), "dispatcher shutting down");
        }

        let mut exited = 0;
        let routines = &mut self.routines;
        let drain = async {
            while let Some(joined) = routines.join_next().await {
                match joined {
                    Ok((key, cause)) => {
                        debug!(rule = %key, cause = %cause, "routine exited");
                        exited += 1;
                    }
                    Err(e) => warn!(error = %e, "evaluation routine failed"),
                }
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, drain).await.is_err() {
            warn!(
                remaining = self.routines.len(),
                "routines did not exit before shutdown timeout, aborting"
            );
            self.routines.abort_all();
        }

        for key in self.registry.keys() {
            self.registry.remove(&key);
        }
        self.known_versions.clear();
        self.routine_handles.clear();
        exited
    }

    fn is_retiring(&self, key: &RuleKey) -> bool {
        self.routine_handles
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }

    fn reap_routines(&mut self) {
        while let Some(joined) = self.routines.try_join_next() {
            if let Err(e) = joined {
                warn!(error = %e, "evaluation routine failed");
            }
        }
        self.routine_handles.retain(|_, handle| !handle.is_finished());
    }

    fn spawn_routine(&mut self, receiver: RuleReceiver) {
        let evaluator = Arc::clone(&self.evaluator);
        let metrics = Arc::clone(&self.metrics);
        let max_attempts = self.config.max_attempts;
        let key = receiver.key().clone();
        self.metrics.record_rule_started();
        let handle = self.routines.spawn(async move {
            let key = receiver.key().clone();
            let reason = run_rule_routine(receiver, evaluator, metrics, max_attempts).await;
            (key, reason)
        });
        self.routine_handles.insert(key, handle);
    }

    fn spawn_trigger(&self, coordinator: Arc<RuleCoordinator>, signal: EvaluationSignal) {
        let metrics = Arc::clone(&self.metrics);
        let bound = self.config.dispatch_timeout;
        self.metrics.record_scheduled();

        tokio::spawn(async move {
            let tick = signal.scheduled_at;
            let handoff = coordinator.trigger(signal);
            let result = match bound {
                Some(limit) => tokio::time::timeout(limit, handoff).await.ok(),
                None => Some(handoff.await),
            };
            match result {
                Some((delivered, dropped)) => {
                    if let Some(dropped) = dropped {
                        metrics.record_missed();
                        warn!(
                            rule = %coordinator.key(),
                            dropped_tick = %dropped.scheduled_at,
                            tick = %tick,
                            "tick dropped because rule evaluation is too slow"
                        );
                    }
                    if !delivered {
                        metrics.record_cancelled();
                        debug!(
                            rule = %coordinator.key(),
                            tick = %tick,
                            "scheduled evaluation cancelled, rule stopped"
                        );
                    }
                }
                None => {
                    metrics.record_missed();
                    warn!(rule = %coordinator.key(), tick = %tick, "evaluation handoff timed out");
                }
            }
        });
    }

    fn spawn_reconfigure(&self, coordinator: Arc<RuleCoordinator>, version: VersionSignal) {
        let metrics = Arc::clone(&self.metrics);
        let bound = self.config.dispatch_timeout;

        tokio::spawn(async move {
            let handoff = coordinator.reconfigure(version);
            let delivered = match bound {
                Some(limit) => tokio::time::timeout(limit, handoff).await.unwrap_or(false),
                None => handoff.await,
            };
            if delivered {
                metrics.record_update();
            } else {
                debug!(
                    rule = %coordinator.key(),
                    version = version.version,
                    "version update not delivered"
                );
            }
        });
    }
}
