//! One live coordinator per rule key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use alertsched_core::RuleKey;
use tracing::debug;

use crate::coordinator::{RuleCoordinator, RuleReceiver};
use crate::lifecycle::LifecycleContext;
use crate::sequence::SequenceSource;

/// Tracks the coordinators of all scheduled rules.
///
/// Every coordinator created here is a child of the registry's lifecycle, so
/// cancelling that lifecycle stops every rule at once.
pub struct RuleRegistry {
    entries: Mutex<HashMap<RuleKey, Arc<RuleCoordinator>>>,
    lifecycle: LifecycleContext,
    sequence: Arc<dyn SequenceSource>,
}

impl RuleRegistry {
    pub fn new(lifecycle: LifecycleContext, sequence: Arc<dyn SequenceSource>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            lifecycle,
            sequence,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RuleKey, Arc<RuleCoordinator>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the coordinator for `key`, creating it if absent.
    ///
    /// The receiver is only returned when the coordinator was created by this
    /// call; the caller must start an evaluation routine with it.
    pub fn get_or_create(&self, key: &RuleKey) -> (Arc<RuleCoordinator>, Option<RuleReceiver>) {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(key) {
            return (Arc::clone(existing), None);
        }
        let (coordinator, receiver) =
            RuleCoordinator::new(key.clone(), &self.lifecycle, Arc::clone(&self.sequence));
        let coordinator = Arc::new(coordinator);
        entries.insert(key.clone(), Arc::clone(&coordinator));
        debug!(rule = %key, "registered rule coordinator");
        (coordinator, Some(receiver))
    }

    pub fn get(&self, key: &RuleKey) -> Option<Arc<RuleCoordinator>> {
        self.lock().get(key).cloned()
    }

    pub fn exists(&self, key: &RuleKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Unregister `key`. The caller decides how to stop the returned coordinator.
    pub fn remove(&self, key: &RuleKey) -> Option<Arc<RuleCoordinator>> {
        self.lock().remove(key)
    }

    /// Keys of all registered rules, sorted.
    pub fn keys(&self) -> Vec<RuleKey> {
        let mut keys: Vec<RuleKey> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use alertsched_core::StopReason;

    use super::*;
    use crate::sequence::AtomicSequence;

    fn registry() -> (RuleRegistry, LifecycleContext) {
        let root = LifecycleContext::new();
        (RuleRegistry::new(root.clone(), AtomicSequence::shared()), root)
    }

    #[test]
    fn get_or_create_returns_receiver_once() {
        let (reg, _root) = registry();
        let key = RuleKey::new(1, "a");

        let (first, rx) = reg.get_or_create(&key);
        assert!(rx.is_some());
        let (second, rx) = reg.get_or_create(&key);
        assert!(rx.is_none());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_then_recreate_gives_fresh_coordinator() {
        let (reg, _root) = registry();
        let key = RuleKey::new(1, "a");

        let (old, _rx) = reg.get_or_create(&key);
        let removed = reg.remove(&key).unwrap();
        removed.stop(StopReason::RuleDeleted);
        assert!(!reg.exists(&key));

        let (fresh, rx) = reg.get_or_create(&key);
        assert!(rx.is_some());
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert!(old.is_stopped());
        assert!(!fresh.is_stopped());
    }

    #[test]
    fn keys_are_sorted_and_per_tenant() {
        let (reg, _root) = registry();
        reg.get_or_create(&RuleKey::new(2, "a"));
        reg.get_or_create(&RuleKey::new(1, "b"));
        reg.get_or_create(&RuleKey::new(1, "a"));
        assert_eq!(
            reg.keys(),
            vec![RuleKey::new(1, "a"), RuleKey::new(1, "b"), RuleKey::new(2, "a")]
        );
        assert!(reg.get(&RuleKey::new(3, "a")).is_none());
    }

    #[test]
    fn cancelling_registry_lifecycle_stops_all() {
        let (reg, root) = registry();
        let (a, _) = reg.get_or_create(&RuleKey::new(1, "a"));
        let (b, _) = reg.get_or_create(&RuleKey::new(1, "b"));
        root.cancel(StopReason::SchedulerStopped);
        assert_eq!(a.stop_reason(), Some(StopReason::SchedulerStopped));
        assert_eq!(b.stop_reason(), Some(StopReason::SchedulerStopped));
    }

    #[test]
    fn empty_registry() {
        let (reg, _root) = registry();
        assert!(reg.is_empty());
        assert!(reg.keys().is_empty());
        assert!(reg.remove(&RuleKey::new(1, "x")).is_none());
    }
}
