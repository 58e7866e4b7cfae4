//! Cooperative cancellation carrying a cause.
//!
//! A [`LifecycleContext`] goes from active to cancelled exactly once. The
//! first [`StopReason`] handed to [`cancel`](LifecycleContext::cancel) is the
//! one every observer sees. Contexts form a tree: cancelling a parent cancels
//! every live child with the parent's cause, never the other way round.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use alertsched_core::StopReason;
use tokio::sync::watch;

struct Inner {
    cause: watch::Sender<Option<StopReason>>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new() -> Arc<Self> {
        let (cause, _) = watch::channel(None);
        Arc::new(Self {
            cause,
            children: Mutex::new(Vec::new()),
        })
    }

    fn cause(&self) -> Option<StopReason> {
        self.cause.borrow().clone()
    }

    fn cancel(&self, reason: StopReason) -> bool {
        let recorded = self.cause.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if !recorded {
            return false;
        }

        // Cause is recorded before the children are drained, so a child
        // registering concurrently either lands in this list or sees the cause.
        let children = std::mem::take(&mut *lock_children(&self.children));
        if let Some(cause) = self.cause() {
            for child in children.iter().filter_map(Weak::upgrade) {
                child.cancel(cause.clone());
            }
        }
        true
    }
}

fn lock_children(children: &Mutex<Vec<Weak<Inner>>>) -> MutexGuard<'_, Vec<Weak<Inner>>> {
    children.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cancellation scope for one rule (or, as a root, for the whole scheduler).
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct LifecycleContext {
    inner: Arc<Inner>,
}

impl LifecycleContext {
    /// A root context that is only cancelled explicitly.
    pub fn new() -> Self {
        Self {
            inner: Inner::new(),
        }
    }

    /// A context cancelled together with `self`.
    ///
    /// If `self` is already cancelled the child starts cancelled with the same cause.
    pub fn child(&self) -> Self {
        let child = Inner::new();
        {
            let mut children = lock_children(&self.inner.children);
            match self.inner.cause() {
                Some(cause) => {
                    child.cancel(cause);
                }
                None => {
                    children.retain(|c| c.strong_count() > 0);
                    children.push(Arc::downgrade(&child));
                }
            }
        }
        Self { inner: child }
    }

    /// Cancel with `reason`. Returns `true` only for the call that recorded the cause.
    pub fn cancel(&self, reason: StopReason) -> bool {
        self.inner.cancel(reason)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cause.borrow().is_some()
    }

    /// The recorded cause, or `None` while active.
    pub fn cause(&self) -> Option<StopReason> {
        self.inner.cause()
    }

    /// Resolves once the context is cancelled. Safe to use in `select!`.
    pub async fn done(&self) {
        let mut rx = self.inner.cause.subscribe();
        // The sender lives in `self.inner`, so the channel cannot close under us.
        let _ = rx.wait_for(|cause| cause.is_some()).await;
    }

    /// Like [`done`](Self::done), returning the cause.
    pub async fn cancelled(&self) -> StopReason {
        self.done().await;
        self.cause().unwrap_or(StopReason::Other("cancelled".into()))
    }
}

impl Default for LifecycleContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LifecycleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleContext")
            .field("cause", &self.cause())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[test]
    fn new_context_is_active() {
        let ctx = LifecycleContext::new();
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.cause(), None);
    }

    #[test]
    fn first_cause_wins() {
        let ctx = LifecycleContext::new();
        assert!(ctx.cancel(StopReason::RuleDeleted));
        assert!(!ctx.cancel(StopReason::RuleRestarted));
        assert!(!ctx.cancel(StopReason::Other("again".into())));
        assert_eq!(ctx.cause(), Some(StopReason::RuleDeleted));
    }

    #[test]
    fn clones_share_state() {
        let ctx = LifecycleContext::new();
        let clone = ctx.clone();
        clone.cancel(StopReason::SchedulerStopped);
        assert_eq!(ctx.cause(), Some(StopReason::SchedulerStopped));
    }

    #[tokio::test]
    async fn done_resolves_after_cancel() {
        let ctx = LifecycleContext::new();
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.cancelled().await })
        };
        tokio::task::yield_now().await;
        ctx.cancel(StopReason::RuleRestarted);
        let cause = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("done() did not resolve")
            .unwrap();
        assert_eq!(cause, StopReason::RuleRestarted);
    }

    #[tokio::test]
    async fn done_resolves_immediately_when_already_cancelled() {
        let ctx = LifecycleContext::new();
        ctx.cancel(StopReason::RuleDeleted);
        timeout(Duration::from_millis(100), ctx.done())
            .await
            .expect("done() blocked on a cancelled context");
    }

    #[tokio::test]
    async fn done_stays_pending_while_active() {
        let ctx = LifecycleContext::new();
        assert!(timeout(Duration::from_millis(20), ctx.done()).await.is_err());
    }

    #[test]
    fn parent_cancel_propagates_cause_to_children() {
        let root = LifecycleContext::new();
        let a = root.child();
        let b = root.child();
        let grandchild = a.child();

        root.cancel(StopReason::SchedulerStopped);

        for ctx in [&a, &b, &grandchild] {
            assert_eq!(ctx.cause(), Some(StopReason::SchedulerStopped));
        }
    }

    #[test]
    fn child_cancel_does_not_touch_parent_or_siblings() {
        let root = LifecycleContext::new();
        let a = root.child();
        let b = root.child();

        a.cancel(StopReason::RuleDeleted);
        assert!(!root.is_cancelled());
        assert!(!b.is_cancelled());

        // A child that was cancelled first keeps its own cause.
        root.cancel(StopReason::SchedulerStopped);
        assert_eq!(a.cause(), Some(StopReason::RuleDeleted));
        assert_eq!(b.cause(), Some(StopReason::SchedulerStopped));
    }

    #[test]
    fn child_of_cancelled_parent_starts_cancelled() {
        let root = LifecycleContext::new();
        root.cancel(StopReason::Other("shutting down".into()));
        let child = root.child();
        assert_eq!(child.cause(), Some(StopReason::Other("shutting down".into())));
    }

    #[test]
    fn dropped_children_are_pruned() {
        let root = LifecycleContext::new();
        for _ in 0..10 {
            drop(root.child());
        }
        let _live = root.child();
        assert_eq!(lock_children(&root.inner.children).len(), 1);
    }

    #[test]
    fn cancel_from_many_threads_records_one_cause() {
        let ctx = LifecycleContext::new();
        let winners: usize = (0..8)
            .map(|i| {
                let ctx = ctx.clone();
                std::thread::spawn(move || ctx.cancel(StopReason::Other(format!("t{i}"))))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
        assert!(matches!(ctx.cause(), Some(StopReason::Other(_))));
    }
}
