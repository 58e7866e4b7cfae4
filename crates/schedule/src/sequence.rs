//! Injectable id minting.
//!
//! Anything that needs increasing ids takes a [`SequenceSource`] at
//! construction instead of reaching for a process-wide static, so tests can
//! hand in a deterministic sequence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Produces increasing ids.
pub trait SequenceSource: Send + Sync {
    fn next_id(&self) -> u64;
}

/// Atomic counter starting at 1.
#[derive(Debug, Default)]
pub struct AtomicSequence {
    counter: AtomicU64,
}

impl AtomicSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle, the form coordinators take.
    pub fn shared() -> Arc<dyn SequenceSource> {
        Arc::new(Self::new())
    }
}

impl SequenceSource for AtomicSequence {
    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl<F> SequenceSource for F
where
    F: Fn() -> u64 + Send + Sync,
{
    fn next_id(&self) -> u64 {
        self()
    }
}
