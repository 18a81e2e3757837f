//! Cooperative cancellation of a running match.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared flag used to interrupt a running match.
///
/// Cloning is cheap and every clone observes the same flag. Builds and runs poll it while
/// waiting on their process, battles check it between fights.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once [`cancel`](Self::cancel) was called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
