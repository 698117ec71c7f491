//! Cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked between evaluation steps
///
/// Clones observe the same flag. Cancellation is best-effort: work already
/// inside a single logic evaluation runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create an untriggered token
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once [`cancel`](Self::cancel) has been called on any clone
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` if triggered
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::EvalError::Cancelled)
        } else {
            Ok(())
        }
    }
}
