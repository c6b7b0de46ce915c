//! Cooperative cancellation for downloads and extraction.

use crate::error::{GrammarError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag.
///
/// Long-running operations check the token at their I/O boundaries: every
/// network read, every archive entry, and before each file-system rename.
/// Cancellation is cooperative; an operation already past its last check
/// completes normally.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Error out if cancellation was requested.
    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(GrammarError::Cancelled)
        } else {
            Ok(())
        }
    }
}
