use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::QuantizeError;

/// Shared stop flag for one job.
///
/// Clones observe the same flag. The pipeline polls it between units of work
/// (a row of pixels, a Lloyd round, a median-cut split) and bails out with
/// [`QuantizeError::Cancelled`] once it is set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), QuantizeError> {
        if self.is_cancelled() {
            return Err(QuantizeError::Cancelled);
        }
        Ok(())
    }
}
