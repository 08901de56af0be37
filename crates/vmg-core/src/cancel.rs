//! Cooperative cancellation token
//!
//! The orchestrator checks the token between coarse steps (after download,
//! after verification, between zones). There is no process-global flag; the
//! token is created by whoever starts the OTA and handed down explicitly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{VmgError, VmgResult};

/// Cheaply clonable cancellation flag
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
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(VmgError::Cancelled)` once `cancel()` has been called.
    pub fn check(&self) -> VmgResult<()> {
        if self.is_cancelled() {
            Err(VmgError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(VmgError::Cancelled)));
    }
}
