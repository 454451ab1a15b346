//! Capability context threaded through every device read and traversal step.
//!
//! A `Cx` is cheap to clone; clones share one cancellation flag, so a clone
//! handed to another thread (or a signal handler) can stop an in-flight
//! query. Long-running operations call [`Cx::checkpoint`] between units of
//! work and bail out with [`Cancelled`] once the flag is set.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug)]
struct CxState {
    cancelled: AtomicBool,
    /// Remaining checkpoints before the context cancels itself; `u64::MAX`
    /// means unbounded.
    budget: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct Cx {
    state: Arc<CxState>,
}

impl Cx {
    /// Context for one top-level request with no checkpoint budget.
    #[must_use]
    pub fn for_request() -> Self {
        Self::with_budget(u64::MAX)
    }

    /// Context that cancels itself after `checkpoints` successful checkpoints.
    #[must_use]
    pub fn for_request_with_budget(checkpoints: u64) -> Self {
        Self::with_budget(checkpoints)
    }

    #[must_use]
    pub fn for_testing() -> Self {
        Self::for_request()
    }

    fn with_budget(budget: u64) -> Self {
        Self {
            state: Arc::new(CxState {
                cancelled: AtomicBool::new(false),
                budget: AtomicU64::new(budget),
            }),
        }
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        let spent = self
            .state
            .budget
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| match left {
                u64::MAX => Some(u64::MAX),
                0 => None,
                n => Some(n - 1),
            });
        if spent.is_err() {
            self.cancel();
            return Err(Cancelled);
        }
        Ok(())
    }
}
