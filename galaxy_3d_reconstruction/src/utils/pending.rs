//! Non-blocking handoff of a value produced on a background worker.
//!
//! The control thread starts the work once, then polls each tick:
//!
//! ```ignore
//! let pending = PendingResult::new();
//! pending.start(move || reduce_mesh(frame));
//!
//! // every tick
//! if let Some(mesh) = pending.try_take()? {
//!     reconstructor.process_frame(mesh)?;
//! }
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use crate::error::{Error, Result};

type Slot<T> = Arc<Mutex<Option<std::thread::Result<T>>>>;

/// Single-slot result produced on rayon's pool and consumed without blocking
pub struct PendingResult<T: Send + 'static> {
    slot: Slot<T>,
    working: Arc<AtomicBool>,
}

impl<T: Send + 'static> PendingResult<T> {
    /// Create an idle handoff with no result
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            working: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a worker is still producing a value
    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::Acquire)
    }

    /// Start producing a value in the background.
    ///
    /// Returns `false` without spawning anything if a worker is already running.
    /// A finished but untaken value is replaced once the new worker completes.
    pub fn start<F>(&self, work: F) -> bool
    where
        F: FnOnce() -> T + Send + 'static,
    {
        if self
            .working
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let slot = Arc::clone(&self.slot);
        let working = Arc::clone(&self.working);

        rayon::spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(work));
            if let Ok(mut guard) = slot.lock() {
                *guard = Some(result);
            }
            // Slot is written before the flag drops, so a reader that sees
            // `working == false` also sees the value.
            working.store(false, Ordering::Release);
        });

        true
    }

    /// Take the finished value, if any, without waiting.
    ///
    /// Returns `Ok(None)` while the worker is running or when nothing was produced.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` if the worker panicked or the slot lock is poisoned.
    pub fn try_take(&self) -> Result<Option<T>> {
        if self.is_working() {
            return Ok(None);
        }

        let mut guard = match self.slot.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Ok(None),
            Err(TryLockError::Poisoned(_)) => {
                return Err(Error::BackendError("Pending result lock poisoned".to_string()));
            }
        };

        match guard.take() {
            None => Ok(None),
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(_)) => Err(Error::BackendError("Background worker panicked".to_string())),
        }
    }
}

impl<T: Send + 'static> Default for PendingResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "pending_tests.rs"]
mod tests;
