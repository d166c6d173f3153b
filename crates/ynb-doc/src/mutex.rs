//! Re-entrancy guard for echo suppression.
//!
//! Editor bindings apply model changes to the editor and editor changes to
//! the model. Running both directions through one [`LocalMutex`] keeps a
//! change from bouncing back into the side it came from.

use std::sync::atomic::{AtomicBool, Ordering};

/// Runs a closure unless another closure guarded by the same mutex is
/// already running.
#[derive(Debug, Default)]
pub struct LocalMutex {
    busy: AtomicBool,
}

struct Release<'a>(&'a AtomicBool);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl LocalMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` if the mutex is free. Returns whether it ran.
    pub fn run<F: FnOnce()>(&self, f: F) -> bool {
        if self.busy.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _release = Release(&self.busy);
        f();
        true
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Create a fresh re-entrancy guard.
pub fn create_mutex() -> LocalMutex {
    LocalMutex::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_skips_reentrant_calls() {
        let mutex = create_mutex();
        let mut inner_ran = false;

        let outer_ran = mutex.run(|| {
            inner_ran = mutex.run(|| {});
        });

        assert!(outer_ran);
        assert!(!inner_ran);
        assert!(!mutex.is_busy());
        assert!(mutex.run(|| {}));
    }

    #[test]
    fn test_released_after_panic() {
        let mutex = create_mutex();
        let result = catch_unwind(AssertUnwindSafe(|| {
            mutex.run(|| panic!("boom"));
        }));

        assert!(result.is_err());
        assert!(!mutex.is_busy());
    }
}
