// src/engine/lock.rs

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Process-local mutual exclusion around pipeline execution.
///
/// Acquisition never waits: a worker that is already running a pipeline
/// simply gets `None` back.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLock {
    inner: Arc<Mutex<()>>,
}

/// Proof that the lock is held. Dropping it releases the lock.
#[derive(Debug)]
pub struct LockPermit {
    _guard: OwnedMutexGuard<()>,
}

impl ExecutionLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<LockPermit> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(|guard| LockPermit { _guard: guard })
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let lock = ExecutionLock::new();
        let permit = lock.try_acquire().unwrap();
        assert!(lock.is_held());
        assert!(lock.clone().try_acquire().is_none());

        drop(permit);
        assert!(!lock.is_held());
        assert!(lock.try_acquire().is_some());
    }
}
