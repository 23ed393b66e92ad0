//! Condition variable bound to a [`Mutex`](super::Mutex).

use std::time::Duration;

use super::mutex::MutexGuard;
use super::policy::DebugPolicy;

/// Condition variable for threads coordinating through a [`Mutex`](super::Mutex).
///
/// Wakeups may be spurious and timeouts are not reported: callers always
/// re-check their condition in a loop. A `ConditionVar` must only ever be
/// used with one mutex.
///
/// ```rust,ignore
/// let mut ready = state.lock();
/// while !*ready {
///     cvar.wait(&mut ready);
/// }
/// ```
#[derive(Debug, Default)]
pub struct ConditionVar {
    inner: parking_lot::Condvar,
}

impl ConditionVar {
    /// Creates a condition variable.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: parking_lot::Condvar::new(),
        }
    }

    /// Releases the mutex, waits for a notification and re-acquires it.
    pub fn wait<T, D: DebugPolicy>(&self, guard: &mut MutexGuard<'_, T, D>) {
        guard.policy.release();
        self.inner.wait(&mut guard.inner);
        Self::reacquire(guard);
    }

    /// Like [`wait`](Self::wait), but also returns after `timeout`.
    pub fn wait_timeout<T, D: DebugPolicy>(
        &self,
        guard: &mut MutexGuard<'_, T, D>,
        timeout: Duration,
    ) {
        guard.policy.release();
        // Timeout and spurious wakeup look the same to the caller.
        let _ = self.inner.wait_for(&mut guard.inner, timeout);
        Self::reacquire(guard);
    }

    /// Wakes one waiter.
    pub fn notify(&self) {
        self.inner.notify_one();
    }

    /// Wakes every waiter.
    pub fn notify_all(&self) {
        self.inner.notify_all();
    }

    fn reacquire<T, D: DebugPolicy>(guard: &mut MutexGuard<'_, T, D>) {
        if !D::TRACKS_OWNERSHIP {
            return;
        }
        // Logical ownership first, data lock second: the same order `lock` uses.
        let policy = guard.policy;
        parking_lot::MutexGuard::unlocked(&mut guard.inner, || policy.acquire());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{DeadlockDetector, Mutex};
    use std::sync::Arc;

    #[test]
    fn test_wait_for_flag() {
        let state: Arc<(Mutex<bool, DeadlockDetector>, ConditionVar)> =
            Arc::new((Mutex::new("test.flag", false), ConditionVar::new()));

        let producer = Arc::clone(&state);
        let handle = std::thread::spawn(move || {
            let (lock, cvar) = &*producer;
            *lock.lock() = true;
            cvar.notify();
        });

        let (lock, cvar) = &*state;
        let mut ready = lock.lock();
        while !*ready {
            cvar.wait(&mut ready);
        }
        assert!(lock.debug_is_locked());
        drop(ready);

        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_returns_without_notify() {
        let lock: Mutex<u8, DeadlockDetector> = Mutex::new("test.timeout", 0);
        let cvar = ConditionVar::new();

        let mut guard = lock.lock();
        cvar.wait_timeout(&mut guard, Duration::from_millis(10));
        assert!(lock.debug_is_locked());
        assert_eq!(*guard, 0);
    }
}
