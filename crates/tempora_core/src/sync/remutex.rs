//! Reentrant mutex.

use std::fmt;
use std::ops::Deref;

use super::policy::{DebugPolicy, LockKind};
use super::DefaultPolicy;

/// A mutex the owning thread may lock again.
///
/// Each `lock` must be matched by dropping its guard; the lock is free for
/// other threads only after the last guard is gone. Guards give shared
/// access; wrap the value in a `RefCell` for mutation.
pub struct ReMutex<T, D: DebugPolicy = DefaultPolicy> {
    policy: D,
    inner: parking_lot::ReentrantMutex<T>,
}

impl<T, D: DebugPolicy> ReMutex<T, D> {
    /// Creates an unlocked reentrant mutex. `name` appears in diagnostics.
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            policy: D::new(name, LockKind::Reentrant),
            inner: parking_lot::ReentrantMutex::new(value),
        }
    }

    /// Blocks until the calling thread owns the mutex. Succeeds immediately
    /// if it already does.
    #[track_caller]
    pub fn lock(&self) -> ReMutexGuard<'_, T, D> {
        self.policy.acquire();
        ReMutexGuard {
            inner: self.inner.lock(),
            policy: &self.policy,
        }
    }

    /// Takes the mutex only if it is free or already owned by this thread.
    #[track_caller]
    pub fn try_lock(&self) -> Option<ReMutexGuard<'_, T, D>> {
        if !self.policy.try_acquire() {
            return None;
        }
        let inner = if D::TRACKS_OWNERSHIP {
            self.inner.lock()
        } else {
            self.inner.try_lock()?
        };
        Some(ReMutexGuard {
            inner,
            policy: &self.policy,
        })
    }

    /// True if the calling thread holds the lock. Always true for policies
    /// that do not track ownership; only meaningful inside assertions.
    #[must_use]
    pub fn debug_is_locked(&self) -> bool {
        self.policy.is_held_by_current_thread()
    }

    /// The instrumentation state.
    #[must_use]
    pub fn policy(&self) -> &D {
        &self.policy
    }

    /// Mutable access without locking; the borrow proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T, D: DebugPolicy> fmt::Debug for ReMutex<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReMutex")
            .field("locked", &self.inner.is_locked())
            .finish_non_exhaustive()
    }
}

/// RAII hold on a [`ReMutex`]. Releases one level on drop.
pub struct ReMutexGuard<'a, T, D: DebugPolicy = DefaultPolicy> {
    inner: parking_lot::ReentrantMutexGuard<'a, T>,
    policy: &'a D,
}

impl<T, D: DebugPolicy> Deref for ReMutexGuard<'_, T, D> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T, D: DebugPolicy> Drop for ReMutexGuard<'_, T, D> {
    fn drop(&mut self) {
        self.policy.release();
    }
}
