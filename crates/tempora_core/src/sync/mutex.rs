//! Non-reentrant mutex.

use std::fmt;
use std::ops::{Deref, DerefMut};

use super::policy::{DebugPolicy, LockKind};
use super::DefaultPolicy;

/// A non-reentrant mutex protecting a `T`.
///
/// Locking it twice from the same thread is a contract violation under the
/// deadlock-detecting policy (and a self-deadlock under [`Direct`](super::Direct)).
pub struct Mutex<T, D: DebugPolicy = DefaultPolicy> {
    policy: D,
    inner: parking_lot::Mutex<T>,
}

impl<T, D: DebugPolicy> Mutex<T, D> {
    /// Creates an unlocked mutex. `name` appears in diagnostics.
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            policy: D::new(name, LockKind::Exclusive),
            inner: parking_lot::Mutex::new(value),
        }
    }

    /// Blocks until the calling thread owns the mutex.
    #[track_caller]
    pub fn lock(&self) -> MutexGuard<'_, T, D> {
        self.policy.acquire();
        MutexGuard {
            inner: self.inner.lock(),
            policy: &self.policy,
        }
    }

    /// Takes the mutex only if nobody holds it.
    #[track_caller]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, D>> {
        if !self.policy.try_acquire() {
            return None;
        }
        let inner = if D::TRACKS_OWNERSHIP {
            self.inner.lock()
        } else {
            self.inner.try_lock()?
        };
        Some(MutexGuard {
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

    /// Consumes the mutex and returns the protected value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default, D: DebugPolicy> Default for Mutex<T, D> {
    fn default() -> Self {
        Self::new("Mutex", T::default())
    }
}

impl<T, D: DebugPolicy> fmt::Debug for Mutex<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.inner.is_locked())
            .finish_non_exhaustive()
    }
}

/// RAII hold on a [`Mutex`]. Releases on drop.
pub struct MutexGuard<'a, T, D: DebugPolicy = DefaultPolicy> {
    pub(super) inner: parking_lot::MutexGuard<'a, T>,
    pub(super) policy: &'a D,
}

impl<T, D: DebugPolicy> Deref for MutexGuard<'_, T, D> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T, D: DebugPolicy> DerefMut for MutexGuard<'_, T, D> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T, D: DebugPolicy> Drop for MutexGuard<'_, T, D> {
    fn drop(&mut self) {
        self.policy.release();
    }
}
