//! # Lock Instrumentation Policies
//!
//! [`Mutex`](super::Mutex) and [`ReMutex`](super::ReMutex) are a
//! `parking_lot` lock plus a [`DebugPolicy`]. The policy sees every acquire
//! and release; the `parking_lot` lock provides the actual exclusion for the
//! protected data.
//!
//! - [`Direct`]: zero-sized, every hook is an empty inline function. The lock
//!   compiles down to the bare `parking_lot` call.
//! - [`DeadlockDetector`](super::DeadlockDetector): owner tracking, reentrancy
//!   enforcement and waits-for cycle detection under one process-wide lock.

/// Whether a lock may be re-acquired by its owning thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockKind {
    /// Second acquire by the owner is a contract violation.
    Exclusive,
    /// The owner may acquire again; it must release as many times.
    Reentrant,
}

/// Per-lock instrumentation.
///
/// `acquire`/`release` bracket every hold of the underlying lock. A policy
/// that tracks ownership itself blocks inside `acquire`; the underlying lock
/// is then taken uncontended.
pub trait DebugPolicy: Send + Sync + Sized + 'static {
    /// True when `acquire` grants logical ownership (and blocks for it).
    const TRACKS_OWNERSHIP: bool;

    /// Creates the state for one lock.
    fn new(name: &'static str, kind: LockKind) -> Self;

    /// Called before the underlying lock is taken.
    fn acquire(&self);

    /// Non-blocking `acquire`. Returns false if another thread holds the lock.
    fn try_acquire(&self) -> bool;

    /// Called when a guard is dropped.
    fn release(&self);

    /// True when the calling thread holds the lock. Policies that do not
    /// track ownership answer true.
    fn is_held_by_current_thread(&self) -> bool;
}

/// Uninstrumented policy. No bookkeeping, no checks.
#[derive(Clone, Copy, Debug, Default)]
pub struct Direct;

impl DebugPolicy for Direct {
    const TRACKS_OWNERSHIP: bool = false;

    #[inline(always)]
    fn new(_name: &'static str, _kind: LockKind) -> Self {
        Self
    }

    #[inline(always)]
    fn acquire(&self) {}

    #[inline(always)]
    fn try_acquire(&self) -> bool {
        true
    }

    #[inline(always)]
    fn release(&self) {}

    #[inline(always)]
    fn is_held_by_current_thread(&self) -> bool {
        true
    }
}
