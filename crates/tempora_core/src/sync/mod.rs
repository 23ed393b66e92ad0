//! # Synchronization Primitives for Pipelined Data
//!
//! ## The Problem
//!
//! ```text
//! Thread 1 (App, stage 0):    WRITE cycler stages
//! Thread 2 (Cull, stage 1):   READ  cycler stages
//! Thread 3 (Draw, stage 2):   READ  cycler stages
//!
//! Every cycler has its own lock. Lock-order bugs between them hang the
//! frame, and a hung frame says nothing about which locks were involved.
//! ```
//!
//! ## The Solution: One Lock Type, Two Policies
//!
//! ```text
//!   Mutex<T, D> / ReMutex<T, D>
//!        │
//!        ├── parking_lot lock ........ protects T
//!        └── D: DebugPolicy .......... sees every acquire/release
//!               ├── Direct ........... release builds, compiles away
//!               └── DeadlockDetector . debug builds, waits-for graph
//! ```
//!
//! [`DefaultPolicy`] is chosen at build time: the detector whenever
//! `debug_assertions` is on or the `debug-locks` feature is enabled,
//! [`Direct`] otherwise. Code that names `Mutex<T>` gets whichever applies.

mod condvar;
mod deadlock;
mod mutex;
mod policy;
mod remutex;
mod thread;

pub use condvar::ConditionVar;
pub use deadlock::DeadlockDetector;
pub use mutex::{Mutex, MutexGuard};
pub use policy::{DebugPolicy, Direct, LockKind};
pub use remutex::{ReMutex, ReMutexGuard};
pub use thread::{Thread, ThreadHandle, ThreadId};

/// Lock policy used when none is named.
#[cfg(any(debug_assertions, feature = "debug-locks"))]
pub type DefaultPolicy = DeadlockDetector;

/// Lock policy used when none is named.
#[cfg(not(any(debug_assertions, feature = "debug-locks")))]
pub type DefaultPolicy = Direct;
