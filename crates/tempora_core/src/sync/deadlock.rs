//! # Deadlock Detection
//!
//! Debug lock policy. Ownership of every instrumented lock in the process
//! lives in one waits-for graph behind one global lock:
//!
//! ```text
//!   thread A ──blocked_on──▶ lock L1 ──held by──▶ thread B
//!      ▲                                              │
//!      └────────held by──── lock L2 ◀──blocked_on─────┘
//! ```
//!
//! Before a thread blocks it walks `lock -> holder -> holder.blocked_on -> ...`.
//! Reaching itself means blocking would never end: the cycle is logged link
//! by link and reported as a contract violation instead of hanging.
//!
//! The global lock serialises every acquire and release of every
//! instrumented lock. That contention is the price of a consistent graph and
//! is why release builds select [`Direct`](super::Direct) instead.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::policy::{DebugPolicy, LockKind};
use super::thread::Thread;
use crate::contract;
use crate::error::{ContractViolation, DeadlockLink, DeadlockReport};

/// Lock IDs start at 1; 0 means "not blocked" in [`Thread`].
static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

static GRAPH: Mutex<LockGraph> = parking_lot::const_mutex(LockGraph::new());

struct Holder {
    thread: Arc<Thread>,
    count: usize,
    lock: &'static str,
}

/// Current owner of every held instrumented lock.
struct LockGraph {
    holders: BTreeMap<u64, Holder>,
}

impl LockGraph {
    const fn new() -> Self {
        Self {
            holders: BTreeMap::new(),
        }
    }

    /// Follows the waits-for chain starting at `lock`. Returns the cycle if
    /// it leads back to `me`.
    fn find_cycle(&self, lock: u64, me: &Thread) -> Option<DeadlockReport> {
        let mut links = Vec::new();
        let mut waiter = me.name().to_owned();
        let mut next = lock;

        // A chain can't be longer than the number of held locks.
        for _ in 0..=self.holders.len() {
            let holder = self.holders.get(&next)?;
            links.push(DeadlockLink {
                thread: waiter,
                lock: holder.lock,
                holder: holder.thread.name().to_owned(),
            });
            if holder.thread.id() == me.id() {
                return Some(DeadlockReport { links });
            }
            waiter = holder.thread.name().to_owned();
            next = holder.thread.blocked_on()?;
        }
        None
    }
}

/// Deadlock-detecting lock policy.
pub struct DeadlockDetector {
    id: u64,
    name: &'static str,
    kind: LockKind,
    /// Threads waiting for this lock. Always paired with `GRAPH`.
    waiters: Condvar,
}

impl DeadlockDetector {
    /// Name given at construction.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// How many times the current holder has acquired the lock (0 if free).
    #[must_use]
    pub fn hold_count(&self) -> usize {
        GRAPH.lock().holders.get(&self.id).map_or(0, |h| h.count)
    }

    /// Name of the thread holding the lock.
    #[must_use]
    pub fn holder_name(&self) -> Option<String> {
        GRAPH
            .lock()
            .holders
            .get(&self.id)
            .map(|h| h.thread.name().to_owned())
    }
}

impl DebugPolicy for DeadlockDetector {
    const TRACKS_OWNERSHIP: bool = true;

    fn new(name: &'static str, kind: LockKind) -> Self {
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            name,
            kind,
            waiters: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let me = Thread::current();
        let mut graph = GRAPH.lock();
        loop {
            let owner = graph.holders.get(&self.id).map(|h| h.thread.id());
            match owner {
                None => {
                    graph.holders.insert(
                        self.id,
                        Holder {
                            thread: Arc::clone(&me),
                            count: 1,
                            lock: self.name,
                        },
                    );
                    return;
                }
                Some(owner) if owner == me.id() => {
                    if self.kind == LockKind::Reentrant {
                        if let Some(holder) = graph.holders.get_mut(&self.id) {
                            holder.count += 1;
                        }
                        return;
                    }
                    drop(graph);
                    contract::violation(ContractViolation::NonReentrantRelock {
                        lock: self.name,
                        thread: me.name().to_owned(),
                    });
                }
                Some(_) => {
                    if let Some(report) = graph.find_cycle(self.id, &me) {
                        drop(graph);
                        for link in &report.links {
                            tracing::error!(
                                thread = %link.thread,
                                lock = link.lock,
                                holder = %link.holder,
                                "deadlock link"
                            );
                        }
                        contract::violation(ContractViolation::Deadlock(report));
                    }
                    me.set_blocked_on(Some(self.id));
                    self.waiters.wait(&mut graph);
                    me.set_blocked_on(None);
                }
            }
        }
    }

    fn try_acquire(&self) -> bool {
        let me = Thread::current();
        let mut graph = GRAPH.lock();
        let owner = graph.holders.get(&self.id).map(|h| h.thread.id());
        match owner {
            None => {
                graph.holders.insert(
                    self.id,
                    Holder {
                        thread: me,
                        count: 1,
                        lock: self.name,
                    },
                );
                true
            }
            Some(owner) if owner == me.id() => {
                if self.kind == LockKind::Reentrant {
                    if let Some(holder) = graph.holders.get_mut(&self.id) {
                        holder.count += 1;
                    }
                    return true;
                }
                drop(graph);
                contract::violation(ContractViolation::NonReentrantRelock {
                    lock: self.name,
                    thread: me.name().to_owned(),
                });
            }
            Some(_) => false,
        }
    }

    fn release(&self) {
        let me = Thread::current();
        let mut graph = GRAPH.lock();
        let owner = graph
            .holders
            .get(&self.id)
            .map(|h| (h.thread.id(), h.thread.name().to_owned()));
        match owner {
            None => {
                drop(graph);
                contract::violation(ContractViolation::ReleaseUnlocked {
                    lock: self.name,
                    thread: me.name().to_owned(),
                });
            }
            Some((owner, owner_name)) if owner != me.id() => {
                drop(graph);
                contract::violation(ContractViolation::ReleaseNotOwner {
                    lock: self.name,
                    thread: me.name().to_owned(),
                    owner: owner_name,
                });
            }
            Some(_) => {
                let remaining = match graph.holders.get_mut(&self.id) {
                    Some(holder) => {
                        holder.count -= 1;
                        holder.count
                    }
                    None => 0,
                };
                if remaining == 0 {
                    graph.holders.remove(&self.id);
                    self.waiters.notify_one();
                }
            }
        }
    }

    fn is_held_by_current_thread(&self) -> bool {
        let me = Thread::current();
        GRAPH
            .lock()
            .holders
            .get(&self.id)
            .is_some_and(|h| h.thread.id() == me.id())
    }
}

impl Drop for DeadlockDetector {
    fn drop(&mut self) {
        // A leaked guard would otherwise leave a phantom holder in the graph.
        GRAPH.lock().holders.remove(&self.id);
    }
}
