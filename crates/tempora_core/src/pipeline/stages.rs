//! # Stage Vector
//!
//! The per-cycler array of stage slots and the rules for sharing, copying
//! and shifting them. Everything here runs with the cycler lock held; no
//! method takes a lock or talks to the pipeline.
//!
//! ```text
//!   stage:     0      1      2
//!            ┌────┐ ┌────┐ ┌────┐
//!   slots:   │ ●──┼─┼─●──┼─┼─●  │    converged: one payload, three slots
//!            └──┼─┘ └──┼─┘ └──┼─┘
//!               └──────┴──────┴──▶ Arc<T> (strong = 3)
//!
//!   write(0)   ▶  [ T' | T  | T ]    diverged: dirty
//!   cycle()    ▶  [ T' | T' | T ]    oldest evicted, still dirty
//!   cycle()    ▶  [ T' | T' | T']    converged: clean
//! ```
//!
//! Sharing among slots is the node count: how many slots point at the same
//! allocation. Any other strong reference (a live reader, an unlocked
//! snapshot, a cloned cycler) is external and forces a copy before mutation.

use std::iter;
use std::mem;
use std::sync::Arc;

use super::cycle_data::CycleData;

/// Stage slots of one cycler.
pub(crate) struct CyclerState<T> {
    pub(crate) stages: Vec<Arc<T>>,
    /// True while adjacent slots may differ. Set on divergence, cleared only
    /// when cycling or a resize converges the slots.
    pub(crate) dirty: bool,
}

impl<T: CycleData> CyclerState<T> {
    /// All `num_stages` slots share `data`.
    pub(crate) fn new(data: Arc<T>, num_stages: usize) -> Self {
        Self {
            stages: vec![data; num_stages],
            dirty: false,
        }
    }

    pub(crate) fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Number of slots sharing the payload at `stage`.
    pub(crate) fn node_count(&self, stage: usize) -> usize {
        let data = &self.stages[stage];
        self.stages.iter().filter(|d| Arc::ptr_eq(d, data)).count()
    }

    /// First stage of the contiguous run of slots, ending at `stage`, that
    /// share its payload.
    pub(crate) fn run_start(&self, stage: usize) -> usize {
        let data = &self.stages[stage];
        let mut k = stage;
        while k > 0 && Arc::ptr_eq(&self.stages[k - 1], data) {
            k -= 1;
        }
        k
    }

    /// True when every slot shares one payload.
    pub(crate) fn is_converged(&self) -> bool {
        self.stages.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1]))
    }

    /// Gives `stage` its own payload if another slot shares it.
    ///
    /// Returns true if a copy was made. The caller registers the divergence
    /// with the pipeline before calling this.
    pub(crate) fn unshare(&mut self, stage: usize) -> bool {
        if self.node_count(stage) <= 1 {
            return false;
        }
        let copy = Arc::new(self.stages[stage].make_copy());
        // Other slots still hold the old payload; this never frees it.
        let _old = mem::replace(&mut self.stages[stage], copy);
        true
    }

    /// Mutable access to the payload at `stage`, copying it first if
    /// anything outside this slot holds it.
    pub(crate) fn exclusive(&mut self, stage: usize) -> &mut T {
        make_exclusive(&mut self.stages[stage])
    }

    /// Runs `f` on the payload at `stage` and on every slot of its upstream
    /// alias run at once. Slots keep sharing one payload afterwards.
    ///
    /// The run's own slots don't count as sharing: the payload is copied
    /// only when something outside the run holds it.
    pub(crate) fn mutate_run<R>(&mut self, stage: usize, f: impl FnOnce(&mut T) -> R) -> R {
        let lo = self.run_start(stage);
        let data = Arc::clone(&self.stages[stage]);
        drop(self.stages.drain(lo..=stage));

        let mut restore = Restore {
            stages: &mut self.stages,
            at: lo,
            count: stage - lo + 1,
            data,
        };
        let data = make_exclusive(&mut restore.data);
        f(data)
    }

    /// Shifts every slot one stage down. Stage 0 keeps its payload, the
    /// oldest payload is returned for the caller to drop outside the lock.
    pub(crate) fn cycle(&mut self) -> Arc<T> {
        if self.stages.len() < 2 {
            self.dirty = false;
            return Arc::clone(&self.stages[0]);
        }
        self.stages.rotate_right(1);
        let newest = Arc::clone(&self.stages[1]);
        let evicted = mem::replace(&mut self.stages[0], newest);
        self.dirty = !self.is_converged();
        evicted
    }

    /// Grows (replicating the last slot) or shrinks to `num_stages`.
    ///
    /// Returns the dropped slots and whether a dirty cycler converged.
    pub(crate) fn resize(&mut self, num_stages: usize) -> (Vec<Arc<T>>, bool) {
        let removed = if num_stages < self.stages.len() {
            self.stages.split_off(num_stages)
        } else {
            if let Some(last) = self.stages.last().cloned() {
                self.stages.resize(num_stages, last);
            }
            Vec::new()
        };

        let cleaned = self.dirty && self.is_converged();
        if cleaned {
            self.dirty = false;
        }
        (removed, cleaned)
    }
}

/// Copies the payload unless `slot` is its only owner, then returns it.
fn make_exclusive<T: CycleData>(slot: &mut Arc<T>) -> &mut T {
    if Arc::get_mut(slot).is_none() {
        *slot = Arc::new(slot.make_copy());
    }
    // Unique now; make_mut only clones when shared.
    Arc::make_mut(slot)
}

/// Puts a drained alias run back, even if the mutation panicked.
struct Restore<'a, T> {
    stages: &'a mut Vec<Arc<T>>,
    at: usize,
    count: usize,
    data: Arc<T>,
}

impl<T> Drop for Restore<'_, T> {
    fn drop(&mut self) {
        let tail = self.stages.split_off(self.at);
        self.stages
            .extend(iter::repeat(&self.data).take(self.count).cloned());
        self.stages.extend(tail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(state: &CyclerState<u32>) -> Vec<u32> {
        state.stages.iter().map(|d| **d).collect()
    }

    #[test]
    fn test_new_state_is_converged() {
        let state = CyclerState::new(Arc::new(7u32), 3);
        assert_eq!(state.node_count(1), 3);
        assert_eq!(state.run_start(2), 0);
        assert!(state.is_converged());
        assert!(!state.dirty);
    }

    #[test]
    fn test_unshare_copies_only_shared_slots() {
        let mut state = CyclerState::new(Arc::new(1u32), 3);
        assert!(state.unshare(0));
        assert_eq!(state.node_count(0), 1);
        assert_eq!(state.node_count(1), 2);

        // Already exclusive.
        assert!(!state.unshare(0));
    }

    #[test]
    fn test_exclusive_preserves_external_snapshot() {
        let mut state = CyclerState::new(Arc::new(1u32), 1);
        let snapshot = Arc::clone(&state.stages[0]);

        *state.exclusive(0) = 2;
        assert_eq!(*snapshot, 1);
        assert_eq!(*state.stages[0], 2);
    }

    #[test]
    fn test_mutate_run_keeps_aliases_without_copy() {
        let mut state = CyclerState::new(Arc::new(1u32), 3);
        state.unshare(2);
        let before = Arc::as_ptr(&state.stages[0]);

        state.mutate_run(1, |v| *v = 5);

        assert_eq!(values(&state), vec![5, 5, 1]);
        assert!(Arc::ptr_eq(&state.stages[0], &state.stages[1]));
        assert_eq!(Arc::as_ptr(&state.stages[0]), before);
    }

    #[test]
    fn test_mutate_run_restores_on_panic() {
        let mut state = CyclerState::new(Arc::new(1u32), 3);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            state.mutate_run(1, |_| panic!("boom"));
        }));
        assert!(result.is_err());
        assert_eq!(state.num_stages(), 3);
        assert!(state.is_converged());
    }

    #[test]
    fn test_cycle_shifts_and_converges() {
        let mut state = CyclerState::new(Arc::new(0u32), 3);
        state.unshare(0);
        *state.exclusive(0) = 1;
        state.dirty = true;

        let evicted = state.cycle();
        assert_eq!(*evicted, 0);
        assert_eq!(values(&state), vec![1, 1, 0]);
        assert!(state.dirty);

        state.cycle();
        assert_eq!(values(&state), vec![1, 1, 1]);
        assert!(!state.dirty);
    }

    #[test]
    fn test_resize_pads_with_last_stage() {
        let mut state = CyclerState::new(Arc::new(0u32), 2);
        state.unshare(0);
        *state.exclusive(0) = 9;
        state.dirty = true;

        let (removed, cleaned) = state.resize(4);
        assert!(removed.is_empty());
        assert!(!cleaned);
        assert_eq!(values(&state), vec![9, 0, 0, 0]);
        assert!(Arc::ptr_eq(&state.stages[1], &state.stages[3]));
    }

    #[test]
    fn test_shrink_can_clean() {
        let mut state = CyclerState::new(Arc::new(0u32), 3);
        state.unshare(2);
        state.dirty = true;

        let (removed, cleaned) = state.resize(2);
        assert_eq!(removed.len(), 1);
        assert!(cleaned);
        assert!(!state.dirty);
    }
}
