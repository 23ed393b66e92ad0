//! # Pipeline Cycler
//!
//! One logical value, N temporal snapshots of it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let pipeline = Pipeline::new("render", 3);
//! let transform = PipelineCycler::with_pipeline(Transform::IDENTITY, &pipeline);
//!
//! // App thread (stage 0)
//! transform.write(0, |t| t.translate(1.0, 0.0, 0.0));
//!
//! // Draw thread (stage 2) sees the value from two frames ago
//! let t = transform.read(2);
//! draw(&*t);
//! drop(t);
//!
//! // Frame boundary
//! pipeline.cycle();
//! ```
//!
//! ## Locking
//!
//! Each cycler has its own reentrant lock. Readers hold it for the lifetime
//! of their [`CycleDataReader`]; writers hold it for the duration of the
//! write closure. Touching the same cycler from inside its own write
//! closure is a contract violation. Touching other cyclers is fine.

use std::any::type_name;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::sync::Arc;

use super::cycle_data::CycleData;
use super::manager::Pipeline;
use super::registry::{CycleOutcome, CyclerId, Deferred, ResizeOutcome, StageCycle, StageResize};
use super::stages::CyclerState;
use crate::contract;
use crate::error::ContractViolation;
use crate::sync::{ReMutex, ReMutexGuard, Thread};

type StateLock<T> = ReMutex<RefCell<CyclerState<T>>>;
type StateGuard<'a, T> = ReMutexGuard<'a, RefCell<CyclerState<T>>>;

/// Shared between the owning [`PipelineCycler`] and the pipeline registry.
pub(crate) struct CyclerCore<T> {
    id: CyclerId,
    state: StateLock<T>,
}

impl<T: CycleData> CyclerCore<T> {
    pub(crate) fn new(id: CyclerId, state: CyclerState<T>) -> Self {
        Self {
            id,
            state: ReMutex::new("PipelineCycler", RefCell::new(state)),
        }
    }

    fn borrow<'g>(&self, guard: &'g StateGuard<'_, T>) -> Ref<'g, CyclerState<T>> {
        match guard.try_borrow() {
            Ok(state) => state,
            Err(_) => contract::violation(ContractViolation::NestedStageAccess(self.id)),
        }
    }

    fn borrow_mut<'g>(&self, guard: &'g StateGuard<'_, T>) -> RefMut<'g, CyclerState<T>> {
        match guard.try_borrow_mut() {
            Ok(state) => state,
            Err(_) => contract::violation(ContractViolation::NestedStageAccess(self.id)),
        }
    }
}

fn check_stage<T: CycleData>(state: &CyclerState<T>, stage: usize) {
    if stage >= state.num_stages() {
        contract::violation(ContractViolation::StageOutOfRange {
            stage,
            num_stages: state.num_stages(),
        });
    }
}

impl<T: CycleData> StageCycle for CyclerCore<T> {
    fn cycle(&self) -> CycleOutcome {
        let guard = self.state.lock();
        let mut state = self.borrow_mut(&guard);
        if !state.dirty {
            drop(state);
            drop(guard);
            contract::violation(ContractViolation::CleanCyclerCycled(self.id));
        }
        let evicted = state.cycle();
        CycleOutcome {
            evicted: Box::new(evicted),
            still_dirty: state.dirty,
        }
    }

    fn lock_for_resize(&self) -> Box<dyn StageResize + '_> {
        Box::new(ResizeHandle {
            core: self,
            guard: self.state.lock(),
        })
    }
}

struct ResizeHandle<'a, T> {
    core: &'a CyclerCore<T>,
    guard: StateGuard<'a, T>,
}

impl<T: CycleData> StageResize for ResizeHandle<'_, T> {
    fn set_num_stages(&mut self, num_stages: usize) -> ResizeOutcome {
        let mut state = self.core.borrow_mut(&self.guard);
        let (removed, cleaned) = state.resize(num_stages);
        ResizeOutcome {
            removed: removed
                .into_iter()
                .map(|data| Box::new(data) as Deferred)
                .collect(),
            cleaned,
        }
    }
}

/// N stage snapshots of a `T`, registered with a [`Pipeline`].
///
/// All stages start out sharing the initial value. Writing a stage that is
/// shared with another stage copies it first and marks the cycler dirty;
/// [`Pipeline::cycle`] then shifts the stages until they agree again.
pub struct PipelineCycler<T: CycleData> {
    core: Arc<CyclerCore<T>>,
    pipeline: Arc<Pipeline>,
}

impl<T: CycleData> PipelineCycler<T> {
    /// Creates a cycler on the process-wide render pipeline.
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self::with_pipeline(initial, &Pipeline::render_pipeline())
    }

    /// Creates a cycler on `pipeline`, all stages sharing `initial`.
    #[must_use]
    pub fn with_pipeline(initial: T, pipeline: &Arc<Pipeline>) -> Self {
        let data = Arc::new(initial);
        let core = pipeline.add_cycler(|num_stages| CyclerState::new(data, num_stages));
        Self {
            core,
            pipeline: Arc::clone(pipeline),
        }
    }

    /// Registry handle.
    #[inline]
    #[must_use]
    pub fn id(&self) -> CyclerId {
        self.core.id
    }

    /// The owning pipeline.
    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Locks the cycler and returns the payload at `stage`.
    ///
    /// The lock is held until the reader is dropped.
    ///
    /// # Panics
    ///
    /// Contract violation if `stage` is out of range, or if called from
    /// inside a write to this cycler.
    #[track_caller]
    pub fn read(&self, stage: usize) -> CycleDataReader<'_, T> {
        let guard = self.core.state.lock();
        let data = {
            let state = self.core.borrow(&guard);
            check_stage(&state, stage);
            Arc::clone(&state.stages[stage])
        };
        CycleDataReader {
            _guard: guard,
            data,
        }
    }

    /// [`read`](Self::read) at the calling thread's pipeline stage.
    #[track_caller]
    pub fn read_current(&self) -> CycleDataReader<'_, T> {
        self.read(Thread::current_pipeline_stage())
    }

    /// Snapshot of `stage` that does not keep the cycler locked.
    ///
    /// Later writes never show through the snapshot: they copy instead.
    #[track_caller]
    pub fn read_unlocked(&self, stage: usize) -> Arc<T> {
        let guard = self.core.state.lock();
        let state = self.core.borrow(&guard);
        check_stage(&state, stage);
        Arc::clone(&state.stages[stage])
    }

    /// Mutates the payload at `stage`.
    ///
    /// If another stage shares the payload it is copied first (and the
    /// cycler registered dirty on its first divergence). If only an
    /// outside snapshot shares it, it is copied without affecting dirtiness.
    ///
    /// # Panics
    ///
    /// Contract violation if `stage` is out of range or the cycler is
    /// already being accessed by this thread's enclosing write.
    #[track_caller]
    pub fn write<R>(&self, stage: usize, f: impl FnOnce(&mut T) -> R) -> R {
        let guard = self.core.state.lock();
        let mut state = self.core.borrow_mut(&guard);
        check_stage(&state, stage);

        if state.node_count(stage) > 1 {
            self.mark_dirty(&mut state);
            state.unshare(stage);
            tracing::trace!(cycler = %self.id(), stage, "copy on write");
        }
        let data = state.exclusive(stage);
        f(data)
    }

    /// [`write`](Self::write) at the calling thread's pipeline stage.
    #[track_caller]
    pub fn write_current<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.write(Thread::current_pipeline_stage(), f)
    }

    /// Mutates the payload at `stage` as if the change had been made
    /// upstream: every earlier stage sharing the payload sees it too.
    ///
    /// With `force_to_0`, every stage from 0 through `stage` ends up sharing
    /// the mutated payload regardless of what it held before. Later stages
    /// that shared the old payload keep it.
    ///
    /// # Panics
    ///
    /// As [`write`](Self::write).
    #[track_caller]
    pub fn write_upstream<R>(
        &self,
        stage: usize,
        force_to_0: bool,
        f: impl FnOnce(&mut T) -> R,
    ) -> R {
        // Replaced slots; dropped after the lock.
        let mut retired: Vec<Arc<T>> = Vec::new();

        let guard = self.core.state.lock();
        let mut state = self.core.borrow_mut(&guard);
        check_stage(&state, stage);

        if state.node_count(stage) != 1 || force_to_0 {
            let run_start = state.run_start(stage);
            // References other than this slot and its upstream aliases.
            let external = Arc::strong_count(&state.stages[stage]) - 1 - (stage - run_start);

            if external > 0 {
                let lo = if force_to_0 { 0 } else { run_start };
                if lo > 0 || stage + 1 < state.num_stages() {
                    self.mark_dirty(&mut state);
                }
                let copy = Arc::new(state.stages[stage].make_copy());
                for slot in &mut state.stages[lo..=stage] {
                    retired.push(mem::replace(slot, Arc::clone(&copy)));
                }
                tracing::trace!(cycler = %self.id(), stage, lo, "copy on upstream write");
            } else if force_to_0 && run_start > 0 {
                let data = Arc::clone(&state.stages[stage]);
                for slot in &mut state.stages[..run_start] {
                    retired.push(mem::replace(slot, Arc::clone(&data)));
                }
            }
        }

        let result = state.mutate_run(stage, f);
        drop(state);
        drop(guard);
        drop(retired);
        result
    }

    /// [`write_upstream`](Self::write_upstream) at the calling thread's
    /// pipeline stage.
    #[track_caller]
    pub fn write_upstream_current<R>(&self, force_to_0: bool, f: impl FnOnce(&mut T) -> R) -> R {
        self.write_upstream(Thread::current_pipeline_stage(), force_to_0, f)
    }

    /// True if adjacent stages may hold different payloads.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        let guard = self.core.state.lock();
        let dirty = self.core.borrow(&guard).dirty;
        dirty
    }

    /// Stage count as this cycler currently sees it.
    #[must_use]
    pub fn num_stages(&self) -> usize {
        let guard = self.core.state.lock();
        let n = self.core.borrow(&guard).num_stages();
        n
    }

    /// True if nothing but `stage`'s own slot refers to its payload: no other
    /// stage, no reader, no snapshot, no cloned cycler.
    #[must_use]
    #[track_caller]
    pub fn is_stage_unique(&self, stage: usize) -> bool {
        let guard = self.core.state.lock();
        let state = self.core.borrow(&guard);
        check_stage(&state, stage);
        Arc::strong_count(&state.stages[stage]) == 1
    }

    fn mark_dirty(&self, state: &mut CyclerState<T>) {
        if state.dirty {
            return;
        }
        // Registers first: a violation leaves the cycler untouched.
        self.pipeline.add_dirty_cycler(self.id());
        state.dirty = true;
    }
}

impl<T: CycleData> Clone for PipelineCycler<T> {
    /// A new cycler whose stages share this one's payloads, dirty if this
    /// one is.
    fn clone(&self) -> Self {
        let guard = self.core.state.lock();
        let state = self.core.borrow(&guard);
        let core = self.pipeline.add_cycler(|num_stages| {
            debug_assert_eq!(num_stages, state.num_stages());
            CyclerState {
                stages: state.stages.clone(),
                dirty: state.dirty,
            }
        });
        drop(state);
        drop(guard);
        Self {
            core,
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

impl<T: CycleData> Drop for PipelineCycler<T> {
    fn drop(&mut self) {
        self.pipeline.remove_cycler(self.core.id);
    }
}

impl<T: CycleData> fmt::Debug for PipelineCycler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineCycler")
            .field("id", &self.core.id)
            .field("type", &type_name::<T>())
            .field("pipeline", &self.pipeline.name())
            .finish()
    }
}

/// Read access to one stage of a [`PipelineCycler`].
///
/// Holds the cycler lock: writers on other threads and the pipeline's cycle
/// wait for it. Keep it short-lived.
pub struct CycleDataReader<'a, T: CycleData> {
    _guard: StateGuard<'a, T>,
    data: Arc<T>,
}

impl<T: CycleData> CycleDataReader<'_, T> {
    /// Clones the payload handle so it can outlive the reader.
    #[must_use]
    pub fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.data)
    }
}

impl<T: CycleData> Deref for CycleDataReader<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.data
    }
}
