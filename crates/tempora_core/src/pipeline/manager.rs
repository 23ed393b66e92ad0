//! # Pipeline
//!
//! Owns the stage count, the registry of cyclers and the once-per-frame
//! cycle.
//!
//! ## Locks
//!
//! ```text
//!   cycle_lock (ReMutex)   serialises cycle() and set_num_stages()
//!   registry   (Mutex)     cycler slab, dirty set, cycling flag; held briefly
//!   cycler     (ReMutex)   one per cycler, see PipelineCycler
//!
//!   write:           cycler ─▶ registry
//!   cycle:           cycle_lock ─▶ registry (released) ─▶ each dirty cycler
//!   set_num_stages:  cycle_lock ─▶ every cycler, slot order ─▶ registry
//! ```
//!
//! `cycle` takes the registry lock only to collect the dirty set and releases
//! it before blocking on any cycler, so a writer holding its cycler while
//! registering itself dirty never waits on the cycling thread. A thread that
//! holds a cycler (a live reader, say) and then waits for `cycle_lock` does
//! close a cycle; the deadlock detector reports it.
//!
//! ## Deferred destruction
//!
//! Payloads evicted by cycling or dropped by a resize are collected and
//! dropped only after every lock is released. A payload whose `Drop` touches
//! other cyclers (or this pipeline) then runs like any other caller.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use super::cycle_data::CycleData;
use super::cycler::CyclerCore;
use super::registry::{CyclerEntry, CyclerId, Deferred, Registry, StageCycle, StageResize};
use super::stages::CyclerState;
use crate::config::PipelineConfig;
use crate::contract;
use crate::error::{ConfigResult, ContractViolation};
use crate::sync::{Mutex, ReMutex};

/// Values released by `cycle`/`set_num_stages`, dropped after unlocking.
#[derive(Default)]
struct Graveyard {
    payloads: Vec<Deferred>,
    cyclers: Vec<Arc<dyn StageCycle>>,
}

/// A set of pipeline stages and the cyclers living in them.
pub struct Pipeline {
    name: String,
    registry: Mutex<Registry>,
    cycle_lock: ReMutex<()>,
    /// Mirror of `registry.num_stages` for lock-free queries.
    num_stages: AtomicUsize,
    cycle_count: AtomicU64,
}

impl Pipeline {
    /// Creates a pipeline with `num_stages` stages.
    ///
    /// # Panics
    ///
    /// Contract violation if `num_stages` is 0.
    #[must_use]
    #[track_caller]
    pub fn new(name: impl Into<String>, num_stages: usize) -> Arc<Self> {
        if num_stages == 0 {
            contract::violation(ContractViolation::InvalidStageCount(num_stages));
        }
        let name = name.into();
        tracing::info!(pipeline = %name, num_stages, "pipeline created");
        Arc::new(Self {
            name,
            registry: Mutex::new("Pipeline::registry", Registry::new(num_stages)),
            cycle_lock: ReMutex::new("Pipeline::cycle", ()),
            num_stages: AtomicUsize::new(num_stages),
            cycle_count: AtomicU64::new(0),
        })
    }

    /// Creates a pipeline from validated configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`](crate::error::ConfigError::Invalid) if the
    /// configuration fails validation.
    pub fn from_config(name: impl Into<String>, config: &PipelineConfig) -> ConfigResult<Arc<Self>> {
        config.validate()?;
        Ok(Self::new(name, config.num_stages))
    }

    /// The process-wide render pipeline, created with one stage on first use.
    #[must_use]
    pub fn render_pipeline() -> Arc<Self> {
        static RENDER: OnceLock<Arc<Pipeline>> = OnceLock::new();
        Arc::clone(RENDER.get_or_init(|| Self::new("render", 1)))
    }

    /// Diagnostic name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current stage count.
    #[inline]
    #[must_use]
    pub fn num_stages(&self) -> usize {
        self.num_stages.load(Ordering::Acquire)
    }

    /// Number of completed multi-stage [`cycle`](Self::cycle) calls.
    #[inline]
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::Relaxed)
    }

    /// True while a [`cycle`](Self::cycle) is in progress.
    #[must_use]
    pub fn is_cycling(&self) -> bool {
        self.registry.lock().cycling
    }

    /// Number of registered cyclers.
    #[must_use]
    pub fn num_cyclers(&self) -> usize {
        self.registry.lock().cyclers.len()
    }

    /// Number of cyclers waiting for a cycle to converge.
    #[must_use]
    pub fn num_dirty_cyclers(&self) -> usize {
        self.registry.lock().dirty.len()
    }

    /// Advances every dirty cycler by one stage.
    ///
    /// Stage `i` receives what stage `i - 1` held; stage 0 keeps its value.
    /// Cyclers whose stages all agree afterwards leave the dirty set.
    /// A no-op with a single stage.
    ///
    /// # Panics
    ///
    /// Contract violation if called while this thread is already cycling
    /// this pipeline.
    pub fn cycle(&self) {
        let graveyard = self.cycle_locked();
        drop(graveyard);
    }

    fn cycle_locked(&self) -> Graveyard {
        let mut graveyard = Graveyard::default();
        let _cycle = self.cycle_lock.lock();
        let start = Instant::now();

        let pending: VecDeque<(CyclerId, Arc<dyn StageCycle>)> = {
            let mut registry = self.registry.lock();
            if registry.cycling {
                drop(registry);
                contract::violation(ContractViolation::CyclingInProgress(self.name.clone()));
            }
            if registry.num_stages == 1 {
                return graveyard;
            }
            registry.cycling = true;
            let dirty = mem::take(&mut registry.dirty);
            dirty
                .into_iter()
                .filter_map(|id| {
                    let entry = registry.cyclers.get(id.slot())?;
                    entry.cycler.upgrade().map(|cycler| (id, cycler))
                })
                .collect()
        };

        let cycled = pending.len();
        let mut scope = CyclingScope {
            registry: &self.registry,
            pending,
            still_dirty: Vec::new(),
        };

        // Peek before popping: a violation while locking leaves the cycler
        // pending, so the scope puts it back in the dirty set.
        while let Some((id, cycler)) = scope.pending.front().map(|(id, c)| (*id, Arc::clone(c))) {
            let outcome = cycler.cycle();
            scope.pending.pop_front();
            graveyard.payloads.push(outcome.evicted);
            if outcome.still_dirty {
                scope.still_dirty.push(id);
            }
            graveyard.cyclers.push(cycler);
        }

        let still_dirty = scope.still_dirty.len();
        drop(scope);
        let frame = self.cycle_count.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            pipeline = %self.name,
            frame,
            cycled,
            still_dirty,
            elapsed_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX),
            "pipeline cycled"
        );
        graveyard
    }

    /// Changes the stage count.
    ///
    /// Every cycler is locked (in registration slot order) before any of
    /// them is resized, so no reader or writer observes a mixed state.
    /// Growing replicates each cycler's oldest stage; shrinking drops the
    /// oldest stages. Stage 0 is always preserved.
    ///
    /// # Panics
    ///
    /// Contract violation if `num_stages` is 0.
    #[track_caller]
    pub fn set_num_stages(&self, num_stages: usize) {
        if num_stages == 0 {
            contract::violation(ContractViolation::InvalidStageCount(num_stages));
        }
        let graveyard = self.resize_locked(num_stages);
        drop(graveyard);
    }

    /// Grows the stage count to at least `min_stages`.
    #[track_caller]
    pub fn set_min_stages(&self, min_stages: usize) {
        let _cycle = self.cycle_lock.lock();
        if min_stages > self.num_stages() {
            self.set_num_stages(min_stages);
        }
    }

    fn resize_locked(&self, num_stages: usize) -> Graveyard {
        let mut graveyard = Graveyard::default();
        let _cycle = self.cycle_lock.lock();

        loop {
            let (epoch, cyclers) = {
                let registry = self.registry.lock();
                (registry.epoch, registry.live_cyclers())
            };

            // Registry lock released: writers may still need it to finish.
            let mut locked: Vec<Box<dyn StageResize + '_>> =
                cyclers.iter().map(|(_, c)| c.lock_for_resize()).collect();

            let mut registry = self.registry.lock();
            if registry.epoch != epoch {
                // A cycler came or went while we were locking; start over.
                drop(registry);
                drop(locked);
                graveyard.cyclers.extend(cyclers.into_iter().map(|(_, c)| c));
                continue;
            }

            let previous = registry.num_stages;
            registry.num_stages = num_stages;
            self.num_stages.store(num_stages, Ordering::Release);

            for ((id, _), cycler) in cyclers.iter().zip(locked.iter_mut()) {
                let outcome = cycler.set_num_stages(num_stages);
                graveyard.payloads.extend(outcome.removed);
                if outcome.cleaned {
                    registry.dirty.remove(id);
                }
            }
            drop(registry);
            drop(locked);

            tracing::info!(
                pipeline = %self.name,
                from = previous,
                to = num_stages,
                cyclers = cyclers.len(),
                "pipeline stage count changed"
            );
            graveyard.cyclers.extend(cyclers.into_iter().map(|(_, c)| c));
            return graveyard;
        }
    }

    /// Calls `f(type_name, count)` for every payload type with registered
    /// cyclers, in type name order.
    ///
    /// The counts are a snapshot; `f` runs with no pipeline lock held.
    pub fn iterate_all_cycler_types(&self, mut f: impl FnMut(&str, usize)) {
        let counts = {
            let registry = self.registry.lock();
            count_types(registry.cyclers.iter().map(|(_, entry)| entry.type_name))
        };
        for (type_name, count) in counts {
            f(type_name, count);
        }
    }

    /// Like [`iterate_all_cycler_types`](Self::iterate_all_cycler_types),
    /// restricted to dirty cyclers.
    pub fn iterate_dirty_cycler_types(&self, mut f: impl FnMut(&str, usize)) {
        let counts = {
            let registry = self.registry.lock();
            count_types(registry.dirty.iter().filter_map(|&id| registry.type_name(id)))
        };
        for (type_name, count) in counts {
            f(type_name, count);
        }
    }

    /// Registers a new cycler built by `init` from the current stage count.
    pub(crate) fn add_cycler<T: CycleData>(
        &self,
        init: impl FnOnce(usize) -> CyclerState<T>,
    ) -> Arc<CyclerCore<T>> {
        let mut registry = self.registry.lock();
        let id = CyclerId::from(registry.cyclers.next_id());
        let state = init(registry.num_stages);
        let dirty = state.dirty;

        let core = Arc::new(CyclerCore::new(id, state));
        let cycler: Weak<dyn StageCycle> = Arc::downgrade(&core) as Weak<dyn StageCycle>;
        let inserted = registry.cyclers.insert(CyclerEntry {
            cycler,
            type_name: std::any::type_name::<T>(),
        });
        debug_assert_eq!(CyclerId::from(inserted), id);

        if dirty {
            registry.dirty.insert(id);
        }
        registry.epoch += 1;
        tracing::trace!(pipeline = %self.name, cycler = %id, dirty, "cycler added");
        core
    }

    /// Records that `id`'s stages have diverged.
    #[track_caller]
    pub(crate) fn add_dirty_cycler(&self, id: CyclerId) {
        let mut registry = self.registry.lock();
        if !registry.contains(id) {
            drop(registry);
            contract::violation(ContractViolation::UnknownCycler(id, self.name.clone()));
        }
        if !registry.dirty.insert(id) {
            drop(registry);
            contract::violation(ContractViolation::AlreadyDirty(id, self.name.clone()));
        }
        tracing::trace!(pipeline = %self.name, cycler = %id, "cycler dirty");
    }

    /// Unregisters `id`, dirty or not.
    #[track_caller]
    pub(crate) fn remove_cycler(&self, id: CyclerId) {
        let mut registry = self.registry.lock();
        let Some(entry) = registry.cyclers.remove(id.slot()) else {
            drop(registry);
            contract::violation(ContractViolation::UnknownCycler(id, self.name.clone()));
        };
        registry.dirty.remove(&id);
        registry.epoch += 1;
        drop(registry);
        drop(entry);
        tracing::trace!(pipeline = %self.name, cycler = %id, "cycler removed");
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("num_stages", &self.num_stages())
            .field("cycle_count", &self.cycle_count())
            .finish_non_exhaustive()
    }
}

fn count_types(names: impl Iterator<Item = &'static str>) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for name in names {
        *counts.entry(name).or_insert(0) += 1;
    }
    counts
}

/// Puts still-dirty and not yet cycled cyclers back and clears the cycling
/// flag, also when a violation unwinds out of `cycle`.
struct CyclingScope<'a> {
    registry: &'a Mutex<Registry>,
    pending: VecDeque<(CyclerId, Arc<dyn StageCycle>)>,
    still_dirty: Vec<CyclerId>,
}

impl Drop for CyclingScope<'_> {
    fn drop(&mut self) {
        // Dropped after the registry lock: these may be the last owners.
        let pending = mem::take(&mut self.pending);
        let mut registry = self.registry.lock();
        let ids = self
            .still_dirty
            .drain(..)
            .chain(pending.iter().map(|(id, _)| *id));
        for id in ids {
            // Cyclers dropped mid-cycle are gone from the registry.
            if registry.contains(id) {
                registry.dirty.insert(id);
            }
        }
        registry.cycling = false;
        drop(registry);
        drop(pending);
    }
}
