//! Cycler registry: every live cycler of a pipeline and the dirty subset.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::memory::{Slab, SlotId};

/// Handle of a cycler within its pipeline.
///
/// Handles are never reused for a different cycler: a freed registry slot
/// gets a new generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CyclerId(SlotId);

impl CyclerId {
    pub(crate) const fn slot(self) -> SlotId {
        self.0
    }
}

impl From<SlotId> for CyclerId {
    fn from(slot: SlotId) -> Self {
        Self(slot)
    }
}

impl fmt::Display for CyclerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0.index(), self.0.generation())
    }
}

/// A payload evicted or dropped while a cycler lock was held. Dropped by the
/// pipeline once every lock is released.
pub(crate) type Deferred = Box<dyn Any + Send>;

/// Result of shifting one cycler.
pub(crate) struct CycleOutcome {
    pub(crate) evicted: Deferred,
    pub(crate) still_dirty: bool,
}

/// Result of resizing one cycler.
pub(crate) struct ResizeOutcome {
    pub(crate) removed: Vec<Deferred>,
    /// The cycler was dirty and converged.
    pub(crate) cleaned: bool,
}

/// Type-erased view of a cycler, as the pipeline sees it.
pub(crate) trait StageCycle: Send + Sync {
    /// Blocks until the cycler lock is held, then shifts the stages.
    fn cycle(&self) -> CycleOutcome;

    /// Blocks until the cycler lock is held and returns it as a resize handle.
    fn lock_for_resize(&self) -> Box<dyn StageResize + '_>;
}

/// A locked cycler awaiting a stage count change.
pub(crate) trait StageResize {
    fn set_num_stages(&mut self, num_stages: usize) -> ResizeOutcome;
}

pub(crate) struct CyclerEntry {
    pub(crate) cycler: Weak<dyn StageCycle>,
    pub(crate) type_name: &'static str,
}

/// State guarded by the pipeline's registry lock.
pub(crate) struct Registry {
    pub(crate) cyclers: Slab<CyclerEntry>,
    pub(crate) dirty: BTreeSet<CyclerId>,
    pub(crate) cycling: bool,
    /// Bumped on every registration change.
    pub(crate) epoch: u64,
    pub(crate) num_stages: usize,
}

impl Registry {
    pub(crate) fn new(num_stages: usize) -> Self {
        Self {
            cyclers: Slab::new(),
            dirty: BTreeSet::new(),
            cycling: false,
            epoch: 0,
            num_stages,
        }
    }

    pub(crate) fn contains(&self, id: CyclerId) -> bool {
        self.cyclers.contains(id.slot())
    }

    pub(crate) fn type_name(&self, id: CyclerId) -> Option<&'static str> {
        self.cyclers.get(id.slot()).map(|entry| entry.type_name)
    }

    /// Upgrades every live cycler, in registration slot order.
    pub(crate) fn live_cyclers(&self) -> Vec<(CyclerId, Arc<dyn StageCycle>)> {
        self.cyclers
            .iter()
            .filter_map(|(slot, entry)| entry.cycler.upgrade().map(|c| (CyclerId(slot), c)))
            .collect()
    }
}
