//! # Slab Arena
//!
//! Growable slot arena with generation-checked handles. The pipeline keeps
//! its cycler registry here instead of threading an intrusive list through
//! the cyclers themselves.

/// Handle to an occupied slot.
///
/// The ID is split into two parts:
/// - Lower 32 bits: Index into the slot array
/// - Upper 32 bits: Generation counter for detecting stale handles
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SlotId(u64);

impl SlotId {
    /// Creates a slot ID from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the ID.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the ID.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A slot arena.
///
/// Insert and remove are O(1). Freed slots are reused, and every reuse bumps
/// the slot's generation so handles to the previous occupant stop resolving.
///
/// # Thread Safety
///
/// Not thread-safe. The pipeline wraps it in its registry lock.
pub struct Slab<T> {
    slots: Vec<Slot<T>>,
    /// Indices of vacant slots, most recently freed last.
    free_list: Vec<u32>,
    len: usize,
}

impl<T> Slab<T> {
    /// Creates an empty slab.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Creates an empty slab with room for `capacity` values.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Number of occupied slots.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when no slot is occupied.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The ID the next [`insert`](Self::insert) will return.
    #[must_use]
    pub fn next_id(&self) -> SlotId {
        match self.free_list.last() {
            Some(&index) => SlotId::new(index, self.slots[index as usize].generation),
            None => SlotId::new(self.slot_count(), 0),
        }
    }

    /// Stores `value` and returns its handle.
    pub fn insert(&mut self, value: T) -> SlotId {
        self.len += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return SlotId::new(index, slot.generation);
        }

        let index = self.slot_count();
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        SlotId::new(index, 0)
    }

    /// Removes and returns the value behind `id`, or `None` for a stale handle.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index());
        self.len -= 1;
        Some(value)
    }

    /// Returns the value behind `id`.
    #[inline]
    #[must_use]
    pub fn get(&self, id: SlotId) -> Option<&T> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.value.as_ref()
    }

    /// True when `id` still refers to a live value.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: SlotId) -> bool {
        self.get(id).is_some()
    }

    /// Iterates occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let id = SlotId::new(index as u32, slot.generation);
            slot.value.as_ref().map(|value| (id, value))
        })
    }

    fn slot_count(&self) -> u32 {
        u32::try_from(self.slots.len()).unwrap_or(u32::MAX)
    }
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}
