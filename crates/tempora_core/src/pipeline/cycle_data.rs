//! Payload trait.

/// A value stored in a [`PipelineCycler`](super::PipelineCycler).
///
/// Stages share one instance until a write forces a copy. `make_copy` is
/// that copy; the default clones. Override it when a copy must differ from
/// a plain clone (fresh IDs, reset caches, ...).
pub trait CycleData: Clone + Send + Sync + 'static {
    /// Returns an independently owned copy of `self`.
    #[must_use]
    fn make_copy(&self) -> Self {
        self.clone()
    }
}

macro_rules! impl_cycle_data {
    ($($ty:ty),* $(,)?) => {
        $(impl CycleData for $ty {})*
    };
}

impl_cycle_data!(
    bool, u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64, String,
);

impl<T: Clone + Send + Sync + 'static> CycleData for Vec<T> {}

impl<T: Clone + Send + Sync + 'static> CycleData for Option<T> {}
