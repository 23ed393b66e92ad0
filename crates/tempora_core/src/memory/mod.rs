//! # Memory Management
//!
//! Handle-indexed storage for objects shared between threads by ID rather
//! than by pointer.

mod slab;

pub use slab::{Slab, SlotId};
