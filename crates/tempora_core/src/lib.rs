//! # TEMPORA Core
//!
//! Pipelined data for multi-threaded frame processing:
//! - Producer and consumer threads work on different frames at once
//! - Each shared value keeps one snapshot per pipeline stage
//! - Snapshots are shared until written, copied on first divergence
//!
//! ## Architecture Rules
//!
//! 1. **Stage 0 is now** - higher stages are older frames
//! 2. **Cycle once per frame** - `Pipeline::cycle()` at the frame boundary
//! 3. **Contract violations are bugs** - they panic, they are never `Result`s
//! 4. **Debug builds check every lock** - release builds check nothing
//!
//! ## Example
//!
//! ```rust,ignore
//! use tempora_core::{Pipeline, PipelineCycler};
//!
//! let pipeline = Pipeline::new("render", 2);
//! let score = PipelineCycler::with_pipeline(0u32, &pipeline);
//!
//! score.write(0, |s| *s += 10);
//! assert_eq!(*score.read(1), 0);
//!
//! pipeline.cycle();
//! assert_eq!(*score.read(1), 10);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod contract;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod sync;

pub use config::{PipelineConfig, ThreadConfig};
pub use contract::{clear_violation_hook, set_violation_hook, ViolationHook};
pub use error::{
    ConfigError, ConfigResult, ContractViolation, DeadlockLink, DeadlockReport, ThreadError,
};
pub use memory::{Slab, SlotId};
pub use pipeline::{CycleData, CycleDataReader, CyclerId, Pipeline, PipelineCycler};
pub use sync::{
    ConditionVar, DeadlockDetector, DebugPolicy, DefaultPolicy, Direct, Mutex, MutexGuard,
    ReMutex, ReMutexGuard, Thread, ThreadHandle, ThreadId,
};
