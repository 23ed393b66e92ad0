//! # Pipelined Stage Data
//!
//! A [`Pipeline`] has N stages. Stage 0 is "now": the application thread
//! writes it. Stage N-1 is the oldest: the last consumer in the frame reads
//! it. Each [`PipelineCycler`] keeps one payload per stage, sharing them
//! until a write forces a copy.
//!
//! ```text
//! Frame N:
//!   App   (stage 0) writes transform = T2
//!   Cull  (stage 1) reads  transform = T1
//!   Draw  (stage 2) reads  transform = T0
//!
//! Frame boundary: pipeline.cycle()
//!   stage 2 <- stage 1 <- stage 0      (T0 evicted)
//!
//! Frame N+1:
//!   App   (stage 0) sees T2
//!   Cull  (stage 1) sees T2
//!   Draw  (stage 2) sees T1
//! ```
//!
//! Only cyclers whose stages disagree ("dirty") are visited by `cycle()`.

mod cycle_data;
mod cycler;
mod manager;
mod registry;
mod stages;

pub use cycle_data::CycleData;
pub use cycler::{CycleDataReader, PipelineCycler};
pub use manager::Pipeline;
pub use registry::CyclerId;
