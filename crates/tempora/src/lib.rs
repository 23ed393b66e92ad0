//! # TEMPORA
//!
//! Frame driver for pipelined applications built on [`tempora_core`].
//!
//! ```text
//!            frame N          frame N-1         frame N-2
//!         ┌───────────┐    ┌───────────┐    ┌───────────┐
//!         │ app       │    │ cull      │    │ draw      │
//!         │ stage 0   │    │ stage 1   │    │ stage 2   │
//!         └─────┬─────┘    └─────┬─────┘    └─────┬─────┘
//!               └────────────────┴────────────────┘
//!                                │
//!                       Pipeline::cycle()
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tempora::{FrameLoop, FrameLoopConfig};
//! use tempora_core::PipelineCycler;
//!
//! let mut config = FrameLoopConfig::default();
//! config.pipeline.num_stages = 2;
//! let mut frame_loop = FrameLoop::new(config)?;
//!
//! let score = Arc::new(PipelineCycler::with_pipeline(0u32, frame_loop.pipeline()));
//! let shown = Arc::clone(&score);
//! frame_loop.spawn_stage(move |ctx| println!("score {}", *shown.read(ctx.stage)))?;
//!
//! frame_loop.run(60, |ctx| score.write(ctx.stage, |s| *s += 1))?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod frame_loop;
pub mod stats;

pub use config::FrameLoopConfig;
pub use error::{FrameLoopError, FrameResult};
pub use frame_loop::{FrameContext, FrameLoop, StageTask};
pub use stats::{FrameStats, FrameStatsAccumulator};
