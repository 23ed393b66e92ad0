//! Frame loop errors.

use std::time::Duration;

use tempora_core::{ConfigError, ThreadError};
use thiserror::Error;

/// Errors starting or running a [`FrameLoop`](crate::FrameLoop).
#[derive(Error, Debug)]
pub enum FrameLoopError {
    /// The configuration could not be loaded or is out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A stage worker thread could not be started.
    #[error(transparent)]
    Thread(#[from] ThreadError),

    /// Every stage after stage 0 already has a worker.
    #[error("no free pipeline stage: all {0} worker stages already have a task")]
    NoFreeStage(usize),

    /// A stage worker did not report back in time.
    #[error("stage {stage} did not finish frame {frame} within {timeout:?}")]
    StageTimeout {
        /// Stage that is still running.
        stage: usize,
        /// Frame it was working on.
        frame: u64,
        /// Configured frame timeout.
        timeout: Duration,
    },

    /// A stage task panicked; its worker has stopped.
    #[error("stage {stage} panicked during frame {frame}")]
    StagePanicked {
        /// Stage whose task panicked.
        stage: usize,
        /// Frame being processed.
        frame: u64,
    },
}

/// Result type for frame loop operations.
pub type FrameResult<T> = Result<T, FrameLoopError>;
