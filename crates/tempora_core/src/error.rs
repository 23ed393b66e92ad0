//! # Error Types
//!
//! Two families live here:
//!
//! - [`ContractViolation`]: programmer errors in calling code. These are never
//!   returned; they are reported through [`crate::contract`] and end the
//!   calling thread with a panic.
//! - [`ThreadError`] / [`ConfigError`]: genuine runtime failures, surfaced as
//!   ordinary `Result`s.

use std::fmt;

use thiserror::Error;

use crate::pipeline::CyclerId;

/// One edge of a waits-for cycle: `thread` is blocked on `lock`, which is
/// held by `holder`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadlockLink {
    /// The waiting thread.
    pub thread: String,
    /// The lock it waits on.
    pub lock: &'static str,
    /// The thread currently holding `lock`.
    pub holder: String,
}

/// The full waits-for cycle found before a thread would have blocked forever.
///
/// The first link always starts at the thread that detected the cycle and
/// the last link always ends at it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeadlockReport {
    /// Links in wait order.
    pub links: Vec<DeadlockLink>,
}

impl DeadlockReport {
    /// Number of threads taking part in the cycle.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// True when no link was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl fmt::Display for DeadlockReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, link) in self.links.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "  {} waits for {} held by {}",
                link.thread, link.lock, link.holder
            )?;
        }
        Ok(())
    }
}

/// Violations of the locking and pipeline contracts.
///
/// These indicate a bug in the calling code, never a runtime condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    /// A non-reentrant mutex was locked again by the thread already holding it.
    #[error("{thread} attempted to relock non-reentrant mutex {lock}")]
    NonReentrantRelock {
        /// Lock name.
        lock: &'static str,
        /// Offending thread.
        thread: String,
    },

    /// A lock was released by a thread that does not hold it.
    #[error("{thread} attempted to release {lock}, which is held by {owner}")]
    ReleaseNotOwner {
        /// Lock name.
        lock: &'static str,
        /// Offending thread.
        thread: String,
        /// Actual owner.
        owner: String,
    },

    /// A lock was released while nobody held it.
    #[error("{thread} attempted to release {lock}, which is not locked")]
    ReleaseUnlocked {
        /// Lock name.
        lock: &'static str,
        /// Offending thread.
        thread: String,
    },

    /// Blocking on a lock would have closed a waits-for cycle.
    #[error("deadlock detected:\n{0}")]
    Deadlock(DeadlockReport),

    /// A pipeline stage index outside `[0, num_stages)`.
    #[error("pipeline stage {stage} out of range (pipeline has {num_stages} stages)")]
    StageOutOfRange {
        /// Requested stage.
        stage: usize,
        /// Current stage count.
        num_stages: usize,
    },

    /// A pipeline must always have at least one stage.
    #[error("invalid pipeline stage count {0}")]
    InvalidStageCount(usize),

    /// The cycler is not registered with this pipeline.
    #[error("cycler {0} is not registered with pipeline {1}")]
    UnknownCycler(CyclerId, String),

    /// The cycler was registered dirty twice.
    #[error("cycler {0} is already dirty in pipeline {1}")]
    AlreadyDirty(CyclerId, String),

    /// A cycler in the dirty set had converged stages.
    #[error("cycler {0} was scheduled for cycling but is not dirty")]
    CleanCyclerCycled(CyclerId),

    /// `Pipeline::cycle` was re-entered while already cycling.
    #[error("pipeline {0} is already cycling")]
    CyclingInProgress(String),

    /// The cycler's stages were accessed from inside a write to the same cycler.
    #[error("cycler {0} accessed while its stages are being written by this thread")]
    NestedStageAccess(CyclerId),
}

/// Errors starting a pipeline thread.
#[derive(Error, Debug)]
pub enum ThreadError {
    /// Thread creation is disabled by configuration.
    #[error("thread creation is disabled (threads.allow_threads = false)")]
    ThreadsDisabled,

    /// The operating system refused to create the thread.
    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        /// Requested thread name.
        name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for the expected schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values are well-formed but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlock_report_lists_every_link() {
        let report = DeadlockReport {
            links: vec![
                DeadlockLink {
                    thread: "app".into(),
                    lock: "scene",
                    holder: "cull".into(),
                },
                DeadlockLink {
                    thread: "cull".into(),
                    lock: "camera",
                    holder: "app".into(),
                },
            ],
        };

        let text = ContractViolation::Deadlock(report).to_string();
        assert!(text.starts_with("deadlock detected"));
        assert!(text.contains("app waits for scene held by cull"));
        assert!(text.contains("cull waits for camera held by app"));
    }

    #[test]
    fn test_stage_out_of_range_message() {
        let v = ContractViolation::StageOutOfRange {
            stage: 3,
            num_stages: 2,
        };
        assert_eq!(
            v.to_string(),
            "pipeline stage 3 out of range (pipeline has 2 stages)"
        );
    }
}
