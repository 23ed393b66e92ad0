//! # Frame Loop
//!
//! One frame of a pipelined application:
//! ```text
//! Frame N:
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ 1. DISPATCH                                                         │
//! │    └─ Send frame N to every stage worker (stages 1..num_stages)     │
//! │                                                                     │
//! │ 2. RUN, concurrently                                                │
//! │    ├─ App task on the calling thread writes stage 0                 │
//! │    ├─ Stage 1 worker reads what the app wrote one frame ago         │
//! │    └─ Stage k worker reads what the app wrote k frames ago          │
//! │                                                                     │
//! │ 3. JOIN                                                             │
//! │    └─ Wait for every worker report (bounded by frame_timeout_ms)    │
//! │                                                                     │
//! │ 4. CYCLE                                                            │
//! │    └─ Pipeline::cycle(): every dirty cycler moves down one stage    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stage tasks should address cyclers with `ctx.stage`. When threads are
//! disabled by configuration, stage tasks run inline on the calling thread
//! after the app task, so their thread's own pipeline stage is 0.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tempora_core::{Pipeline, Thread, ThreadHandle};

use crate::config::FrameLoopConfig;
use crate::error::{FrameLoopError, FrameResult};
use crate::stats::{FrameStats, FrameStatsAccumulator};

/// Delta time handed to tasks is clamped to this (seconds), so a stall
/// does not turn into one huge step.
const MAX_DELTA_TIME: f32 = 0.1;

/// What a task is working on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameContext {
    /// Frame number, starting at 1.
    pub frame: u64,
    /// Pipeline stage the task reads.
    pub stage: usize,
    /// Seconds since the previous frame started.
    pub delta_time: f32,
}

/// Work done once per frame on one pipeline stage.
pub type StageTask = Box<dyn FnMut(&FrameContext) + Send>;

enum StageJob {
    Run(FrameContext),
    Shutdown,
}

struct StageReport {
    stage: usize,
    frame: u64,
    elapsed_us: u64,
    panicked: bool,
}

enum StageRunner {
    Threaded {
        jobs: Sender<StageJob>,
        handle: Option<ThreadHandle<()>>,
    },
    Inline(StageTask),
}

struct StageWorker {
    stage: usize,
    name: String,
    runner: StageRunner,
}

fn elapsed_us(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}

fn worker_loop(
    stage: usize,
    mut task: StageTask,
    jobs: &Receiver<StageJob>,
    reports: &Sender<StageReport>,
) {
    while let Ok(StageJob::Run(ctx)) = jobs.recv() {
        let start = Instant::now();
        let panicked = catch_unwind(AssertUnwindSafe(|| task(&ctx))).is_err();
        let report = StageReport {
            stage,
            frame: ctx.frame,
            elapsed_us: elapsed_us(start),
            panicked,
        };
        if reports.send(report).is_err() || panicked {
            break;
        }
    }
    tracing::debug!(stage, "stage worker stopped");
}

/// Drives a [`Pipeline`]: one app task on stage 0, one worker per later
/// stage, one `cycle()` per frame.
pub struct FrameLoop {
    config: FrameLoopConfig,
    pipeline: Arc<Pipeline>,
    workers: Vec<StageWorker>,
    reports_tx: Sender<StageReport>,
    reports_rx: Receiver<StageReport>,
    frame_count: u64,
    last_frame_time: Instant,
    last_stats: FrameStats,
}

impl FrameLoop {
    /// Creates a frame loop over a new pipeline named `"frame"`.
    ///
    /// # Errors
    ///
    /// [`FrameLoopError::Config`] if `config` fails validation.
    pub fn new(config: FrameLoopConfig) -> FrameResult<Self> {
        let pipeline = Pipeline::from_config("frame", &config.pipeline)?;
        Self::with_pipeline(config, pipeline)
    }

    /// Creates a frame loop over an existing pipeline, growing it to at
    /// least `config.pipeline.num_stages` stages.
    ///
    /// # Errors
    ///
    /// [`FrameLoopError::Config`] if `config` fails validation.
    pub fn with_pipeline(config: FrameLoopConfig, pipeline: Arc<Pipeline>) -> FrameResult<Self> {
        config.validate()?;
        pipeline.set_min_stages(config.pipeline.num_stages);

        let (reports_tx, reports_rx) = unbounded();
        Ok(Self {
            config,
            pipeline,
            workers: Vec::new(),
            reports_tx,
            reports_rx,
            frame_count: 0,
            last_frame_time: Instant::now(),
            last_stats: FrameStats::default(),
        })
    }

    /// The driven pipeline. Create cyclers on it before spawning stages
    /// that read them.
    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Configuration in use.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &FrameLoopConfig {
        &self.config
    }

    /// Frames started so far.
    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Timings of the last completed frame.
    #[inline]
    #[must_use]
    pub fn last_stats(&self) -> FrameStats {
        self.last_stats
    }

    /// Stages that have a task, in stage order.
    #[must_use]
    pub fn stages(&self) -> Vec<(usize, &str)> {
        self.workers
            .iter()
            .map(|w| (w.stage, w.name.as_str()))
            .collect()
    }

    /// Number of stage tasks running on their own thread.
    #[must_use]
    pub fn num_threaded_stages(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| matches!(w.runner, StageRunner::Threaded { .. }))
            .count()
    }

    /// Assigns `task` to the next free stage and starts its worker thread.
    /// Returns the stage number.
    ///
    /// When threads are disabled by configuration the task runs inline on
    /// the thread calling [`run_frame`](Self::run_frame) instead.
    ///
    /// # Errors
    ///
    /// [`FrameLoopError::NoFreeStage`] when every stage after 0 already has
    /// a task, [`FrameLoopError::Thread`] when the OS refuses the thread.
    pub fn spawn_stage<F>(&mut self, task: F) -> FrameResult<usize>
    where
        F: FnMut(&FrameContext) + Send + 'static,
    {
        let stage = self.workers.len() + 1;
        let num_stages = self.pipeline.num_stages();
        if stage >= num_stages {
            return Err(FrameLoopError::NoFreeStage(num_stages - 1));
        }
        let name = self.config.stage_name(stage);

        let runner = if self.config.pipeline.threads.allow_threads {
            let (jobs_tx, jobs_rx) = unbounded();
            let reports = self.reports_tx.clone();
            let task: StageTask = Box::new(task);
            let handle = Thread::spawn(
                name.clone(),
                stage,
                &self.config.pipeline.threads,
                move || worker_loop(stage, task, &jobs_rx, &reports),
            )?;
            StageRunner::Threaded {
                jobs: jobs_tx,
                handle: Some(handle),
            }
        } else {
            tracing::warn!(stage, name = %name, "threads disabled, stage runs inline");
            StageRunner::Inline(Box::new(task))
        };

        self.workers.push(StageWorker {
            stage,
            name,
            runner,
        });
        Ok(stage)
    }

    /// Runs one frame: dispatches the stage workers, runs `app` on stage 0,
    /// waits for the workers and cycles the pipeline.
    ///
    /// The pipeline is not cycled when a stage fails.
    ///
    /// # Errors
    ///
    /// [`FrameLoopError::StageTimeout`] when a worker misses the frame
    /// timeout, [`FrameLoopError::StagePanicked`] when a stage task panicked
    /// in this or an earlier frame.
    pub fn run_frame<F>(&mut self, app: F) -> FrameResult<FrameStats>
    where
        F: FnOnce(&FrameContext),
    {
        let frame_start = Instant::now();
        let delta_time = frame_start
            .duration_since(self.last_frame_time)
            .as_secs_f32()
            .min(MAX_DELTA_TIME);
        self.last_frame_time = frame_start;
        self.frame_count += 1;
        let frame = self.frame_count;
        let context = |stage| FrameContext {
            frame,
            stage,
            delta_time,
        };

        // 1. Dispatch
        let mut waiting = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            if let StageRunner::Threaded { jobs, .. } = &worker.runner {
                jobs.send(StageJob::Run(context(worker.stage)))
                    .map_err(|_| FrameLoopError::StagePanicked {
                        stage: worker.stage,
                        frame,
                    })?;
                waiting.push(worker.stage);
            }
        }

        // 2. App on stage 0, then inline stages
        let app_start = Instant::now();
        app(&context(0));
        let app_us = elapsed_us(app_start);

        let mut stages_us = 0;
        for worker in &mut self.workers {
            if let StageRunner::Inline(task) = &mut worker.runner {
                let start = Instant::now();
                task(&context(worker.stage));
                stages_us = stages_us.max(elapsed_us(start));
            }
        }

        // 3. Join
        let timeout = self.config.frame_timeout();
        let deadline = Instant::now() + timeout;
        while let Some(&stage) = waiting.first() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Ok(report) = self.reports_rx.recv_timeout(remaining) else {
                return Err(FrameLoopError::StageTimeout {
                    stage,
                    frame,
                    timeout,
                });
            };
            if report.frame != frame {
                // Late report of a frame that already timed out.
                continue;
            }
            if report.panicked {
                return Err(FrameLoopError::StagePanicked {
                    stage: report.stage,
                    frame,
                });
            }
            waiting.retain(|&s| s != report.stage);
            stages_us = stages_us.max(report.elapsed_us);
        }

        // 4. Cycle
        let dirty_cyclers = self.pipeline.num_dirty_cyclers();
        let cycle_start = Instant::now();
        self.pipeline.cycle();
        let cycle_us = elapsed_us(cycle_start);

        let stats = FrameStats {
            frame,
            total_us: elapsed_us(frame_start),
            app_us,
            stages_us,
            cycle_us,
            dirty_cyclers,
        };
        tracing::trace!(frame, total_us = stats.total_us, dirty_cyclers, "frame done");
        self.last_stats = stats;
        Ok(stats)
    }

    /// Runs `frames` frames, sleeping out the rest of each frame budget when
    /// `target_fps` is set.
    ///
    /// # Errors
    ///
    /// The first error of [`run_frame`](Self::run_frame).
    pub fn run<F>(&mut self, frames: u64, mut app: F) -> FrameResult<FrameStatsAccumulator>
    where
        F: FnMut(&FrameContext),
    {
        let budget = self.config.frame_budget();
        let mut accumulator = FrameStatsAccumulator::new(budget);

        for _ in 0..frames {
            let stats = self.run_frame(&mut app)?;
            accumulator.record(&stats);

            if let Some(budget) = budget {
                let spent = Duration::from_micros(stats.total_us);
                if spent < budget {
                    std::thread::sleep(budget - spent);
                } else {
                    tracing::debug!(
                        frame = stats.frame,
                        total_ms = stats.total_ms(),
                        "frame over budget"
                    );
                }
            }
        }
        Ok(accumulator)
    }

    /// Stops and joins every stage worker. Called on drop.
    ///
    /// Blocks until a worker still busy with a timed-out frame finishes it.
    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            if let StageRunner::Threaded { jobs, handle } = &mut worker.runner {
                // A worker that already stopped has dropped its receiver.
                let _ = jobs.send(StageJob::Shutdown);
                if let Some(handle) = handle.take() {
                    if handle.join().is_err() {
                        tracing::error!(stage = worker.stage, name = %worker.name, "stage worker panicked");
                    }
                }
            }
        }
        if !self.workers.is_empty() {
            tracing::debug!(stages = self.workers.len(), "stage workers stopped");
        }
        self.workers.clear();
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for FrameLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameLoop")
            .field("pipeline", &self.pipeline.name())
            .field("num_stages", &self.pipeline.num_stages())
            .field("stages", &self.stages())
            .field("frame_count", &self.frame_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tempora_core::PipelineCycler;

    fn config(num_stages: usize) -> FrameLoopConfig {
        let mut config = FrameLoopConfig {
            target_fps: 0,
            ..FrameLoopConfig::default()
        };
        config.pipeline.num_stages = num_stages;
        config
    }

    #[test]
    fn test_frame_loop_creation() {
        let frame_loop = FrameLoop::new(config(3)).unwrap();
        assert_eq!(frame_loop.frame_count(), 0);
        assert_eq!(frame_loop.pipeline().num_stages(), 3);
        assert!(frame_loop.stages().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = config(2);
        bad.frame_timeout_ms = 0;
        assert!(matches!(
            FrameLoop::new(bad),
            Err(FrameLoopError::Config(_))
        ));
    }

    #[test]
    fn test_stage_reads_lag_by_stage_index() {
        let mut frame_loop = FrameLoop::new(config(3)).unwrap();
        let counter = Arc::new(PipelineCycler::with_pipeline(0u64, frame_loop.pipeline()));
        let seen: Arc<Mutex<Vec<(usize, u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));

        for _ in 1..3 {
            let counter = Arc::clone(&counter);
            let seen = Arc::clone(&seen);
            frame_loop
                .spawn_stage(move |ctx| {
                    let value = *counter.read(ctx.stage);
                    seen.lock().unwrap().push((ctx.stage, ctx.frame, value));
                })
                .unwrap();
        }
        assert_eq!(frame_loop.num_threaded_stages(), 2);

        for _ in 0..5 {
            frame_loop
                .run_frame(|ctx| counter.write(ctx.stage, |v| *v = ctx.frame))
                .unwrap();
        }
        frame_loop.shutdown();

        // In frame f, stage k sees what the app wrote in frame f - k.
        for &(stage, frame, value) in seen.lock().unwrap().iter() {
            let stage = stage as u64;
            let expected = frame.saturating_sub(stage);
            assert_eq!(value, expected, "stage {stage} in frame {frame}");
        }
        assert_eq!(seen.lock().unwrap().len(), 10);
    }

    #[test]
    fn test_no_free_stage() {
        let mut frame_loop = FrameLoop::new(config(2)).unwrap();
        frame_loop.spawn_stage(|_| {}).unwrap();
        assert!(matches!(
            frame_loop.spawn_stage(|_| {}),
            Err(FrameLoopError::NoFreeStage(1))
        ));
    }

    #[test]
    fn test_threads_disabled_runs_inline() {
        let mut cfg = config(2);
        cfg.pipeline.threads.allow_threads = false;
        let mut frame_loop = FrameLoop::new(cfg).unwrap();
        let runs = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&runs);
        let stage = frame_loop
            .spawn_stage(move |ctx| {
                assert_eq!(ctx.stage, 1);
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(stage, 1);
        assert_eq!(frame_loop.num_threaded_stages(), 0);

        for _ in 0..3 {
            frame_loop.run_frame(|_| {}).unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_threaded_stage_keeps_task_state() {
        let mut frame_loop = FrameLoop::new(config(2)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        let mut calls = 0u64;
        frame_loop
            .spawn_stage(move |ctx| {
                calls += 1;
                let name = std::thread::current().name().map(str::to_owned);
                log.lock().unwrap().push((ctx.frame, calls, name));
            })
            .unwrap();
        assert_eq!(frame_loop.num_threaded_stages(), 1);
        assert_eq!(frame_loop.stages(), vec![(1, "stage-1")]);

        for _ in 0..3 {
            frame_loop.run_frame(|_| {}).unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        for (i, (_, calls, name)) in seen.iter().enumerate() {
            assert_eq!(*calls, i as u64 + 1);
            assert_eq!(name.as_deref(), Some("stage-1"));
        }
    }

    #[test]
    fn test_stage_timeout() {
        let mut cfg = config(2);
        cfg.frame_timeout_ms = 20;
        let mut frame_loop = FrameLoop::new(cfg).unwrap();
        frame_loop
            .spawn_stage(|ctx| {
                if ctx.frame == 1 {
                    std::thread::sleep(Duration::from_millis(200));
                }
            })
            .unwrap();

        assert!(matches!(
            frame_loop.run_frame(|_| {}),
            Err(FrameLoopError::StageTimeout { stage: 1, frame: 1, .. })
        ));
        // The late report of frame 1 is skipped.
        let stats = frame_loop.run_frame(|_| {});
        assert!(matches!(
            stats,
            Ok(FrameStats { frame: 2, .. }) | Err(FrameLoopError::StageTimeout { frame: 2, .. })
        ));
    }

    #[test]
    fn test_stage_panic_is_reported() {
        let mut frame_loop = FrameLoop::new(config(2)).unwrap();
        frame_loop
            .spawn_stage(|ctx| assert!(ctx.frame < 2, "stage gave up"))
            .unwrap();

        assert!(frame_loop.run_frame(|_| {}).is_ok());
        assert!(matches!(
            frame_loop.run_frame(|_| {}),
            Err(FrameLoopError::StagePanicked { stage: 1, frame: 2 })
        ));
        // The worker is gone; later frames keep failing.
        assert!(matches!(
            frame_loop.run_frame(|_| {}),
            Err(FrameLoopError::StagePanicked { stage: 1, .. })
        ));
    }

    #[test]
    fn test_stats_count_dirty_cyclers() {
        let mut frame_loop = FrameLoop::new(config(2)).unwrap();
        let cyclers: Vec<_> = (0..4)
            .map(|i| PipelineCycler::with_pipeline(i, frame_loop.pipeline()))
            .collect();

        let stats = frame_loop
            .run_frame(|ctx| {
                for cycler in &cyclers[..3] {
                    cycler.write(ctx.stage, |v| *v += 10);
                }
            })
            .unwrap();

        assert_eq!(stats.frame, 1);
        assert_eq!(stats.dirty_cyclers, 3);
        assert_eq!(frame_loop.pipeline().num_dirty_cyclers(), 0);
        assert_eq!(frame_loop.last_stats(), stats);
    }

    #[test]
    fn test_run_records_every_frame() {
        let mut frame_loop = FrameLoop::new(config(2)).unwrap();
        frame_loop.spawn_stage(|_| {}).unwrap();

        let mut frames = Vec::new();
        let acc = frame_loop.run(4, |ctx| frames.push(ctx.frame)).unwrap();
        assert_eq!(acc.frames_recorded(), 4);
        assert_eq!(frames, vec![1, 2, 3, 4]);
    }
}
