//! # TEMPORA Pipeline Demo
//!
//! Three-stage pipeline: the app thread moves a handful of bodies, a `cull`
//! worker counts the visible ones one frame later, a `draw` worker sums
//! their positions two frames later.
//!
//! ```bash
//! # Default settings
//! ./pipeline_demo
//!
//! # From a config file, with cycle logging
//! RUST_LOG=debug ./pipeline_demo demo.toml
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tempora::{FrameLoop, FrameLoopConfig, FrameResult};
use tempora_core::{CycleData, PipelineCycler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const BODIES: usize = 64;
const FRAMES: u64 = 120;

#[derive(Clone, Debug)]
struct Body {
    position: [f32; 2],
    velocity: [f32; 2],
}

impl CycleData for Body {}

impl Body {
    fn visible(&self) -> bool {
        self.position[0].abs() < 10.0 && self.position[1].abs() < 10.0
    }
}

fn load_config() -> FrameResult<FrameLoopConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!(path = %path, "loading config");
            Ok(FrameLoopConfig::load(path)?)
        }
        None => {
            let mut config = FrameLoopConfig {
                stage_names: vec!["cull".into(), "draw".into()],
                ..FrameLoopConfig::default()
            };
            config.pipeline.num_stages = 3;
            Ok(config)
        }
    }
}

fn run() -> FrameResult<()> {
    let config = load_config()?;
    let mut frame_loop = FrameLoop::new(config)?;

    let bodies: Arc<Vec<PipelineCycler<Body>>> = Arc::new(
        (0..BODIES)
            .map(|i| {
                let angle = i as f32 / BODIES as f32 * std::f32::consts::TAU;
                PipelineCycler::with_pipeline(
                    Body {
                        position: [0.0, 0.0],
                        velocity: [angle.cos() * 4.0, angle.sin() * 4.0],
                    },
                    frame_loop.pipeline(),
                )
            })
            .collect(),
    );

    let visible = Arc::new(AtomicU64::new(0));
    {
        let bodies = Arc::clone(&bodies);
        let visible = Arc::clone(&visible);
        frame_loop.spawn_stage(move |ctx| {
            let count = bodies.iter().filter(|b| b.read(ctx.stage).visible()).count();
            visible.store(count as u64, Ordering::Relaxed);
        })?;
    }
    if frame_loop.pipeline().num_stages() > 2 {
        let bodies = Arc::clone(&bodies);
        frame_loop.spawn_stage(move |ctx| {
            let sum: f32 = bodies
                .iter()
                .map(|b| {
                    let body = b.read(ctx.stage);
                    body.position[0] + body.position[1]
                })
                .sum();
            if ctx.frame % 30 == 0 {
                tracing::info!(frame = ctx.frame, position_sum = sum, "draw");
            }
        })?;
    }

    let stats = frame_loop.run(FRAMES, |ctx| {
        for body in bodies.iter() {
            body.write(ctx.stage, |b| {
                b.position[0] += b.velocity[0] * ctx.delta_time;
                b.position[1] += b.velocity[1] * ctx.delta_time;
            });
        }
    })?;

    tracing::info!(
        frames = frame_loop.frame_count(),
        visible = visible.load(Ordering::Relaxed),
        cyclers = frame_loop.pipeline().num_cyclers(),
        "demo finished"
    );
    stats.log_summary();
    frame_loop.shutdown();
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting pipeline demo");
    if let Err(err) = run() {
        tracing::error!(error = %err, "pipeline demo failed");
        std::process::exit(1);
    }
}
