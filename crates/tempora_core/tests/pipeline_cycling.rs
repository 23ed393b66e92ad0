//! # Pipeline Cycling Verification
//!
//! End-to-end behaviour of cyclers on a live pipeline:
//!
//! 1. **Frame scenario**: writes on stage 0 flow down one stage per cycle
//! 2. **Convergence**: N cycles without writes always converge
//! 3. **Resize**: changing the stage count never loses stage 0
//! 4. **Concurrency**: writers, upstream writers, readers and cycling on
//!    separate threads
//! 5. **Deferred destruction**: evicted payloads drop outside every lock
//!
//! Run with: cargo test --test pipeline_cycling -- --nocapture

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tempora_core::{CycleData, Pipeline, PipelineCycler};

#[derive(Clone, Debug, PartialEq)]
struct Payload {
    value: i64,
}

impl CycleData for Payload {}

fn stage_values(cycler: &PipelineCycler<Payload>) -> Vec<i64> {
    (0..cycler.num_stages())
        .map(|stage| cycler.read(stage).value)
        .collect()
}

fn all_stages_shared<T: CycleData>(cycler: &PipelineCycler<T>) -> bool {
    let first = cycler.read_unlocked(0);
    (1..cycler.num_stages()).all(|stage| Arc::ptr_eq(&first, &cycler.read_unlocked(stage)))
}

// ============================================================================
// FRAME SCENARIO
// ============================================================================

#[test]
fn test_three_stage_frame_scenario() {
    let pipeline = Pipeline::new("scenario", 3);
    let cycler = PipelineCycler::with_pipeline(Payload { value: 0 }, &pipeline);

    cycler.write(0, |p| p.value = 1);
    pipeline.cycle();
    cycler.write(0, |p| p.value = 2);
    assert_eq!(stage_values(&cycler), vec![2, 1, 0]);

    pipeline.cycle();
    assert_eq!(stage_values(&cycler), vec![2, 2, 1]);
    assert!(cycler.is_dirty());

    let mut cycles = 0;
    while cycler.is_dirty() {
        pipeline.cycle();
        cycles += 1;
        assert!(cycles <= 3, "cycler failed to converge");
    }
    assert_eq!(stage_values(&cycler), vec![2, 2, 2]);
    assert!(all_stages_shared(&cycler));
    assert_eq!(pipeline.num_dirty_cyclers(), 0);
}

// ============================================================================
// CONVERGENCE
// ============================================================================

#[test]
fn test_convergence_for_every_stage_count() {
    for num_stages in 1..=6 {
        let pipeline = Pipeline::new("converge", num_stages);
        let cycler = PipelineCycler::with_pipeline(Payload { value: 0 }, &pipeline);

        // Diverge every stage.
        for stage in 0..num_stages {
            cycler.write(stage, |p| p.value = i64::try_from(stage).unwrap() + 10);
        }

        for _ in 0..num_stages {
            pipeline.cycle();
        }

        assert!(!cycler.is_dirty(), "{num_stages} stages still dirty");
        assert!(all_stages_shared(&cycler));
        assert_eq!(cycler.read(num_stages - 1).value, 10);
    }
}

#[test]
fn test_clean_cyclers_are_not_visited() {
    let pipeline = Pipeline::new("sparse", 2);
    let cyclers: Vec<_> = (0..100)
        .map(|i| PipelineCycler::with_pipeline(Payload { value: i }, &pipeline))
        .collect();

    for cycler in cyclers.iter().step_by(10) {
        cycler.write(0, |p| p.value = -1);
    }
    assert_eq!(pipeline.num_cyclers(), 100);
    assert_eq!(pipeline.num_dirty_cyclers(), 10);

    pipeline.cycle();
    assert_eq!(pipeline.num_dirty_cyclers(), 0);
    assert_eq!(cyclers[10].read(1).value, -1);
    assert_eq!(cyclers[11].read(1).value, 11);
}

// ============================================================================
// RESIZE
// ============================================================================

#[test]
fn test_resize_preserves_stage_zero() {
    for target in 1..=5 {
        let pipeline = Pipeline::new("resize", 3);
        let cycler = PipelineCycler::with_pipeline(Payload { value: 0 }, &pipeline);
        cycler.write(0, |p| p.value = 1);
        pipeline.cycle();
        cycler.write(0, |p| p.value = 2);

        let before = cycler.read(0).value;
        pipeline.set_num_stages(target);

        assert_eq!(cycler.read(0).value, before, "resize to {target}");
        assert_eq!(cycler.num_stages(), target);
    }
}

#[test]
fn test_resize_while_threads_read() {
    let pipeline = Pipeline::new("resize-live", 2);
    let cycler = Arc::new(PipelineCycler::with_pipeline(Payload { value: 7 }, &pipeline));
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let cycler = Arc::clone(&cycler);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let reader = cycler.read(0);
                    assert_eq!(reader.value, 7);
                }
            })
        })
        .collect();

    for n in [4, 1, 3, 2, 5] {
        pipeline.set_num_stages(n);
        assert_eq!(cycler.num_stages(), n);
    }

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_writers_serialize_against_cycling() {
    const WRITERS: usize = 4;
    const WRITES: i64 = 500;

    let pipeline = Pipeline::new("stress", 3);
    let cycler = Arc::new(PipelineCycler::with_pipeline(Payload { value: 0 }, &pipeline));
    let start = Arc::new(Barrier::new(WRITERS + 1));
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let cycler = Arc::clone(&cycler);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..WRITES {
                    cycler.write(0, |p| {
                        let seen = p.value;
                        thread::yield_now();
                        p.value = seen + 1;
                    });
                }
            })
        })
        .collect();

    let cycling = {
        let pipeline = Arc::clone(&pipeline);
        let cycler = Arc::clone(&cycler);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut last_seen = 0;
            while !stop.load(Ordering::Relaxed) {
                pipeline.cycle();
                // Older stages never run ahead of newer ones.
                let oldest = cycler.read(2).value;
                assert!(oldest >= last_seen);
                last_seen = oldest;
            }
        })
    };

    start.wait();
    for writer in writers {
        writer.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    cycling.join().unwrap();

    let total = i64::try_from(WRITERS).unwrap() * WRITES;
    assert_eq!(cycler.read(0).value, total);

    for _ in 0..3 {
        pipeline.cycle();
    }
    assert_eq!(stage_values(&cycler), vec![total; 3]);
}

#[test]
fn test_cycle_waits_for_reader_on_other_thread() {
    let pipeline = Pipeline::new("reader", 2);
    let cycler = Arc::new(PipelineCycler::with_pipeline(Payload { value: 0 }, &pipeline));
    cycler.write(0, |p| p.value = 1);

    let holding = Arc::new(Barrier::new(2));
    let reader = {
        let cycler = Arc::clone(&cycler);
        let holding = Arc::clone(&holding);
        thread::spawn(move || {
            let stage1 = cycler.read(1);
            holding.wait();
            thread::sleep(Duration::from_millis(50));
            stage1.value
        })
    };

    holding.wait();
    pipeline.cycle();

    // The reader saw the pre-cycle value for its whole lifetime.
    assert_eq!(reader.join().unwrap(), 0);
    assert_eq!(cycler.read(1).value, 1);
    assert!(!cycler.is_dirty());
}

#[derive(Clone, Debug)]
struct Pair {
    a: i64,
    b: i64,
}

impl CycleData for Pair {}

#[test]
fn test_write_upstream_against_concurrent_readers() {
    const ROUNDS: i64 = 300;

    let pipeline = Pipeline::new("upstream", 3);
    let cycler = Arc::new(PipelineCycler::with_pipeline(Pair { a: 0, b: 0 }, &pipeline));
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..3)
        .map(|stage| {
            let cycler = Arc::clone(&cycler);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut held = Vec::new();
                while !stop.load(Ordering::Relaxed) {
                    let reader = cycler.read(stage);
                    assert_eq!(reader.a, reader.b, "torn payload on stage {stage}");
                    // Keep a few snapshots alive so upstream writes see
                    // external references.
                    held.push(reader.snapshot());
                    if held.len() > 4 {
                        held.remove(0);
                    }
                }
                held.iter().all(|p| p.a == p.b)
            })
        })
        .collect();

    for round in 1..=ROUNDS {
        cycler.write_upstream(1, round % 3 == 0, |p| {
            p.a = round;
            thread::yield_now();
            p.b = round;
        });
        if round % 5 == 0 {
            pipeline.cycle();
        }
    }

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        assert!(reader.join().unwrap());
    }

    // Stage 0 shared stage 1's payload or was forced onto it.
    assert_eq!(cycler.read(1).a, ROUNDS);
    assert_eq!(cycler.read(0).a, ROUNDS);
}

#[test]
fn test_snapshot_survives_cycling() {
    let pipeline = Pipeline::new("snapshot", 2);
    let cycler = PipelineCycler::with_pipeline(Payload { value: 0 }, &pipeline);
    cycler.write(0, |p| p.value = 1);

    let oldest = cycler.read_unlocked(1);
    pipeline.cycle();

    assert_eq!(oldest.value, 0);
    assert_eq!(cycler.read(1).value, 1);
}

// ============================================================================
// DEFERRED DESTRUCTION
// ============================================================================

#[derive(Clone)]
struct SceneNode {
    child: Option<Arc<PipelineCycler<Payload>>>,
}

impl CycleData for SceneNode {}

#[test]
fn test_evicted_payload_drops_cycler_outside_locks() {
    let pipeline = Pipeline::new("nested", 2);
    let child = PipelineCycler::with_pipeline(Payload { value: 3 }, &pipeline);
    let parent = PipelineCycler::with_pipeline(
        SceneNode {
            child: Some(Arc::new(child)),
        },
        &pipeline,
    );
    assert_eq!(pipeline.num_cyclers(), 2);

    parent.write(0, |node| node.child = None);
    assert_eq!(pipeline.num_cyclers(), 2);

    // Stage 1 still owned the child; cycling evicts it and its drop
    // unregisters the child cycler from the same pipeline.
    pipeline.cycle();
    assert_eq!(pipeline.num_cyclers(), 1);
    assert!(!parent.is_dirty());
}

// ============================================================================
// DIAGNOSTICS
// ============================================================================

#[test]
fn test_cycler_type_counts() {
    let pipeline = Pipeline::new("stats", 2);
    let a = PipelineCycler::with_pipeline(Payload { value: 0 }, &pipeline);
    let _b = a.clone();
    let _c = PipelineCycler::with_pipeline(0u64, &pipeline);
    a.write(0, |p| p.value = 1);

    let mut all = Vec::new();
    pipeline.iterate_all_cycler_types(|name, count| all.push((name.to_owned(), count)));
    assert!(all.contains(&("u64".to_owned(), 1)));
    assert!(all
        .iter()
        .any(|(name, count)| name.ends_with("Payload") && *count == 2));

    let mut dirty = 0;
    pipeline.iterate_dirty_cycler_types(|_, count| dirty += count);
    assert_eq!(dirty, pipeline.num_dirty_cyclers());
}
