//! # Thread Identity
//!
//! [`Thread`] is the crate's view of "the currently running thread": a
//! stable serial number, a name for diagnostics, the pipeline stage the
//! thread works on, and the lock it is currently blocked on (maintained by
//! the deadlock detector).

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::ThreadConfig;
use crate::error::ThreadError;

/// Process-unique thread serial number. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Raw serial number.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Arc<Thread>>> = const { RefCell::new(None) };
}

/// Sentinel for "not blocked on anything".
const NOT_BLOCKED: u64 = 0;

/// Identity and pipeline state of one thread.
pub struct Thread {
    id: ThreadId,
    name: String,
    pipeline_stage: AtomicUsize,
    min_pipeline_stage: AtomicUsize,
    /// Lock this thread is waiting for. Written only under the deadlock
    /// detector's global lock.
    blocked_on: AtomicU64,
}

impl Thread {
    fn new(name: String, pipeline_stage: usize) -> Self {
        Self {
            id: ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)),
            name,
            pipeline_stage: AtomicUsize::new(pipeline_stage),
            min_pipeline_stage: AtomicUsize::new(pipeline_stage),
            blocked_on: AtomicU64::new(NOT_BLOCKED),
        }
    }

    /// Returns the calling thread's record, creating it on first use.
    ///
    /// Threads not started through [`Thread::spawn`] are named after the
    /// standard library thread name (or `thread-<serial>`) and work on
    /// pipeline stage 0.
    #[must_use]
    pub fn current() -> Arc<Thread> {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if let Some(thread) = current.as_ref() {
                return Arc::clone(thread);
            }
            let name = std::thread::current()
                .name()
                .map(str::to_owned)
                .unwrap_or_default();
            let mut thread = Self::new(name, 0);
            if thread.name.is_empty() {
                thread.name = format!("thread-{}", thread.id.0);
            }
            let thread = Arc::new(thread);
            *current = Some(Arc::clone(&thread));
            thread
        })
    }

    /// Pipeline stage of the calling thread.
    #[must_use]
    pub fn current_pipeline_stage() -> usize {
        Self::current().pipeline_stage()
    }

    /// Starts a named OS thread working on `pipeline_stage`.
    ///
    /// # Errors
    ///
    /// [`ThreadError::ThreadsDisabled`] when `config.allow_threads` is false,
    /// [`ThreadError::Spawn`] when the OS refuses. Both are recoverable: the
    /// caller may retry, run the work inline, or give up.
    pub fn spawn<F, R>(
        name: impl Into<String>,
        pipeline_stage: usize,
        config: &ThreadConfig,
        f: F,
    ) -> Result<ThreadHandle<R>, ThreadError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if !config.allow_threads {
            return Err(ThreadError::ThreadsDisabled);
        }

        let name = name.into();
        let thread = Arc::new(Self::new(name.clone(), pipeline_stage));
        let record = Arc::clone(&thread);

        let mut builder = std::thread::Builder::new().name(name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let inner = builder
            .spawn(move || {
                CURRENT.with(|current| *current.borrow_mut() = Some(record));
                f()
            })
            .map_err(|source| ThreadError::Spawn {
                name: name.clone(),
                source,
            })?;

        tracing::debug!(thread = %name, pipeline_stage, "thread started");
        Ok(ThreadHandle { thread, inner })
    }

    /// Serial number.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Diagnostic name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipeline stage this thread reads and writes by default.
    #[inline]
    #[must_use]
    pub fn pipeline_stage(&self) -> usize {
        self.pipeline_stage.load(Ordering::Acquire)
    }

    /// Moves the thread to `stage`, but never below its minimum stage.
    pub fn set_pipeline_stage(&self, stage: usize) {
        let stage = stage.max(self.min_pipeline_stage());
        self.pipeline_stage.store(stage, Ordering::Release);
    }

    /// Lowest stage this thread may be assigned.
    #[inline]
    #[must_use]
    pub fn min_pipeline_stage(&self) -> usize {
        self.min_pipeline_stage.load(Ordering::Acquire)
    }

    /// Raises the minimum stage, moving the thread up if it sits below it.
    pub fn set_min_pipeline_stage(&self, min_stage: usize) {
        self.min_pipeline_stage.store(min_stage, Ordering::Release);
        self.pipeline_stage.fetch_max(min_stage, Ordering::AcqRel);
    }

    /// Lock ID this thread is blocked on, if any.
    pub(crate) fn blocked_on(&self) -> Option<u64> {
        match self.blocked_on.load(Ordering::Relaxed) {
            NOT_BLOCKED => None,
            id => Some(id),
        }
    }

    pub(crate) fn set_blocked_on(&self, lock: Option<u64>) {
        self.blocked_on
            .store(lock.unwrap_or(NOT_BLOCKED), Ordering::Relaxed);
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id.0)
            .field("name", &self.name)
            .field("pipeline_stage", &self.pipeline_stage())
            .finish()
    }
}

impl fmt::Display for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Owned handle to a thread started with [`Thread::spawn`].
pub struct ThreadHandle<R> {
    thread: Arc<Thread>,
    inner: std::thread::JoinHandle<R>,
}

impl<R> ThreadHandle<R> {
    /// The spawned thread's record.
    #[must_use]
    pub fn thread(&self) -> &Arc<Thread> {
        &self.thread
    }

    /// True once the thread's closure has returned or panicked.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Waits for the thread to finish.
    ///
    /// # Errors
    ///
    /// Returns the panic payload if the thread panicked.
    pub fn join(self) -> std::thread::Result<R> {
        self.inner.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_is_stable_per_thread() {
        let a = Thread::current();
        let b = Thread::current();
        assert!(Arc::ptr_eq(&a, &b));

        let other = std::thread::spawn(|| Thread::current().id())
            .join()
            .unwrap();
        assert_ne!(other, a.id());
    }

    #[test]
    fn test_spawn_assigns_name_and_stage() {
        let handle = Thread::spawn("cull", 1, &ThreadConfig::default(), || {
            let me = Thread::current();
            (me.name().to_owned(), me.pipeline_stage())
        })
        .unwrap();

        assert_eq!(handle.thread().name(), "cull");
        let (name, stage) = handle.join().unwrap();
        assert_eq!(name, "cull");
        assert_eq!(stage, 1);
    }

    #[test]
    fn test_spawn_refused_when_threads_disabled() {
        let config = ThreadConfig {
            allow_threads: false,
            ..ThreadConfig::default()
        };
        let result = Thread::spawn("draw", 2, &config, || ());
        assert!(matches!(result, Err(ThreadError::ThreadsDisabled)));
    }

    #[test]
    fn test_min_pipeline_stage_clamps() {
        let thread = Thread::new("t".into(), 0);
        thread.set_min_pipeline_stage(2);
        assert_eq!(thread.pipeline_stage(), 2);

        thread.set_pipeline_stage(1);
        assert_eq!(thread.pipeline_stage(), 2);

        thread.set_pipeline_stage(3);
        assert_eq!(thread.pipeline_stage(), 3);
    }
}
