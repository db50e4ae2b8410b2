//! The run queue: a pool of worker threads draining a single FIFO of
//! ready tasks. Everything else in the crate completes by promoting a
//! task into one of these.

use crate::errors::IoqError;
use crate::task::{Task, TaskFn};
use anyhow::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace};

/// Generates the OS-level name for worker `index`. Linux truncates
/// thread names to 15 bytes plus the terminator; longer names are cut,
/// not rejected.
#[derive(Clone)]
pub struct ThreadNameFn(pub(crate) Arc<dyn Fn(usize) -> String + Send + Sync + 'static>);

impl ThreadNameFn {
    pub(crate) fn default_fn() -> Self {
        ThreadNameFn(Arc::new(|index| format!("strandio-{index}")))
    }
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Thread-spawn knobs shared by [`RunQueue::new`] and the I/O queue
/// builder.
#[derive(Debug, Clone)]
pub(crate) struct WorkerConfig {
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            thread_name: ThreadNameFn::default_fn(),
            thread_stack_size: None,
        }
    }
}

/// A FIFO of ready tasks executed by `N ≥ 1` worker threads.
///
/// Tasks are popped in enqueue order but up to `N` callbacks run in
/// parallel; the queue provides no mutual exclusion between callbacks.
/// Cloning the handle is cheap and all clones refer to the same pool.
#[derive(Clone)]
pub struct RunQueue {
    inner: Arc<RunqInner>,
}

struct RunqInner {
    shared: Mutex<Shared>,
    ready: Condvar,
}

struct Shared {
    fifo: VecDeque<Task>,
    shutdown: bool,
    workers: Vec<thread::JoinHandle<()>>,
}

impl RunQueue {
    /// Spawn `workers` threads. Fails only if thread creation fails, in
    /// which case any threads already started are joined before
    /// returning.
    pub fn new(workers: usize) -> Result<Self> {
        Self::with_config(workers, &WorkerConfig::default())
    }

    pub(crate) fn with_config(workers: usize, cfg: &WorkerConfig) -> Result<Self> {
        assert!(workers >= 1, "run queue needs at least one worker");

        let inner = Arc::new(RunqInner {
            shared: Mutex::new(Shared {
                fifo: VecDeque::new(),
                shutdown: false,
                workers: Vec::new(),
            }),
            ready: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let mut builder = thread::Builder::new().name(cfg.thread_name.0(index));
            if let Some(stack_size) = cfg.thread_stack_size {
                builder = builder.stack_size(stack_size);
            }

            let worker_inner = inner.clone();
            match builder.spawn(move || worker_loop(worker_inner)) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Unwind the partial pool before surfacing the error.
                    inner.shared.lock().shutdown = true;
                    inner.ready.notify_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(IoqError::ThreadSpawn(e).into());
                }
            }
        }

        debug!(workers, "run queue online");

        inner.shared.lock().workers = handles;
        Ok(RunQueue { inner })
    }

    /// Bind `f` to `task` and append it to the FIFO, signalling one
    /// idle worker. Never blocks, never fails. The task must not
    /// already be queued.
    pub fn exec(&self, task: &Task, f: TaskFn) {
        task.set_func(f);
        {
            let mut shared = self.inner.shared.lock();
            debug_assert!(!shared.shutdown, "exec on a shut-down run queue");
            shared.fifo.push_back(task.clone());
        }
        self.inner.ready.notify_one();
    }

    /// Stop the pool: tasks already in the FIFO run to completion, then
    /// the workers exit and are joined. No `exec` may be issued after
    /// the decision to shut down. Idempotent.
    pub fn shutdown(&self) {
        let handles = {
            let mut shared = self.inner.shared.lock();
            if shared.shutdown {
                return;
            }
            shared.shutdown = true;
            std::mem::take(&mut shared.workers)
        };

        self.inner.ready.notify_all();
        debug!(workers = handles.len(), "run queue shutting down");
        let current = thread::current().id();
        for handle in handles {
            // A worker dropping the last handle must not join itself;
            // it exits through its own loop once the FIFO drains.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for RunQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("RunQueue")
            .field("queued", &shared.fifo.len())
            .field("shutdown", &shared.shutdown)
            .finish()
    }
}

fn worker_loop(inner: Arc<RunqInner>) {
    trace!("worker online");
    loop {
        let task = {
            let mut shared = inner.shared.lock();
            loop {
                if let Some(task) = shared.fifo.pop_front() {
                    break Some(task);
                }
                if shared.shutdown {
                    break None;
                }
                inner.ready.wait(&mut shared);
            }
        };

        match task {
            Some(task) => task.run(),
            None => break,
        }
    }
    trace!("worker offline");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Spy;
    use static_assertions::assert_impl_all;
    use std::sync::atomic::{AtomicU32, Ordering};

    assert_impl_all!(RunQueue: Send, Sync, Clone);

    #[test]
    fn test_exec_delivers_exactly_once() -> Result<()> {
        let rq = RunQueue::new(2)?;
        let spy = Spy::new();

        let task = Task::new();
        let s = spy.clone();
        rq.exec(&task, Box::new(move |_| s.record(7)));

        spy.wait_for_fires(1);
        rq.shutdown();

        assert_eq!(spy.fires(), 1);
        assert_eq!(spy.values(), vec![7]);
        Ok(())
    }

    #[test]
    fn test_single_worker_preserves_fifo_order() -> Result<()> {
        let rq = RunQueue::new(1)?;
        let spy = Spy::new();

        for i in 0..16 {
            let task = Task::new();
            let s = spy.clone();
            rq.exec(&task, Box::new(move |_| s.record(i)));
        }

        spy.wait_for_fires(16);
        rq.shutdown();

        assert_eq!(spy.values(), (0..16).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_callback_reenqueues_same_task_in_tail_position() -> Result<()> {
        let rq = RunQueue::new(1)?;
        let spy = Spy::new();

        fn arm(rq: &RunQueue, spy: &Spy, task: &Task, hop: u64) {
            let rq2 = rq.clone();
            let spy2 = spy.clone();
            rq.exec(
                task,
                Box::new(move |task| {
                    spy2.record(hop);
                    if hop < 4 {
                        arm(&rq2, &spy2, &task, hop + 1);
                    }
                }),
            );
        }

        let task = Task::new();
        arm(&rq, &spy, &task, 3);
        spy.wait_for_fires(2);
        rq.shutdown();

        assert_eq!(spy.values(), vec![3, 4]);
        Ok(())
    }

    #[test]
    fn test_shutdown_drains_pending_tasks() -> Result<()> {
        let rq = RunQueue::new(1)?;
        let ran = Arc::new(AtomicU32::new(0));

        // A slow head task so the rest are still queued when shutdown
        // is requested.
        let head = Task::new();
        let r = ran.clone();
        rq.exec(
            &head,
            Box::new(move |_| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                r.fetch_add(1, Ordering::Relaxed);
            }),
        );

        for _ in 0..8 {
            let task = Task::new();
            let r = ran.clone();
            rq.exec(&task, Box::new(move |_| {
                r.fetch_add(1, Ordering::Relaxed);
            }));
        }

        rq.shutdown();
        assert_eq!(ran.load(Ordering::Relaxed), 9);
        Ok(())
    }

    #[test]
    fn test_shutdown_is_idempotent() -> Result<()> {
        let rq = RunQueue::new(2)?;
        rq.shutdown();
        rq.shutdown();
        Ok(())
    }
}
