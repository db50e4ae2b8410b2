use crate::ioq::IoQueue;
use crate::runq::{ThreadNameFn, WorkerConfig};
use anyhow::Result;
use std::sync::Arc;
use std::thread;

/// Configures an [`IoQueue`] before it is built.
///
/// Configuration methods can be chained on the return value.
#[derive(Debug)]
pub struct Builder {
    /// Number of run-queue workers. Defaults to one per CPU core.
    worker_threads: Option<usize>,

    /// Name fn used for threads spawned by the run queue.
    thread_name: ThreadNameFn,

    /// Stack size used for threads spawned by the run queue.
    thread_stack_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            worker_threads: None,
            thread_name: ThreadNameFn::default_fn(),
            thread_stack_size: None,
        }
    }

    /// Sets the number of worker threads.
    ///
    /// # Panics
    ///
    /// This function will panic if 0 is passed as an argument.
    #[track_caller]
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "worker threads cannot be set to 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets the base name of threads spawned by the run queue; the
    /// worker index is appended. The default yields
    /// `strandio-{index}`.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move |index| format!("{val}-{index}")));
        self
    }

    /// Sets a function generating worker thread names from the worker
    /// index.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Sets the stack size (in bytes) for worker threads. The platform
    /// may round this up to its minimum.
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        self.thread_stack_size = Some(val);
        self
    }

    /// Creates the configured [`IoQueue`]: spawns the workers, the
    /// poller and the notify pipe. Fails only on resource exhaustion.
    pub fn try_build(self) -> Result<IoQueue> {
        let workers = match self.worker_threads {
            Some(n) => n,
            None => thread::available_parallelism()?.get(),
        };

        let cfg = WorkerConfig {
            thread_name: self.thread_name,
            thread_stack_size: self.thread_stack_size,
        };

        IoQueue::build(workers, cfg)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_applies_thread_names() -> Result<()> {
        let ioq = Builder::new()
            .worker_threads(1)
            .thread_name("renamed")
            .thread_stack_size(128 * 1024)
            .try_build()?;

        let name = Arc::new(parking_lot::Mutex::new(String::new()));
        let task = crate::Task::new();
        let n = name.clone();
        ioq.runq().exec(
            &task,
            Box::new(move |_| {
                *n.lock() = thread::current().name().unwrap_or_default().to_string();
            }),
        );

        ioq.shutdown();
        assert_eq!(*name.lock(), "renamed-0");
        Ok(())
    }

    #[test]
    #[should_panic(expected = "cannot be set to 0")]
    fn test_zero_workers_is_rejected() {
        let _ = Builder::new().worker_threads(0);
    }
}
