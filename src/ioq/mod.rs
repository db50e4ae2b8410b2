//! The I/O queue: one run queue, one wait queue and one OS readiness
//! poller, composed so that fd readiness, timer expirations and
//! mailbox raises all complete through the same worker pool.
//!
//! There is no dedicated poller thread. Whichever thread calls
//! [`IoQueue::iterate`] takes the poller role for one cycle; concurrent
//! callers serialize on an internal mutex.

pub mod builder;
pub use builder::Builder;

mod fd_watch;
pub use fd_watch::{FdWatch, FdWatchFn, IoEvents};
use fd_watch::FdWatchInner;

mod notify;
use notify::Notifier;

mod poller;
use poller::{PollEvent, Poller};

use crate::runq::{RunQueue, WorkerConfig};
use crate::waitq::WaitQueue;
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Weak};
use tracing::debug;

/// The composition root of the crate. Cloning the handle is cheap; all
/// clones drive the same queues.
#[derive(Clone)]
pub struct IoQueue {
    pub(crate) inner: Arc<IoqInner>,
}

pub(crate) struct IoqInner {
    pub(crate) runq: RunQueue,
    waitq: WaitQueue,
    pub(crate) poller: Poller,
    notifier: Arc<Notifier>,
    watches: Mutex<HashMap<RawFd, Weak<FdWatchInner>>>,
    iterate: Mutex<IterateScratch>,
}

/// Reusable per-cycle state. Guarded by the iterate mutex, which also
/// enforces the one-poller-at-a-time rule.
struct IterateScratch {
    events: Vec<PollEvent>,
}

impl IoQueue {
    /// An I/O queue with `workers` run-queue workers and default thread
    /// configuration. See [`Builder`] for the knobs.
    pub fn new(workers: usize) -> Result<Self> {
        Builder::new().worker_threads(workers).try_build()
    }

    pub(crate) fn build(workers: usize, cfg: WorkerConfig) -> Result<Self> {
        let poller = Poller::new()?;
        let notifier = Arc::new(Notifier::new()?);
        poller
            .add(notifier.read_fd(), IoEvents::READABLE)
            .map_err(crate::errors::IoqError::PollerSetup)?;

        let runq = RunQueue::with_config(workers, &cfg)?;

        // Earliest-deadline changes in the wait queue must unblock a
        // sleeping poller so it recomputes its timeout.
        let waitq = WaitQueue::with_wakeup({
            let notifier = notifier.clone();
            Arc::new(move || notifier.signal())
        });

        debug!(workers, "I/O queue online");

        Ok(IoQueue {
            inner: Arc::new(IoqInner {
                runq,
                waitq,
                poller,
                notifier,
                watches: Mutex::new(HashMap::new()),
                iterate: Mutex::new(IterateScratch {
                    events: Vec::with_capacity(poller::MAX_EVENTS),
                }),
            }),
        })
    }

    /// The run queue executing completion callbacks.
    pub fn runq(&self) -> &RunQueue {
        &self.inner.runq
    }

    /// The timer schedule whose expirations feed the run queue.
    pub fn waitq(&self) -> &WaitQueue {
        &self.inner.waitq
    }

    /// Interrupt a blocked poller so the next cycle re-examines state.
    /// Safe from any thread at any time.
    pub fn notify(&self) {
        self.inner.notifier.signal();
    }

    /// Run one poll cycle: block until fd readiness, a notify or the
    /// earliest timer deadline, then promote fd completions followed by
    /// expired timers. Any thread may take the poller role; concurrent
    /// callers block on the iterate mutex.
    pub fn iterate(&self) -> Result<()> {
        let mut scratch = self.inner.iterate.lock();

        let timeout = self.inner.waitq.next_deadline();
        self.inner.poller.wait(timeout, &mut scratch.events)?;

        for i in 0..scratch.events.len() {
            let PollEvent { fd, events } = scratch.events[i];
            if fd == self.inner.notifier.read_fd() {
                self.inner.notifier.drain();
                continue;
            }
            if let Some(watch) = self.inner.watch_for(fd) {
                watch.complete(events, &self.inner);
            }
        }

        // Timers go after fd completions within a cycle.
        self.inner.waitq.dispatch(&self.inner.runq, 0);
        Ok(())
    }

    /// Join the workers. The poller and notify pipe close when the last
    /// handle (and watch) drops. Requires that no async operation is
    /// outstanding and no thread is inside [`iterate`](Self::iterate).
    pub fn shutdown(&self) {
        debug!("I/O queue shutting down");
        self.inner.runq.shutdown();
    }
}

impl fmt::Debug for IoQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoQueue")
            .field("runq", &self.inner.runq)
            .field("waitq", &self.inner.waitq)
            .field("watches", &self.inner.watches.lock().len())
            .finish()
    }
}

impl IoqInner {
    fn watch_for(&self, fd: RawFd) -> Option<FdWatch> {
        self.watches
            .lock()
            .get(&fd)
            .and_then(Weak::upgrade)
            .map(FdWatch::from_inner)
    }

    pub(crate) fn register_watch(&self, watch: &FdWatch) -> std::io::Result<()> {
        // EPOLL_CTL_ADD rejects an already-registered fd (EEXIST),
        // which is exactly the aliasing misuse we want surfaced.
        self.poller.add(watch.fd(), IoEvents::empty())?;
        self.watches.lock().insert(watch.fd(), watch.downgrade());
        Ok(())
    }

    /// Deregister `fd`, but only on behalf of the watch that owns the
    /// registration: a watch whose construction failed on an aliased fd
    /// must not tear down the original.
    pub(crate) fn forget_watch(&self, fd: RawFd, owner: *const FdWatchInner) {
        let mut watches = self.watches.lock();
        if watches.get(&fd).is_some_and(|weak| weak.as_ptr() == owner) {
            watches.remove(&fd);
            let _ = self.poller.delete(fd);
        }
    }
}

impl Drop for IoqInner {
    fn drop(&mut self) {
        // Last handle gone: make sure parked workers are released even
        // if the owner never called shutdown explicitly.
        self.runq.shutdown();
    }
}
