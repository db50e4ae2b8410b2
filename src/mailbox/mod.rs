//! The mailbox: a 32-bit atomic flag register with level-triggered
//! asynchronous waits. `raise` and `take` are safe from any thread at
//! any time; the wait side is single-subscription and re-arms itself
//! from the completion callback.

use crate::runq::RunQueue;
use crate::task::Task;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Callback delivered (through the run queue, never inline) once the
/// waiter's predicate holds.
pub type MailboxFn = Box<dyn FnOnce(Mailbox) + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WaitMode {
    Any,
    All,
}

struct Waiter {
    mask: u32,
    mode: WaitMode,
    func: MailboxFn,
}

impl Waiter {
    fn satisfied(&self, state: u32) -> bool {
        match self.mode {
            WaitMode::Any => state & self.mask != 0,
            WaitMode::All => state & self.mask == self.mask,
        }
    }
}

/// An atomic flag word whose satisfied waiter is promoted into the
/// associated run queue.
///
/// Waits are level-triggered: the predicate is checked against current
/// state at subscription time and resolves immediately if it already
/// holds. Waiting never consumes flags; clearing is always explicit via
/// [`take`](Mailbox::take), which lets the caller decide whether a flag
/// behaves as an edge or a latch.
#[derive(Clone)]
pub struct Mailbox {
    inner: Arc<MailboxInner>,
}

struct MailboxInner {
    flags: AtomicU32,
    rq: RunQueue,
    task: Task,
    waiter: Mutex<Option<Waiter>>,
}

impl Mailbox {
    /// A mailbox whose waiters promote into `rq`.
    pub fn new(rq: &RunQueue) -> Self {
        Mailbox {
            inner: Arc::new(MailboxInner {
                flags: AtomicU32::new(0),
                rq: rq.clone(),
                task: Task::new(),
                waiter: Mutex::new(None),
            }),
        }
    }

    /// Atomically OR `mask` into the flag word, then deliver the
    /// pending waiter if its predicate now holds. Safe from any thread,
    /// including inside callbacks.
    pub fn raise(&self, mask: u32) {
        self.inner.flags.fetch_or(mask, Ordering::AcqRel);
        self.deliver_if_satisfied();
    }

    /// Atomically clear `mask` and return the bits of it that were set.
    /// The only operation that clears flags.
    pub fn take(&self, mask: u32) -> u32 {
        self.inner.flags.fetch_and(!mask, Ordering::AcqRel) & mask
    }

    /// Deliver `f` once *any* bit of `mask` is raised; immediately
    /// (still through the run queue) if one already is.
    ///
    /// # Panics
    ///
    /// If a waiter is already pending: a mailbox is single-subscription
    /// and a second wait would silently drop a callback.
    pub fn wait(&self, mask: u32, f: MailboxFn) {
        self.subscribe(mask, WaitMode::Any, f);
    }

    /// Deliver `f` once *all* bits of `mask` are raised.
    ///
    /// # Panics
    ///
    /// See [`wait`](Mailbox::wait).
    pub fn wait_all(&self, mask: u32, f: MailboxFn) {
        self.subscribe(mask, WaitMode::All, f);
    }

    fn subscribe(&self, mask: u32, mode: WaitMode, func: MailboxFn) {
        {
            let mut waiter = self.inner.waiter.lock();
            assert!(
                waiter.is_none(),
                "mailbox already has a pending waiter (single subscription)"
            );
            *waiter = Some(Waiter { mask, mode, func });
        }

        // Level-triggered: resolve right away if the predicate already
        // holds.
        self.deliver_if_satisfied();
    }

    fn deliver_if_satisfied(&self) {
        let ready = {
            let mut waiter = self.inner.waiter.lock();
            let state = self.inner.flags.load(Ordering::Acquire);
            if waiter.as_ref().is_some_and(|w| w.satisfied(state)) {
                waiter.take()
            } else {
                None
            }
        };

        if let Some(w) = ready {
            let mailbox = self.clone();
            self.inner
                .rq
                .exec(&self.inner.task, Box::new(move |_| (w.func)(mailbox)));
        }
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("flags", &self.inner.flags.load(Ordering::Relaxed))
            .field("waiting", &self.inner.waiter.lock().is_some())
            .finish()
    }
}
