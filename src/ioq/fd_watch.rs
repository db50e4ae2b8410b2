//! File-descriptor watches: one-shot readiness waits bound to an I/O
//! queue's poller.

use super::{IoQueue, IoqInner};
use crate::task::Task;
use anyhow::{anyhow, Result};
use bitflags::bitflags;
use parking_lot::Mutex;
use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Weak};

bitflags! {
    /// Readiness bits observable on an fd watch. An empty completion
    /// mask means the wait was cancelled, not that an event fired.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct IoEvents: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        /// Error or hangup. Always delivered when the OS reports it,
        /// whether or not it was asked for. A hung-up fd reports this
        /// state on every poll cycle, so drop the watch (or deal with
        /// the fd) promptly after observing it.
        const ERROR = 1 << 2;
    }
}

/// Callback delivered when the armed events (or an error) fire, or when
/// the wait is cancelled. Read the outcome with [`FdWatch::ready`].
pub type FdWatchFn = Box<dyn FnOnce(FdWatch) + Send + 'static>;

/// A watch on one file descriptor, registered with one I/O queue.
///
/// At most one watch per underlying fd and one outstanding wait per
/// watch. The watch borrows the fd: closing it while a wait is armed is
/// a misuse the library does not detect.
#[derive(Clone)]
pub struct FdWatch {
    inner: Arc<FdWatchInner>,
}

pub(crate) struct FdWatchInner {
    fd: RawFd,
    ioq: Weak<IoqInner>,
    task: Task,
    state: Mutex<WatchState>,
}

struct WatchState {
    armed: IoEvents,
    ready: IoEvents,
    func: Option<FdWatchFn>,
}

impl FdWatch {
    /// Register `fd` with the I/O queue's poller. Fails if the fd is
    /// already registered (aliasing one fd across two watches) or is
    /// not pollable.
    pub fn new(ioq: &IoQueue, fd: RawFd) -> Result<Self> {
        let watch = FdWatch {
            inner: Arc::new(FdWatchInner {
                fd,
                ioq: Arc::downgrade(&ioq.inner),
                task: Task::new(),
                state: Mutex::new(WatchState {
                    armed: IoEvents::empty(),
                    ready: IoEvents::empty(),
                    func: None,
                }),
            }),
        };
        ioq.inner
            .register_watch(&watch)
            .map_err(crate::errors::IoqError::Io)?;
        Ok(watch)
    }

    pub fn fd(&self) -> RawFd {
        self.inner.fd
    }

    /// Completion mask of the most recently delivered wait: empty on
    /// cancellation. Meant to be read from inside the callback.
    pub fn ready(&self) -> IoEvents {
        self.inner.state.lock().ready
    }

    /// Arm the poller for `mask` on this fd and deliver `f` once any of
    /// those events (or an error) fires. One wait outstanding at a
    /// time.
    pub fn wait(&self, mask: IoEvents, f: FdWatchFn) -> Result<()> {
        let Some(ioq) = self.inner.ioq.upgrade() else {
            return Err(anyhow!("fd watch outlived its I/O queue"));
        };

        {
            let mut state = self.inner.state.lock();
            debug_assert!(state.func.is_none(), "fd watch already has an outstanding wait");
            state.armed = mask;
            state.ready = IoEvents::empty();
            state.func = Some(f);
        }

        if let Err(e) = ioq.poller.arm(self.inner.fd, mask) {
            // Nothing was armed: restore the idle state before
            // surfacing the error.
            let mut state = self.inner.state.lock();
            state.armed = IoEvents::empty();
            state.func = None;
            return Err(crate::errors::IoqError::Io(e).into());
        }
        Ok(())
    }

    /// Disarm the poller and deliver the pending callback with an empty
    /// completion mask. Safe from any thread; idempotent; a no-op when
    /// no wait is pending (including when the completion already won
    /// the race).
    pub fn cancel(&self) {
        let Some(ioq) = self.inner.ioq.upgrade() else {
            return;
        };

        let func = {
            let mut state = self.inner.state.lock();
            match state.func.take() {
                Some(f) => {
                    state.armed = IoEvents::empty();
                    state.ready = IoEvents::empty();
                    Some(f)
                }
                None => None,
            }
        };

        if let Some(f) = func {
            let _ = ioq.poller.disarm(self.inner.fd);
            let watch = self.clone();
            ioq.runq
                .exec(&self.inner.task, Box::new(move |_| f(watch)));
        }
    }

    /// Consume fired readiness: record the observed mask, clear the
    /// interest set and promote the completion task. Called from the
    /// poller cycle.
    pub(crate) fn complete(&self, fired: IoEvents, ioq: &IoqInner) {
        let func = {
            let mut state = self.inner.state.lock();
            let observed = fired & (state.armed | IoEvents::ERROR);
            if observed.is_empty() {
                return;
            }
            match state.func.take() {
                Some(f) => {
                    state.armed = IoEvents::empty();
                    state.ready = observed;
                    Some(f)
                }
                // Readiness raced a cancel; the cancel delivery wins.
                None => None,
            }
        };

        if let Some(f) = func {
            let _ = ioq.poller.disarm(self.inner.fd);
            let watch = self.clone();
            ioq.runq
                .exec(&self.inner.task, Box::new(move |_| f(watch)));
        }
    }

    pub(crate) fn from_inner(inner: Arc<FdWatchInner>) -> Self {
        FdWatch { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<FdWatchInner> {
        Arc::downgrade(&self.inner)
    }
}

impl fmt::Debug for FdWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("FdWatch")
            .field("fd", &self.inner.fd)
            .field("armed", &state.armed)
            .field("waiting", &state.func.is_some())
            .finish()
    }
}

impl Drop for FdWatchInner {
    fn drop(&mut self) {
        if let Some(ioq) = self.ioq.upgrade() {
            ioq.forget_watch(self.fd, self as *const _);
        }
    }
}
