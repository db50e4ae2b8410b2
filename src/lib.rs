//! Callback-driven I/O and concurrency core.
//!
//! `strandio` provides a thread-pool-backed completion model: an
//! operation is initiated by registering a one-shot callback, and the
//! callback is later invoked on a worker thread when the operation
//! completes. The model sits between classic event loops and
//! thread-per-connection designs: low OS overhead, multi-core
//! dispatch, and a strict one-request/one-callback contract.
//!
//! Four subsystems compose the core:
//!
//! - [`RunQueue`] — a pool of workers draining a FIFO of ready tasks.
//! - [`WaitQueue`] — a timer schedule keyed by deadline; expirations
//!   are promoted into the run queue.
//! - [`Mailbox`] — a 32-bit atomic flag register with level-triggered
//!   any/all waits, for inter-strand signalling.
//! - [`IoQueue`] — the composition root: run queue, wait queue, an
//!   epoll poller with fd watches, and a notify back-channel that
//!   unblocks a sleeping poller.
//!
//! Control flow is driven by callback reentry: a callback typically
//! initiates the next request in tail position, forming a *strand* — a
//! logical sequence of callbacks that is effectively single-threaded
//! even though successive callbacks may run on different workers.
//!
//! ```no_run
//! use strandio::{IoQueue, Mailbox};
//!
//! const DONE: u32 = 1;
//!
//! fn main() -> anyhow::Result<()> {
//!     let ioq = IoQueue::new(2)?;
//!     let mailbox = Mailbox::new(ioq.runq());
//!
//!     let poke = ioq.clone();
//!     mailbox.wait(DONE, Box::new(move |mailbox| {
//!         mailbox.take(DONE);
//!         poke.notify();
//!     }));
//!     mailbox.raise(DONE);
//!
//!     ioq.iterate()?;
//!     ioq.shutdown();
//!     Ok(())
//! }
//! ```

mod clock;

pub mod errors;
pub use errors::IoqError;

mod task;
pub use task::{Task, TaskFn};

pub mod runq;
pub use runq::{RunQueue, ThreadNameFn};

pub mod waitq;
pub use waitq::{Timer, TimerFn, WaitQueue, WakeupFn};

pub mod mailbox;
pub use mailbox::{Mailbox, MailboxFn};

pub mod ioq;
pub use ioq::{Builder, FdWatch, FdWatchFn, IoEvents, IoQueue};

#[cfg(test)]
mod test_utils;
