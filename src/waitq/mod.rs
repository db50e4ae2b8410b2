//! The wait queue: an ordered multiset of timers keyed by
//! `(deadline, identity)`. Expired timers are promoted into a run queue
//! by [`WaitQueue::dispatch`]; the identity tiebreak makes the order of
//! a single dispatch pass deterministic.

use crate::clock;
use crate::runq::RunQueue;
use crate::task::{SeqId, Task};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Hook poked whenever the earliest deadline changes, always outside
/// the wait queue lock. The I/O queue wires this to its notify pipe so
/// a blocked poller recomputes its stale timeout.
pub type WakeupFn = Arc<dyn Fn() + Send + Sync + 'static>;

/// Callback delivered when a timer expires (or is cancelled onto an
/// immediately expired deadline).
pub type TimerFn = Box<dyn FnOnce(Timer) + Send + 'static>;

type TimerKey = (u64, SeqId);

/// A one-shot timer. Belongs to at most one wait queue and carries at
/// most one outstanding wait; re-arm it from inside its own callback.
#[derive(Clone)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

struct TimerInner {
    id: SeqId,
    task: Task,
    state: Mutex<TimerState>,
}

struct TimerState {
    deadline: u64,
    func: Option<TimerFn>,
}

impl Timer {
    pub fn new() -> Self {
        Timer {
            inner: Arc::new(TimerInner {
                id: SeqId::next(),
                task: Task::new(),
                state: Mutex::new(TimerState {
                    deadline: 0,
                    func: None,
                }),
            }),
        }
    }

    fn key(&self, deadline: u64) -> TimerKey {
        (deadline, self.inner.id)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer").field("id", &self.inner.id).finish()
    }
}

/// A mutex-protected schedule of [`Timer`]s ordered by
/// `(deadline, identity)`.
#[derive(Clone)]
pub struct WaitQueue {
    inner: Arc<WaitqInner>,
}

struct WaitqInner {
    waiting: Mutex<BTreeMap<TimerKey, Timer>>,
    wakeup: Option<WakeupFn>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A wait queue whose earliest-deadline changes poke `hook`.
    pub fn with_wakeup(hook: WakeupFn) -> Self {
        Self::build(Some(hook))
    }

    fn build(wakeup: Option<WakeupFn>) -> Self {
        WaitQueue {
            inner: Arc::new(WaitqInner {
                waiting: Mutex::new(BTreeMap::new()),
                wakeup,
            }),
        }
    }

    /// Schedule `timer` to expire `interval_ms` from now and bind `f`
    /// as its completion. The timer must not already have an
    /// outstanding wait.
    pub fn wait(&self, timer: &Timer, interval_ms: u64, f: TimerFn) {
        let deadline = clock::now_ms().saturating_add(interval_ms);
        {
            let mut state = timer.inner.state.lock();
            debug_assert!(state.func.is_none(), "timer already has an outstanding wait");
            state.deadline = deadline;
            state.func = Some(f);
        }

        let became_earliest = {
            let mut waiting = self.inner.waiting.lock();
            let key = timer.key(deadline);
            waiting.insert(key, timer.clone());
            waiting.first_key_value().map(|(k, _)| *k) == Some(key)
        };

        if became_earliest {
            self.poke_wakeup();
        }
    }

    /// Best-effort cancellation: reschedules the timer onto an already
    /// expired deadline, so the next dispatch promotes it and the
    /// callback observes an early fire. If the timer has already been
    /// promoted (or was never armed) this is a silent no-op and the
    /// original callback still fires.
    pub fn cancel(&self, timer: &Timer) {
        self.move_deadline(timer, 0);
    }

    /// Atomically re-key an armed timer to `now + interval_ms`. No-op
    /// if the timer is not currently waiting.
    pub fn reschedule(&self, timer: &Timer, interval_ms: u64) {
        self.move_deadline(timer, clock::now_ms().saturating_add(interval_ms));
    }

    fn move_deadline(&self, timer: &Timer, deadline: u64) {
        let mut changed_earliest = false;
        {
            let mut waiting = self.inner.waiting.lock();
            let mut state = timer.inner.state.lock();

            let old_key = timer.key(state.deadline);
            if waiting.remove(&old_key).is_none() {
                return;
            }
            // True when we removed the former earliest entry.
            changed_earliest |= waiting.first_key_value().map_or(true, |(k, _)| *k > old_key);

            state.deadline = deadline;
            let new_key = timer.key(deadline);
            waiting.insert(new_key, timer.clone());
            changed_earliest |= waiting.first_key_value().map(|(k, _)| *k) == Some(new_key);
        }

        if changed_earliest {
            self.poke_wakeup();
        }
    }

    /// Milliseconds until the earliest deadline: 0 if already past,
    /// `None` if nothing is waiting.
    pub fn next_deadline(&self) -> Option<u64> {
        let waiting = self.inner.waiting.lock();
        let (key, _) = waiting.first_key_value()?;
        Some(key.0.saturating_sub(clock::now_ms()))
    }

    /// Promote up to `limit` expired timers into `rq` in deadline order
    /// (`limit` 0 = unlimited). Returns the number promoted.
    pub fn dispatch(&self, rq: &RunQueue, limit: usize) -> usize {
        let now = clock::now_ms();
        let mut count = 0;

        while limit == 0 || count < limit {
            let Some(timer) = self.expire_one(now) else {
                break;
            };

            let func = timer.inner.state.lock().func.take();
            debug_assert!(func.is_some(), "armed timer with no bound callback");
            if let Some(f) = func {
                let handle = timer.clone();
                rq.exec(&timer.inner.task, Box::new(move |_| f(handle)));
            }
            count += 1;
        }

        count
    }

    fn expire_one(&self, now: u64) -> Option<Timer> {
        let mut waiting = self.inner.waiting.lock();
        let (key, _) = waiting.first_key_value()?;
        if key.0 > now {
            return None;
        }
        let key = *key;
        waiting.remove(&key)
    }

    fn poke_wakeup(&self) {
        if let Some(hook) = &self.inner.wakeup {
            hook();
        }
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueue")
            .field("waiting", &self.inner.waiting.lock().len())
            .finish()
    }
}

impl Drop for WaitqInner {
    fn drop(&mut self) {
        debug_assert!(
            self.waiting.get_mut().is_empty(),
            "wait queue dropped with timers still waiting"
        );
    }
}
