use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback bound to a task at submission time. It receives the task it
/// was submitted with; re-arming in tail position goes through that
/// handle or a clone the closure captured.
pub type TaskFn = Box<dyn FnOnce(Task) + Send + 'static>;

/// A reusable handle bound to a one-shot callback.
///
/// A task is either *inert* or *ready* (sitting in some run queue's
/// FIFO). While ready the run queue holds exclusive access: the task
/// must not be submitted again until its callback has been entered. The
/// usual pattern re-submits from inside the callback.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

struct TaskInner {
    id: SeqId,
    func: Mutex<Option<TaskFn>>,
}

impl Task {
    pub fn new() -> Self {
        Task {
            inner: Arc::new(TaskInner {
                id: SeqId::next(),
                func: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn set_func(&self, f: TaskFn) {
        let prev = self.inner.func.lock().replace(f);
        debug_assert!(prev.is_none(), "task submitted while already queued");
    }

    /// Consume the bound callback and invoke it with this handle. The
    /// slot is cleared before entry so the callback can re-submit.
    pub(crate) fn run(self) {
        let func = self.inner.func.lock().take();
        debug_assert!(func.is_some(), "ready task with no bound callback");
        if let Some(f) = func {
            f(self);
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.inner.id).finish()
    }
}

/// A process-unique, monotonically increasing non-zero ID. Doubles as
/// the identity tiebreak for timers sharing a deadline: unlike a node
/// address it is stable for the lifetime of the object and gives a
/// deterministic dispatch order.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub(crate) struct SeqId(NonZeroU64);

impl SeqId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        // Even at a billion allocations per second this takes centuries
        // to exhaust.
        let Some(id) = NonZeroU64::new(id) else {
            Self::exhausted();
        };

        SeqId(id)
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique sequence ID: bitspace exhausted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use static_assertions::assert_impl_all;
    use std::collections::HashSet;

    assert_impl_all!(Task: Send, Sync, Clone);

    #[test]
    fn test_seq_ids_unique_and_ordered() {
        let mut seen = HashSet::new();
        let mut prev = SeqId::next();
        for _ in 0..100 {
            let id = SeqId::next();
            assert!(prev < id);
            assert!(seen.insert(id));
            prev = id;
        }
    }

    #[test]
    fn test_run_consumes_callback_once() {
        let task = Task::new();
        let hits = std::sync::Arc::new(PlMutex::new(0u32));

        let h = hits.clone();
        task.set_func(Box::new(move |_| *h.lock() += 1));

        task.clone().run();
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_callback_can_rebind_from_tail_position() {
        let task = Task::new();
        let hits = std::sync::Arc::new(PlMutex::new(Vec::new()));

        let h = hits.clone();
        task.set_func(Box::new(move |t| {
            h.lock().push("first");
            let h2 = h.clone();
            t.set_func(Box::new(move |_| h2.lock().push("second")));
        }));

        task.clone().run();
        task.clone().run();
        assert_eq!(*hits.lock(), vec!["first", "second"]);
    }
}
