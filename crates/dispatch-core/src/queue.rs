use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::task::Task;

/// A FIFO task queue with a lock-free readable pending count
///
/// One of these backs every worker lane. Producers (decoder threads, the
/// timer wheel) push from any thread; exactly one worker pops. The
/// pending count is updated inside the same critical section as the
/// deque mutation, so it can never disagree with the queue length; it is
/// kept as a separate atomic so depth reads (metrics, overload logging)
/// never touch the lock.
#[derive(Debug, Default)]
pub struct CountedQueue {
    inner: Mutex<VecDeque<Task>>,
    pending: AtomicUsize,
}

impl CountedQueue {
    pub fn new() -> Self {
        CountedQueue {
            inner: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
        }
    }

    /// Appends a task at the tail (normal arrival order)
    pub fn push_back(&self, task: Task) {
        let mut queue = self.inner.lock();
        queue.push_back(task);
        self.pending.store(queue.len(), Ordering::Release);
    }

    /// Inserts a task at the head, ahead of everything queued.
    /// Used to re-prioritize redelivered work.
    pub fn push_front(&self, task: Task) {
        let mut queue = self.inner.lock();
        queue.push_front(task);
        self.pending.store(queue.len(), Ordering::Release);
    }

    /// Non-blocking pop of the head task
    pub fn try_take(&self) -> Option<Task> {
        let mut queue = self.inner.lock();
        let task = queue.pop_front();
        self.pending.store(queue.len(), Ordering::Release);
        task
    }

    /// Current queue depth, readable without the lock
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Congestion probe: true only when the queue is non-empty AND the
    /// head task has waited at least `age_threshold` AND the depth has
    /// reached `depth_threshold`.
    ///
    /// Both conditions must hold so a deep burst that is draining
    /// quickly (head still young) does not trip the breaker, and neither
    /// does one stale task sitting in an otherwise empty lane.
    pub fn is_congested(&self, depth_threshold: usize, age_threshold: Duration) -> bool {
        let queue = self.inner.lock();
        match queue.front() {
            Some(head) => head.age() >= age_threshold && queue.len() >= depth_threshold,
            None => false,
        }
    }
}
