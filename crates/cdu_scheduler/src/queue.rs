use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// `(priority asc, enqueue_seq asc)` ordering: smaller priority runs first,
/// ties broken by insertion order.
struct Entry<T> {
    priority: i32,
    seq: u64,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the smallest (priority, seq)
        // pair compares greatest and surfaces first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Bounded-in-spirit priority queue keyed by `(priority, enqueue_seq)`,
/// with a separate pause/resume condition. `T` is whatever payload
/// a given scheduler enqueues — a runtime task item or a boxed write job.
pub struct PriorityTaskQueue<T> {
    heap: Mutex<BinaryHeap<Entry<T>>>,
    not_empty: Condvar,
    next_seq: AtomicU64,
    paused: Mutex<bool>,
    pause_cond: Condvar,
    shutdown: AtomicBool,
}

impl<T> PriorityTaskQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
            next_seq: AtomicU64::new(0),
            paused: Mutex::new(false),
            pause_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Enqueues `payload` at `priority`. Returns the monotonic sequence
    /// number assigned, usable as a task id.
    pub fn put_task(&self, payload: T, priority: i32) -> u64 {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
        self.heap.lock().unwrap().push(Entry { priority, seq, payload });
        self.not_empty.notify_one();
        seq
    }

    /// Blocks cooperatively until a task is available, `timeout` elapses,
    /// or shutdown is signaled.
    pub fn get_task(&self, timeout: Duration) -> Option<T> {
        let guard = self.heap.lock().unwrap();
        let (mut guard, _) = self
            .not_empty
            .wait_timeout_while(guard, timeout, |h| h.is_empty() && !self.shutdown.load(AtomicOrdering::SeqCst))
            .unwrap();
        guard.pop().map(|e| e.payload)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, AtomicOrdering::SeqCst);
        self.not_empty.notify_all();
        self.resume();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(AtomicOrdering::SeqCst)
    }

    pub fn pause(&self) {
        *self.paused.lock().unwrap() = true;
    }

    pub fn resume(&self) {
        *self.paused.lock().unwrap() = false;
        self.pause_cond.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap()
    }

    /// Blocks while paused; returns immediately once resumed or shutdown.
    pub fn wait_if_paused(&self) {
        let guard = self.paused.lock().unwrap();
        let _ = self
            .pause_cond
            .wait_while(guard, |p| *p && !self.shutdown.load(AtomicOrdering::SeqCst));
    }
}

impl<T> Default for PriorityTaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq> PriorityTaskQueue<T> {
    /// Drains and rebuilds the heap without entries matching `predicate`,
    /// mirroring the original's drain-and-reinsert `remove_tasks_by_name`.
    pub fn retain(&self, mut predicate: impl FnMut(&T) -> bool) {
        let mut guard = self.heap.lock().unwrap();
        let remaining: Vec<Entry<T>> = std::mem::take(&mut *guard)
            .into_iter()
            .filter(|e| predicate(&e.payload))
            .collect();
        *guard = remaining.into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_priority_then_fifo_order() {
        let q: PriorityTaskQueue<&str> = PriorityTaskQueue::new();
        q.put_task("low-1", 5);
        q.put_task("high", 0);
        q.put_task("low-2", 5);
        assert_eq!(q.get_task(Duration::from_millis(10)), Some("high"));
        assert_eq!(q.get_task(Duration::from_millis(10)), Some("low-1"));
        assert_eq!(q.get_task(Duration::from_millis(10)), Some("low-2"));
    }

    #[test]
    fn get_task_times_out_on_empty_queue() {
        let q: PriorityTaskQueue<i32> = PriorityTaskQueue::new();
        assert_eq!(q.get_task(Duration::from_millis(10)), None);
    }

    #[test]
    fn retain_evicts_matching_entries() {
        let q: PriorityTaskQueue<&str> = PriorityTaskQueue::new();
        q.put_task("heartbeat", 1);
        q.put_task("other", 1);
        q.retain(|name| *name != "heartbeat");
        assert_eq!(q.len(), 1);
        assert_eq!(q.get_task(Duration::from_millis(10)), Some("other"));
    }
}
