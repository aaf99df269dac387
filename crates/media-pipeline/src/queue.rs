//! Thread-safe bounded FIFO with blocking push/pop and cooperative abort.
//!
//! The pipeline uses two of these per open file:
//! - demux thread → [`BoundedQueue<PacketMessage>`](crate::types::PacketMessage) → decode thread
//! - decode thread → [`BoundedQueue<Frame>`](crate::types::Frame) → feeder (via `AudioBuffer`)
//!
//! Shutdown is driven by [`BoundedQueue::abort`]: once called, every blocked and future
//! `push`/`pop` returns [`QueueAborted`] immediately, so worker threads can always be joined.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::QueueAborted;

/// Capacity-bounded multi-producer/multi-consumer queue.
///
/// ## Design
/// - One mutex guards the items, the abort flag and the high-water mark.
/// - Two condition variables: `not_full` (producers wait) and `not_empty` (consumers wait).
/// - Every state change notifies the condition a waiter could be blocked on.
///
/// ## Abort semantics
/// Abort takes precedence over pending data: after `abort()`, `pop` returns
/// `Err(QueueAborted)` even if items remain in the store.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

struct Inner<T> {
    items: VecDeque<T>,
    aborted: bool,
    peak_len: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                aborted: false,
                peak_len: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `item`, blocking while the queue is full.
    ///
    /// Returns `Err(QueueAborted)` (dropping `item`) if the queue is aborted before or while
    /// waiting for space.
    pub fn push(&self, item: T) -> Result<(), QueueAborted> {
        let mut g = self.lock();
        while !g.aborted && g.items.len() >= self.capacity {
            g = self.not_full.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
        if g.aborted {
            return Err(QueueAborted);
        }
        g.items.push_back(item);
        g.peak_len = g.peak_len.max(g.items.len());
        drop(g);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue the oldest item, blocking while the queue is empty.
    ///
    /// Returns `Err(QueueAborted)` without draining if the queue is (or becomes) aborted.
    pub fn pop(&self) -> Result<T, QueueAborted> {
        let mut g = self.lock();
        while !g.aborted && g.items.is_empty() {
            g = self.not_empty.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
        if g.aborted {
            return Err(QueueAborted);
        }
        let item = g.items.pop_front();
        drop(g);
        self.not_full.notify_one();
        item.ok_or(QueueAborted)
    }

    /// Dequeue the oldest item without waiting.
    ///
    /// `Ok(None)` means the queue is currently empty.
    pub fn try_pop(&self) -> Result<Option<T>, QueueAborted> {
        let mut g = self.lock();
        if g.aborted {
            return Err(QueueAborted);
        }
        let item = g.items.pop_front();
        drop(g);
        if item.is_some() {
            self.not_full.notify_one();
        }
        Ok(item)
    }

    /// Drop every buffered item without aborting.
    ///
    /// Producers blocked on a full queue are woken since space is now available.
    pub fn clear(&self) {
        drop(self.drain());
    }

    /// Remove and return every buffered item without aborting.
    pub fn drain(&self) -> Vec<T> {
        let mut g = self.lock();
        let items = std::mem::take(&mut g.items);
        drop(g);
        self.not_full.notify_all();
        items.into()
    }

    /// Abort the queue and wake every waiter on both conditions.
    ///
    /// Idempotent.
    pub fn abort(&self) {
        let mut g = self.lock();
        g.aborted = true;
        drop(g);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    /// Snapshot of the number of buffered items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest length ever observed after a push.
    pub fn peak_len(&self) -> usize {
        self.lock().peak_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn preserves_fifo_order() {
        let q = BoundedQueue::new(4);
        for i in 0..4 {
            q.push(i).unwrap();
        }
        let out: Vec<i32> = (0..4).map(|_| q.pop().unwrap()).collect();
        assert_eq!(out, vec![0, 1, 2, 3]);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let q = BoundedQueue::<u8>::new(0);
        assert_eq!(q.capacity(), 1);
        q.push(7).unwrap();
        assert!(q.is_full());
    }

    #[test]
    fn try_pop_on_empty_returns_none() {
        let q = BoundedQueue::<u8>::new(2);
        assert_eq!(q.try_pop(), Ok(None));
        q.push(1).unwrap();
        assert_eq!(q.try_pop(), Ok(Some(1)));
    }

    #[test]
    fn push_blocks_until_space_is_available() {
        let q = Arc::new(BoundedQueue::new(1));
        q.push(1).unwrap();

        let q_push = q.clone();
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            q_push.push(2).unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(q.pop(), Ok(1));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(q.pop(), Ok(2));
        handle.join().unwrap();
    }

    #[test]
    fn pop_blocks_until_item_arrives() {
        let q = Arc::new(BoundedQueue::new(2));
        let q_pop = q.clone();
        let handle = thread::spawn(move || q_pop.pop());

        thread::sleep(Duration::from_millis(20));
        q.push(42).unwrap();
        assert_eq!(handle.join().unwrap(), Ok(42));
    }

    #[test]
    fn push_after_abort_is_dropped() {
        let q = BoundedQueue::new(2);
        q.abort();
        assert_eq!(q.push(1), Err(QueueAborted));
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn pop_after_abort_does_not_drain_pending_items() {
        let q = BoundedQueue::new(4);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.abort();
        assert_eq!(q.pop(), Err(QueueAborted));
        assert_eq!(q.try_pop(), Err(QueueAborted));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn abort_is_idempotent() {
        let q = BoundedQueue::<u8>::new(1);
        q.abort();
        q.abort();
        assert!(q.is_aborted());
    }

    #[test]
    fn clear_empties_without_aborting() {
        let q = BoundedQueue::new(3);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.clear();
        assert_eq!(q.len(), 0);
        assert!(!q.is_aborted());
        q.push(3).unwrap();
        assert_eq!(q.pop(), Ok(3));
    }

    #[test]
    fn clear_wakes_blocked_producer() {
        let q = Arc::new(BoundedQueue::new(1));
        q.push(1).unwrap();
        let q_push = q.clone();
        let handle = thread::spawn(move || q_push.push(2));

        thread::sleep(Duration::from_millis(20));
        q.clear();
        assert_eq!(handle.join().unwrap(), Ok(()));
        assert_eq!(q.pop(), Ok(2));
    }

    #[test]
    fn peak_len_never_exceeds_capacity() {
        let q = Arc::new(BoundedQueue::new(3));
        let q_push = q.clone();
        let producer = thread::spawn(move || {
            for i in 0..200 {
                q_push.push(i).unwrap();
            }
        });
        for _ in 0..200 {
            q.pop().unwrap();
        }
        producer.join().unwrap();
        assert!(q.peak_len() <= 3);
    }
}
