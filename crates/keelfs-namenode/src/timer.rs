//! Deadline queue backing the create-timeout and datanode liveness timers.
//!
//! Arming a key again supersedes the previous deadline (heartbeat reset),
//! and cancellation is O(1) by key. Expiry is pull-based: the owning event
//! loop calls `expired(now)` on its tick, which keeps the queue free of
//! callbacks and easy to test.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

use crate::types::TimestampMs;

/// A resettable one-shot deadline per key.
pub struct TimerQueue<K> {
    heap: BinaryHeap<Reverse<(TimestampMs, u64, K)>>,
    latest: HashMap<K, u64>,
    seq: u64,
}

impl<K: Clone + Eq + Hash + Ord> TimerQueue<K> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            latest: HashMap::new(),
            seq: 0,
        }
    }

    /// Arms (or re-arms) the timer for `key` at `deadline`.
    pub fn arm(&mut self, key: K, deadline: TimestampMs) {
        self.seq += 1;
        self.latest.insert(key.clone(), self.seq);
        self.heap.push(Reverse((deadline, self.seq, key)));
    }

    /// Cancels the timer for `key`, if armed.
    pub fn cancel(&mut self, key: &K) {
        self.latest.remove(key);
    }

    /// True if `key` currently has an armed timer.
    pub fn is_armed(&self, key: &K) -> bool {
        self.latest.contains_key(key)
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    /// True if no timer is armed.
    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    /// Drains every key whose deadline is at or before `now`.
    /// Superseded and cancelled deadlines are skipped.
    pub fn expired(&mut self, now: TimestampMs) -> Vec<K> {
        let mut fired = Vec::new();
        while let Some(Reverse((deadline, _, _))) = self.heap.peek() {
            if *deadline > now {
                break;
            }
            let Some(Reverse((_, seq, key))) = self.heap.pop() else {
                break;
            };
            if self.latest.get(&key) == Some(&seq) {
                self.latest.remove(&key);
                fired.push(key);
            }
        }
        fired
    }
}

impl<K: Clone + Eq + Hash + Ord> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}
