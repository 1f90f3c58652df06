//! Indexed binary min-heap of per-connection idle timers.
//!
//! A plain `BinaryHeap` can't be adjusted or removed by identity in
//! `O(log n)` without a side index, so this keeps the classic
//! array-heap-plus-position-map shape instead (see `heaptimer.cpp` in
//! the usual C++ reactor-server lineage this design descends from).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mio::Token;

/// A scheduled expiry and the action to run when it fires.
struct TimerNode {
    id: Token,
    expires: Instant,
    cb: Box<dyn FnOnce() + Send>,
}

/// An indexed min-heap ordered by `expires`, supporting `O(log n)`
/// add/adjust/remove keyed by connection [`Token`].
///
/// Identity is the `Token`, not the array position — `ref_idx` tracks
/// where each id currently lives in `heap` so `adjust`/`del` don't need
/// a linear scan.
#[derive(Default)]
pub struct TimerHeap {
    heap: Vec<TimerNode>,
    ref_idx: HashMap<Token, usize>,
}

impl TimerHeap {
    /// Creates an empty timer heap.
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            ref_idx: HashMap::new(),
        }
    }

    /// Number of scheduled timers.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the heap holds no timers.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Schedules `id` to fire `cb` after `timeout`. If `id` already has
    /// a pending timer, its expiry and callback are replaced instead of
    /// a second entry being created.
    pub fn add<F>(&mut self, id: Token, timeout: Duration, cb: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let expires = Instant::now() + timeout;
        if let Some(&i) = self.ref_idx.get(&id) {
            self.heap[i].expires = expires;
            self.heap[i].cb = Box::new(cb);
            self.sift_down(i);
            self.sift_up(i);
        } else {
            let i = self.heap.len();
            self.ref_idx.insert(id, i);
            self.heap.push(TimerNode {
                id,
                expires,
                cb: Box::new(cb),
            });
            self.sift_up(i);
        }
    }

    /// Reschedules an existing timer's expiry, keeping its callback.
    /// No-ops if `id` has no pending timer.
    pub fn adjust(&mut self, id: Token, timeout: Duration) {
        if let Some(&i) = self.ref_idx.get(&id) {
            self.heap[i].expires = Instant::now() + timeout;
            self.sift_down(i);
            self.sift_up(i);
        }
    }

    /// Cancels the timer for `id` without invoking its callback.
    /// No-ops if `id` has no pending timer.
    pub fn remove(&mut self, id: Token) {
        if let Some(&i) = self.ref_idx.get(&id) {
            self.del(i);
        }
    }

    fn del(&mut self, i: usize) {
        let last = self.heap.len() - 1;
        self.swap_nodes(i, last);
        let removed = self.heap.pop().expect("del called on empty heap");
        self.ref_idx.remove(&removed.id);
        if i < self.heap.len() {
            self.sift_down(i);
            self.sift_up(i);
        }
    }

    fn swap_nodes(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.ref_idx.insert(self.heap[i].id, i);
        self.ref_idx.insert(self.heap[j].id, j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[i].expires >= self.heap[parent].expires {
                break;
            }
            self.swap_nodes(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let mut smallest = i;
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            if left < self.heap.len() && self.heap[left].expires < self.heap[smallest].expires {
                smallest = left;
            }
            if right < self.heap.len() && self.heap[right].expires < self.heap[smallest].expires {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap_nodes(i, smallest);
            i = smallest;
        }
    }

    /// Invokes and removes every timer whose expiry has already passed.
    pub fn tick(&mut self) {
        let now = Instant::now();
        while let Some(node) = self.heap.first() {
            if node.expires > now {
                break;
            }
            let node = self.del_root();
            (node.cb)();
        }
    }

    fn del_root(&mut self) -> TimerNode {
        let last = self.heap.len() - 1;
        self.swap_nodes(0, last);
        let node = self.heap.pop().expect("del_root called on empty heap");
        self.ref_idx.remove(&node.id);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        node
    }

    /// Runs [`TimerHeap::tick`], then reports how long the reactor may
    /// block before the new root expires. Returns `None` if no timers
    /// are pending (the reactor should then wait indefinitely).
    pub fn next_tick_ms(&mut self) -> Option<u64> {
        self.tick();
        self.heap.first().map(|root| {
            let now = Instant::now();
            if root.expires <= now {
                0
            } else {
                (root.expires - now).as_millis() as u64
            }
        })
    }

    #[cfg(test)]
    fn is_heap_valid(&self) -> bool {
        for i in 1..self.heap.len() {
            let parent = (i - 1) / 2;
            if self.heap[parent].expires > self.heap[i].expires {
                return false;
            }
        }
        self.ref_idx.len() == self.heap.len()
            && self
                .ref_idx
                .iter()
                .all(|(&id, &idx)| self.heap[idx].id == id)
    }
}
