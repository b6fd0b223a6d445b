// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Bounded FIFO shared between the receive and processing threads.
//!
//! The receive path must never block on a slow decoder, so [`BoundedQueue::push`]
//! fails immediately when the queue is full and the newest packet is
//! dropped. The processing path blocks in [`BoundedQueue::pop`] until a packet
//! arrives or [`BoundedQueue::set_exit`] is called.
//!
//! Replay of a finite source instead uses [`BoundedQueue::push_wait`], which
//! waits for a free slot so no recorded packet is lost.
//!
//! ```text
//!  receive thread                      processing thread
//!  ──────────────                      ─────────────────
//!  push(pkt) ──► [ p0 p1 p2 ... ] ──► pop() -> Some(p0)
//!     │ full?                             │ empty + exit?
//!     └─► false, drops += 1               └─► None
//! ```

use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Default capacity in packets, several seconds of traffic for one sensor.
pub const DEFAULT_CAPACITY: usize = 5000;

/// Fixed-capacity multi-thread FIFO with cooperative shutdown.
///
/// Designed for a single producer and a single consumer, but every operation
/// is safe to call concurrently from any thread.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
    space: Condvar,
    capacity: usize,
    exit: AtomicBool,
    drops: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// A capacity of zero is rounded up to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            space: Condvar::new(),
            capacity,
            exit: AtomicBool::new(false),
            drops: AtomicU64::new(0),
        }
    }

    /// Append an item without blocking.
    ///
    /// Returns `false` and leaves the queue untouched when it is full; the
    /// rejected item is dropped and counted in [`Self::drops`].
    pub fn push(&self, item: T) -> bool {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            drop(items);
            self.drops.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        items.push_back(item);
        drop(items);
        self.available.notify_one();
        true
    }

    /// Append an item, waiting up to `timeout` for a free slot.
    ///
    /// The item is handed back when the queue stays full for the whole
    /// timeout or exit is signaled while waiting. Not counted in
    /// [`Self::drops`].
    pub fn push_wait(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.len() >= self.capacity {
            if self.exit.load(Ordering::Acquire) {
                return Err(item);
            }
            if self.space.wait_until(&mut items, deadline).timed_out()
                && items.len() >= self.capacity
            {
                return Err(item);
            }
        }

        items.push_back(item);
        drop(items);
        self.available.notify_one();
        Ok(())
    }

    /// Remove the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` only once exit has been signaled and every queued item
    /// has been delivered.
    pub fn pop(&self) -> Option<T> {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                self.space.notify_one();
                return Some(item);
            }
            if self.exit.load(Ordering::Acquire) {
                return None;
            }
            self.available.wait(&mut items);
        }
    }

    /// Remove the oldest item if one is queued.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.space.notify_one();
        }
        item
    }

    /// Signal shutdown and wake every blocked consumer. Idempotent.
    pub fn set_exit(&self) {
        // Store under the lock so a consumer cannot check the flag and then
        // miss the notification before it starts waiting.
        let items = self.items.lock();
        self.exit.store(true, Ordering::Release);
        drop(items);
        self.available.notify_all();
        self.space.notify_all();
    }

    /// True once [`Self::set_exit`] has been called.
    pub fn is_exiting(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }

    /// Current number of queued items (advisory).
    pub fn size(&self) -> usize {
        self.items.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    /// Number of pushes rejected because the queue was full.
    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
