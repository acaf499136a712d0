// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::core::cmp::Reverse;
use ::std::{
    collections::{
        BinaryHeap,
        HashMap,
    },
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Constants
//==============================================================================

/// Heap size below which cancelled entries are never compacted.
const MIN_COMPACT_LEN: usize = 8;

//==============================================================================
// Structures
//==============================================================================

/// Identifies a pending timeout in a [Timer].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TimerId(u64);

struct TimerQueueEntry {
    expiry: Instant,
    id: TimerId,
}

/// Timer that holds one or more timeouts for future expiration. Time only moves when the owner advances the clock, so
/// every timeout fires from the caller's control flow.
pub struct Timer<K> {
    now: Instant,
    // Use a reverse to get a min heap.
    heap: BinaryHeap<Reverse<TimerQueueEntry>>,
    // Timeouts that are still armed. Cancelled entries stay in the heap until it is compacted or they expire.
    armed: HashMap<TimerId, K>,
    next_id: u64,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl<K> Timer<K> {
    pub fn new(now: Instant) -> Self {
        Self {
            now,
            heap: BinaryHeap::new(),
            armed: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Arms a timeout that expires `timeout` after the current time.
    pub fn schedule(&mut self, timeout: Duration, key: K) -> TimerId {
        let expiry: Instant = self.now + timeout;
        self.schedule_at(expiry, key)
    }

    /// Arms a timeout that expires at `expiry`.
    pub fn schedule_at(&mut self, expiry: Instant, key: K) -> TimerId {
        let id: TimerId = TimerId(self.next_id);
        self.next_id += 1;
        self.compact();
        self.heap.push(Reverse(TimerQueueEntry { expiry, id }));
        self.armed.insert(id, key);
        id
    }

    /// Disarms a timeout. Returns the key of the timeout if it was still armed.
    pub fn cancel(&mut self, id: TimerId) -> Option<K> {
        let key: Option<K> = self.armed.remove(&id);
        self.compact();
        key
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.armed.contains_key(&id)
    }

    /// Number of armed timeouts.
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    /// Number of entries in the queue, cancelled ones included.
    pub fn queued(&self) -> usize {
        self.heap.len()
    }

    /// Drops cancelled entries once they outnumber the armed ones.
    fn compact(&mut self) {
        if self.heap.len() <= MIN_COMPACT_LEN.max(2 * self.armed.len()) {
            return;
        }
        let armed: &HashMap<TimerId, K> = &self.armed;
        self.heap.retain(|Reverse(entry)| armed.contains_key(&entry.id));
    }

    /// Moves the clock forward and returns the keys of all timeouts that expired, earliest first.
    pub fn advance_clock(&mut self, now: Instant) -> Vec<K> {
        debug_assert!(self.now <= now);
        let mut expired: Vec<K> = Vec::new();

        while let Some(Reverse(entry)) = self.heap.peek() {
            if now < entry.expiry {
                break;
            }
            let id: TimerId = entry.id;
            self.heap.pop();
            if let Some(key) = self.armed.remove(&id) {
                expired.push(key);
            }
        }

        // Drop stale heap entries once everything has been cancelled.
        if self.armed.is_empty() {
            self.heap.clear();
        }

        if now > self.now {
            self.now = now;
        }
        expired
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl PartialEq for TimerQueueEntry {
    fn eq(&self, other: &TimerQueueEntry) -> bool {
        self.expiry == other.expiry && self.id == other.id
    }
}

impl Eq for TimerQueueEntry {}

impl PartialOrd for TimerQueueEntry {
    fn partial_cmp(&self, other: &TimerQueueEntry) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerQueueEntry {
    fn cmp(&self, other: &TimerQueueEntry) -> core::cmp::Ordering {
        // Timeouts that share an expiration fire in arming order.
        self.expiry.cmp(&other.expiry).then(self.id.0.cmp(&other.id.0))
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
