//! Timer queue
//!
//! All protocol timers live in one min-heap keyed by (deadline, id). The host
//! asks for the next deadline and calls back with the current time; due events
//! come out in deadline order, ties in scheduling order. Cancellation is lazy:
//! the payload is dropped and the heap slot skipped when it surfaces.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Handle for a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// What a timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Hello,
    Probe,
    Purge,
    DiscoveryRetry(Ipv4Addr),
    LocalRepairTimeout(Ipv4Addr),
}

#[derive(Debug, Clone, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<(Duration, u64)>>,
    events: HashMap<u64, TimerEvent>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, deadline: Duration, event: TimerEvent) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse((deadline, id)));
        self.events.insert(id, event);
        TimerId(id)
    }

    /// Returns `false` if the timer already fired or was cancelled
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.events.remove(&id.0).is_some()
    }

    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.events.contains_key(&id.0)
    }

    /// Earliest live deadline
    pub fn next_deadline(&mut self) -> Option<Duration> {
        self.skip_cancelled();
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Pop the earliest event whose deadline is `<= now`
    pub fn pop_due(&mut self, now: Duration) -> Option<(TimerId, Duration, TimerEvent)> {
        self.skip_cancelled();
        let Reverse((deadline, id)) = *self.heap.peek()?;
        if deadline > now {
            return None;
        }
        self.heap.pop();
        let event = self.events.remove(&id)?;
        Some((TimerId(id), deadline, event))
    }

    /// Number of live timers
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.events.clear();
    }

    fn skip_cancelled(&mut self) {
        while let Some(Reverse((_, id))) = self.heap.peek() {
            if self.events.contains_key(id) {
                break;
            }
            self.heap.pop();
        }
    }
}
