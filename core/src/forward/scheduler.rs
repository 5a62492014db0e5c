//! Priority scheduler: weighted round robin with aging
//!
//! One FIFO per traffic class. Each round grants every class as many
//! dequeues as its weight (4/2/1 by default); a class with nothing queued
//! gives its turns away. A packet whose wait exceeds the aging bound is
//! served next regardless of class, so Normal traffic cannot starve.

use super::classifier::TrafficClass;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue full for {class} traffic ({capacity} packets)")]
    QueueFull { class: TrafficClass, capacity: usize },
}

#[derive(Debug, Clone)]
struct Queued<T> {
    item: T,
    enqueued_at: Duration,
}

/// A packet leaving the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct Dequeued<T> {
    pub item: T,
    pub class: TrafficClass,
    pub waited: Duration,
}

#[derive(Debug, Clone)]
pub struct PriorityScheduler<T> {
    queues: [VecDeque<Queued<T>>; 3],
    weights: [u32; 3],
    credits: [u32; 3],
    capacity: usize,
    max_wait: Duration,
}

impl<T> PriorityScheduler<T> {
    pub fn new(weights: [u32; 3], capacity: usize, max_wait: Duration) -> Self {
        let weights = weights.map(|w| w.max(1));
        Self {
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            weights,
            credits: weights,
            capacity,
            max_wait,
        }
    }

    pub fn enqueue(&mut self, item: T, class: TrafficClass, now: Duration) -> Result<(), QueueError> {
        let queue = &mut self.queues[class.index()];
        if queue.len() >= self.capacity {
            return Err(QueueError::QueueFull {
                class,
                capacity: self.capacity,
            });
        }
        queue.push_back(Queued {
            item,
            enqueued_at: now,
        });
        Ok(())
    }

    pub fn dequeue(&mut self, now: Duration) -> Option<Dequeued<T>> {
        if self.is_empty() {
            return None;
        }

        let class = self.aged_class(now).or_else(|| self.weighted_class())?;
        let queued = self.queues[class.index()].pop_front()?;
        Some(Dequeued {
            item: queued.item,
            class,
            waited: now.saturating_sub(queued.enqueued_at),
        })
    }

    /// Class whose head has waited past the bound the longest
    fn aged_class(&self, now: Duration) -> Option<TrafficClass> {
        TrafficClass::ALL
            .iter()
            .filter_map(|class| {
                let head = self.queues[class.index()].front()?;
                let waited = now.saturating_sub(head.enqueued_at);
                (waited > self.max_wait).then_some((*class, head.enqueued_at))
            })
            .min_by_key(|(_, enqueued_at)| *enqueued_at)
            .map(|(class, _)| class)
    }

    fn weighted_class(&mut self) -> Option<TrafficClass> {
        for _ in 0..2 {
            for class in TrafficClass::ALL {
                let i = class.index();
                if self.credits[i] > 0 && !self.queues[i].is_empty() {
                    self.credits[i] -= 1;
                    return Some(class);
                }
            }
            // Round exhausted for every non-empty class
            self.credits = self.weights;
        }
        None
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn len_of(&self, class: TrafficClass) -> usize {
        self.queues[class.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    pub fn clear(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
        self.credits = self.weights;
    }
}
