// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Logical clock and event queue.
//!
//! A binary-heap priority queue keyed by `(time, sequence)`. The driver pops
//! events and advances `now` to each popped event's time; components only
//! ever schedule *future* events through [`EventQueue::push`]. Pushing into
//! the past is an engine bug and panics.

use crate::event::{Event, EventKind};
use blis_config::Ticks;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Min-heap adapter: orders by `(time, sequence)` ascending.
#[derive(Debug)]
struct QueuedEvent(Event);

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.0.time == other.0.time && self.0.sequence == other.0.sequence
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest event on top.
        other
            .0
            .time
            .cmp(&self.0.time)
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

/// The logical clock plus the event queue feeding it.
///
/// Determinism contract: for a fixed push history the pop sequence is
/// identical across runs; ties on `time` resolve in push (FIFO) order.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<QueuedEvent>,
    next_sequence: u64,
    now: Ticks,
}

impl EventQueue {
    /// An empty queue at tick 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current simulated time. Never decreases.
    #[must_use]
    pub fn now(&self) -> Ticks {
        self.now
    }

    /// Schedules an event. Panics if `time` lies in the past — components
    /// must never rewrite history.
    pub fn push(&mut self, time: Ticks, kind: EventKind) {
        assert!(
            time >= self.now,
            "attempted to schedule {} at t={time} behind now={}",
            kind.label(),
            self.now
        );
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueuedEvent(Event {
            time,
            sequence,
            kind,
        }));
    }

    /// Pops the earliest event and advances `now` to its time.
    pub fn pop(&mut self) -> Option<Event> {
        let event = self.heap.pop()?.0;
        debug_assert!(event.time >= self.now);
        self.now = event.time;
        Some(event)
    }

    /// The time of the earliest scheduled event, if any.
    #[must_use]
    pub fn peek_time(&self) -> Option<Ticks> {
        self.heap.peek().map(|e| e.0.time)
    }

    /// Number of scheduled events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether no events are scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InstanceId;

    fn step_advance(instance: InstanceId) -> EventKind {
        EventKind::StepAdvance { instance }
    }

    #[test]
    fn events_pop_in_time_order() {
        let mut q = EventQueue::new();
        q.push(30, step_advance(3));
        q.push(10, step_advance(1));
        q.push(20, step_advance(2));

        let order: Vec<Ticks> = std::iter::from_fn(|| q.pop()).map(|e| e.time).collect();
        assert_eq!(order, vec![10, 20, 30]);
        assert_eq!(q.now(), 30);
    }

    #[test]
    fn equal_time_events_pop_in_push_order() {
        let mut q = EventQueue::new();
        for instance in 0..5 {
            q.push(7, step_advance(instance));
        }
        let order: Vec<InstanceId> = std::iter::from_fn(|| q.pop())
            .map(|e| match e.kind {
                EventKind::StepAdvance { instance } => instance,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn now_only_moves_forward() {
        let mut q = EventQueue::new();
        q.push(5, step_advance(0));
        q.push(5, step_advance(1));
        let _ = q.pop();
        assert_eq!(q.now(), 5);
        // Same-tick scheduling is fine; the new event fires after already
        // queued same-tick events.
        q.push(5, step_advance(2));
        assert_eq!(q.pop().map(|e| e.sequence), Some(1));
        assert_eq!(q.pop().map(|e| e.sequence), Some(2));
    }

    #[test]
    #[should_panic(expected = "behind now")]
    fn scheduling_into_the_past_panics() {
        let mut q = EventQueue::new();
        q.push(10, step_advance(0));
        let _ = q.pop();
        q.push(9, step_advance(0));
    }
}
