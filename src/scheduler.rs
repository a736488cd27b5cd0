//! Timer queue for cooperatively scheduled game loops
//!
//! Each game machine schedules its stimulus onsets, gap ends and wait timeouts
//! here instead of holding callbacks. The driver pops the earliest timer, moves
//! the clock to its due instant and hands the event back to the machine.
//! Clearing the queue is the cancellation contract: nothing left in it can fire.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

/// Handle for cancelling a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy)]
struct Slot {
    due: f64,
    seq: u64,
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Slot {}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .total_cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Min-ordered queue of timed events; equal due times fire in scheduling order
#[derive(Debug)]
pub struct TimerQueue<E> {
    heap: BinaryHeap<Reverse<Slot>>,
    pending: HashMap<u64, E>,
    next_seq: u64,
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> TimerQueue<E> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `event` at absolute time `due` (ms)
    pub fn schedule_at(&mut self, due: f64, event: E) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Slot { due, seq }));
        self.pending.insert(seq, event);
        TimerId(seq)
    }

    /// Cancel a pending timer; returns false if it already fired or was cancelled
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.pending.remove(&id.0).is_some()
    }

    /// Due time of the earliest live timer
    pub fn next_due(&mut self) -> Option<f64> {
        self.discard_cancelled();
        self.heap.peek().map(|Reverse(slot)| slot.due)
    }

    /// Remove and return the earliest live timer
    pub fn pop_next(&mut self) -> Option<(f64, E)> {
        self.discard_cancelled();
        let Reverse(slot) = self.heap.pop()?;
        self.pending.remove(&slot.seq).map(|event| (slot.due, event))
    }

    /// Remove and return the earliest live timer if it is due at or before `now`
    pub fn pop_due(&mut self, now: f64) -> Option<(f64, E)> {
        match self.next_due() {
            Some(due) if due <= now => self.pop_next(),
            _ => None,
        }
    }

    /// Drop every pending timer
    pub fn clear(&mut self) {
        self.heap.clear();
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse(slot)) = self.heap.peek() {
            if self.pending.contains_key(&slot.seq) {
                break;
            }
            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_due_order() {
        let mut queue = TimerQueue::new();
        queue.schedule_at(300.0, "c");
        queue.schedule_at(100.0, "a");
        queue.schedule_at(200.0, "b");

        assert_eq!(queue.pop_next(), Some((100.0, "a")));
        assert_eq!(queue.pop_next(), Some((200.0, "b")));
        assert_eq!(queue.pop_next(), Some((300.0, "c")));
        assert_eq!(queue.pop_next(), None);
    }

    #[test]
    fn test_equal_due_times_keep_scheduling_order() {
        let mut queue = TimerQueue::new();
        queue.schedule_at(500.0, 1);
        queue.schedule_at(500.0, 2);
        queue.schedule_at(500.0, 3);

        let order: Vec<i32> = std::iter::from_fn(|| queue.pop_next().map(|(_, e)| e)).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_cancel_skips_timer() {
        let mut queue = TimerQueue::new();
        let first = queue.schedule_at(10.0, "timeout");
        queue.schedule_at(20.0, "next");

        assert!(queue.cancel(first));
        assert!(!queue.cancel(first));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_due(), Some(20.0));
        assert_eq!(queue.pop_next(), Some((20.0, "next")));
    }

    #[test]
    fn test_pop_due_respects_now() {
        let mut queue = TimerQueue::new();
        queue.schedule_at(50.0, ());
        assert_eq!(queue.pop_due(49.9), None);
        assert_eq!(queue.pop_due(50.0), Some((50.0, ())));
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut queue = TimerQueue::new();
        queue.schedule_at(1.0, ());
        queue.schedule_at(2.0, ());
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.next_due(), None);
    }
}
