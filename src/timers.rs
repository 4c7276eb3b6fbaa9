//! Min-heap timer wheel replacing a one-thread-per-timer model: resend
//! checks and pop-wait deadlines are represented as min-heap-scheduled
//! events, not threads.
//!
//! A single `Central` worker thread drains due events from one `TimerWheel`
//! and dispatches them back into the queue/peer state machines. This keeps
//! every ordering guarantee (queue entries still advance strictly in order;
//! cancellation is now "remove from the heap" instead of "kill a thread")
//! without the thread-per-queue fragility.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A scheduled event, ordered by `fire_at_ms` (min-heap: earliest first).
#[derive(Debug, Clone)]
struct ScheduledEvent<T> {
    fire_at_ms: u64,
    seq: u64,
    event: T,
    cancelled: bool,
}

impl<T> PartialEq for ScheduledEvent<T> {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at_ms == other.fire_at_ms && self.seq == other.seq
    }
}
impl<T> Eq for ScheduledEvent<T> {}

impl<T> PartialOrd for ScheduledEvent<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for ScheduledEvent<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want earliest fire_at_ms first.
        other
            .fire_at_ms
            .cmp(&self.fire_at_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A handle that can be used to cancel a previously-scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(u64);

/// Min-heap schedule of `(fire_at_ms, T)`. Not internally synchronized —
/// callers (e.g. `Central`) hold it behind their own mutex.
pub struct TimerWheel<T> {
    heap: BinaryHeap<ScheduledEvent<T>>,
    next_seq: u64,
}

impl<T> Default for TimerWheel<T> {
    fn default() -> Self {
        TimerWheel {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }
}

impl<T> TimerWheel<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `event` to fire at `fire_at_ms`. Returns a handle usable with
    /// `cancel`.
    pub fn schedule(&mut self, fire_at_ms: u64, event: T) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(ScheduledEvent {
            fire_at_ms,
            seq,
            event,
            cancelled: false,
        });
        TimerHandle(seq)
    }

    /// Marks the event behind `handle` as cancelled; it is dropped lazily the
    /// next time it would otherwise fire.
    pub fn cancel(&mut self, handle: TimerHandle) {
        for scheduled in self.heap.iter_mut() {
            // BinaryHeap does not expose a safe mutable iterator that preserves
            // the heap invariant for fields outside the ordering key;
            // `cancelled` is not part of `Ord`, so mutating it in place is sound.
            if scheduled.seq == handle.0 {
                scheduled.cancelled = true;
            }
        }
    }

    /// Pops and returns every event due at or before `now_ms`, skipping
    /// cancelled ones, in fire-time order.
    pub fn drain_due(&mut self, now_ms: u64) -> Vec<T> {
        let mut due = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.fire_at_ms > now_ms {
                break;
            }
            let scheduled = self.heap.pop().unwrap();
            if !scheduled.cancelled {
                due.push(scheduled.event);
            }
        }
        due
    }

    /// The timestamp of the earliest still-pending event, if any.
    pub fn next_fire_at(&self) -> Option<u64> {
        self.heap.peek().map(|e| e.fire_at_ms)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_fire_order_regardless_of_schedule_order() {
        let mut wheel = TimerWheel::new();
        wheel.schedule(300, "c");
        wheel.schedule(100, "a");
        wheel.schedule(200, "b");
        assert_eq!(wheel.drain_due(250), vec!["a", "b"]);
        assert_eq!(wheel.drain_due(1000), vec!["c"]);
    }

    #[test]
    fn cancelled_event_does_not_fire() {
        let mut wheel = TimerWheel::new();
        let handle = wheel.schedule(100, "a");
        wheel.schedule(100, "b");
        wheel.cancel(handle);
        assert_eq!(wheel.drain_due(200), vec!["b"]);
    }

    #[test]
    fn next_fire_at_reports_earliest() {
        let mut wheel: TimerWheel<&str> = TimerWheel::new();
        assert_eq!(wheel.next_fire_at(), None);
        wheel.schedule(500, "x");
        wheel.schedule(200, "y");
        assert_eq!(wheel.next_fire_at(), Some(200));
    }
}
