//! Scheduled events and their priority-queue ordering.

use std::cmp::Ordering;

use crate::time::Time;

/// Index of an actor in the simulator's arena.
pub type ActorId = u32;

/// Unique sequence number for deterministic event ordering.
///
/// Assigned at insertion, so events sharing a `(tick, epsilon)` fire in the
/// order they were scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// An event bound to an actor at a point in virtual time.
#[derive(Debug)]
pub struct ScheduledEvent<E> {
    /// When the event fires.
    pub time: Time,
    /// Sequence number for deterministic ordering of same-time events.
    pub seq: SequenceNumber,
    /// The actor whose handler runs.
    pub actor: ActorId,
    /// The payload delivered to the handler.
    pub event: E,
}

impl<E> ScheduledEvent<E> {
    pub fn new(time: Time, seq: SequenceNumber, actor: ActorId, event: E) -> Self {
        Self {
            time,
            seq,
            actor,
            event,
        }
    }
}

// Ordering for a min-heap (BinaryHeap is a max-heap, so comparisons are
// reversed). The payload takes no part in ordering.
impl<E> PartialEq for ScheduledEvent<E> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl<E> Eq for ScheduledEvent<E> {}

impl<E> PartialOrd for ScheduledEvent<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for ScheduledEvent<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ordering() {
        let e1 = ScheduledEvent::new(Time::new(10), SequenceNumber::new(1), 0, ());
        let e2 = ScheduledEvent::new(Time::new(5), SequenceNumber::new(2), 0, ());

        // e2 has the earlier time, so it is "greater" in min-heap terms.
        assert!(e2 > e1);
    }

    #[test]
    fn test_same_time_sequence_ordering() {
        let e1 = ScheduledEvent::new(Time::new(10), SequenceNumber::new(1), 0, ());
        let e2 = ScheduledEvent::new(Time::new(10), SequenceNumber::new(2), 0, ());

        // Same time: the lower sequence number fires first.
        assert!(e1 > e2);
    }

    #[test]
    fn test_epsilon_orders_before_next_tick() {
        let eps = ScheduledEvent::new(Time::with_eps(10, 1), SequenceNumber::new(5), 0, ());
        let next = ScheduledEvent::new(Time::new(11), SequenceNumber::new(1), 0, ());

        assert!(eps > next);
    }
}
