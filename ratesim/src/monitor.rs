//! Group-wide receive-rate monitoring and quiescence detection.
//!
//! Every network node runs a monitor timer with the same period and reports
//! whether it received anything since the last tick. Once an entire period
//! passes with no receives anywhere, the group disables itself, monitor
//! timers stop rescheduling, and the event queue can drain.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use ratedes::{Tick, Time};
use tracing::debug;

/// Epsilon used by every monitor event, placing them after any same-tick
/// traffic.
pub const MONITOR_EPS: u32 = 250;

/// Shared across all nodes; touched from parallel workers, hence atomics.
#[derive(Debug)]
pub struct MonitorGroup {
    /// Ticks between monitor events.
    period: Tick,
    /// Number of participating nodes.
    size: u32,
    enabled: AtomicBool,
    any_recvd: AtomicBool,
    remaining: AtomicU32,
}

impl MonitorGroup {
    pub fn new(period: Tick, size: u32) -> Self {
        assert!(period >= 1);
        assert!(size >= 1);
        Self {
            period,
            size,
            enabled: AtomicBool::new(true),
            any_recvd: AtomicBool::new(false),
            remaining: AtomicU32::new(size),
        }
    }

    pub fn period(&self) -> Tick {
        self.period
    }

    /// The next monitor time, or `None` once the group has gone quiet.
    pub fn next(&self, now: Time) -> Option<Time> {
        if self.enabled.load(Ordering::Acquire) {
            Some(Time::with_eps(now.tick() + self.period, MONITOR_EPS))
        } else {
            None
        }
    }

    /// Report one node's period result. The last reporter of a period
    /// resets the round and disables the group if nobody received.
    pub fn done(&self, recvd: bool) {
        if recvd {
            self.any_recvd.store(true, Ordering::Release);
        }

        let remaining = self.remaining.fetch_sub(1, Ordering::AcqRel);
        assert!(remaining > 0, "more monitor reports than group members");
        if self.enabled.load(Ordering::Acquire) && remaining == 1 {
            if !self.any_recvd.load(Ordering::Acquire) {
                debug!("monitor group went quiet, disabling");
                self.enabled.store(false, Ordering::Release);
            }
            self.any_recvd.store(false, Ordering::Release);
            self.remaining.store(self.size, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disables_after_silent_period() {
        let group = MonitorGroup::new(1000, 3);
        let now = Time::new(1000);

        // Active period: somebody received, group stays enabled.
        group.done(true);
        group.done(false);
        group.done(false);
        assert!(group.next(now).is_some());

        // Silent period: disabled once the last member reports.
        group.done(false);
        group.done(false);
        assert!(group.next(now).is_some());
        group.done(false);
        assert!(group.next(now).is_none());
    }

    #[test]
    fn test_next_time_uses_fixed_epsilon() {
        let group = MonitorGroup::new(500, 1);
        let next = group.next(Time::new(2000)).unwrap();
        assert_eq!(next.tick(), 2500);
        assert_eq!(next.epsilon(), MONITOR_EPS);
    }
}
