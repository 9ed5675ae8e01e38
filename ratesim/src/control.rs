//! Scheduled injection-rate retargeting across the sender fleet.
//!
//! The schedule is parsed and checked at configuration time; at run time
//! each entry is a single event. Firing one fans `RateChange` events out to
//! the targeted senders at the next epsilon, which is exactly the
//! `set_injection_rate` contract: same-tick events at earlier epsilons
//! still observe the old rate.

use ratedes::{Context, Tick};
use tracing::info;

use crate::actor::NodeEvent;
use crate::message::NodeId;

/// One parsed schedule entry: at `tick`, set each targeted sender (as a
/// 0-based offset into the sender range) to its rate.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlEntry {
    pub tick: Tick,
    pub targets: Vec<(u32, f64)>,
}

pub struct SenderControl {
    schedule: Vec<ControlEntry>,
    /// Actor id of the first sender.
    sender_base: NodeId,
}

impl SenderControl {
    pub fn new(schedule: Vec<ControlEntry>, sender_base: NodeId) -> Self {
        Self {
            schedule,
            sender_base,
        }
    }

    pub fn schedule(&self) -> &[ControlEntry] {
        &self.schedule
    }

    /// Apply schedule entry `index`.
    pub fn fire(&self, ctx: &mut Context<'_, NodeEvent>, index: usize) {
        let entry = &self.schedule[index];
        debug_assert_eq!(entry.tick, ctx.now().tick());
        info!(tick = entry.tick, targets = entry.targets.len(), "retargeting injection rates");

        let at = ctx.now().plus_eps();
        for &(offset, rate) in &entry.targets {
            ctx.schedule(self.sender_base + offset, at, NodeEvent::RateChange(rate));
        }
    }
}
