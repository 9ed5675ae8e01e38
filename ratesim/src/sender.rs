//! Base sender state: the injection-rate state machine and the random
//! traffic generator.
//!
//! Rate changes always land through a `RateChange` event scheduled at the
//! next epsilon, so transitions respect virtual-time ordering: a generation
//! event at the same tick but an earlier epsilon still observes the old
//! rate. A change from zero to a positive rate bootstraps the generation
//! loop; each generation event reschedules itself while the rate stays
//! positive.

use rand::Rng;
use ratedes::Context;
use tracing::debug;

use crate::actor::NodeEvent;
use crate::message::{Message, NodeId};
use crate::node::NodeCore;

pub struct SenderCore {
    pub core: NodeCore,
    injection_rate: f64,
    message_count: u32,
    min_message_size: u32,
    max_message_size: u32,
    recv_min: NodeId,
    recv_max: NodeId,
}

impl SenderCore {
    pub fn new(
        id: NodeId,
        seed: u64,
        min_message_size: u32,
        max_message_size: u32,
        recv_min: NodeId,
        recv_max: NodeId,
    ) -> Self {
        debug_assert!(min_message_size >= 1 && min_message_size <= max_message_size);
        debug_assert!(recv_min <= recv_max);
        Self {
            core: NodeCore::new(id, seed),
            injection_rate: 0.0,
            message_count: 0,
            min_message_size,
            max_message_size,
            recv_min,
            recv_max,
        }
    }

    pub fn injection_rate(&self) -> f64 {
        self.injection_rate
    }

    /// Number of messages generated so far.
    pub fn generated(&self) -> u32 {
        self.message_count
    }

    /// Apply a retargeted injection rate. Waking from idle schedules the
    /// first generation event at the next epsilon.
    pub fn handle_rate_change(&mut self, ctx: &mut Context<'_, NodeEvent>, rate: f64) {
        assert!((0.0..=1.0).contains(&rate), "injection rate {rate}");
        let was_idle = self.injection_rate == 0.0 && rate > 0.0;
        debug!(node = self.core.id, rate, "injection rate");
        self.injection_rate = rate;
        if was_idle {
            ctx.schedule_self(ctx.now().plus_eps(), NodeEvent::Generate);
        }
    }

    /// Produce the next message and, while the rate is positive, schedule
    /// the following generation event. The caller decides when and how the
    /// message hits the wire, but must eventually consume it.
    pub fn generate(&mut self, ctx: &mut Context<'_, NodeEvent>) -> Message {
        let dst = self.core.rng().gen_range(self.recv_min..=self.recv_max);
        let size = self
            .core
            .rng()
            .gen_range(self.min_message_size..=self.max_message_size);
        let trans = ((self.core.id as u64) << 32) | self.message_count as u64;
        self.message_count += 1;
        let msg = Message::plain(self.core.id, dst, size, trans);

        if self.injection_rate > 0.0 {
            let cycles = self.core.cycles_to_send(size, self.injection_rate);
            ctx.schedule_self(ctx.now() + cycles, NodeEvent::Generate);
        }
        msg
    }
}
