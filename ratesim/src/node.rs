//! Base state every network node carries: the FIFO egress queue, the
//! per-node PRNG, and receive-side monitor bookkeeping.
//!
//! The egress is a self-clocking state machine. Enqueueing schedules a
//! drain (unless one is already pending); each drain pops the head message,
//! schedules its delivery at `now + size + network delay`, and keeps the
//! link busy for `size` ticks before the next drain. This models a link of
//! unit bandwidth with store-and-forward delay.

use std::collections::VecDeque;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use ratedes::{ActorId, Context, Tick, Time};
use tracing::debug;

use crate::actor::{Fabric, NodeEvent};
use crate::message::{Message, NodeId};

/// Schedule delivery of a message into `to`'s receive handler at `time`.
pub fn future_recv(ctx: &mut Context<'_, NodeEvent>, to: ActorId, msg: Message, time: Time) {
    ctx.schedule(to, time, NodeEvent::Recv(msg));
}

pub struct NodeCore {
    pub id: NodeId,
    prng: Xoshiro256PlusPlus,
    egress: VecDeque<Message>,
    /// Whether a drain event is in flight. At most one ever is.
    event_pending: bool,
    /// Bytes received since the last monitor tick.
    monitor_count: u64,
}

impl NodeCore {
    pub fn new(id: NodeId, seed: u64) -> Self {
        Self {
            id,
            prng: Xoshiro256PlusPlus::seed_from_u64(seed),
            egress: VecDeque::new(),
            event_pending: false,
            monitor_count: 0,
        }
    }

    pub fn rng(&mut self) -> &mut Xoshiro256PlusPlus {
        &mut self.prng
    }

    /// Ticks to serialize `size` bytes at `rate`. The fractional part is
    /// kept in expectation by probabilistic rounding.
    pub fn cycles_to_send(&mut self, size: u32, rate: f64) -> Tick {
        let cycles = size as f64 / rate;
        let fraction = cycles.fract();
        let mut whole = cycles.trunc();
        if fraction != 0.0 {
            debug_assert!(fraction > 0.0 && fraction < 1.0);
            if fraction > self.prng.gen::<f64>() {
                whole += 1.0;
            }
        }
        whole as Tick
    }

    /// Enqueue a message for transmission now.
    pub fn send(&mut self, ctx: &mut Context<'_, NodeEvent>, msg: Message) {
        self.enqueue(ctx, msg);
    }

    /// Send a message at `time` (>= now). The enqueue itself is deferred
    /// to `time`: a paced message must not jump an earlier drain chain.
    pub fn send_at(&mut self, ctx: &mut Context<'_, NodeEvent>, msg: Message, time: Time) {
        debug_assert!(time >= ctx.now());
        if time == ctx.now() {
            self.enqueue(ctx, msg);
        } else {
            ctx.schedule_self(time, NodeEvent::Enqueue(msg));
        }
    }

    /// Join the egress FIFO and bootstrap a drain if none is in flight.
    pub fn enqueue(&mut self, ctx: &mut Context<'_, NodeEvent>, mut msg: Message) {
        msg.sent = ctx.now();
        self.egress.push_back(msg);
        if !self.event_pending {
            self.event_pending = true;
            ctx.schedule_self(ctx.now().plus_eps(), NodeEvent::Drain);
        }
    }

    /// Pop the head of the egress queue onto the wire.
    pub fn handle_drain(&mut self, fabric: &Fabric, ctx: &mut Context<'_, NodeEvent>) {
        debug_assert!(self.event_pending);
        let msg = self
            .egress
            .pop_front()
            .expect("drain fired with an empty egress queue");
        let now = ctx.now();
        let size = msg.size as Tick;
        let to = fabric.network.route(msg.dst);
        debug!(node = self.id, %msg, "egress");
        future_recv(ctx, to, msg, now + (size + fabric.network.delay()));

        // The link is busy for `size` ticks.
        if self.egress.is_empty() {
            self.event_pending = false;
        } else {
            ctx.schedule_self(now + size, NodeEvent::Drain);
        }
    }

    /// Receive-side bookkeeping common to every node kind.
    pub fn note_recv(&mut self, msg: &mut Message, now: Time) {
        msg.recvd = now;
        self.monitor_count += msg.size as u64;
    }

    /// Log this period's receive rate, report it to the group, and
    /// reschedule while the group is live.
    pub fn handle_monitor(&mut self, fabric: &Fabric, ctx: &mut Context<'_, NodeEvent>) {
        let count = std::mem::take(&mut self.monitor_count);
        debug!(
            node = self.id,
            rate = count as f64 / fabric.monitor.period() as f64,
            "receive rate"
        );

        if let Some(next) = fabric.monitor.next(ctx.now()) {
            ctx.schedule_self(next, NodeEvent::Monitor);
        }
        // Report after rescheduling: the last reporter may disable the
        // group, and this node's next event must already be placed.
        fabric.monitor.done(count > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_to_send_exact() {
        let mut core = NodeCore::new(0, 42);
        // No fractional part: fully deterministic.
        assert_eq!(core.cycles_to_send(100, 1.0), 100);
        assert_eq!(core.cycles_to_send(100, 0.5), 200);
        assert_eq!(core.cycles_to_send(100, 0.25), 400);
    }

    #[test]
    fn test_cycles_to_send_probabilistic_mean() {
        let mut core = NodeCore::new(0, 7);
        // 100 / 0.3 = 333.33..; the mean over many draws approaches it.
        let n = 20_000;
        let total: u64 = (0..n).map(|_| core.cycles_to_send(100, 0.3)).sum();
        let mean = total as f64 / n as f64;
        assert!((mean - 100.0 / 0.3).abs() < 1.0, "mean was {mean}");
    }

    #[test]
    fn test_cycles_bounds() {
        let mut core = NodeCore::new(0, 9);
        for _ in 0..1000 {
            let c = core.cycles_to_send(10, 0.3);
            assert!(c == 33 || c == 34);
        }
    }
}
