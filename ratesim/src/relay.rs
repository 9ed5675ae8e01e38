//! Relay-mediated flow control: a credit-window sender behind a
//! bandwidth-limited relay.
//!
//! The relay enforces its share of the aggregate rate by serializing
//! forwards through a `next_time` cursor: each request advances the cursor
//! by the serialization time of the forwarded message at the relay's rate.
//! The response goes back first and carries `size = 1`, so it consumes its
//! own slot on the link; this overhead is intentional and measurable.

use std::collections::VecDeque;

use rand::Rng;
use ratedes::{Context, Time};
use tracing::debug;

use crate::actor::{Fabric, NodeEvent};
use crate::message::{Message, MessageKind, NodeId, Payload, RelayRequest, RelayResponse};
use crate::node::NodeCore;
use crate::sender::SenderCore;

/// Bandwidth-limited forwarder.
pub struct Relay {
    pub core: NodeCore,
    /// This relay's share of the aggregate rate limit.
    rate: f64,
    /// Earliest time the next request may be dispatched.
    next_time: Time,
}

impl Relay {
    pub fn new(id: NodeId, seed: u64, rate: f64) -> Self {
        assert!(rate > 0.0 && rate <= 1.0, "relay rate {rate}");
        Self {
            core: NodeCore::new(id, seed),
            rate,
            next_time: Time::ZERO,
        }
    }

    pub fn recv(&mut self, _fabric: &Fabric, ctx: &mut Context<'_, NodeEvent>, mut msg: Message) {
        assert_eq!(
            msg.kind(),
            MessageKind::RelayRequest,
            "relay received a non-request message: {msg}"
        );
        let Payload::RelayRequest(req) = std::mem::replace(&mut msg.payload, Payload::Plain)
        else {
            unreachable!()
        };

        let now = ctx.now();
        self.next_time = self.next_time.max(now.plus_eps());

        // Credit back to the requester.
        let response = Message::new(
            self.core.id,
            msg.src,
            1,
            msg.trans,
            Payload::RelayResponse(RelayResponse { req_id: req.req_id }),
        );

        // Reformat the request for its real destination, shedding the
        // request header byte.
        msg.dst = req.msg_dst;
        msg.size -= 1;
        let size = msg.size;

        debug!(relay = self.core.id, trans = msg.trans, dst = msg.dst, "forwarding");
        let at = self.next_time;
        self.core.send_at(ctx, response, at);
        self.core.send_at(ctx, msg, at);

        // Token-bucket pacing: the cursor moves by the serialization time
        // of the forwarded message at this relay's rate share.
        let cycles = self.core.cycles_to_send(size, self.rate);
        self.next_time = at + cycles;
    }
}

/// Credit-window sender. Generated messages are rewritten into relay
/// requests and drained while credits remain; each response returns one
/// credit.
pub struct RelaySender {
    pub sender: SenderCore,
    relay_min: NodeId,
    relay_max: NodeId,
    relay_req_id: u64,
    max_outstanding: u32,
    credits: u32,
    send_queue: VecDeque<Message>,
}

impl RelaySender {
    pub fn new(
        sender: SenderCore,
        relay_min: NodeId,
        relay_max: NodeId,
        max_outstanding: u32,
    ) -> Self {
        assert!(max_outstanding > 0);
        debug_assert!(relay_min <= relay_max);
        Self {
            sender,
            relay_min,
            relay_max,
            relay_req_id: 0,
            max_outstanding,
            credits: max_outstanding,
            send_queue: VecDeque::new(),
        }
    }

    pub fn handle_generate(&mut self, ctx: &mut Context<'_, NodeEvent>) {
        let msg = self.sender.generate(ctx);
        self.send_message(ctx, msg);
    }

    fn send_message(&mut self, ctx: &mut Context<'_, NodeEvent>, mut msg: Message) {
        // Rewrite into a relay request: stash the true destination, aim at
        // a uniformly chosen relay, and grow by the request header byte.
        let req = RelayRequest {
            req_id: self.relay_req_id,
            msg_dst: msg.dst,
        };
        self.relay_req_id += 1;
        msg.dst = self
            .sender
            .core
            .rng()
            .gen_range(self.relay_min..=self.relay_max);
        msg.size += 1;
        msg.payload = Payload::RelayRequest(req);

        self.send_queue.push_back(msg);
        self.process_queue(ctx);
    }

    pub fn recv(&mut self, _fabric: &Fabric, ctx: &mut Context<'_, NodeEvent>, msg: Message) {
        let Payload::RelayResponse(_) = &msg.payload else {
            panic!("relay sender received a non-response message: {msg}");
        };
        drop(msg);

        assert!(
            self.credits < self.max_outstanding,
            "relay credits exceed the window"
        );
        self.credits += 1;
        self.process_queue(ctx);
    }

    fn process_queue(&mut self, ctx: &mut Context<'_, NodeEvent>) {
        while self.credits > 0 {
            let Some(msg) = self.send_queue.pop_front() else {
                break;
            };
            self.sender.core.send(ctx, msg);
            self.credits -= 1;
        }
    }

    pub fn credits(&self) -> u32 {
        self.credits
    }

    pub fn queued(&self) -> usize {
        self.send_queue.len()
    }
}
