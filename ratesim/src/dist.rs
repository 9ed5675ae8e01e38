//! Distributed per-sender token buckets with peer-to-peer stealing.
//!
//! Each sender owns a fraction of the aggregate rate limit (its long-run
//! token refill speed) and a bucket of tokens (burst capacity, one token
//! per byte). When the bucket runs low a sender may steal from random
//! peers: tokens move a burst allowance, rate moves the refill speed
//! itself. Both are conserved, only ever transferred.
//!
//! Every receive entry refreshes the bucket through `get_tokens` before
//! reading or mutating any state; token accrual is correct only because no
//! decision path bypasses it.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use ratedes::{Context, Tick, Time};
use tracing::debug;

use crate::actor::{Fabric, NodeEvent};
use crate::config::DistParams;
use crate::message::{DistRequest, DistResponse, Message, NodeId, Payload};
use crate::sender::SenderCore;

/// Top bit distinguishing steal-request ids from transaction ids.
const REQ_ID_FLAG: u64 = 0x1000_0000_0000_0000;

/// Floor for the wake-up rate divisor. A sender whose rate was fully
/// stolen still schedules a (late) wake-up instead of dividing by zero.
/// Tunable, not a contract.
const WAIT_RATE_FLOOR: f64 = 0.001;

/// Ceiling for `rate + rate_asked` when deciding whether more rate is
/// worth asking for.
const STEAL_RATE_CEILING: f64 = 0.9999;

/// Slack on the `rate + rate_asked <= 1` reservation invariant.
const RATE_SLACK: f64 = 1.000_01;

pub struct DistSender {
    pub sender: SenderCore,
    steal_tokens: bool,
    steal_rate: bool,
    params: DistParams,
    dist_min: NodeId,
    dist_max: NodeId,
    /// Per-batch steal request sequence number.
    dist_req_id: u64,
    /// Owned share of the aggregate rate, in [0, 1].
    rate: f64,
    /// Token bucket, float-valued; observable count is the floor.
    tokens: f64,
    last_tick: Tick,
    /// Sum of rate asks not yet answered.
    rate_asked: f64,
    send_queue: VecDeque<Message>,
    /// Sum of queued message sizes.
    queue_size: u64,
    requests_outstanding: u32,
    /// Whether a wake-up event is pending. At most one ever is.
    waiting: bool,
}

impl DistSender {
    pub fn new(
        sender: SenderCore,
        rate_limit: f64,
        steal_tokens: bool,
        steal_rate: bool,
        params: DistParams,
        dist_min: NodeId,
        dist_max: NodeId,
    ) -> Self {
        let peers = dist_max - dist_min + 1;
        let rate = rate_limit / peers as f64;
        assert!(rate > 0.0 && rate <= 1.0, "per-sender rate share {rate}");
        assert!(params.max_requests_outstanding <= peers - 1);
        Self {
            sender,
            steal_tokens,
            steal_rate,
            params,
            dist_min,
            dist_max,
            dist_req_id: 0,
            rate,
            tokens: params.max_tokens as f64,
            last_tick: 0,
            rate_asked: 0.0,
            send_queue: VecDeque::new(),
            queue_size: 0,
            requests_outstanding: 0,
            waiting: false,
        }
    }

    /// Effective rate for pacing decisions, capped at link bandwidth.
    fn rate(&self) -> f64 {
        self.rate.min(1.0)
    }

    /// Currently owned rate share (for inspection).
    pub fn owned_rate(&self) -> f64 {
        self.rate
    }

    /// Current bucket level (for inspection; does not accrue).
    pub fn bucket(&self) -> f64 {
        self.tokens
    }

    pub fn queue_size(&self) -> u64 {
        self.queue_size
    }

    /// Accrue tokens up to now and return the observable (floored) count.
    /// Every state-reading decision enters through here.
    fn get_tokens(&mut self, now: Time) -> u64 {
        let tick = now.tick();
        if tick > self.last_tick {
            self.tokens += (tick - self.last_tick) as f64 * self.rate;
            self.tokens = self.tokens.min(self.params.max_tokens as f64);
            self.last_tick = tick;
        }
        self.tokens as u64
    }

    fn add_tokens(&mut self, tokens: u32) {
        self.tokens = (self.tokens + tokens as f64).min(self.params.max_tokens as f64);
    }

    fn remove_tokens(&mut self, tokens: u32) {
        self.tokens -= tokens as f64;
        assert!(self.tokens >= 0.0, "token bucket went negative");
    }

    /// Give away `factor` of the owned rate, at most `max`. Returns the
    /// amount removed.
    fn remove_rate(&mut self, factor: f64, max: f64) -> f64 {
        debug_assert!((0.0..=1.0).contains(&factor));
        let take = (factor * self.rate).min(max);
        self.rate -= take;
        assert!(self.rate >= 0.0, "rate share went negative");
        take
    }

    fn add_rate(&mut self, rate: f64) {
        assert!(rate >= 0.0);
        self.rate += rate;
    }

    pub fn handle_generate(&mut self, fabric: &Fabric, ctx: &mut Context<'_, NodeEvent>) {
        let msg = self.sender.generate(ctx);
        self.send_message(fabric, ctx, msg);
    }

    fn send_message(&mut self, fabric: &Fabric, ctx: &mut Context<'_, NodeEvent>, msg: Message) {
        self.queue_size += msg.size as u64;
        self.send_queue.push_back(msg);
        self.process_queue(fabric, ctx);
    }

    pub fn recv(&mut self, fabric: &Fabric, ctx: &mut Context<'_, NodeEvent>, msg: Message) {
        match msg.payload {
            Payload::DistRequest(_) => self.recv_request(ctx, msg),
            Payload::DistResponse(_) => self.recv_response(fabric, ctx, msg),
            _ => panic!("dist sender received an unexpected message: {msg}"),
        }
    }

    /// A peer asks for tokens and/or rate. Grant only the excess above the
    /// give thresholds, and nothing at all while starving ourselves.
    fn recv_request(&mut self, ctx: &mut Context<'_, NodeEvent>, mut msg: Message) {
        debug_assert_eq!(msg.size, 1);
        let Payload::DistRequest(req) = std::mem::replace(&mut msg.payload, Payload::Plain)
        else {
            unreachable!()
        };
        assert!(req.tokens > 0 || req.rate > 0.0, "empty steal request");

        let mut tokens = self.get_tokens(ctx.now());
        debug!(
            node = self.sender.core.id,
            req_id = req.req_id,
            from = msg.src,
            ask_tokens = req.tokens,
            ask_rate = req.rate,
            "steal request"
        );

        // Never give while starving: a sender with its own steals in
        // flight, or asleep waiting for tokens, pleads poverty.
        if self.requests_outstanding > 0 || self.waiting {
            tokens = 0;
        }

        // Tokens: give the excess above the hold-back threshold.
        let keep = (self.params.give_token_threshold * self.params.max_tokens as f64) as u64;
        let excess = tokens.saturating_sub(keep);
        let granted = excess.min(req.tokens as u64) as u32;
        self.remove_tokens(granted);

        // Rate: give a capped fraction of our own share, only while the
        // bucket is comfortable.
        let rate_trigger = self.params.give_rate_threshold * self.params.max_tokens as f64;
        let given_rate = if req.rate > 0.0 && tokens as f64 >= rate_trigger {
            self.remove_rate(self.params.max_rate_give_factor, req.rate)
        } else {
            0.0
        };

        // Turn the request around: same message, reversed direction.
        let response = DistResponse {
            req_id: req.req_id,
            tokens: granted,
            rate_req: req.rate,
            given_rate,
        };
        std::mem::swap(&mut msg.src, &mut msg.dst);
        msg.payload = Payload::DistResponse(response);
        self.sender.core.send(ctx, msg);
    }

    /// A peer answered one of our steal requests.
    fn recv_response(&mut self, fabric: &Fabric, ctx: &mut Context<'_, NodeEvent>, msg: Message) {
        // Refresh before mutating (contract of every receive entry).
        self.get_tokens(ctx.now());

        debug_assert_eq!(msg.size, 1);
        let Payload::DistResponse(res) = msg.payload else {
            unreachable!()
        };
        debug!(
            node = self.sender.core.id,
            req_id = res.req_id,
            from = msg.src,
            tokens = res.tokens,
            rate = res.given_rate,
            "steal response"
        );

        self.add_tokens(res.tokens);
        self.add_rate(res.given_rate);
        // Release the reservation made when the request went out.
        self.rate_asked -= res.rate_req;

        assert!(self.requests_outstanding > 0, "response without a request");
        self.requests_outstanding -= 1;
        self.process_queue(fabric, ctx);
    }

    pub fn handle_wake(&mut self, fabric: &Fabric, ctx: &mut Context<'_, NodeEvent>) {
        assert!(self.waiting, "spurious wake-up");
        self.waiting = false;
        self.process_queue(fabric, ctx);
    }

    /// Send every queued message the bucket covers; otherwise sleep until
    /// enough tokens will have accrued.
    fn process_queue(&mut self, fabric: &Fabric, ctx: &mut Context<'_, NodeEvent>) {
        self.process_steal(fabric, ctx);

        loop {
            let Some(size) = self.send_queue.front().map(|m| m.size) else {
                break;
            };
            let tokens = self.get_tokens(ctx.now());

            if tokens >= size as u64 {
                let msg = self.send_queue.pop_front().expect("peeked");
                self.queue_size -= size as u64;
                self.sender.core.send(ctx, msg);
                self.remove_tokens(size);
                // Sending may have pushed us below the steal threshold.
                self.process_steal(fabric, ctx);
            } else if !self.waiting {
                let needed = size as u64 - tokens;
                let wait = (needed as f64 / self.rate().max(WAIT_RATE_FLOOR)) as Tick;
                debug_assert!(wait >= 1, "wake-up must be strictly after now");
                debug!(node = self.sender.core.id, wait, "waiting for tokens");
                self.waiting = true;
                ctx.schedule_self(ctx.now() + wait, NodeEvent::Wake);
                break;
            } else {
                break;
            }
        }
    }

    /// Issue steal requests to random peers when the bucket is low and
    /// request slots are free.
    fn process_steal(&mut self, _fabric: &Fabric, ctx: &mut Context<'_, NodeEvent>) {
        let tokens = self.get_tokens(ctx.now());
        let max_tokens = self.params.max_tokens;

        let low_water = (tokens as f64) < self.params.steal_threshold * max_tokens as f64;
        let can_steal_tokens = self.steal_tokens && tokens < max_tokens;
        let can_steal_rate =
            self.steal_rate && (self.rate() + self.rate_asked) < STEAL_RATE_CEILING;
        let slots_avail = self.requests_outstanding < self.params.max_requests_outstanding;

        if !((can_steal_tokens || can_steal_rate) && slots_avail && low_water) {
            return;
        }

        let id = self.sender.core.id;

        // Random peers, drawn without replacement within the batch.
        let mut peers: Vec<NodeId> = (self.dist_min..=self.dist_max)
            .filter(|&p| p != id)
            .collect();
        peers.shuffle(self.sender.core.rng());

        self.dist_req_id += 1;
        let num_reqs = self.params.max_requests_outstanding - self.requests_outstanding;
        for _ in 0..num_reqs {
            // Ask for a slice of the bucket headroom...
            let ask_tokens = if self.steal_tokens {
                ((max_tokens - tokens) as f64 * self.params.token_ask_factor) as u32
            } else {
                0
            };
            // ...and split the remaining unreserved rate across this
            // batch, in case every responder says yes.
            let ask_rate = if self.steal_rate {
                ((1.0 - self.rate() - self.rate_asked) * self.params.rate_ask_factor)
                    / num_reqs as f64
            } else {
                0.0
            };

            let req = DistRequest {
                req_id: REQ_ID_FLAG | ((id as u64) << 32) | self.dist_req_id,
                tokens: ask_tokens,
                rate: ask_rate,
            };
            self.rate_asked += req.rate;
            assert!(
                self.rate() + self.rate_asked < RATE_SLACK,
                "rate reservation exceeds the link"
            );
            assert!(req.tokens > 0 || req.rate > 0.0, "empty steal request");

            let peer = peers.pop().expect("no peer left to steal from");
            debug_assert_ne!(peer, id, "self-steal");

            debug!(
                node = id,
                peer,
                req_id = req.req_id,
                tokens = req.tokens,
                rate = req.rate,
                "sending steal request"
            );
            let msg = Message::new(id, peer, 1, 0, Payload::DistRequest(req));
            self.sender.core.send(ctx, msg);
            self.requests_outstanding += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DistParams {
        DistParams {
            max_tokens: 1000,
            steal_threshold: 0.5,
            token_ask_factor: 0.5,
            rate_ask_factor: 0.5,
            max_requests_outstanding: 2,
            give_token_threshold: 0.25,
            give_rate_threshold: 0.5,
            max_rate_give_factor: 0.5,
        }
    }

    fn sender(id: u32, dist_min: u32, dist_max: u32) -> DistSender {
        let core = SenderCore::new(id, 42, 10, 10, 0, 0);
        // Aggregate limit 0.5 over 4 senders: home share 0.125.
        DistSender::new(core, 0.5, true, true, params(), dist_min, dist_max)
    }

    #[test]
    fn test_home_share() {
        let d = sender(2, 2, 5);
        assert!((d.owned_rate() - 0.125).abs() < 1e-12);
        assert_eq!(d.bucket(), 1000.0);
    }

    #[test]
    fn test_token_accrual_and_clamp() {
        let mut d = sender(2, 2, 5);
        assert_eq!(d.get_tokens(Time::new(0)), 1000);

        d.remove_tokens(1000);
        assert_eq!(d.get_tokens(Time::new(0)), 0);

        // 80 ticks at 0.125 tokens per tick.
        assert_eq!(d.get_tokens(Time::new(80)), 10);

        // Accrual clamps at the bucket size.
        assert_eq!(d.get_tokens(Time::new(1_000_000)), 1000);

        // Time moving backwards never happens; the same tick is a no-op.
        assert_eq!(d.get_tokens(Time::new(1_000_000)), 1000);
    }

    #[test]
    fn test_gifted_tokens_clamp() {
        let mut d = sender(2, 2, 5);
        d.add_tokens(500);
        assert_eq!(d.bucket(), 1000.0);
        d.remove_tokens(300);
        d.add_tokens(500);
        assert_eq!(d.bucket(), 1000.0);
    }

    #[test]
    fn test_remove_rate_caps_at_ask() {
        let mut d = sender(2, 2, 5);
        // Half of 0.125 is more than the 0.01 asked: give only the ask.
        let given = d.remove_rate(0.5, 0.01);
        assert!((given - 0.01).abs() < 1e-12);
        assert!((d.owned_rate() - 0.115).abs() < 1e-12);

        // Large ask: capped by the give factor.
        let given = d.remove_rate(0.5, 1.0);
        assert!((given - 0.0575).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "negative")]
    fn test_overspend_is_fatal() {
        let mut d = sender(2, 2, 5);
        d.remove_tokens(1001);
    }
}
