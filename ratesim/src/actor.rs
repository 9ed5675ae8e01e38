//! The closed set of simulated actors and the events they exchange.
//!
//! Dispatch is a tagged enum rather than trait objects: the actor set is
//! closed, and the single match below is the only place an event meets a
//! node kind it was not meant for (which is fatal).

use ratedes::{Actor, Context};

use crate::basic::BasicSender;
use crate::control::SenderControl;
use crate::dist::DistSender;
use crate::message::Message;
use crate::monitor::MonitorGroup;
use crate::network::Network;
use crate::node::NodeCore;
use crate::receiver::Receiver;
use crate::relay::{Relay, RelaySender};

/// State every handler can read: the node registry plus the monitor group.
pub struct Fabric {
    pub network: Network,
    pub monitor: MonitorGroup,
}

/// Events delivered to actors. Every timer is one of these, dispatched
/// through the single receive entry below.
#[derive(Debug)]
pub enum NodeEvent {
    /// A message finished arriving.
    Recv(Message),
    /// A deferred send reaches its egress queue.
    Enqueue(Message),
    /// Pop the head of the egress queue onto the wire.
    Drain,
    /// Generate the next message (senders).
    Generate,
    /// Apply a retargeted injection rate (senders).
    RateChange(f64),
    /// Token wait expired (dist senders).
    Wake,
    /// Report and reschedule the receive-rate monitor.
    Monitor,
    /// Apply schedule entry `n` (the sender control).
    Control(usize),
}

pub enum SimNode {
    Receiver(Receiver),
    Basic(BasicSender),
    RelaySender(RelaySender),
    Relay(Relay),
    Dist(DistSender),
    Control(SenderControl),
}

impl SimNode {
    fn core_mut(&mut self) -> Option<&mut NodeCore> {
        match self {
            SimNode::Receiver(r) => Some(&mut r.core),
            SimNode::Basic(b) => Some(&mut b.sender.core),
            SimNode::RelaySender(s) => Some(&mut s.sender.core),
            SimNode::Relay(r) => Some(&mut r.core),
            SimNode::Dist(d) => Some(&mut d.sender.core),
            SimNode::Control(_) => None,
        }
    }
}

impl Actor for SimNode {
    type Event = NodeEvent;
    type Shared = Fabric;

    fn handle(&mut self, fabric: &Fabric, ctx: &mut Context<'_, NodeEvent>, event: NodeEvent) {
        match event {
            NodeEvent::Recv(mut msg) => {
                let now = ctx.now();
                let Some(core) = self.core_mut() else {
                    panic!("message delivered to the sender control: {msg}");
                };
                core.note_recv(&mut msg, now);
                match self {
                    SimNode::Receiver(r) => r.recv(msg, now),
                    SimNode::RelaySender(s) => s.recv(fabric, ctx, msg),
                    SimNode::Relay(r) => r.recv(fabric, ctx, msg),
                    SimNode::Dist(d) => d.recv(fabric, ctx, msg),
                    SimNode::Basic(_) => panic!("basic sender received a message: {msg}"),
                    SimNode::Control(_) => unreachable!(),
                }
            }
            NodeEvent::Enqueue(msg) => self
                .core_mut()
                .expect("enqueue event on the sender control")
                .enqueue(ctx, msg),
            NodeEvent::Drain => self
                .core_mut()
                .expect("drain event on the sender control")
                .handle_drain(fabric, ctx),
            NodeEvent::Monitor => self
                .core_mut()
                .expect("monitor event on the sender control")
                .handle_monitor(fabric, ctx),
            NodeEvent::Generate => match self {
                SimNode::Basic(b) => b.handle_generate(ctx),
                SimNode::RelaySender(s) => s.handle_generate(ctx),
                SimNode::Dist(d) => d.handle_generate(fabric, ctx),
                _ => panic!("generate event on a non-sender"),
            },
            NodeEvent::RateChange(rate) => match self {
                SimNode::Basic(b) => b.sender.handle_rate_change(ctx, rate),
                SimNode::RelaySender(s) => s.sender.handle_rate_change(ctx, rate),
                SimNode::Dist(d) => d.sender.handle_rate_change(ctx, rate),
                _ => panic!("rate change on a non-sender"),
            },
            NodeEvent::Wake => match self {
                SimNode::Dist(d) => d.handle_wake(fabric, ctx),
                _ => panic!("wake event on a non-dist node"),
            },
            NodeEvent::Control(index) => match self {
                SimNode::Control(c) => c.fire(ctx, index),
                _ => panic!("control event on a non-control node"),
            },
        }
    }
}
