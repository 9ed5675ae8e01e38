//! Orchestrator: builds the actor arena from a validated configuration and
//! seeds the initial events.
//!
//! Id layout is dense and role-ordered: receivers occupy `[0, receivers)`,
//! relays the next range, senders the remainder. The sender control is an
//! actor too, placed after every network node but never registered with
//! the network (it cannot be a message destination).

use ratedes::{ActorId, SimSummary, Simulator, Time};
use tracing::info;

use crate::actor::{Fabric, NodeEvent, SimNode};
use crate::basic::BasicSender;
use crate::config::{Algorithm, Config, Mode, Plan};
use crate::control::SenderControl;
use crate::dist::DistSender;
use crate::message::NodeId;
use crate::monitor::MonitorGroup;
use crate::network::Network;
use crate::receiver::Receiver;
use crate::relay::{Relay, RelaySender};
use crate::sender::SenderCore;

pub struct Scenario {
    config: Config,
    plan: Plan,
}

impl Scenario {
    /// Validate a configuration into a buildable scenario.
    pub fn from_config(config: &Config) -> Result<Self, crate::config::ConfigError> {
        let plan = config.validate()?;
        Ok(Self {
            config: config.clone(),
            plan,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn receiver_ids(&self) -> std::ops::Range<NodeId> {
        0..self.config.receivers
    }

    pub fn relay_ids(&self) -> std::ops::Range<NodeId> {
        self.config.receivers..self.config.receivers + self.config.relays
    }

    pub fn sender_ids(&self) -> std::ops::Range<NodeId> {
        let base = self.config.receivers + self.config.relays;
        base..base + self.config.senders
    }

    fn control_id(&self) -> ActorId {
        self.config.receivers + self.config.relays + self.config.senders
    }

    /// Per-node PRNG seed, derived from the master seed.
    fn node_seed(&self, id: NodeId) -> u64 {
        self.config.seed.wrapping_add(id as u64 * 1000)
    }

    /// Construct the simulator: network, actors, monitors, and the
    /// retargeting schedule.
    pub fn build(&self) -> Simulator<SimNode> {
        let cfg = &self.config;
        let node_count = cfg.receivers + cfg.relays + cfg.senders;

        let mut network = Network::new(cfg.network_delay);
        for id in 0..node_count {
            network.register(id);
        }
        let monitor = MonitorGroup::new(cfg.monitor_period, node_count);
        let fabric = Fabric { network, monitor };

        let mut sim = Simulator::new(fabric, cfg.threads as usize);

        let check_fifo = cfg.algorithm != Algorithm::Relay;
        for id in self.receiver_ids() {
            let actor = sim.add_actor(SimNode::Receiver(Receiver::new(
                id,
                self.node_seed(id),
                check_fifo,
            )));
            debug_assert_eq!(actor, id);
        }

        let relay_rate = if cfg.relays > 0 {
            cfg.rate_limit / cfg.relays as f64
        } else {
            0.0
        };
        for id in self.relay_ids() {
            let actor =
                sim.add_actor(SimNode::Relay(Relay::new(id, self.node_seed(id), relay_rate)));
            debug_assert_eq!(actor, id);
        }

        let senders = self.sender_ids();
        for id in senders.clone() {
            let sender = SenderCore::new(
                id,
                self.node_seed(id),
                cfg.min_message_size,
                cfg.max_message_size,
                0,
                cfg.receivers - 1,
            );
            let node = match &self.plan.mode {
                Mode::Basic => SimNode::Basic(BasicSender::new(sender)),
                Mode::Relay { max_outstanding } => SimNode::RelaySender(RelaySender::new(
                    sender,
                    self.relay_ids().start,
                    self.relay_ids().end - 1,
                    *max_outstanding,
                )),
                Mode::Dist {
                    steal_tokens,
                    steal_rate,
                    params,
                } => SimNode::Dist(DistSender::new(
                    sender,
                    cfg.rate_limit,
                    *steal_tokens,
                    *steal_rate,
                    *params,
                    senders.start,
                    senders.end - 1,
                )),
            };
            let actor = sim.add_actor(node);
            debug_assert_eq!(actor, id);
        }

        let control = sim.add_actor(SimNode::Control(SenderControl::new(
            self.plan.schedule.clone(),
            senders.start,
        )));
        debug_assert_eq!(control, self.control_id());

        // First monitor round for every network node.
        let first_monitor = sim
            .shared()
            .monitor
            .next(Time::ZERO)
            .expect("monitor group starts enabled");
        for id in 0..node_count {
            sim.schedule(id, first_monitor, NodeEvent::Monitor);
        }

        // One event per schedule entry.
        for (index, entry) in self.plan.schedule.iter().enumerate() {
            sim.schedule(control, Time::new(entry.tick), NodeEvent::Control(index));
        }

        info!(
            receivers = cfg.receivers,
            relays = cfg.relays,
            senders = cfg.senders,
            algorithm = ?cfg.algorithm,
            rate_limit = cfg.rate_limit,
            threads = cfg.threads,
            "scenario built"
        );
        sim
    }

    /// Build and run to completion.
    pub fn run(&self) -> (Simulator<SimNode>, SimSummary) {
        let mut sim = self.build();
        let summary = sim.simulate();
        (sim, summary)
    }
}
