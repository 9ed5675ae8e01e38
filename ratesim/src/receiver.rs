//! Terminal nodes. A receiver records arrival, updates its counters, and
//! frees the message; it never originates traffic.

use hashbrown::HashMap;
use ratedes::Time;
use tracing::trace;

use crate::message::{Message, MessageKind, NodeId};
use crate::node::NodeCore;

pub struct Receiver {
    pub core: NodeCore,
    messages: u64,
    bytes: u64,
    bytes_by_src: HashMap<NodeId, u64>,
    first_recvd: Option<Time>,
    /// Per-source link discipline checks. Disabled under the relay
    /// algorithm, where one source's messages reach us via different
    /// relays and may legitimately interleave.
    check_fifo: bool,
    last_by_src: HashMap<NodeId, Time>,
}

impl Receiver {
    pub fn new(id: NodeId, seed: u64, check_fifo: bool) -> Self {
        Self {
            core: NodeCore::new(id, seed),
            messages: 0,
            bytes: 0,
            bytes_by_src: HashMap::new(),
            first_recvd: None,
            check_fifo,
            last_by_src: HashMap::new(),
        }
    }

    pub fn recv(&mut self, msg: Message, now: Time) {
        assert_eq!(
            msg.kind(),
            MessageKind::Plain,
            "receiver got a control message: {msg}"
        );
        trace!(node = self.core.id, %msg, "delivered");

        self.messages += 1;
        self.bytes += msg.size as u64;
        *self.bytes_by_src.entry(msg.src).or_insert(0) += msg.size as u64;
        self.first_recvd.get_or_insert(now);

        if self.check_fifo {
            // FIFO link discipline: receive times from one source are
            // strictly increasing, separated by at least the arriving
            // message's serialization time.
            if let Some(&prev) = self.last_by_src.get(&msg.src) {
                debug_assert!(now > prev, "out-of-order delivery from {}", msg.src);
                debug_assert!(
                    now.tick() - prev.tick() >= msg.size as u64,
                    "deliveries from {} closer than the link allows",
                    msg.src
                );
            }
            self.last_by_src.insert(msg.src, now);
        }
        // Dropping the message frees its payload.
    }

    pub fn messages(&self) -> u64 {
        self.messages
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn bytes_from(&self, src: NodeId) -> u64 {
        self.bytes_by_src.get(&src).copied().unwrap_or(0)
    }

    pub fn first_recvd(&self) -> Option<Time> {
        self.first_recvd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut r = Receiver::new(0, 1, true);
        r.recv(Message::plain(5, 0, 100, 1), Time::new(110));
        r.recv(Message::plain(5, 0, 100, 2), Time::new(210));
        r.recv(Message::plain(6, 0, 50, 1), Time::new(215));

        assert_eq!(r.messages(), 3);
        assert_eq!(r.bytes(), 250);
        assert_eq!(r.bytes_from(5), 200);
        assert_eq!(r.bytes_from(6), 50);
        assert_eq!(r.bytes_from(7), 0);
        assert_eq!(r.first_recvd(), Some(Time::new(110)));
    }

    #[test]
    #[should_panic(expected = "control message")]
    fn test_control_message_is_fatal() {
        use crate::message::{Payload, RelayResponse};
        let mut r = Receiver::new(0, 1, true);
        r.recv(
            Message::new(1, 0, 1, 0, Payload::RelayResponse(RelayResponse { req_id: 0 })),
            Time::new(10),
        );
    }
}
