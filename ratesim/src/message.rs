//! Messages flowing through the fabric.

use core::fmt;

use ratedes::Time;

/// Node identifier. Assigned densely from 0 by the orchestrator: receivers
/// first, then relays, then senders.
pub type NodeId = u32;

/// Discriminant of a message's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Plain,
    RelayRequest,
    RelayResponse,
    DistRequest,
    DistResponse,
}

/// Relay request header: where the relay should forward the message.
#[derive(Debug)]
pub struct RelayRequest {
    pub req_id: u64,
    pub msg_dst: NodeId,
}

/// Relay acknowledgement, returning one credit to the sender.
#[derive(Debug)]
pub struct RelayResponse {
    pub req_id: u64,
}

/// Steal request between peer senders: tokens, long-run rate share, or both.
#[derive(Debug)]
pub struct DistRequest {
    /// Top bit set to distinguish from transaction ids; encodes the origin
    /// id and a per-batch sequence number.
    pub req_id: u64,
    /// Tokens asked for (0 when token stealing is off).
    pub tokens: u32,
    /// Rate share asked for (0.0 when rate stealing is off).
    pub rate: f64,
}

/// Steal response: what was granted, plus an echo of the ask so the
/// requester can release its reservation.
#[derive(Debug)]
pub struct DistResponse {
    pub req_id: u64,
    /// Tokens granted; exactly this many were deducted from the responder.
    pub tokens: u32,
    /// Echo of the request's rate ask.
    pub rate_req: f64,
    /// Rate share granted.
    pub given_rate: f64,
}

/// Control payload carried by a message, keyed by kind.
#[derive(Debug)]
pub enum Payload {
    Plain,
    RelayRequest(RelayRequest),
    RelayResponse(RelayResponse),
    DistRequest(DistRequest),
    DistResponse(DistResponse),
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Plain => MessageKind::Plain,
            Payload::RelayRequest(_) => MessageKind::RelayRequest,
            Payload::RelayResponse(_) => MessageKind::RelayResponse,
            Payload::DistRequest(_) => MessageKind::DistRequest,
            Payload::DistResponse(_) => MessageKind::DistResponse,
        }
    }
}

/// A message in flight. Created by its originator, handed across hops
/// through the event queue, dropped by the terminal receiver.
#[derive(Debug)]
pub struct Message {
    pub src: NodeId,
    pub dst: NodeId,
    /// Simulated size in bytes; one byte occupies a link for one tick.
    pub size: u32,
    /// Transaction id, typically `(sender_id << 32) | seq`.
    pub trans: u64,
    pub payload: Payload,
    /// When the message entered its egress queue.
    pub sent: Time,
    /// When the message reached its destination.
    pub recvd: Time,
}

impl Message {
    pub fn new(src: NodeId, dst: NodeId, size: u32, trans: u64, payload: Payload) -> Self {
        debug_assert!(size >= 1);
        Self {
            src,
            dst,
            size,
            trans,
            payload,
            sent: Time::NEVER,
            recvd: Time::NEVER,
        }
    }

    pub fn plain(src: NodeId, dst: NodeId, size: u32, trans: u64) -> Self {
        Self::new(src, dst, size, trans, Payload::Plain)
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "src={} dst={} size={} trans={:#x} kind={:?}",
            self.src, self.dst, self.size, self.trans, self.kind()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_kind() {
        let m = Message::plain(1, 2, 100, 42);
        assert_eq!(m.kind(), MessageKind::Plain);

        let m = Message::new(
            1,
            2,
            1,
            0,
            Payload::DistRequest(DistRequest {
                req_id: 0x1000_0000_0000_0001,
                tokens: 10,
                rate: 0.0,
            }),
        );
        assert_eq!(m.kind(), MessageKind::DistRequest);
    }

    #[test]
    fn test_display() {
        let m = Message::plain(3, 7, 64, (3u64 << 32) | 5);
        let s = m.to_string();
        assert!(s.contains("src=3"));
        assert!(s.contains("dst=7"));
        assert!(s.contains("kind=Plain"));
    }
}
