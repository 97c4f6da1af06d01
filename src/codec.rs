//! Message & Codec (spec.md §4.1).
//!
//! Wire format: `bincode` over a `serde`-derived `Message` enum, the way the
//! teacher's `membership_manager.rs` already reached for
//! `bincode::serialize` on its heartbeat payloads. `decode` never panics or
//! returns an `Err` for a malformed datagram — per spec.md §4.1 it yields
//! `None`, which callers treat as a protocol-level drop (spec.md §7).

use crate::state::StateUpdate;
use crate::types::Address;
use serde::{Deserialize, Serialize};

/// A tagged SWIM/gossip wire message (spec.md §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Join { sender: Address, timestamp: f64 },
    Ack { sender: Address, target: Address, timestamp: f64 },
    Ping { sender: Address, target: Address, timestamp: f64 },
    PingReq { sender: Address, target: Address, helper: Address, timestamp: f64 },
    PingAck { sender: Address, target: Address, helper: Address, timestamp: f64 },
    Suspect { sender: Address, target: Address, incarnation: u64, timestamp: f64 },
    Alive { sender: Address, target: Address, incarnation: u64, timestamp: f64 },
    Dead { sender: Address, target: Address, incarnation: u64, timestamp: f64 },
    Members { sender: Address, members: Vec<Address>, timestamp: f64 },
    StateSync { sender: Address, snapshot: crate::state::Snapshot, timestamp: f64 },
    StateUpdateMsg { sender: Address, updates: Vec<StateUpdate>, timestamp: f64 },
}

impl Message {
    pub fn sender(&self) -> &Address {
        match self {
            Message::Join { sender, .. }
            | Message::Ack { sender, .. }
            | Message::Ping { sender, .. }
            | Message::PingReq { sender, .. }
            | Message::PingAck { sender, .. }
            | Message::Suspect { sender, .. }
            | Message::Alive { sender, .. }
            | Message::Dead { sender, .. }
            | Message::Members { sender, .. }
            | Message::StateSync { sender, .. }
            | Message::StateUpdateMsg { sender, .. } => sender,
        }
    }
}

/// A codec for the wire format. Bincode is the default (`BincodeCodec`); a
/// JSON alternative is provided for interoperability with tooling that
/// prefers a self-describing text format (spec.md §6: "a JSON codec is an
/// acceptable alternative provided encode/decode symmetry is preserved").
pub trait Codec: Send + Sync {
    fn encode(&self, message: &Message) -> Option<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Option<Message>;
}

/// Default codec: deterministic binary encoding via `bincode`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode(&self, message: &Message) -> Option<Vec<u8>> {
        bincode::serialize(message).ok()
    }

    fn decode(&self, bytes: &[u8]) -> Option<Message> {
        bincode::deserialize(bytes).ok()
    }
}

/// JSON alternative codec (spec.md §6).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, message: &Message) -> Option<Vec<u8>> {
        serde_json::to_vec(message).ok()
    }

    fn decode(&self, bytes: &[u8]) -> Option<Message> {
        serde_json::from_slice(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::VersionVector;

    fn sample_messages() -> Vec<Message> {
        let addr = |s: &str| Address::from(s);
        vec![
            Message::Join { sender: addr("127.0.0.1:7000"), timestamp: 1.0 },
            Message::Ack { sender: addr("a"), target: addr("b"), timestamp: 2.0 },
            Message::Ping { sender: addr("a"), target: addr("b"), timestamp: 3.0 },
            Message::PingReq { sender: addr("a"), target: addr("b"), helper: addr("c"), timestamp: 4.0 },
            Message::Suspect { sender: addr("a"), target: addr("b"), incarnation: 7, timestamp: 5.0 },
            Message::Members { sender: addr("a"), members: vec![addr("b"), addr("c")], timestamp: 6.0 },
            Message::StateUpdateMsg {
                sender: addr("a"),
                updates: vec![StateUpdate {
                    namespace: "default".into(),
                    key: "k".into(),
                    value: None,
                    op: crate::state::StateOp::Delete,
                    vv: VersionVector::new(),
                }],
                timestamp: 7.0,
            },
        ]
    }

    #[test]
    fn bincode_roundtrip_matches_debug_repr() {
        let codec = BincodeCodec;
        for msg in sample_messages() {
            let bytes = codec.encode(&msg).expect("encode");
            let decoded = codec.decode(&bytes).expect("decode");
            assert_eq!(format!("{:?}", msg), format!("{:?}", decoded));
        }
    }

    #[test]
    fn json_roundtrip_matches_debug_repr() {
        let codec = JsonCodec;
        for msg in sample_messages() {
            let bytes = codec.encode(&msg).expect("encode");
            let decoded = codec.decode(&bytes).expect("decode");
            assert_eq!(format!("{:?}", msg), format!("{:?}", decoded));
        }
    }

    #[test]
    fn decode_of_garbage_bytes_is_none() {
        let codec = BincodeCodec;
        assert!(codec.decode(&[0xff, 0x00, 0x01, 0x02]).is_none());
    }

    #[test]
    fn two_encoders_agree_byte_for_byte() {
        let codec = BincodeCodec;
        let msg = Message::Ping { sender: Address::from("a"), target: Address::from("b"), timestamp: 1.0 };
        assert_eq!(codec.encode(&msg), codec.encode(&msg));
    }
}
