//! Property tests promised by SPEC_FULL.md's test-tooling section: codec
//! round-trip (spec.md §8 invariant 6) and version-vector merge
//! associativity/commutativity (invariant 2).

use proptest::prelude::*;
use std::collections::HashMap;
use swim_gossip::codec::{BincodeCodec, Codec, JsonCodec, Message};
use swim_gossip::state::VersionVector;
use swim_gossip::types::Address;

fn arb_address() -> impl Strategy<Value = Address> {
    ("[a-z]{1,8}", 1u16..65535u16).prop_map(|(host, port)| Address::new(host, port))
}

fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        (arb_address(), any::<f64>()).prop_map(|(sender, timestamp)| Message::Join { sender, timestamp }),
        (arb_address(), arb_address(), any::<f64>())
            .prop_map(|(sender, target, timestamp)| Message::Ping { sender, target, timestamp }),
        (arb_address(), arb_address(), any::<f64>())
            .prop_map(|(sender, target, timestamp)| Message::Ack { sender, target, timestamp }),
        (arb_address(), arb_address(), any::<u64>(), any::<f64>()).prop_map(
            |(sender, target, incarnation, timestamp)| Message::Suspect { sender, target, incarnation, timestamp }
        ),
        (arb_address(), arb_address(), any::<u64>(), any::<f64>()).prop_map(
            |(sender, target, incarnation, timestamp)| Message::Alive { sender, target, incarnation, timestamp }
        ),
        (arb_address(), arb_address(), any::<u64>(), any::<f64>()).prop_map(
            |(sender, target, incarnation, timestamp)| Message::Dead { sender, target, incarnation, timestamp }
        ),
    ]
}

fn arb_vv() -> impl Strategy<Value = VersionVector> {
    prop::collection::hash_map("[a-z]{1,6}", 0u64..1000u64, 0..6)
        .prop_map(|m: HashMap<String, u64>| {
            let mut vv = VersionVector::default();
            for (k, v) in m {
                for _ in 0..v {
                    vv.increment(&k);
                }
            }
            vv
        })
}

proptest! {
    /// Any message, encoded then decoded through the same codec, is
    /// unchanged (spec.md §8 invariant 6).
    #[test]
    fn bincode_roundtrip_preserves_message(msg in arb_message()) {
        let codec = BincodeCodec;
        let bytes = codec.encode(&msg).expect("encode");
        let decoded = codec.decode(&bytes).expect("decode");
        prop_assert_eq!(format!("{:?}", msg), format!("{:?}", decoded));
    }

    #[test]
    fn json_roundtrip_preserves_message(msg in arb_message()) {
        let codec = JsonCodec;
        let bytes = codec.encode(&msg).expect("encode");
        let decoded = codec.decode(&bytes).expect("decode");
        prop_assert_eq!(format!("{:?}", msg), format!("{:?}", decoded));
    }

    /// merge_max is commutative: order of merging two vectors doesn't
    /// matter (spec.md §3 invariant 2).
    #[test]
    fn merge_max_is_commutative(a in arb_vv(), b in arb_vv()) {
        let mut ab = a.clone();
        ab.merge_max(&b);
        let mut ba = b.clone();
        ba.merge_max(&a);
        prop_assert_eq!(ab, ba);
    }

    /// merge_max is idempotent: merging a vector with itself is a no-op.
    #[test]
    fn merge_max_is_idempotent(a in arb_vv()) {
        let mut merged = a.clone();
        merged.merge_max(&a);
        prop_assert_eq!(merged, a);
    }

    /// merge_max is associative.
    #[test]
    fn merge_max_is_associative(a in arb_vv(), b in arb_vv(), c in arb_vv()) {
        let mut left = a.clone();
        left.merge_max(&b);
        left.merge_max(&c);

        let mut bc = b.clone();
        bc.merge_max(&c);
        let mut right = a.clone();
        right.merge_max(&bc);

        prop_assert_eq!(left, right);
    }
}
