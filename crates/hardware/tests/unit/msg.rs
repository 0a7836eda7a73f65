//! Message Codec Unit Tests.

use proptest::prelude::*;

use tilesim_core::coherence::{MsgType, Replies, ShmemMsg};
use tilesim_core::common::constants::WIRE_HEADER_BYTES;
use tilesim_core::common::{MemComponent, ProtocolError, TileId};

fn inv() -> ShmemMsg {
    ShmemMsg::new(
        MsgType::InvReq,
        MemComponent::DramDirectory,
        MemComponent::L2Cache,
        TileId(2),
        0x8000,
        true,
    )
    .with_receivers(None, Replies::Everyone)
}

#[test]
fn broadcast_fields_survive_the_wire() {
    let decoded = ShmemMsg::decode(&inv().encode()).unwrap();
    assert_eq!(decoded.single_receiver, None);
    assert!(decoded.reply_expected());
    assert!(decoded.data().is_none());
    assert_eq!(decoded, inv());
}

#[test]
fn combined_invalidation_names_its_flushing_receiver() {
    let msg = ShmemMsg::new(
        MsgType::InvFlushCombinedReq,
        MemComponent::DramDirectory,
        MemComponent::L2Cache,
        TileId(1),
        0x8000,
        true,
    )
    .with_receivers(Some(TileId(3)), Replies::Nobody);
    let decoded = ShmemMsg::decode(&msg.encode()).unwrap();
    assert_eq!(decoded.kind.name(), "INV_FLUSH_COMBINED_REQ");
    assert_eq!(decoded.single_receiver, Some(TileId(3)));
    assert_eq!(decoded.replies, Replies::Nobody);
    assert!(!decoded.reply_expected());
}

#[test]
fn unknown_reply_policy_is_malformed() {
    let mut bytes = inv().encode();
    bytes[19] = 7;
    assert!(matches!(
        ShmemMsg::decode(&bytes),
        Err(ProtocolError::MalformedPacket(_))
    ));
}

#[test]
fn short_header_is_malformed() {
    let bytes = inv().encode();
    let err = ShmemMsg::decode(&bytes[..WIRE_HEADER_BYTES - 1]).unwrap_err();
    assert!(matches!(err, ProtocolError::MalformedPacket(_)));
}

#[test]
fn unknown_component_is_rejected() {
    let mut bytes = inv().encode();
    bytes[2] = 0xEE;
    assert_eq!(
        ShmemMsg::decode(&bytes).unwrap_err(),
        ProtocolError::UnknownComponent(0xEE)
    );
}

#[test]
fn data_replies_are_longer_on_the_wire_model() {
    let request = inv();
    let reply = ShmemMsg::new(
        MsgType::ShRep,
        MemComponent::DramDirectory,
        MemComponent::L2Cache,
        TileId(2),
        0x8000,
        true,
    )
    .with_payload(&[0; 64]);
    assert_eq!(
        reply.modeled_length_bits() - request.modeled_length_bits(),
        64 * 8
    );
}

proptest! {
    /// Arbitrary bytes decode to a message or an error, never a panic.
    #[test]
    fn decode_is_total(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = ShmemMsg::decode(&bytes);
    }
}
