//! Directory Controller Unit Tests.
//!
//! Drives a single directory slice message by message through a recording transport and
//! checks the replies it sends, the entry states it leaves behind and its counters.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::harness::{ConfigBuilder, init_tracing};
use crate::common::mocks::transport::RecordingTransport;
use tilesim_core::Config;
use tilesim_core::coherence::directory::DirectoryState;
use tilesim_core::coherence::{DramDirectoryCntlr, MsgType, Replies, ShmemMsg, protocol};
use tilesim_core::common::{MemComponent, ProtocolError, TileId};
use tilesim_core::config::{CachingProtocol, DirectoryType};
use tilesim_core::dram::DramCntlr;
use tilesim_core::perf::{Role, ShmemPerfModel};

const LINE: usize = 64;

struct Slice {
    cntlr: DramDirectoryCntlr,
    transport: Arc<RecordingTransport>,
    perf: Arc<ShmemPerfModel>,
}

impl Slice {
    fn new(config: &Config) -> Self {
        init_tracing();
        let transport = Arc::new(RecordingTransport::new(config.general.total_tiles));
        let perf = Arc::new(ShmemPerfModel::new());
        let cntlr = DramDirectoryCntlr::new(
            TileId(0),
            config,
            DramCntlr::new(&config.dram, LINE),
            Arc::clone(&transport) as Arc<dyn tilesim_core::net::Transport>,
            Arc::clone(&perf),
            protocol::create(config.general.caching_protocol),
        );
        Self {
            cntlr,
            transport,
            perf,
        }
    }

    fn request(&mut self, kind: MsgType, from: u32, address: u64) {
        let msg = ShmemMsg::new(
            kind,
            MemComponent::L2Cache,
            MemComponent::DramDirectory,
            TileId(from),
            address,
            true,
        );
        self.cntlr.handle_request_from_l2(TileId(from), msg).unwrap();
    }

    fn reply(&mut self, msg: &ShmemMsg, from: u32) {
        self.cntlr.handle_reply_from_l2(TileId(from), msg).unwrap();
    }

    fn state(&self, address: u64) -> Option<DirectoryState> {
        self.cntlr.directory().get(address).map(|entry| entry.state())
    }
}

fn reply_msg(kind: MsgType, from: u32, address: u64) -> ShmemMsg {
    ShmemMsg::new(
        kind,
        MemComponent::L2Cache,
        MemComponent::DramDirectory,
        TileId(from),
        address,
        true,
    )
}

fn to(tile: u32, kind: MsgType) -> (Option<TileId>, MsgType) {
    (Some(TileId(tile)), kind)
}

// ══════════════════════════════════════════════════════════
// 1. Basic transactions
// ══════════════════════════════════════════════════════════

#[test]
fn cold_read_is_served_from_dram() {
    let mut slice = Slice::new(&ConfigBuilder::new(4).build());
    slice.request(MsgType::ShReq, 1, 0x1000);

    let sent = slice.transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].receiver, Some(TileId(1)));
    assert_eq!(sent[0].msg.kind, MsgType::ShRep);
    assert_eq!(sent[0].msg.requester, TileId(1));
    assert_eq!(sent[0].msg.data(), Some(&[0u8; LINE][..]));
    // Directory lookup plus DRAM access.
    assert!(sent[0].time >= 10 + 100);
    assert_eq!(slice.perf.time(Role::Sim), sent[0].time);

    assert_eq!(slice.state(0x1000), Some(DirectoryState::Shared));
    assert!(slice.cntlr.queue().is_idle());
    assert_eq!(slice.cntlr.dram().counters().reads, 1);
}

#[test]
fn second_reader_joins_sharers() {
    let mut slice = Slice::new(&ConfigBuilder::new(4).build());
    slice.request(MsgType::ShReq, 1, 0x1000);
    slice.request(MsgType::ShReq, 2, 0x1000);

    assert_eq!(
        slice.transport.take_kinds(),
        vec![to(1, MsgType::ShRep), to(2, MsgType::ShRep)]
    );
    let entry = slice.cntlr.directory().get(0x1000).unwrap();
    assert_eq!(entry.num_sharers(), 2);
    assert!(entry.has_sharer(TileId(1)) && entry.has_sharer(TileId(2)));
    entry.check_invariants().unwrap();
}

#[test]
fn sole_sharer_upgrades_without_data() {
    let mut slice = Slice::new(&ConfigBuilder::new(4).build());
    slice.request(MsgType::ShReq, 1, 0x1000);
    slice.request(MsgType::ExReq, 1, 0x1000);

    let sent = slice.transport.take();
    assert_eq!(sent[1].msg.kind, MsgType::UpgradeRep);
    assert!(sent[1].msg.data().is_none());

    let entry = slice.cntlr.directory().get(0x1000).unwrap();
    assert_eq!(entry.state(), DirectoryState::Modified);
    assert_eq!(entry.owner(), Some(TileId(1)));
    assert_eq!(slice.cntlr.counters().upgrades, 1);
    assert_eq!(slice.cntlr.dram().counters().reads, 1);
}

#[test]
fn repeated_read_from_a_sharer_is_served_once() {
    let mut slice = Slice::new(&ConfigBuilder::new(4).build());
    slice.request(MsgType::ShReq, 1, 0x1000);
    let _ = slice.transport.take();

    slice.request(MsgType::ShReq, 1, 0x1000);
    assert_eq!(slice.transport.take_kinds(), vec![to(1, MsgType::ShRep)]);
    let entry = slice.cntlr.directory().get(0x1000).unwrap();
    assert_eq!(entry.state(), DirectoryState::Shared);
    assert_eq!(entry.num_sharers(), 1);
    assert!(slice.cntlr.queue().is_idle());
}

#[test]
fn writer_invalidates_every_other_sharer() {
    let mut slice = Slice::new(&ConfigBuilder::new(4).build());
    slice.request(MsgType::ShReq, 1, 0x1000);
    slice.request(MsgType::ShReq, 2, 0x1000);
    let _ = slice.transport.take();

    slice.request(MsgType::ExReq, 3, 0x1000);
    let invs = slice.transport.take();
    assert_eq!(
        invs.iter().map(|s| (s.receiver, s.msg.kind)).collect::<Vec<_>>(),
        vec![to(1, MsgType::InvReq), to(2, MsgType::InvReq)]
    );
    assert!(invs.iter().all(|s| s.msg.requester == TileId(3)));

    slice.reply(&reply_msg(MsgType::InvRep, 1, 0x1000), 1);
    assert!(slice.transport.take().is_empty());
    assert_eq!(slice.cntlr.queue().count(0x1000), 1);

    slice.reply(&reply_msg(MsgType::InvRep, 2, 0x1000), 2);
    let sent = slice.transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!((sent[0].receiver, sent[0].msg.kind), to(3, MsgType::ExRep));
    assert_eq!(sent[0].msg.data().map(<[u8]>::len), Some(LINE));

    let entry = slice.cntlr.directory().get(0x1000).unwrap();
    assert_eq!(entry.state(), DirectoryState::Modified);
    assert_eq!(entry.owner(), Some(TileId(3)));
    assert!(slice.cntlr.queue().is_idle());
}

#[test]
fn writer_steals_dirty_line_from_owner() {
    let mut slice = Slice::new(&ConfigBuilder::new(4).build());
    slice.request(MsgType::ExReq, 1, 0x1000);
    slice.request(MsgType::ExReq, 2, 0x1000);
    assert_eq!(
        slice.transport.take_kinds(),
        vec![to(1, MsgType::ExRep), to(1, MsgType::FlushReq)]
    );

    let dirty = [0x5A; LINE];
    slice.reply(&reply_msg(MsgType::FlushRep, 1, 0x1000).with_payload(&dirty), 1);

    let sent = slice.transport.take();
    assert_eq!((sent[0].receiver, sent[0].msg.kind), to(2, MsgType::ExRep));
    assert_eq!(sent[0].msg.data(), Some(&dirty[..]));
    assert_eq!(slice.cntlr.directory().get(0x1000).unwrap().owner(), Some(TileId(2)));
    assert_eq!(slice.cntlr.dram().counters().writes, 1);
}

// ══════════════════════════════════════════════════════════
// 2. Queueing
// ══════════════════════════════════════════════════════════

#[test]
fn queued_readers_are_served_in_order_after_write_back() {
    let mut slice = Slice::new(&ConfigBuilder::new(4).build());
    slice.request(MsgType::ExReq, 1, 0x1000);
    slice.request(MsgType::ShReq, 2, 0x1000);
    slice.request(MsgType::ShReq, 3, 0x1000);
    assert_eq!(
        slice.transport.take_kinds(),
        vec![to(1, MsgType::ExRep), to(1, MsgType::WbReq)]
    );
    assert_eq!(slice.cntlr.queue().count(0x1000), 2);

    let dirty = [7u8; LINE];
    slice.reply(&reply_msg(MsgType::WbRep, 1, 0x1000).with_payload(&dirty), 1);

    let sent = slice.transport.take();
    assert_eq!(
        sent.iter().map(|s| (s.receiver, s.msg.kind)).collect::<Vec<_>>(),
        vec![to(2, MsgType::ShRep), to(3, MsgType::ShRep)]
    );
    assert!(sent.iter().all(|s| s.msg.data() == Some(&dirty[..])));
    assert!(sent[0].time <= sent[1].time);

    let entry = slice.cntlr.directory().get(0x1000).unwrap();
    assert_eq!(entry.state(), DirectoryState::Shared);
    assert_eq!(entry.num_sharers(), 3);
    assert!(slice.cntlr.queue().is_idle());
}

#[test]
fn requests_for_other_lines_are_independent() {
    let mut slice = Slice::new(&ConfigBuilder::new(4).build());
    slice.request(MsgType::ExReq, 1, 0x1000);
    slice.request(MsgType::ShReq, 2, 0x1000);
    let _ = slice.transport.take();

    slice.request(MsgType::ShReq, 2, 0x2000);
    assert_eq!(slice.transport.take_kinds(), vec![to(2, MsgType::ShRep)]);
    assert_eq!(slice.cntlr.queue().count(0x1000), 1);
}

// ══════════════════════════════════════════════════════════
// 3. Nullify
// ══════════════════════════════════════════════════════════

#[test]
fn full_set_nullifies_a_victim_first() {
    let config = ConfigBuilder::new(4).directory_entries(2, 2).build();
    let mut slice = Slice::new(&config);
    slice.request(MsgType::ShReq, 1, 0x000);
    slice.request(MsgType::ShReq, 2, 0x040);
    let _ = slice.transport.take();

    slice.request(MsgType::ShReq, 3, 0x080);
    let sent = slice.transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!((sent[0].receiver, sent[0].msg.kind), to(1, MsgType::InvReq));
    assert_eq!(sent[0].msg.address, 0x000);
    assert!(slice.cntlr.directory().is_nullifying(0x000));

    slice.reply(&reply_msg(MsgType::InvRep, 1, 0x000), 1);
    let sent = slice.transport.take();
    assert_eq!((sent[0].receiver, sent[0].msg.kind), to(3, MsgType::ShRep));
    assert_eq!(sent[0].msg.address, 0x080);

    assert_eq!(slice.cntlr.counters().nullifies, 1);
    assert!(slice.cntlr.directory().get(0x000).is_none());
    assert_eq!(slice.state(0x080), Some(DirectoryState::Shared));
    assert_eq!(slice.cntlr.directory().occupancy(), 2);
    assert!(slice.cntlr.queue().is_idle());
}

#[test]
fn victim_is_the_entry_with_fewest_sharers() {
    let config = ConfigBuilder::new(4).directory_entries(2, 2).build();
    let mut slice = Slice::new(&config);
    slice.request(MsgType::ShReq, 1, 0x000);
    slice.request(MsgType::ShReq, 2, 0x000);
    slice.request(MsgType::ShReq, 3, 0x040);
    let _ = slice.transport.take();

    slice.request(MsgType::ShReq, 1, 0x080);
    let sent = slice.transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!((sent[0].receiver, sent[0].msg.kind), to(3, MsgType::InvReq));
    assert_eq!(sent[0].msg.address, 0x040);

    slice.reply(&reply_msg(MsgType::InvRep, 3, 0x040), 3);
    let sent = slice.transport.take();
    assert_eq!((sent[0].receiver, sent[0].msg.kind), to(1, MsgType::ShRep));
    assert_eq!(sent[0].msg.address, 0x080);

    assert!(slice.cntlr.directory().get(0x040).is_none());
    assert_eq!(slice.cntlr.directory().get(0x000).unwrap().num_sharers(), 2);
    assert_eq!(slice.state(0x080), Some(DirectoryState::Shared));
}

#[test]
fn nullify_of_dirty_victim_flushes_it_to_dram() {
    let config = ConfigBuilder::new(4).directory_entries(1, 1).build();
    let mut slice = Slice::new(&config);
    slice.request(MsgType::ExReq, 1, 0x000);
    slice.request(MsgType::ShReq, 2, 0x040);
    assert_eq!(
        slice.transport.take_kinds(),
        vec![to(1, MsgType::ExRep), to(1, MsgType::FlushReq)]
    );

    slice.reply(&reply_msg(MsgType::FlushRep, 1, 0x000).with_payload(&[3; LINE]), 1);
    assert_eq!(slice.transport.take_kinds(), vec![to(2, MsgType::ShRep)]);
    assert_eq!(slice.cntlr.dram().counters().writes, 1);

    // The flushed line comes back from DRAM once 0x040 is nullified in turn.
    slice.request(MsgType::ShReq, 3, 0x000);
    let sent = slice.transport.take();
    assert_eq!(sent[0].msg.kind, MsgType::InvReq);
    slice.reply(&reply_msg(MsgType::InvRep, 2, 0x040), 2);
    let sent = slice.transport.take();
    assert_eq!(sent[0].msg.data(), Some(&[3u8; LINE][..]));
}

#[test]
fn set_with_only_busy_entries_is_fatal() {
    let config = ConfigBuilder::new(4).directory_entries(1, 1).build();
    let mut slice = Slice::new(&config);
    slice.request(MsgType::ExReq, 1, 0x000);
    slice.request(MsgType::ShReq, 2, 0x000);
    let msg = ShmemMsg::new(
        MsgType::ShReq,
        MemComponent::L2Cache,
        MemComponent::DramDirectory,
        TileId(3),
        0x040,
        true,
    );
    let err = slice.cntlr.handle_request_from_l2(TileId(3), msg).unwrap_err();
    assert_eq!(
        err,
        ProtocolError::DirectorySetExhausted {
            set: 0,
            address: 0x040
        }
    );
}

// ══════════════════════════════════════════════════════════
// 4. Limited sharer lists
// ══════════════════════════════════════════════════════════

#[test]
fn overflowed_list_broadcasts_and_waits_for_every_tile() {
    let config = ConfigBuilder::new(4)
        .directory(DirectoryType::LimitedBroadcast, 1)
        .build();
    let mut slice = Slice::new(&config);
    slice.request(MsgType::ShReq, 1, 0x1000);
    slice.request(MsgType::ShReq, 2, 0x1000);
    assert!(slice.cntlr.directory().get(0x1000).unwrap().overflowed());
    let _ = slice.transport.take();

    slice.request(MsgType::ExReq, 3, 0x1000);
    let sent = slice.transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].receiver, None);
    assert_eq!(sent[0].msg.replies, Replies::Everyone);
    assert_eq!(slice.cntlr.counters().broadcasts, 1);

    for tile in 0..4 {
        assert!(slice.transport.take().is_empty());
        let ack = reply_msg(MsgType::InvRep, tile, 0x1000).with_receivers(None, Replies::Everyone);
        slice.reply(&ack, tile);
    }
    assert_eq!(slice.transport.take_kinds(), vec![to(3, MsgType::ExRep)]);
    assert!(!slice.cntlr.directory().get(0x1000).unwrap().overflowed());
}

#[test]
fn unacknowledged_broadcast_forgets_sharers() {
    let config = ConfigBuilder::new(4)
        .directory(DirectoryType::BroadcastNoAck, 1)
        .build();
    let mut slice = Slice::new(&config);
    slice.request(MsgType::ShReq, 1, 0x1000);
    slice.request(MsgType::ShReq, 2, 0x1000);
    assert!(slice.cntlr.directory().get(0x1000).unwrap().overflowed());
    let _ = slice.transport.take();

    slice.request(MsgType::ExReq, 3, 0x1000);
    let sent = slice.transport.take();
    assert_eq!(
        sent.iter().map(|s| (s.receiver, s.msg.kind)).collect::<Vec<_>>(),
        vec![(None, MsgType::InvReq), to(3, MsgType::ExRep)]
    );
    assert_eq!(sent[0].msg.replies, Replies::Nobody);

    let entry = slice.cntlr.directory().get(0x1000).unwrap();
    assert!(entry.sole_sharer_is(TileId(3)));
    assert_eq!(entry.owner(), Some(TileId(3)));

    // A late eviction notice from a forgotten sharer changes nothing.
    slice.reply(&reply_msg(MsgType::InvRep, 1, 0x1000), 1);
    assert!(slice.transport.take().is_empty());
    assert_eq!(slice.state(0x1000), Some(DirectoryState::Modified));
}

#[test]
fn ackwise_broadcast_waits_for_every_counted_sharer() {
    let config = ConfigBuilder::new(4)
        .directory(DirectoryType::Ackwise, 1)
        .build();
    let mut slice = Slice::new(&config);
    slice.request(MsgType::ShReq, 1, 0x1000);
    slice.request(MsgType::ShReq, 2, 0x1000);
    let entry = slice.cntlr.directory().get(0x1000).unwrap();
    assert!(entry.overflowed());
    assert_eq!(entry.num_sharers(), 2);
    let _ = slice.transport.take();

    slice.request(MsgType::ExReq, 3, 0x1000);
    let sent = slice.transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].receiver, None);
    assert_eq!(sent[0].msg.replies, Replies::Holders);

    slice.reply(&reply_msg(MsgType::InvRep, 2, 0x1000), 2);
    assert!(slice.transport.take().is_empty());
    slice.reply(&reply_msg(MsgType::InvRep, 1, 0x1000), 1);
    assert_eq!(slice.transport.take_kinds(), vec![to(3, MsgType::ExRep)]);
    assert_eq!(slice.cntlr.directory().get(0x1000).unwrap().num_sharers(), 1);
}

#[test]
fn full_list_without_broadcast_evicts_one_sharer() {
    let config = ConfigBuilder::new(4)
        .directory(DirectoryType::LimitedNoBroadcast, 1)
        .build();
    let mut slice = Slice::new(&config);
    slice.request(MsgType::ShReq, 1, 0x1000);
    slice.request(MsgType::ShReq, 2, 0x1000);
    assert_eq!(
        slice.transport.take_kinds(),
        vec![to(1, MsgType::ShRep), to(1, MsgType::InvReq)]
    );

    slice.reply(&reply_msg(MsgType::InvRep, 1, 0x1000), 1);
    assert_eq!(slice.transport.take_kinds(), vec![to(2, MsgType::ShRep)]);
    let entry = slice.cntlr.directory().get(0x1000).unwrap();
    assert!(entry.sole_sharer_is(TileId(2)));
}

#[test]
fn limitless_overflow_charges_trap_penalty() {
    let config = ConfigBuilder::new(4)
        .directory(DirectoryType::Limitless, 1)
        .build();
    let mut slice = Slice::new(&config);
    slice.request(MsgType::ShReq, 1, 0x1000);
    slice.request(MsgType::ShReq, 2, 0x1000);
    assert_eq!(
        slice.transport.take_kinds(),
        vec![to(1, MsgType::ShRep), to(2, MsgType::ShRep)]
    );
    let directory = slice.cntlr.directory();
    assert_eq!(directory.get(0x1000).unwrap().num_sharers(), 2);
    assert_eq!(directory.access_latency(0x1000), 10 + 100);
}

// ══════════════════════════════════════════════════════════
// 5. Owned lines
// ══════════════════════════════════════════════════════════

/// Tile 1 owns a dirty line that tile 2 reads.
fn owned_line() -> Slice {
    let config = ConfigBuilder::new(4).protocol(CachingProtocol::Mosi).build();
    let mut slice = Slice::new(&config);
    slice.request(MsgType::ExReq, 1, 0x1000);
    slice.request(MsgType::ShReq, 2, 0x1000);
    assert_eq!(
        slice.transport.take_kinds(),
        vec![to(1, MsgType::ExRep), to(1, MsgType::WbReq)]
    );
    slice.reply(&reply_msg(MsgType::WbRep, 1, 0x1000).with_payload(&[0x6B; LINE]), 1);
    slice
}

#[test]
fn write_back_leaves_the_line_owned() {
    let slice = owned_line();
    let sent = slice.transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!((sent[0].receiver, sent[0].msg.kind), to(2, MsgType::ShRep));
    assert_eq!(sent[0].msg.data(), Some(&[0x6B; LINE][..]));

    let entry = slice.cntlr.directory().get(0x1000).unwrap();
    assert_eq!(entry.state(), DirectoryState::Owned);
    assert_eq!(entry.owner(), Some(TileId(1)));
    assert_eq!(entry.num_sharers(), 2);
    entry.check_invariants().unwrap();
    assert_eq!(slice.cntlr.dram().counters().writes, 0);
}

#[test]
fn owner_serves_later_readers() {
    let mut slice = owned_line();
    let _ = slice.transport.take();

    slice.request(MsgType::ShReq, 3, 0x1000);
    assert_eq!(slice.transport.take_kinds(), vec![to(1, MsgType::WbReq)]);
    slice.reply(&reply_msg(MsgType::WbRep, 1, 0x1000).with_payload(&[0x6B; LINE]), 1);

    let sent = slice.transport.take();
    assert_eq!((sent[0].receiver, sent[0].msg.kind), to(3, MsgType::ShRep));
    assert_eq!(sent[0].msg.data(), Some(&[0x6B; LINE][..]));
    let entry = slice.cntlr.directory().get(0x1000).unwrap();
    assert_eq!(entry.state(), DirectoryState::Owned);
    assert_eq!(entry.num_sharers(), 3);
    assert_eq!(slice.cntlr.dram().counters().writes, 0);
}

#[test]
fn writer_flushes_the_owner_and_invalidates_sharers() {
    let mut slice = owned_line();
    let _ = slice.transport.take();

    slice.request(MsgType::ExReq, 3, 0x1000);
    let sent = slice.transport.take();
    assert_eq!(
        sent.iter().map(|s| (s.receiver, s.msg.kind)).collect::<Vec<_>>(),
        vec![to(1, MsgType::InvFlushCombinedReq), to(2, MsgType::InvFlushCombinedReq)]
    );
    assert!(sent.iter().all(|s| s.msg.single_receiver == Some(TileId(1))));

    slice.reply(&reply_msg(MsgType::FlushRep, 1, 0x1000).with_payload(&[0x6C; LINE]), 1);
    assert!(slice.transport.take().is_empty());
    assert_eq!(slice.state(0x1000), Some(DirectoryState::Shared));

    slice.reply(&reply_msg(MsgType::InvRep, 2, 0x1000), 2);
    let sent = slice.transport.take();
    assert_eq!((sent[0].receiver, sent[0].msg.kind), to(3, MsgType::ExRep));
    assert_eq!(sent[0].msg.data(), Some(&[0x6C; LINE][..]));

    let entry = slice.cntlr.directory().get(0x1000).unwrap();
    assert_eq!(entry.state(), DirectoryState::Modified);
    assert_eq!(entry.owner(), Some(TileId(3)));
    assert_eq!(slice.cntlr.dram().counters().writes, 1);
}

#[test]
fn owner_upgrades_once_readers_are_gone() {
    let mut slice = owned_line();
    let _ = slice.transport.take();

    slice.reply(&reply_msg(MsgType::InvRep, 2, 0x1000), 2);
    slice.request(MsgType::ExReq, 1, 0x1000);
    assert_eq!(slice.transport.take_kinds(), vec![to(1, MsgType::UpgradeRep)]);
    assert_eq!(slice.state(0x1000), Some(DirectoryState::Modified));
}

#[test]
fn owner_cannot_answer_without_data() {
    let mut slice = owned_line();
    let err = slice
        .cntlr
        .handle_reply_from_l2(TileId(1), &reply_msg(MsgType::InvRep, 1, 0x1000))
        .unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedReply { sender: TileId(1), .. }));
}

// ══════════════════════════════════════════════════════════
// 6. Eviction notices and errors
// ══════════════════════════════════════════════════════════

#[rstest]
#[case::clean(MsgType::ShReq, MsgType::InvRep)]
#[case::dirty(MsgType::ExReq, MsgType::FlushRep)]
fn unsolicited_reply_is_an_eviction(#[case] request: MsgType, #[case] notice: MsgType) {
    let mut slice = Slice::new(&ConfigBuilder::new(4).build());
    slice.request(request, 1, 0x1000);
    let _ = slice.transport.take();

    let mut msg = reply_msg(notice, 1, 0x1000);
    if notice == MsgType::FlushRep {
        msg = msg.with_payload(&[9; LINE]);
    }
    slice.reply(&msg, 1);

    assert!(slice.transport.take().is_empty());
    assert_eq!(slice.cntlr.counters().evictions_received, 1);
    assert!(slice.cntlr.directory().get(0x1000).is_none());
}

#[test]
fn reply_for_unknown_line_is_rejected() {
    let mut slice = Slice::new(&ConfigBuilder::new(4).build());
    let err = slice
        .cntlr
        .handle_reply_from_l2(TileId(1), &reply_msg(MsgType::InvRep, 1, 0x4000))
        .unwrap_err();
    assert_eq!(err, ProtocolError::MissingDirectoryEntry { address: 0x4000 });
}

#[test]
fn flush_from_non_owner_is_rejected() {
    let mut slice = Slice::new(&ConfigBuilder::new(4).build());
    slice.request(MsgType::ExReq, 1, 0x1000);
    let msg = reply_msg(MsgType::FlushRep, 2, 0x1000).with_payload(&[0; LINE]);
    let err = slice.cntlr.handle_reply_from_l2(TileId(2), &msg).unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedReply { sender: TileId(2), .. }));
}

#[test]
fn reply_kinds_are_not_requests() {
    let mut slice = Slice::new(&ConfigBuilder::new(4).build());
    let err = slice
        .cntlr
        .handle_request_from_l2(TileId(1), reply_msg(MsgType::InvRep, 1, 0x1000))
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Misrouted { .. }));
}
