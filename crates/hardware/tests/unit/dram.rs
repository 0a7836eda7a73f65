//! DRAM Controller Unit Tests.
//!
//! Uses a mocked backing store to check which lines the controller and the directory
//! read and write, and when latency is charged.

use std::sync::Arc;

use mockall::Sequence;
use pretty_assertions::assert_eq;

use crate::common::harness::ConfigBuilder;
use crate::common::mocks::store::MockStore;
use crate::common::mocks::transport::RecordingTransport;
use tilesim_core::coherence::{DramDirectoryCntlr, MsgType, ShmemMsg, protocol};
use tilesim_core::common::{MemComponent, TileId};
use tilesim_core::config::DramConfig;
use tilesim_core::dram::DramCntlr;
use tilesim_core::perf::ShmemPerfModel;

fn dram_config() -> DramConfig {
    DramConfig {
        latency: 40,
        per_controller_bandwidth: 16.0,
        queue_model_enabled: false,
    }
}

#[test]
fn reads_come_from_the_store() {
    let mut store = MockStore::new();
    let _ = store
        .expect_read_line()
        .withf(|address, _| *address == 0x80)
        .times(1)
        .returning(|_, buf| buf.fill(0xCD));

    let mut dram = DramCntlr::with_store(&dram_config(), 64, Box::new(store));
    let mut buf = [0u8; 64];
    assert_eq!(dram.get_data(0x80, &mut buf, 0, true), 40 + 4);
    assert_eq!(buf, [0xCD; 64]);
}

#[test]
fn unmodeled_accesses_are_free_and_uncounted() {
    let mut store = MockStore::new();
    let _ = store.expect_write_line().times(1).return_const(());

    let mut dram = DramCntlr::with_store(&dram_config(), 64, Box::new(store));
    assert_eq!(dram.put_data(0x0, &[1; 64], 0, false), 0);
    assert_eq!(dram.counters().writes, 0);
    assert_eq!(dram.counters().total_latency, 0);
}

#[test]
fn zero_bandwidth_means_no_transfer_time() {
    let config = DramConfig {
        per_controller_bandwidth: 0.0,
        ..dram_config()
    };
    let mut dram = DramCntlr::new(&config, 64);
    let mut buf = [0u8; 64];
    assert_eq!(dram.get_data(0, &mut buf, 0, true), 40);
}

#[test]
fn directory_reads_once_and_writes_back_dirty_evictions() {
    let mut seq = Sequence::new();
    let mut store = MockStore::new();
    let _ = store
        .expect_read_line()
        .withf(|address, _| *address == 0x1000)
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, buf| buf.fill(0));
    let _ = store
        .expect_write_line()
        .withf(|address, data| *address == 0x1000 && data.iter().all(|b| *b == 0x11))
        .times(1)
        .in_sequence(&mut seq)
        .return_const(());

    let config = ConfigBuilder::new(2).build();
    let transport = Arc::new(RecordingTransport::new(2));
    let mut cntlr = DramDirectoryCntlr::new(
        TileId(0),
        &config,
        DramCntlr::with_store(&config.dram, 64, Box::new(store)),
        Arc::clone(&transport) as Arc<dyn tilesim_core::net::Transport>,
        Arc::new(ShmemPerfModel::new()),
        protocol::create(config.general.caching_protocol),
    );

    let ex = ShmemMsg::new(
        MsgType::ExReq,
        MemComponent::L2Cache,
        MemComponent::DramDirectory,
        TileId(1),
        0x1000,
        true,
    );
    cntlr.handle_request_from_l2(TileId(1), ex.clone()).unwrap();
    let flush = ShmemMsg {
        kind: MsgType::FlushRep,
        ..ex
    }
    .with_payload(&[0x11; 64]);
    cntlr.handle_reply_from_l2(TileId(1), &flush).unwrap();

    assert_eq!(cntlr.dram().counters().reads, 1);
    assert_eq!(cntlr.dram().counters().writes, 1);
    assert_eq!(transport.take_kinds(), vec![(Some(TileId(1)), MsgType::ExRep)]);
}
