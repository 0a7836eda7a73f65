//! Interconnect between tiles.
//!
//! The network moves encoded coherence messages between tiles. It provides:
//! 1. **Transport Seam:** The `Transport` trait controllers send through.
//! 2. **Delivery:** One unbounded inbox per tile, FIFO per sender/receiver pair.
//! 3. **Timing:** Packets are stamped with send time plus one hop (zero for self-sends).
//! 4. **Accounting:** Messages per kind and packets still in flight.
//!
//! Topology and routing are not modeled; every pair of distinct tiles is one hop apart.

/// Single-slot hand-off between the two roles of a tile.
pub mod rendezvous;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::coherence::msg::{MsgType, ShmemMsg};
use crate::common::{ProtocolError, ProtocolResult, TileId};
use crate::config::NetworkConfig;

pub use self::rendezvous::Rendezvous;

/// Sending side of the interconnect as seen by a controller.
pub trait Transport: Send + Sync + Debug {
    /// Sends `msg` from `sender` to `receiver`.
    ///
    /// # Arguments
    ///
    /// * `sender` - Sending tile.
    /// * `receiver` - Destination tile.
    /// * `time` - Sender's clock when the message leaves.
    /// * `msg` - Message to deliver.
    fn send(
        &self,
        sender: TileId,
        receiver: TileId,
        time: u64,
        msg: &ShmemMsg,
    ) -> ProtocolResult<()>;

    /// Sends `msg` from `sender` to every tile, including `sender`.
    fn broadcast(&self, sender: TileId, time: u64, msg: &ShmemMsg) -> ProtocolResult<()>;

    /// Number of tiles reachable through this transport.
    fn total_tiles(&self) -> usize;
}

/// One encoded message in flight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetPacket {
    /// Sending tile.
    pub sender: TileId,
    /// Destination tile.
    pub receiver: TileId,
    /// Arrival time at the receiver.
    pub time: u64,
    /// Encoded `ShmemMsg`.
    pub data: Vec<u8>,
}

/// Item of a tile inbox.
#[derive(Debug)]
pub enum Envelope {
    /// A coherence message.
    Packet(NetPacket),
    /// Stop the tile's protocol thread.
    Shutdown,
}

/// In-process network with one inbox per tile.
#[derive(Debug)]
pub struct Network {
    inboxes: Vec<(Sender<Envelope>, Receiver<Envelope>)>,
    hop_latency: u64,
    in_flight: AtomicUsize,
    counts: Mutex<BTreeMap<MsgType, u64>>,
}

impl Network {
    /// Creates a network connecting `total_tiles` tiles.
    pub fn new(total_tiles: usize, config: &NetworkConfig) -> Self {
        Self {
            inboxes: (0..total_tiles).map(|_| unbounded()).collect(),
            hop_latency: config.hop_latency,
            in_flight: AtomicUsize::new(0),
            counts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Receiving end of the inbox of `tile`.
    pub fn inbox(&self, tile: TileId) -> Option<Receiver<Envelope>> {
        self.inboxes.get(tile.index()).map(|(_, rx)| rx.clone())
    }

    /// Traversal latency between two tiles.
    pub fn latency(&self, sender: TileId, receiver: TileId) -> u64 {
        if sender == receiver { 0 } else { self.hop_latency }
    }

    fn deliver(
        &self,
        sender: TileId,
        receiver: TileId,
        time: u64,
        data: Vec<u8>,
    ) -> ProtocolResult<()> {
        let (tx, _) = self.inboxes.get(receiver.index()).ok_or_else(|| {
            ProtocolError::MalformedPacket(format!("receiver {receiver} is not a tile"))
        })?;
        let packet = NetPacket {
            sender,
            receiver,
            time: time + self.latency(sender, receiver),
            data,
        };
        let _ = self.in_flight.fetch_add(1, Ordering::AcqRel);
        tx.send(Envelope::Packet(packet)).map_err(|_| {
            let _ = self.in_flight.fetch_sub(1, Ordering::AcqRel);
            ProtocolError::TileShutDown(receiver)
        })
    }

    fn count(&self, kind: MsgType, copies: u64) {
        *self.counts.lock().entry(kind).or_insert(0) += copies;
    }

    /// Marks one packet as fully handled by its receiver.
    pub fn packet_handled(&self) {
        let _ = self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Packets sent but not yet handled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Blocks until no packet is in flight.
    ///
    /// # Returns
    ///
    /// `false` if `timeout` elapsed first.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::yield_now();
        }
        true
    }

    /// Asks the protocol thread of `tile` to stop after draining earlier packets.
    pub fn shutdown(&self, tile: TileId) {
        if let Some((tx, _)) = self.inboxes.get(tile.index()) {
            let _ = tx.send(Envelope::Shutdown);
        }
    }

    /// Messages sent so far, keyed by kind name.
    pub fn message_counts(&self) -> BTreeMap<String, u64> {
        self.counts
            .lock()
            .iter()
            .map(|(kind, n)| (kind.name().to_string(), *n))
            .collect()
    }
}

impl Transport for Network {
    fn send(
        &self,
        sender: TileId,
        receiver: TileId,
        time: u64,
        msg: &ShmemMsg,
    ) -> ProtocolResult<()> {
        tracing::debug!(%sender, %receiver, time, kind = %msg.kind, address = msg.address, "send");
        self.count(msg.kind, 1);
        self.deliver(sender, receiver, time, msg.encode())
    }

    fn broadcast(&self, sender: TileId, time: u64, msg: &ShmemMsg) -> ProtocolResult<()> {
        tracing::debug!(%sender, time, kind = %msg.kind, address = msg.address, "broadcast");
        self.count(msg.kind, self.inboxes.len() as u64);
        let data = msg.encode();
        for receiver in 0..self.inboxes.len() {
            self.deliver(sender, TileId::from(receiver), time, data.clone())?;
        }
        Ok(())
    }

    fn total_tiles(&self) -> usize {
        self.inboxes.len()
    }
}
