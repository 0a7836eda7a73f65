use std::sync::Mutex;

use tilesim_core::coherence::{MsgType, ShmemMsg};
use tilesim_core::common::{ProtocolResult, TileId};
use tilesim_core::net::Transport;

/// One recorded send; `receiver` is `None` for a broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sent {
    pub sender: TileId,
    pub receiver: Option<TileId>,
    pub time: u64,
    pub msg: ShmemMsg,
}

/// Transport that keeps every message for inspection.
#[derive(Debug)]
pub struct RecordingTransport {
    total_tiles: usize,
    sent: Mutex<Vec<Sent>>,
}

impl RecordingTransport {
    pub fn new(total_tiles: usize) -> Self {
        Self {
            total_tiles,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Removes and returns everything sent so far.
    pub fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// Removes everything sent so far and returns `(receiver, kind)` pairs.
    pub fn take_kinds(&self) -> Vec<(Option<TileId>, MsgType)> {
        self.take()
            .into_iter()
            .map(|s| (s.receiver, s.msg.kind))
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, sender: TileId, receiver: TileId, time: u64, msg: &ShmemMsg) -> ProtocolResult<()> {
        self.sent.lock().unwrap().push(Sent {
            sender,
            receiver: Some(receiver),
            time,
            msg: msg.clone(),
        });
        Ok(())
    }

    fn broadcast(&self, sender: TileId, time: u64, msg: &ShmemMsg) -> ProtocolResult<()> {
        self.sent.lock().unwrap().push(Sent {
            sender,
            receiver: None,
            time,
            msg: msg.clone(),
        });
        Ok(())
    }

    fn total_tiles(&self) -> usize {
        self.total_tiles
    }
}
