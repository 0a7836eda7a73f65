//! Directory-side transaction record.

use super::msg::{MsgType, ShmemMsg};
use crate::common::TileId;

/// A queued directory transaction: the request message plus transient bookkeeping.
#[derive(Clone, Debug)]
pub struct ShmemReq {
    msg: ShmemMsg,
    time: u64,
    expected_responder: Option<TileId>,
    buffered: Option<Vec<u8>>,
}

impl ShmemReq {
    /// Wraps `msg`, received at `time`.
    pub const fn new(msg: ShmemMsg, time: u64) -> Self {
        Self {
            msg,
            time,
            expected_responder: None,
            buffered: None,
        }
    }

    /// The request message.
    pub const fn msg(&self) -> &ShmemMsg {
        &self.msg
    }

    /// Request kind.
    pub const fn kind(&self) -> MsgType {
        self.msg.kind
    }

    /// Requesting tile.
    pub const fn requester(&self) -> TileId {
        self.msg.requester
    }

    /// Line address.
    pub const fn address(&self) -> u64 {
        self.msg.address
    }

    /// Time the transaction is at.
    pub const fn time(&self) -> u64 {
        self.time
    }

    /// Moves the transaction time forward to `time` if it is behind.
    pub fn update_time(&mut self, time: u64) {
        self.time = self.time.max(time);
    }

    /// Tile whose reply restarts a shared request, if one was singled out.
    pub const fn expected_responder(&self) -> Option<TileId> {
        self.expected_responder
    }

    /// Singles out the tile whose reply restarts this request.
    pub const fn set_expected_responder(&mut self, tile: Option<TileId>) {
        self.expected_responder = tile;
    }

    /// Keeps line data returned mid-transaction.
    pub fn buffer_data(&mut self, data: &[u8]) {
        self.buffered = Some(data.to_vec());
    }

    /// Line data returned mid-transaction, if any.
    pub fn buffered_data(&self) -> Option<&[u8]> {
        self.buffered.as_deref()
    }
}
