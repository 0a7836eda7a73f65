//! Coherence messages and their wire encoding.
//!
//! A `ShmemMsg` is a flat, self-describing envelope. It is built fresh for every hop and
//! never mutated after it is sent. The encoding is little-endian with a fixed header of
//! [`WIRE_HEADER_BYTES`] followed by either no payload or exactly one cache line.

use std::fmt;

use crate::common::constants::{MSG_TYPE_BITS, PHYSICAL_ADDRESS_BITS, WIRE_HEADER_BYTES};
use crate::common::{MemComponent, ProtocolError, ProtocolResult, TileId};

/// Kinds of coherence message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MsgType {
    /// Request for a writable copy.
    ExReq,
    /// Request for a readable copy.
    ShReq,
    /// Directory asks a sharer to drop its copy.
    InvReq,
    /// Directory asks the owner to drop its copy and return the data.
    FlushReq,
    /// Directory asks the owner to downgrade to shared and return the data.
    WbReq,
    /// Writable copy with data.
    ExRep,
    /// Readable copy with data.
    ShRep,
    /// Permission upgrade of a copy the requester already holds; no data.
    UpgradeRep,
    /// Acknowledges an invalidation, or announces a clean eviction.
    InvRep,
    /// Returns dirty data after a flush, or announces a dirty eviction.
    FlushRep,
    /// Returns dirty data after a downgrade.
    WbRep,
    /// Directory-internal request that empties an entry before it is reused.
    NullifyReq,
    /// Invalidation whose `single_receiver` (the owner) flushes instead.
    InvFlushCombinedReq,
}

impl MsgType {
    /// Every kind, in wire-code order.
    pub const ALL: [Self; 13] = [
        Self::ExReq,
        Self::ShReq,
        Self::InvReq,
        Self::FlushReq,
        Self::WbReq,
        Self::ExRep,
        Self::ShRep,
        Self::UpgradeRep,
        Self::InvRep,
        Self::FlushRep,
        Self::WbRep,
        Self::NullifyReq,
        Self::InvFlushCombinedReq,
    ];

    /// Upper-case protocol name, as used in traces and statistics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ExReq => "EX_REQ",
            Self::ShReq => "SH_REQ",
            Self::InvReq => "INV_REQ",
            Self::FlushReq => "FLUSH_REQ",
            Self::WbReq => "WB_REQ",
            Self::ExRep => "EX_REP",
            Self::ShRep => "SH_REP",
            Self::UpgradeRep => "UPGRADE_REP",
            Self::InvRep => "INV_REP",
            Self::FlushRep => "FLUSH_REP",
            Self::WbRep => "WB_REP",
            Self::NullifyReq => "NULLIFY_REQ",
            Self::InvFlushCombinedReq => "INV_FLUSH_COMBINED_REQ",
        }
    }

    /// Returns `true` for kinds that carry one cache line of data.
    pub const fn carries_data(self) -> bool {
        matches!(self, Self::ExRep | Self::ShRep | Self::FlushRep | Self::WbRep)
    }

    /// Wire code of the kind.
    pub const fn to_byte(self) -> u8 {
        self as u8
    }

    /// Decodes a wire code.
    pub fn from_byte(byte: u8) -> ProtocolResult<Self> {
        Self::ALL
            .get(byte as usize)
            .copied()
            .ok_or(ProtocolError::UnknownMsgType(byte))
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which receivers of an invalidation answer it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Replies {
    /// Only tiles that held the line.
    #[default]
    Holders,
    /// Every receiver, holder or not.
    Everyone,
    /// Nobody; the sender does not wait.
    Nobody,
}

impl Replies {
    const fn to_byte(self) -> u8 {
        self as u8
    }

    const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Holders),
            1 => Some(Self::Everyone),
            2 => Some(Self::Nobody),
            _ => None,
        }
    }
}

/// One coherence message.
#[derive(Clone, PartialEq, Eq)]
pub struct ShmemMsg {
    /// Message kind.
    pub kind: MsgType,
    /// Component that built the message.
    pub sender_component: MemComponent,
    /// Component that must handle the message.
    pub receiver_component: MemComponent,
    /// Tile whose core access started the transaction.
    pub requester: TileId,
    /// Line address.
    pub address: u64,
    /// Tile singled out by a multicast request.
    pub single_receiver: Option<TileId>,
    /// Receivers that must answer.
    pub replies: Replies,
    /// Line data; empty for data-less kinds.
    pub payload: Vec<u8>,
    /// Counts toward simulated timing and statistics.
    pub modeled: bool,
}

impl ShmemMsg {
    /// Creates a data-less message.
    pub const fn new(
        kind: MsgType,
        sender_component: MemComponent,
        receiver_component: MemComponent,
        requester: TileId,
        address: u64,
        modeled: bool,
    ) -> Self {
        Self {
            kind,
            sender_component,
            receiver_component,
            requester,
            address,
            single_receiver: None,
            replies: Replies::Holders,
            payload: Vec::new(),
            modeled,
        }
    }

    /// Attaches one line of data.
    #[must_use]
    pub fn with_payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    /// Sets the multicast fields.
    #[must_use]
    pub const fn with_receivers(
        mut self,
        single_receiver: Option<TileId>,
        replies: Replies,
    ) -> Self {
        self.single_receiver = single_receiver;
        self.replies = replies;
        self
    }

    /// Returns `true` if receivers must reply even when they hold no copy.
    pub const fn reply_expected(&self) -> bool {
        matches!(self.replies, Replies::Everyone)
    }

    /// Returns the payload, if the message carries one.
    pub fn data(&self) -> Option<&[u8]> {
        (!self.payload.is_empty()).then_some(self.payload.as_slice())
    }

    /// Size of the message on the simulated interconnect, in bits.
    ///
    /// Kind and address for every message, plus the line for data-carrying kinds.
    pub fn modeled_length_bits(&self) -> u64 {
        let header = u64::from(MSG_TYPE_BITS + PHYSICAL_ADDRESS_BITS);
        if self.kind.carries_data() {
            header + 8 * self.payload.len() as u64
        } else {
            header
        }
    }

    /// Encodes the message into its wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(WIRE_HEADER_BYTES + self.payload.len());
        buf.push(self.kind.to_byte());
        buf.push(self.sender_component.to_byte());
        buf.push(self.receiver_component.to_byte());
        buf.extend_from_slice(&self.address.to_le_bytes());
        buf.extend_from_slice(&self.requester.0.to_le_bytes());
        let single = self.single_receiver.map_or(u32::MAX, |t| t.0);
        buf.extend_from_slice(&single.to_le_bytes());
        buf.push(self.replies.to_byte());
        buf.push(u8::from(self.modeled));
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decodes a message from its wire form.
    ///
    /// # Arguments
    ///
    /// * `bytes` - One encoded message, header and payload.
    ///
    /// # Returns
    ///
    /// The message, or an error naming the first malformed field.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        if bytes.len() < WIRE_HEADER_BYTES {
            return Err(ProtocolError::MalformedPacket(format!(
                "{} bytes is shorter than the {WIRE_HEADER_BYTES}-byte header",
                bytes.len()
            )));
        }
        let component = |byte: u8| {
            MemComponent::from_byte(byte).ok_or(ProtocolError::UnknownComponent(byte))
        };
        let u32_at = |at: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[at..at + 4]);
            u32::from_le_bytes(raw)
        };
        let mut raw_address = [0u8; 8];
        raw_address.copy_from_slice(&bytes[3..11]);

        let kind = MsgType::from_byte(bytes[0])?;
        let sender_component = component(bytes[1])?;
        let receiver_component = component(bytes[2])?;
        let requester = TileId(u32_at(11));
        let single_receiver = match u32_at(15) {
            u32::MAX => None,
            id => Some(TileId(id)),
        };
        let replies = Replies::from_byte(bytes[19]).ok_or_else(|| {
            ProtocolError::MalformedPacket(format!("reply policy {} is unknown", bytes[19]))
        })?;
        let modeled = bytes[20] != 0;
        let payload_len = u32_at(21) as usize;
        let payload = &bytes[WIRE_HEADER_BYTES..];
        if payload.len() != payload_len {
            return Err(ProtocolError::MalformedPacket(format!(
                "header announces {payload_len} payload bytes, packet carries {}",
                payload.len()
            )));
        }

        Ok(Self {
            kind,
            sender_component,
            receiver_component,
            requester,
            address: u64::from_le_bytes(raw_address),
            single_receiver,
            replies,
            payload: payload.to_vec(),
            modeled,
        })
    }
}

impl fmt::Debug for ShmemMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShmemMsg")
            .field("kind", &self.kind)
            .field("address", &format_args!("{:#x}", self.address))
            .field("sender", &self.sender_component)
            .field("receiver", &self.receiver_component)
            .field("requester", &self.requester)
            .field("single_receiver", &self.single_receiver)
            .field("replies", &self.replies)
            .field("payload_len", &self.payload.len())
            .field("modeled", &self.modeled)
            .finish()
    }
}
