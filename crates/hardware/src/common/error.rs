//! Error definitions for the coherence engine.
//!
//! This module defines every failure the memory system can report. It provides:
//! 1. **Configuration Errors:** Unreadable or inconsistent configuration, reported at startup.
//! 2. **Protocol Errors:** Invariant violations detected by a controller. These are fatal: the
//!    network is reliable, so a mismatch always indicates a bug rather than a transient fault.
//! 3. **Resource Exhaustion:** Fixed-size structures that cannot make progress.

use thiserror::Error;

use super::addr::TileId;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration text is not valid JSON for the expected schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A cache or directory geometry is unusable (zero or non-power-of-two sizes).
    #[error("invalid geometry for {component}: {reason}")]
    Geometry {
        /// Configuration section that failed validation.
        component: &'static str,
        /// Human-readable description of the problem.
        reason: String,
    },

    /// L1-I, L1-D and L2 must share one cache line size.
    #[error("cache line sizes differ: l1_icache={l1i}, l1_dcache={l1d}, l2_cache={l2}")]
    LineSizeMismatch {
        /// L1 instruction cache line size.
        l1i: usize,
        /// L1 data cache line size.
        l1d: usize,
        /// L2 cache line size.
        l2: usize,
    },

    /// A memory-controller tile lies outside the configured tile range.
    #[error("memory controller tile {tile} out of range (total tiles {total})")]
    ControllerOutOfRange {
        /// Offending tile.
        tile: TileId,
        /// Configured tile count.
        total: usize,
    },

    /// The system needs at least one tile and one memory controller.
    #[error("system needs at least one tile and one memory controller")]
    EmptySystem,
}

/// Fatal coherence-protocol failures.
///
/// Every variant identifies the offending address so the diagnostic can be matched
/// against a message trace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A controller found a line or entry in a state the protocol does not allow.
    #[error("protocol violation at {address:#x}: expected {expected}, found {actual}")]
    ProtocolViolation {
        /// Line address.
        address: u64,
        /// State the handler required.
        expected: String,
        /// State actually observed.
        actual: String,
    },

    /// A reply arrived from a tile that is not part of the pending transaction.
    #[error("unexpected {kind} for {address:#x} from {sender}")]
    UnexpectedReply {
        /// Line address.
        address: u64,
        /// Message kind name.
        kind: &'static str,
        /// Tile that sent the reply.
        sender: TileId,
    },

    /// The directory has no entry for an address that must have one.
    #[error("no directory entry for {address:#x}")]
    MissingDirectoryEntry {
        /// Line address.
        address: u64,
    },

    /// Every entry of a directory set has a queued transaction; nothing can be replaced.
    #[error("directory set {set} exhausted while allocating {address:#x}")]
    DirectorySetExhausted {
        /// Directory set index.
        set: usize,
        /// Address that needed an entry.
        address: u64,
    },

    /// Every way of a cache set is locked; the replacement policy has no victim.
    #[error("all ways of set {set} are locked while inserting {address:#x}")]
    AllWaysLocked {
        /// Cache set index.
        set: usize,
        /// Address being inserted.
        address: u64,
    },

    /// An `Unlock` operation missed in the private cache it locked.
    #[error("unlock access to {address:#x} missed in the private cache")]
    UnlockMiss {
        /// Line address.
        address: u64,
    },

    /// A locked sequence is open on one private cache while another one missed.
    #[error("access to {address:#x} missed while another private cache is locked")]
    NestedLockedAccess {
        /// Line address.
        address: u64,
    },

    /// The lines of a locked access kept being taken away before all of them were held.
    #[error("locked access to {address:#x} could not hold all of its lines")]
    LockedAccessStarved {
        /// First byte of the access.
        address: u64,
    },

    /// The shared cache already has a request in flight.
    #[error("tile {tile} already has an outstanding request for {pending:#x}")]
    OutstandingRequestBusy {
        /// Tile whose slot is occupied.
        tile: TileId,
        /// Address of the request already in flight.
        pending: u64,
    },

    /// A message kind byte does not name a known kind.
    #[error("unknown message kind {0}")]
    UnknownMsgType(u8),

    /// A component byte does not name a known memory component.
    #[error("unknown memory component {0}")]
    UnknownComponent(u8),

    /// A packet is too short or its payload length disagrees with its header.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// A directory message reached a tile without a memory controller.
    #[error("tile {0} has no memory controller")]
    NoMemoryController(TileId),

    /// A message was routed to a component that cannot handle it.
    #[error("{receiver} cannot handle {kind} from {sender}")]
    Misrouted {
        /// Message kind name.
        kind: &'static str,
        /// Sending component name.
        sender: &'static str,
        /// Receiving component name.
        receiver: &'static str,
    },

    /// The tile's protocol thread has stopped; no further requests can be served.
    #[error("tile {0} is shut down")]
    TileShutDown(TileId),
}

impl ProtocolError {
    /// Builds a `ProtocolViolation` from any two debuggable states.
    pub fn violation(
        address: u64,
        expected: impl Into<String>,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Self::ProtocolViolation {
            address,
            expected: expected.into(),
            actual: format!("{actual:?}"),
        }
    }
}

/// Result alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
