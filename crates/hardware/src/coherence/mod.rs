//! Directory-based MSI and MOSI coherence protocols.
//!
//! This module implements the private-L1, private-L2, distributed-directory protocol. It
//! includes:
//! 1. **Messages:** The coherence message envelope and its wire encoding.
//! 2. **Transactions:** Directory-side request records and per-address FIFO queues.
//! 3. **Directory:** Entries, sharer-tracking schemes and the directory cache.
//! 4. **Controllers:** The L1, L2 and directory controllers of each tile.
//! 5. **Protocols:** The transitions that differ between MSI and MOSI.

/// Coherence message kinds and the message envelope.
pub mod msg;

/// Directory-side transaction record.
pub mod req;

/// Per-address FIFO queues of directory transactions.
pub mod req_queue;

/// Directory entries, sharer sets and the directory cache.
pub mod directory;

/// Address-to-home lookup.
pub mod home;

/// Private caches and their controller.
pub mod l1;

/// Shared per-tile cache controller.
pub mod l2;

/// Directory controller.
pub mod directory_cntlr;

/// MSI and MOSI variants.
pub mod protocol;

pub use self::directory_cntlr::DramDirectoryCntlr;
pub use self::home::HomeLookup;
pub use self::l1::{L1CacheCntlr, L1Caches};
pub use self::l2::L2CacheCntlr;
pub use self::msg::{MsgType, Replies, ShmemMsg};
pub use self::protocol::{CoherenceProtocol, Mosi, Msi};
pub use self::req::ShmemReq;
pub use self::req_queue::ReqQueueList;
