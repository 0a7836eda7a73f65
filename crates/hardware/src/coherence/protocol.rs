//! Protocol variants shared by the L2 and directory controllers.
//!
//! This module provides:
//! 1. **Msi:** A written-back line becomes clean and shared; memory is updated.
//! 2. **Mosi:** A written-back line stays dirty at its owner, which keeps answering for it
//!    until it is flushed or evicted; memory is not updated.
//!
//! Every other transition is common to both. The owned state is simply never entered under
//! MSI, so the controllers handle it unconditionally.

use std::fmt::Debug;
use std::sync::Arc;

use super::directory::DirectoryState;
use crate::cache::CacheState;
use crate::config::CachingProtocol;

/// Behaviour that differs between coherence protocols.
///
/// Implementors must be `Send + Sync`: one instance is shared by every controller.
pub trait CoherenceProtocol: Send + Sync + Debug {
    /// Configuration selector of this protocol.
    fn kind(&self) -> CachingProtocol;

    /// State of a modified L2 line after it answered WB_REQ.
    fn written_back_line(&self) -> CacheState;

    /// Directory state of a modified line after its owner wrote it back.
    ///
    /// The owner stays recorded if and only if this is `Owned`.
    fn written_back_entry(&self) -> DirectoryState;

    /// Returns `true` if write-back data is stored to DRAM.
    fn write_back_updates_memory(&self) -> bool;
}

/// Modified, shared, invalid.
#[derive(Clone, Copy, Debug, Default)]
pub struct Msi;

impl CoherenceProtocol for Msi {
    fn kind(&self) -> CachingProtocol {
        CachingProtocol::Msi
    }

    fn written_back_line(&self) -> CacheState {
        CacheState::Shared
    }

    fn written_back_entry(&self) -> DirectoryState {
        DirectoryState::Shared
    }

    fn write_back_updates_memory(&self) -> bool {
        true
    }
}

/// Modified, owned, shared, invalid.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mosi;

impl CoherenceProtocol for Mosi {
    fn kind(&self) -> CachingProtocol {
        CachingProtocol::Mosi
    }

    fn written_back_line(&self) -> CacheState {
        CacheState::Owned
    }

    fn written_back_entry(&self) -> DirectoryState {
        DirectoryState::Owned
    }

    fn write_back_updates_memory(&self) -> bool {
        false
    }
}

/// Builds the protocol selected by configuration.
pub fn create(kind: CachingProtocol) -> Arc<dyn CoherenceProtocol> {
    match kind {
        CachingProtocol::Msi => Arc::new(Msi),
        CachingProtocol::Mosi => Arc::new(Mosi),
    }
}
