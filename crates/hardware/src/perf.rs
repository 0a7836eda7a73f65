//! Per-tile logical clocks.
//!
//! Each tile runs two roles: the application role that issues core memory operations, and
//! the protocol role that drains the tile's network inbox. Each role owns one clock. Clocks
//! only move forward except when an unmodeled operation is rolled back.

use std::sync::atomic::{AtomicU64, Ordering};

/// The two execution roles of a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Thread issuing core memory operations.
    App,
    /// Thread handling protocol messages.
    Sim,
}

/// Logical clocks of one tile.
#[derive(Debug, Default)]
pub struct ShmemPerfModel {
    app: AtomicU64,
    sim: AtomicU64,
}

impl ShmemPerfModel {
    /// Creates a model with both clocks at cycle zero.
    pub fn new() -> Self {
        Self::default()
    }

    const fn clock(&self, role: Role) -> &AtomicU64 {
        match role {
            Role::App => &self.app,
            Role::Sim => &self.sim,
        }
    }

    /// Current time of `role`.
    #[inline]
    pub fn time(&self, role: Role) -> u64 {
        self.clock(role).load(Ordering::Acquire)
    }

    /// Overwrites the time of `role`.
    #[inline]
    pub fn set_time(&self, role: Role, time: u64) {
        self.clock(role).store(time, Ordering::Release);
    }

    /// Advances `role` by `cycles`.
    #[inline]
    pub fn incr_time(&self, role: Role, cycles: u64) {
        let _ = self.clock(role).fetch_add(cycles, Ordering::AcqRel);
    }

    /// Moves `role` forward to `time` if it is behind.
    #[inline]
    pub fn update_time(&self, role: Role, time: u64) {
        let _ = self.clock(role).fetch_max(time, Ordering::AcqRel);
    }
}
