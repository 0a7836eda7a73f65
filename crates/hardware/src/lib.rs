//! Directory-based cache coherence engine for many-core memory simulation.
//!
//! This crate models the memory hierarchy of a tiled chip with the following:
//! 1. **Caches:** Set-associative storage with pluggable replacement and set hashing.
//! 2. **Coherence:** Private L1 and L2 controllers per tile and a distributed MSI directory.
//! 3. **Memory:** Per-controller DRAM with fixed latency, bandwidth and an optional queue.
//! 4. **Interconnect:** An in-process network with per-tile inboxes and hop latency.
//! 5. **Simulation:** Per-tile clocks, system construction, configuration and statistics.

/// Common types and constants (tile ids, memory operations, errors).
pub mod common;
/// Engine configuration (defaults, enums, hierarchical config structures).
pub mod config;
/// Set-associative cache storage, replacement policies and line metadata.
pub mod cache;
/// Coherence messages, directory and cache controllers.
pub mod coherence;
/// DRAM controller and backing store.
pub mod dram;
/// Tile interconnect and the per-tile role hand-off.
pub mod net;
/// Per-tile logical clocks.
pub mod perf;
/// Per-tile entry point for core accesses and network packets.
pub mod memory_manager;
/// Multi-tile system construction and lifecycle.
pub mod system;
/// Statistics collection and reporting.
pub mod stats;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// Per-tile controllers; obtained from `System::tile`.
pub use crate::memory_manager::MemoryManager;
/// Running multi-tile system; construct with `System::new`.
pub use crate::system::System;
