use std::sync::Arc;

use tilesim_core::Config;
use tilesim_core::MemoryManager;
use tilesim_core::common::{LockSignal, MemComponent, MemOp, ProtocolResult, TileId};
use tilesim_core::config::{CacheConfig, CachingProtocol, DirectoryType, TotalEntries};
use tilesim_core::System;

/// Installs a test-writer subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Small, fast configuration: 1 KB L1s, 4 KB L2s, one memory controller on tile 0.
pub fn small_config(tiles: usize) -> Config {
    let mut config = Config::default();
    config.general.total_tiles = tiles;
    config.general.memory_controller_tiles = vec![TileId(0)];
    config.l1_icache = CacheConfig {
        size_kb: 1,
        associativity: 2,
        ..CacheConfig::default_l1()
    };
    config.l1_dcache = config.l1_icache.clone();
    config.l2_cache = CacheConfig {
        size_kb: 4,
        associativity: 4,
        ..CacheConfig::default_l2()
    };
    config.dram_directory.total_entries = TotalEntries::Fixed(256);
    config.dram_directory.associativity = 4;
    config
}

/// Builder-style tweaks on top of [`small_config`].
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new(tiles: usize) -> Self {
        Self {
            config: small_config(tiles),
        }
    }

    pub fn directory(mut self, kind: DirectoryType, max_hw_sharers: usize) -> Self {
        self.config.dram_directory.directory_type = kind;
        self.config.dram_directory.max_hw_sharers = max_hw_sharers;
        self
    }

    pub fn protocol(mut self, kind: CachingProtocol) -> Self {
        self.config.general.caching_protocol = kind;
        self
    }

    pub fn directory_entries(mut self, entries: usize, associativity: usize) -> Self {
        self.config.dram_directory.total_entries = TotalEntries::Fixed(entries);
        self.config.dram_directory.associativity = associativity;
        self
    }

    pub fn controllers(mut self, tiles: &[u32]) -> Self {
        self.config.general.memory_controller_tiles = tiles.iter().copied().map(TileId).collect();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Starts a system, panicking on an invalid configuration.
pub fn start(config: Config) -> System {
    init_tracing();
    System::new(config).unwrap()
}

pub fn load_u64(tile: &MemoryManager, address: u64) -> ProtocolResult<u64> {
    let mut word = [0u8; 8];
    let _ = tile.core_access(
        MemComponent::L1DCache,
        LockSignal::None,
        MemOp::Read,
        address,
        &mut word,
        true,
    )?;
    Ok(u64::from_le_bytes(word))
}

pub fn store_u64(tile: &MemoryManager, address: u64, value: u64) -> ProtocolResult<bool> {
    let mut word = value.to_le_bytes();
    tile.core_access(
        MemComponent::L1DCache,
        LockSignal::None,
        MemOp::Write,
        address,
        &mut word,
        true,
    )
}

/// Locked read-modify-write increment of the word at `address`.
pub fn increment(tile: &MemoryManager, address: u64) -> ProtocolResult<u64> {
    let mut word = [0u8; 8];
    let _ = tile.core_access(
        MemComponent::L1DCache,
        LockSignal::Lock,
        MemOp::ReadEx,
        address,
        &mut word,
        true,
    )?;
    let next = u64::from_le_bytes(word) + 1;
    let mut bytes = next.to_le_bytes();
    let _ = tile.core_access(
        MemComponent::L1DCache,
        LockSignal::Unlock,
        MemOp::Write,
        address,
        &mut bytes,
        true,
    )?;
    Ok(next)
}

/// Memory manager of `tile`.
pub fn tile(system: &System, tile: u32) -> Arc<MemoryManager> {
    system.tile(TileId(tile)).unwrap()
}
