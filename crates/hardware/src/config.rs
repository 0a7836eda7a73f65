//! Configuration system for the coherence engine.
//!
//! This module defines all configuration structures and enums used to parameterize
//! the memory system. It provides:
//! 1. **Defaults:** Baseline hardware constants (tile count, cache geometry, latencies).
//! 2. **Structures:** Hierarchical config for the chip, L1-I, L1-D, L2, directory, DRAM and
//!    network.
//! 3. **Enums:** Protocol, replacement policy, set-index hash and directory type selectors.
//! 4. **Validation:** Geometry checks performed once before any controller is built.
//!
//! Configuration is supplied as JSON (`Config::from_file`, `Config::from_json_str`) or use
//! `Config::default()` for tests and the CLI.

use std::path::Path;

use serde::Deserialize;

use crate::common::constants::MAX_TILES;
use crate::common::{ConfigError, TileId, ceil_log2};

/// Default configuration constants for the memory system.
///
/// These values define the baseline hardware configuration when not
/// explicitly overridden in the JSON configuration.
mod defaults {
    /// Number of tiles in the simulated chip.
    pub const TOTAL_TILES: usize = 4;

    /// Cache line size in bytes, shared by every cache level.
    pub const CACHE_LINE_SIZE: usize = 64;

    /// L1 instruction/data cache capacity in KB.
    pub const L1_CACHE_SIZE_KB: usize = 32;

    /// L1 associativity.
    pub const L1_ASSOCIATIVITY: usize = 4;

    /// L1 data array access time in cycles.
    pub const L1_DATA_ACCESS_TIME: u64 = 1;

    /// L1 tag array access time in cycles.
    pub const L1_TAGS_ACCESS_TIME: u64 = 1;

    /// L2 capacity in KB.
    pub const L2_CACHE_SIZE_KB: usize = 512;

    /// L2 associativity.
    pub const L2_ASSOCIATIVITY: usize = 8;

    /// L2 data array access time in cycles.
    pub const L2_DATA_ACCESS_TIME: u64 = 8;

    /// L2 tag array access time in cycles.
    pub const L2_TAGS_ACCESS_TIME: u64 = 3;

    /// Directory associativity.
    pub const DIRECTORY_ASSOCIATIVITY: usize = 16;

    /// Sharers tracked in hardware per directory entry.
    pub const MAX_HW_SHARERS: usize = 64;

    /// Directory lookup time in cycles.
    pub const DIRECTORY_ACCESS_TIME: u64 = 10;

    /// Extra cycles charged when a limitless entry tracks sharers in software.
    pub const LIMITLESS_TRAP_PENALTY: u64 = 100;

    /// DRAM access latency in cycles.
    pub const DRAM_LATENCY: u64 = 100;

    /// Per-controller DRAM bandwidth in bytes per cycle.
    pub const DRAM_BANDWIDTH: f64 = 8.0;

    /// Latency of one network traversal between distinct tiles, in cycles.
    pub const HOP_LATENCY: u64 = 1;
}

/// Cache replacement policy types.
///
/// Determines which cache line to evict when a new line needs to be inserted into a full set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementPolicy {
    /// Round-robin replacement.
    ///
    /// A per-set pointer walks down the ways; accesses do not update it.
    #[serde(alias = "RoundRobin", alias = "round-robin")]
    RoundRobin,
    /// Least Recently Used replacement.
    ///
    /// Per-way recency counters; the way with the largest counter is evicted.
    #[default]
    #[serde(alias = "Lru", alias = "LRU")]
    Lru,
}

/// Address-to-set hash functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashFunction {
    /// Set index is the block number modulo the number of sets.
    #[default]
    Mask,
    /// Set index is the XOR of every `log2(sets)`-bit chunk above the block offset.
    #[serde(alias = "xor")]
    XorFold,
}

/// Coherence protocol run by every L2 and directory controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachingProtocol {
    /// Modified, shared and invalid lines; a write-back also updates memory.
    #[default]
    #[serde(alias = "MSI", alias = "pr_l1_pr_l2_dram_directory_msi")]
    Msi,
    /// Adds an owned state: a written-back line stays dirty at its owner, which keeps
    /// supplying the data to new sharers.
    #[serde(alias = "MOSI", alias = "pr_l1_pr_l2_dram_directory_mosi")]
    Mosi,
}

/// Directory sharer-tracking schemes.
///
/// Every scheme tracks up to `max_hw_sharers` tiles exactly; they differ in what happens
/// when one more tile needs to be added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryType {
    /// Bit vector over all tiles; never overflows.
    #[default]
    #[serde(alias = "exact")]
    FullMap,
    /// Pointer list that switches to broadcast-with-acknowledgement on overflow.
    #[serde(alias = "broadcast_with_ack", alias = "broadcast_with_replies")]
    LimitedBroadcast,
    /// Pointer list that switches to a broadcast nobody acknowledges on overflow.
    #[serde(
        alias = "broadcast_without_ack",
        alias = "broadcast_without_replies",
        alias = "limited_broadcast_no_ack"
    )]
    BroadcastNoAck,
    /// Pointer list that refuses the add; the directory evicts an existing sharer first.
    LimitedNoBroadcast,
    /// Exact sharer count with identities only up to the pointer limit; broadcasts on
    /// overflow and collects one acknowledgement per counted sharer.
    #[serde(alias = "approximate")]
    Ackwise,
    /// Pointer list extended by a software-managed overflow set.
    Limitless,
}

/// Number of directory entries per memory controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TotalEntries {
    /// Fixed entry count.
    Fixed(usize),
    /// Derived from the aggregate L2 capacity (see [`Config::directory_total_entries`]).
    Auto(AutoKeyword),
}

/// The literal `"auto"` accepted by sizing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoKeyword {
    /// Size automatically.
    Auto,
}

impl Default for TotalEntries {
    fn default() -> Self {
        Self::Auto(AutoKeyword::Auto)
    }
}

/// Root configuration structure containing all memory-system settings.
///
/// # Examples
///
/// Creating a default configuration:
///
/// ```
/// use tilesim_core::config::Config;
///
/// let config = Config::default();
/// assert_eq!(config.general.total_tiles, 4);
/// assert_eq!(config.l2_cache.line_size, 64);
/// ```
///
/// Deserializing from JSON:
///
/// ```
/// use tilesim_core::config::{Config, DirectoryType, ReplacementPolicy};
///
/// let json = r#"{
///     "general": { "total_tiles": 16, "memory_controller_tiles": [0, 5, 10, 15] },
///     "l1_dcache": { "size_kb": 16, "associativity": 2, "replacement_policy": "round_robin" },
///     "dram_directory": {
///         "total_entries": 4096,
///         "directory_type": "limited_broadcast",
///         "max_hw_sharers": 4
///     }
/// }"#;
///
/// let config = Config::from_json_str(json).unwrap();
/// assert_eq!(config.general.total_tiles, 16);
/// assert_eq!(config.l1_dcache.replacement_policy, ReplacementPolicy::RoundRobin);
/// assert_eq!(config.dram_directory.directory_type, DirectoryType::LimitedBroadcast);
/// assert_eq!(config.l2_cache.size_kb, 512);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Chip-level settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// L1 instruction cache.
    #[serde(default = "CacheConfig::default_l1")]
    pub l1_icache: CacheConfig,
    /// L1 data cache.
    #[serde(default = "CacheConfig::default_l1")]
    pub l1_dcache: CacheConfig,
    /// Per-tile L2 cache.
    #[serde(default = "CacheConfig::default_l2")]
    pub l2_cache: CacheConfig,
    /// Directory slice on each memory-controller tile.
    #[serde(default)]
    pub dram_directory: DirectoryConfig,
    /// DRAM controllers.
    #[serde(default)]
    pub dram: DramConfig,
    /// Interconnect timing.
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            l1_icache: CacheConfig::default_l1(),
            l1_dcache: CacheConfig::default_l1(),
            l2_cache: CacheConfig::default_l2(),
            dram_directory: DirectoryConfig::default(),
            dram: DramConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Config {
    /// Parses a configuration from JSON text and validates it.
    ///
    /// # Arguments
    ///
    /// * `json` - Configuration document; missing fields take their defaults.
    ///
    /// # Returns
    ///
    /// The validated configuration, or the first parse/validation error.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Checks geometry and cross-field consistency.
    ///
    /// # Returns
    ///
    /// `Ok(())` when every cache and directory can be built from this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.total_tiles == 0 {
            return Err(ConfigError::EmptySystem);
        }
        if self.general.total_tiles > MAX_TILES {
            return Err(ConfigError::Geometry {
                component: "general",
                reason: format!(
                    "total_tiles {} exceeds the limit of {MAX_TILES}",
                    self.general.total_tiles
                ),
            });
        }
        self.l1_icache.validate("l1_icache")?;
        self.l1_dcache.validate("l1_dcache")?;
        self.l2_cache.validate("l2_cache")?;

        let (l1i, l1d, l2) = (
            self.l1_icache.line_size,
            self.l1_dcache.line_size,
            self.l2_cache.line_size,
        );
        if l1i != l1d || l1d != l2 {
            return Err(ConfigError::LineSizeMismatch { l1i, l1d, l2 });
        }

        let controllers = self.memory_controller_tiles();
        if controllers.is_empty() {
            return Err(ConfigError::EmptySystem);
        }
        if let Some(&tile) = controllers
            .iter()
            .find(|tile| tile.index() >= self.general.total_tiles)
        {
            return Err(ConfigError::ControllerOutOfRange {
                tile,
                total: self.general.total_tiles,
            });
        }

        let dir = &self.dram_directory;
        if dir.associativity == 0 || dir.max_hw_sharers == 0 {
            return Err(ConfigError::Geometry {
                component: "dram_directory",
                reason: "associativity and max_hw_sharers must be non-zero".to_string(),
            });
        }
        let entries = self.directory_total_entries();
        if entries == 0 || entries % dir.associativity != 0 {
            return Err(ConfigError::Geometry {
                component: "dram_directory",
                reason: format!(
                    "total_entries {entries} is not a multiple of associativity {}",
                    dir.associativity
                ),
            });
        }
        Ok(())
    }

    /// Cache line size shared by every level.
    pub const fn line_size(&self) -> usize {
        self.l2_cache.line_size
    }

    /// Tiles that host a memory controller and a directory slice.
    ///
    /// An empty `memory_controller_tiles` list places a controller on every tile.
    pub fn memory_controller_tiles(&self) -> Vec<TileId> {
        if self.general.memory_controller_tiles.is_empty() {
            (0..self.general.total_tiles).map(TileId::from).collect()
        } else {
            self.general.memory_controller_tiles.clone()
        }
    }

    /// Resolves the directory entry count for one slice.
    ///
    /// `auto` sizes each slice to twice the L2 lines it may have to track: the aggregate L2
    /// capacity divided across slices, rounded up to a power-of-two set count.
    pub fn directory_total_entries(&self) -> usize {
        let dir = &self.dram_directory;
        match dir.total_entries {
            TotalEntries::Fixed(entries) => entries,
            TotalEntries::Auto(_) => {
                let slices = self.memory_controller_tiles().len().max(1);
                let assoc = dir.associativity.max(1);
                let l2_lines = self.l2_cache.size_kb * 1024 / self.l2_cache.line_size.max(1);
                let sets = (2 * l2_lines * self.general.total_tiles).div_ceil(assoc * slices);
                (1usize << ceil_log2(sets.max(1))) * assoc
            }
        }
    }
}

/// Chip-level settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Number of tiles (cores) in the chip.
    #[serde(default = "GeneralConfig::default_total_tiles")]
    pub total_tiles: usize,

    /// Tiles hosting a memory controller; empty means every tile.
    #[serde(default)]
    pub memory_controller_tiles: Vec<TileId>,

    /// Coherence protocol
    #[serde(default)]
    pub caching_protocol: CachingProtocol,
}

impl GeneralConfig {
    /// Returns the default tile count.
    fn default_total_tiles() -> usize {
        defaults::TOTAL_TILES
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            total_tiles: defaults::TOTAL_TILES,
            memory_controller_tiles: Vec::new(),
            caching_protocol: CachingProtocol::default(),
        }
    }
}

/// Individual cache level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Total cache size in KB
    #[serde(default = "CacheConfig::default_size")]
    pub size_kb: usize,

    /// Cache line size in bytes
    #[serde(default = "CacheConfig::default_line")]
    pub line_size: usize,

    /// Associativity (number of ways)
    #[serde(default = "CacheConfig::default_ways")]
    pub associativity: usize,

    /// Replacement policy
    #[serde(default)]
    pub replacement_policy: ReplacementPolicy,

    /// Set-index hash function
    #[serde(default)]
    pub hash: HashFunction,

    /// Data array access time in cycles
    #[serde(default = "CacheConfig::default_data_time")]
    pub data_access_time: u64,

    /// Tag array access time in cycles
    #[serde(default = "CacheConfig::default_tags_time")]
    pub tags_access_time: u64,

    /// Classify misses as cold/capacity/sharing/upgrade
    #[serde(default)]
    pub track_miss_types: bool,
}

impl CacheConfig {
    /// Returns the default cache size in KB.
    fn default_size() -> usize {
        defaults::L1_CACHE_SIZE_KB
    }

    /// Returns the default cache line size in bytes.
    fn default_line() -> usize {
        defaults::CACHE_LINE_SIZE
    }

    /// Returns the default cache associativity (number of ways).
    fn default_ways() -> usize {
        defaults::L1_ASSOCIATIVITY
    }

    /// Returns the default data access time in cycles.
    fn default_data_time() -> u64 {
        defaults::L1_DATA_ACCESS_TIME
    }

    /// Returns the default tag access time in cycles.
    fn default_tags_time() -> u64 {
        defaults::L1_TAGS_ACCESS_TIME
    }

    /// Default private L1 geometry.
    pub fn default_l1() -> Self {
        Self {
            size_kb: defaults::L1_CACHE_SIZE_KB,
            line_size: defaults::CACHE_LINE_SIZE,
            associativity: defaults::L1_ASSOCIATIVITY,
            replacement_policy: ReplacementPolicy::Lru,
            hash: HashFunction::Mask,
            data_access_time: defaults::L1_DATA_ACCESS_TIME,
            tags_access_time: defaults::L1_TAGS_ACCESS_TIME,
            track_miss_types: false,
        }
    }

    /// Default per-tile L2 geometry.
    pub fn default_l2() -> Self {
        Self {
            size_kb: defaults::L2_CACHE_SIZE_KB,
            line_size: defaults::CACHE_LINE_SIZE,
            associativity: defaults::L2_ASSOCIATIVITY,
            replacement_policy: ReplacementPolicy::Lru,
            hash: HashFunction::Mask,
            data_access_time: defaults::L2_DATA_ACCESS_TIME,
            tags_access_time: defaults::L2_TAGS_ACCESS_TIME,
            track_miss_types: false,
        }
    }

    /// Number of lines in the cache.
    pub const fn num_lines(&self) -> usize {
        self.size_kb * 1024 / self.line_size
    }

    /// Number of sets in the cache.
    pub const fn num_sets(&self) -> usize {
        self.num_lines() / self.associativity
    }

    fn validate(&self, component: &'static str) -> Result<(), ConfigError> {
        let geometry = |reason: String| ConfigError::Geometry { component, reason };
        if self.line_size == 0 || !self.line_size.is_power_of_two() {
            return Err(geometry(format!(
                "line_size {} is not a power of two",
                self.line_size
            )));
        }
        if self.size_kb == 0 || self.associativity == 0 {
            return Err(geometry("size_kb and associativity must be non-zero".into()));
        }
        if self.num_lines() % self.associativity != 0 || self.num_sets() == 0 {
            return Err(geometry(format!(
                "{} lines cannot be split into {}-way sets",
                self.num_lines(),
                self.associativity
            )));
        }
        if !self.num_sets().is_power_of_two() {
            return Err(geometry(format!(
                "set count {} is not a power of two",
                self.num_sets()
            )));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::default_l1()
    }
}

/// Directory slice configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Entries per slice, or `"auto"`
    #[serde(default)]
    pub total_entries: TotalEntries,

    /// Directory associativity
    #[serde(default = "DirectoryConfig::default_ways")]
    pub associativity: usize,

    /// Sharers tracked exactly in hardware
    #[serde(default = "DirectoryConfig::default_hw_sharers")]
    pub max_hw_sharers: usize,

    /// Sharer-tracking scheme
    #[serde(default)]
    pub directory_type: DirectoryType,

    /// Lookup time in cycles
    #[serde(default = "DirectoryConfig::default_access_time")]
    pub access_time: u64,

    /// Software trap penalty of an overflowed limitless entry, in cycles
    #[serde(default = "DirectoryConfig::default_trap_penalty")]
    pub limitless_trap_penalty: u64,
}

impl DirectoryConfig {
    /// Returns the default directory associativity.
    fn default_ways() -> usize {
        defaults::DIRECTORY_ASSOCIATIVITY
    }

    /// Returns the default hardware sharer count.
    fn default_hw_sharers() -> usize {
        defaults::MAX_HW_SHARERS
    }

    /// Returns the default directory access time.
    fn default_access_time() -> u64 {
        defaults::DIRECTORY_ACCESS_TIME
    }

    /// Returns the default limitless software trap penalty.
    fn default_trap_penalty() -> u64 {
        defaults::LIMITLESS_TRAP_PENALTY
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            total_entries: TotalEntries::default(),
            associativity: defaults::DIRECTORY_ASSOCIATIVITY,
            max_hw_sharers: defaults::MAX_HW_SHARERS,
            directory_type: DirectoryType::default(),
            access_time: defaults::DIRECTORY_ACCESS_TIME,
            limitless_trap_penalty: defaults::LIMITLESS_TRAP_PENALTY,
        }
    }
}

/// DRAM controller configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DramConfig {
    /// Fixed access latency in cycles
    #[serde(default = "DramConfig::default_latency")]
    pub latency: u64,

    /// Bandwidth of one controller in bytes per cycle
    #[serde(default = "DramConfig::default_bandwidth")]
    pub per_controller_bandwidth: f64,

    /// Serialize accesses through a first-come first-served queue
    #[serde(default)]
    pub queue_model_enabled: bool,
}

impl DramConfig {
    /// Returns the default DRAM latency.
    fn default_latency() -> u64 {
        defaults::DRAM_LATENCY
    }

    /// Returns the default per-controller bandwidth.
    fn default_bandwidth() -> f64 {
        defaults::DRAM_BANDWIDTH
    }
}

impl Default for DramConfig {
    fn default() -> Self {
        Self {
            latency: defaults::DRAM_LATENCY,
            per_controller_bandwidth: defaults::DRAM_BANDWIDTH,
            queue_model_enabled: false,
        }
    }
}

/// Interconnect timing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Cycles added to a packet travelling between two distinct tiles
    #[serde(default = "NetworkConfig::default_hop_latency")]
    pub hop_latency: u64,
}

impl NetworkConfig {
    /// Returns the default hop latency.
    fn default_hop_latency() -> u64 {
        defaults::HOP_LATENCY
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hop_latency: defaults::HOP_LATENCY,
        }
    }
}
