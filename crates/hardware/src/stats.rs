//! Memory-system statistics collection and reporting.
//!
//! This module defines the counters kept by every component and the summary assembled
//! at shutdown. It provides:
//! 1. **Cache counters:** Accesses, hits, misses by type, evictions and invalidations.
//! 2. **Directory counters:** Requests by kind, nullifications and sub-requests sent.
//! 3. **DRAM counters:** Reads, writes and accumulated latency.
//! 4. **Network counters:** Messages per kind.
//! 5. **Reporting:** A `serde::Serialize` summary and a plain-text table.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::common::TileId;

/// Counters of one cache.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheCounters {
    /// Core-visible accesses.
    pub accesses: u64,
    /// Accesses served without a miss.
    pub hits: u64,
    /// Accesses that missed.
    pub misses: u64,
    /// Misses to never-fetched lines.
    pub cold_misses: u64,
    /// Misses to lines displaced by a fill.
    pub capacity_misses: u64,
    /// Misses to lines invalidated by coherence.
    pub sharing_misses: u64,
    /// Misses to present but non-writable lines.
    pub upgrade_misses: u64,
    /// Valid lines displaced by fills.
    pub evictions: u64,
    /// Lines invalidated by coherence actions.
    pub invalidations: u64,
}

impl CacheCounters {
    /// Miss rate in percent (0 when there were no accesses).
    pub fn miss_rate(&self) -> f64 {
        if self.accesses == 0 {
            0.0
        } else {
            100.0 * self.misses as f64 / self.accesses as f64
        }
    }
}

/// Counters of one directory slice.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryCounters {
    /// Shared-read requests received.
    pub sh_reqs: u64,
    /// Exclusive requests received.
    pub ex_reqs: u64,
    /// Exclusive requests answered with a data-less upgrade.
    pub upgrades: u64,
    /// Entries nullified to make room for another address.
    pub nullifies: u64,
    /// Invalidation requests sent (one per targeted sharer or broadcast).
    pub invalidations_sent: u64,
    /// Broadcast invalidations sent.
    pub broadcasts: u64,
    /// Flush requests sent.
    pub flushes_sent: u64,
    /// Write-back requests sent.
    pub writebacks_sent: u64,
    /// Eviction notices received from shared caches.
    pub evictions_received: u64,
}

/// Counters of one DRAM controller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DramCounters {
    /// Modeled line reads.
    pub reads: u64,
    /// Modeled line writes.
    pub writes: u64,
    /// Cycles spent in modeled accesses, including queueing.
    pub total_latency: u64,
    /// Cycles spent waiting in the FCFS queue.
    pub queue_delay: u64,
}

impl DramCounters {
    /// Mean latency per modeled access.
    pub fn average_latency(&self) -> f64 {
        let accesses = self.reads + self.writes;
        if accesses == 0 {
            0.0
        } else {
            self.total_latency as f64 / accesses as f64
        }
    }
}

/// Per-tile statistics.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TileStats {
    /// Tile the statistics belong to.
    pub tile: TileId,
    /// L1 instruction cache.
    pub l1_icache: CacheCounters,
    /// L1 data cache.
    pub l1_dcache: CacheCounters,
    /// Shared per-tile cache.
    pub l2_cache: CacheCounters,
    /// Directory slice, on memory-controller tiles.
    pub directory: Option<DirectoryCounters>,
    /// DRAM controller, on memory-controller tiles.
    pub dram: Option<DramCounters>,
    /// Final application clock.
    pub app_cycles: u64,
    /// Final protocol clock.
    pub sim_cycles: u64,
}

/// Whole-system statistics gathered at shutdown.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SystemStats {
    /// One entry per tile, in tile order.
    pub tiles: Vec<TileStats>,
    /// Messages sent, keyed by kind name.
    pub network: BTreeMap<String, u64>,
    /// Host wall-clock time of the run in seconds.
    pub host_seconds: f64,
}

/// Section names for selective stats output.
///
/// Valid section identifiers: `"summary"`, `"caches"`, `"directory"`, `"dram"`, `"network"`.
/// Pass an empty slice to `print_sections` to print all sections.
pub const STATS_SECTIONS: &[&str] = &["summary", "caches", "directory", "dram", "network"];

impl SystemStats {
    /// Largest application clock over all tiles.
    pub fn completion_cycles(&self) -> u64 {
        self.tiles.iter().map(|t| t.app_cycles).max().unwrap_or(0)
    }

    /// Sum of one cache's counters over every tile.
    pub fn total_cache(&self, select: impl Fn(&TileStats) -> &CacheCounters) -> CacheCounters {
        self.tiles.iter().map(select).fold(CacheCounters::default(), |mut acc, c| {
            acc.accesses += c.accesses;
            acc.hits += c.hits;
            acc.misses += c.misses;
            acc.cold_misses += c.cold_misses;
            acc.capacity_misses += c.capacity_misses;
            acc.sharing_misses += c.sharing_misses;
            acc.upgrade_misses += c.upgrade_misses;
            acc.evictions += c.evictions;
            acc.invalidations += c.invalidations;
            acc
        })
    }

    /// Total messages sent over the network.
    pub fn total_messages(&self) -> u64 {
        self.network.values().sum()
    }

    /// Prints only the requested statistics sections to stdout.
    ///
    /// # Arguments
    ///
    /// * `sections` - Slice of section names to print, or empty for all.
    pub fn print_sections(&self, sections: &[String]) {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);

        if want("summary") {
            println!("\n==========================================================");
            println!("MEMORY SYSTEM SIMULATION STATISTICS");
            println!("==========================================================");
            println!("host_seconds             {:.4} s", self.host_seconds);
            println!("tiles                    {}", self.tiles.len());
            println!("completion_cycles        {}", self.completion_cycles());
            println!("network_messages         {}", self.total_messages());
            println!("----------------------------------------------------------");
        }
        if want("caches") {
            let print_cache = |name: &str, c: &CacheCounters| {
                println!(
                    "  {:<6} accesses: {:<10} | hits: {:<10} | miss_rate: {:.2}% \
                     | evictions: {:<8} | invalidations: {}",
                    name,
                    c.accesses,
                    c.hits,
                    c.miss_rate(),
                    c.evictions,
                    c.invalidations
                );
            };
            println!("CACHES");
            print_cache("L1-I", &self.total_cache(|t| &t.l1_icache));
            print_cache("L1-D", &self.total_cache(|t| &t.l1_dcache));
            print_cache("L2", &self.total_cache(|t| &t.l2_cache));
            let l1d = self.total_cache(|t| &t.l1_dcache);
            if l1d.cold_misses + l1d.capacity_misses + l1d.sharing_misses + l1d.upgrade_misses > 0 {
                println!(
                    "  L1-D misses: cold {} | capacity {} | sharing {} | upgrade {}",
                    l1d.cold_misses, l1d.capacity_misses, l1d.sharing_misses, l1d.upgrade_misses
                );
            }
            println!("----------------------------------------------------------");
        }
        if want("directory") {
            println!("DIRECTORY");
            for tile in &self.tiles {
                if let Some(d) = &tile.directory {
                    println!(
                        "  {:<6} sh: {:<8} ex: {:<8} upgrades: {:<6} nullifies: {:<6} \
                         inv: {:<6} flush: {:<6} wb: {}",
                        tile.tile.to_string(),
                        d.sh_reqs,
                        d.ex_reqs,
                        d.upgrades,
                        d.nullifies,
                        d.invalidations_sent,
                        d.flushes_sent,
                        d.writebacks_sent
                    );
                }
            }
            println!("----------------------------------------------------------");
        }
        if want("dram") {
            println!("DRAM");
            for tile in &self.tiles {
                if let Some(d) = &tile.dram {
                    println!(
                        "  {:<6} reads: {:<8} writes: {:<8} avg_latency: {:.2}",
                        tile.tile.to_string(),
                        d.reads,
                        d.writes,
                        d.average_latency()
                    );
                }
            }
            println!("----------------------------------------------------------");
        }
        if want("network") {
            println!("NETWORK");
            for (kind, count) in &self.network {
                println!("  {kind:<10} {count}");
            }
        }
        println!("==========================================================");
    }

    /// Prints all statistics sections to stdout.
    ///
    /// Equivalent to `print_sections(&[])`.
    pub fn print(&self) {
        self.print_sections(&[]);
    }
}
