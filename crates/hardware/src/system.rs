//! Multi-tile system construction and lifecycle.
//!
//! This module builds the simulated chip from configuration. It performs:
//! 1. **Tile setup:** One `MemoryManager` per tile, all sharing one `Network`.
//! 2. **Protocol threads:** One thread per tile draining its inbox.
//! 3. **Failure handling:** The first protocol error is recorded and every tile's hand-off
//!    is closed so blocked core threads return instead of hanging.
//! 4. **Shutdown:** Stops the protocol threads and gathers statistics.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::common::{ConfigError, ProtocolError, TileId};
use crate::config::Config;
use crate::memory_manager::MemoryManager;
use crate::net::{Envelope, Network, Transport};
use crate::stats::SystemStats;

/// First failure of any tile; closes every hand-off when set.
#[derive(Debug, Default)]
struct Health {
    first_error: Mutex<Option<ProtocolError>>,
    tiles: Mutex<Vec<Arc<MemoryManager>>>,
}

impl Health {
    fn fail(&self, error: ProtocolError) {
        {
            let mut first = self.first_error.lock();
            if first.is_none() {
                *first = Some(error);
            }
        }
        for tile in self.tiles.lock().iter() {
            tile.rendezvous().close();
        }
    }
}

/// A running multi-tile memory system.
///
/// # Examples
///
/// ```
/// use tilesim_core::common::{LockSignal, MemComponent, MemOp, TileId};
/// use tilesim_core::{Config, System};
///
/// let mut config = Config::default();
/// config.general.total_tiles = 2;
/// let system = System::new(config).unwrap();
///
/// let tile = system.tile(TileId(1)).unwrap();
/// let mut word = 42u64.to_le_bytes();
/// tile.core_access(
///     MemComponent::L1DCache,
///     LockSignal::None,
///     MemOp::Write,
///     0x1000,
///     &mut word,
///     true,
/// )
/// .unwrap();
///
/// let mut read = [0u8; 8];
/// system.tile(TileId(0)).unwrap()
///     .core_access(MemComponent::L1DCache, LockSignal::None, MemOp::Read, 0x1000, &mut read, true)
///     .unwrap();
/// assert_eq!(u64::from_le_bytes(read), 42);
///
/// let stats = system.shutdown().unwrap();
/// assert_eq!(stats.tiles.len(), 2);
/// ```
#[derive(Debug)]
pub struct System {
    config: Config,
    network: Arc<Network>,
    tiles: Vec<Arc<MemoryManager>>,
    threads: Vec<JoinHandle<()>>,
    health: Arc<Health>,
    started: Instant,
}

impl System {
    /// Validates `config`, builds every tile and starts the protocol threads.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let total = config.general.total_tiles;
        let network = Arc::new(Network::new(total, &config.network));
        let tiles: Vec<Arc<MemoryManager>> = (0..total)
            .map(|id| {
                Arc::new(MemoryManager::new(
                    TileId::from(id),
                    &config,
                    Arc::clone(&network) as Arc<dyn Transport>,
                ))
            })
            .collect();
        let health = Arc::new(Health::default());
        health.tiles.lock().clone_from(&tiles);

        let mut threads = Vec::with_capacity(total);
        for tile in &tiles {
            let inbox = network
                .inbox(tile.tile())
                .ok_or(ConfigError::EmptySystem)?;
            let tile = Arc::clone(tile);
            let network = Arc::clone(&network);
            let health = Arc::clone(&health);
            let handle = thread::Builder::new()
                .name(format!("{}-protocol", tile.tile()))
                .spawn(move || {
                    for envelope in &inbox {
                        let Envelope::Packet(packet) = envelope else {
                            break;
                        };
                        // The failure is recorded before the packet counts as handled, so
                        // an idle network implies a settled error state.
                        if let Err(error) = tile.handle_msg_from_network(&packet) {
                            tracing::error!(tile = %tile.tile(), %error, "protocol failure");
                            health.fail(error);
                            network.packet_handled();
                            break;
                        }
                        network.packet_handled();
                    }
                })?;
            threads.push(handle);
        }

        tracing::info!(
            tiles = total,
            controllers = config.memory_controller_tiles().len(),
            directory = ?config.dram_directory.directory_type,
            "system built"
        );
        Ok(Self {
            config,
            network,
            tiles,
            threads,
            health,
            started: Instant::now(),
        })
    }

    /// Configuration the system was built from.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Number of tiles.
    pub fn total_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Memory manager of `tile`; clone it into the thread acting as that tile's core.
    pub fn tile(&self, tile: TileId) -> Option<Arc<MemoryManager>> {
        self.tiles.get(tile.index()).cloned()
    }

    /// The interconnect.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Blocks until every sent packet has been handled.
    ///
    /// # Returns
    ///
    /// `false` if `timeout` elapsed first.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.network.wait_until_idle(timeout)
    }

    /// First protocol failure seen by any tile.
    pub fn first_error(&self) -> Option<ProtocolError> {
        self.health.first_error.lock().clone()
    }

    /// Snapshot of every tile's statistics.
    pub fn stats(&self) -> SystemStats {
        SystemStats {
            tiles: self.tiles.iter().map(|tile| tile.stats()).collect(),
            network: self.network.message_counts(),
            host_seconds: self.started.elapsed().as_secs_f64(),
        }
    }

    fn stop_threads(&mut self) {
        for tile in &self.tiles {
            self.network.shutdown(tile.tile());
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("protocol thread panicked");
            }
        }
    }

    /// Stops every protocol thread and returns the final statistics.
    ///
    /// Core threads must have finished issuing accesses.
    ///
    /// # Returns
    ///
    /// The statistics, or the first protocol failure of the run.
    pub fn shutdown(mut self) -> Result<SystemStats, ProtocolError> {
        self.stop_threads();
        let stats = self.stats();
        tracing::info!(
            completion_cycles = stats.completion_cycles(),
            messages = stats.total_messages(),
            "system shut down"
        );
        match self.first_error() {
            Some(error) => Err(error),
            None => Ok(stats),
        }
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.health.tiles.lock().clear();
        for tile in &self.tiles {
            tile.rendezvous().close();
        }
        self.stop_threads();
    }
}
