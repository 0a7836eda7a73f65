//! DRAM controller model.
//!
//! Each memory-controller tile owns one DRAM controller. It provides:
//! 1. **Storage:** A `BackingStore` holding line data; the default store is sparse and
//!    reads never-written lines as zeroes.
//! 2. **Latency:** Fixed access latency plus the line transfer time at the configured
//!    per-controller bandwidth.
//! 3. **Queueing:** An optional first-come first-served queue that serializes transfers.
//! 4. **Accounting:** Read/write counts and accumulated latency for modeled accesses.

use std::collections::HashMap;
use std::fmt::Debug;

use crate::config::DramConfig;
use crate::stats::DramCounters;

/// Storage behind a DRAM controller.
pub trait BackingStore: Send + Debug {
    /// Copies the line at `address` into `buf`.
    ///
    /// # Arguments
    ///
    /// * `address` - Line-aligned address.
    /// * `buf` - Destination, one line long.
    fn read_line(&mut self, address: u64, buf: &mut [u8]);

    /// Overwrites the line at `address` with `data`.
    fn write_line(&mut self, address: u64, data: &[u8]);
}

/// Zero-initialised store that only materialises written lines.
#[derive(Debug, Default)]
pub struct SparseStore {
    lines: HashMap<u64, Box<[u8]>>,
}

impl SparseStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lines that have been written.
    pub fn resident_lines(&self) -> usize {
        self.lines.len()
    }
}

impl BackingStore for SparseStore {
    fn read_line(&mut self, address: u64, buf: &mut [u8]) {
        match self.lines.get(&address) {
            Some(line) => {
                let len = buf.len().min(line.len());
                buf[..len].copy_from_slice(&line[..len]);
            }
            None => buf.fill(0),
        }
    }

    fn write_line(&mut self, address: u64, data: &[u8]) {
        let _ = self.lines.insert(address, data.into());
    }
}

/// DRAM controller of one memory-controller tile.
#[derive(Debug)]
pub struct DramCntlr {
    store: Box<dyn BackingStore>,
    latency: u64,
    transfer_time: u64,
    queue_model_enabled: bool,
    next_free: u64,
    counters: DramCounters,
}

impl DramCntlr {
    /// Creates a controller backed by a [`SparseStore`].
    pub fn new(config: &DramConfig, line_size: usize) -> Self {
        Self::with_store(config, line_size, Box::new(SparseStore::new()))
    }

    /// Creates a controller backed by `store`.
    ///
    /// # Arguments
    ///
    /// * `config` - Latency, bandwidth and queueing settings.
    /// * `line_size` - Bytes moved per access.
    /// * `store` - Line storage.
    pub fn with_store(config: &DramConfig, line_size: usize, store: Box<dyn BackingStore>) -> Self {
        let bandwidth = if config.per_controller_bandwidth > 0.0 {
            config.per_controller_bandwidth
        } else {
            f64::INFINITY
        };
        Self {
            store,
            latency: config.latency,
            transfer_time: (line_size as f64 / bandwidth).ceil() as u64,
            queue_model_enabled: config.queue_model_enabled,
            next_free: 0,
            counters: DramCounters::default(),
        }
    }

    /// Latency of one access issued at `time`, including queueing.
    fn access_latency(&mut self, time: u64) -> (u64, u64) {
        let queue_delay = if self.queue_model_enabled {
            let start = self.next_free.max(time);
            self.next_free = start + self.transfer_time;
            start - time
        } else {
            0
        };
        (self.latency + self.transfer_time + queue_delay, queue_delay)
    }

    fn account(&mut self, time: u64, modeled: bool) -> u64 {
        if !modeled {
            return 0;
        }
        let (latency, queue_delay) = self.access_latency(time);
        self.counters.total_latency += latency;
        self.counters.queue_delay += queue_delay;
        latency
    }

    /// Reads one line.
    ///
    /// # Arguments
    ///
    /// * `address` - Line-aligned address.
    /// * `buf` - Destination, one line long.
    /// * `time` - Issue time.
    /// * `modeled` - Charge latency and count the access.
    ///
    /// # Returns
    ///
    /// Cycles the access takes (0 when not modeled).
    pub fn get_data(&mut self, address: u64, buf: &mut [u8], time: u64, modeled: bool) -> u64 {
        self.store.read_line(address, buf);
        if modeled {
            self.counters.reads += 1;
        }
        tracing::trace!(address, "dram read");
        self.account(time, modeled)
    }

    /// Writes one line.
    ///
    /// # Returns
    ///
    /// Cycles the access takes (0 when not modeled).
    pub fn put_data(&mut self, address: u64, data: &[u8], time: u64, modeled: bool) -> u64 {
        self.store.write_line(address, data);
        if modeled {
            self.counters.writes += 1;
        }
        tracing::trace!(address, "dram write");
        self.account(time, modeled)
    }

    /// Access counters.
    pub const fn counters(&self) -> &DramCounters {
        &self.counters
    }
}
