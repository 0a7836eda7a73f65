//! Per-address FIFO of directory transactions.
//!
//! The head of an address's queue is the only transaction allowed to act on that
//! address's directory entry. Empty queues are removed so that `count` doubles as a
//! "transaction in flight" test.

use std::collections::{HashMap, VecDeque};

use super::req::ShmemReq;

/// Map from line address to its queue of pending transactions.
#[derive(Debug, Default)]
pub struct ReqQueueList {
    queues: HashMap<u64, VecDeque<ShmemReq>>,
}

impl ReqQueueList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `req` to the queue of `address`.
    ///
    /// # Returns
    ///
    /// The queue length after the append; `1` means `req` is now the head.
    pub fn enqueue(&mut self, address: u64, req: ShmemReq) -> usize {
        let queue = self.queues.entry(address).or_default();
        queue.push_back(req);
        queue.len()
    }

    /// Removes and returns the head of the queue of `address`.
    pub fn dequeue(&mut self, address: u64) -> Option<ShmemReq> {
        let queue = self.queues.get_mut(&address)?;
        let head = queue.pop_front();
        if queue.is_empty() {
            let _ = self.queues.remove(&address);
        }
        head
    }

    /// Head of the queue of `address`.
    pub fn front(&self, address: u64) -> Option<&ShmemReq> {
        self.queues.get(&address).and_then(VecDeque::front)
    }

    /// Mutable head of the queue of `address`.
    pub fn front_mut(&mut self, address: u64) -> Option<&mut ShmemReq> {
        self.queues.get_mut(&address).and_then(VecDeque::front_mut)
    }

    /// Number of transactions queued for `address`.
    pub fn count(&self, address: u64) -> usize {
        self.queues.get(&address).map_or(0, VecDeque::len)
    }

    /// Returns `true` if no transaction is queued for `address`.
    pub fn is_empty(&self, address: u64) -> bool {
        !self.queues.contains_key(&address)
    }

    /// Total transactions queued over all addresses.
    pub fn pending(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Returns `true` if nothing is queued anywhere.
    pub fn is_idle(&self) -> bool {
        self.queues.is_empty()
    }
}
