/// Transport that records messages instead of delivering them.
pub mod transport;

/// Mockable DRAM backing store.
pub mod store;
