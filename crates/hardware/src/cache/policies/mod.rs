//! Cache Replacement Policies.
//!
//! Implements the algorithms for selecting victim lines in set-associative caches.
//!
//! # Policies
//!
//! - `RoundRobin`: Decrementing per-set pointer, no update on hit.
//! - `Lru`: Least Recently Used via per-way recency counters.
//!
//! Both policies accept an `evictable` predicate so that callers can pin lines that are
//! in the middle of a coherence transaction. Invalid ways are preferred by
//! [`GenericCache`](super::GenericCache) before a policy is consulted.

/// Round-robin replacement policy.
pub mod round_robin;

/// Least Recently Used replacement policy.
pub mod lru;

pub use lru::LruPolicy;
pub use round_robin::RoundRobinPolicy;

use crate::config::ReplacementPolicy as PolicyType;

/// Trait for cache replacement policies.
///
/// Defines the interface for updating usage state and selecting victim lines.
pub trait ReplacementPolicy: Send + Sync + std::fmt::Debug {
    /// Updates the policy state when a line is accessed or filled.
    ///
    /// # Arguments
    ///
    /// * `set` - The cache set index.
    /// * `way` - The way index within the set that was accessed.
    fn update(&mut self, set: usize, way: usize);

    /// Selects a victim line to evict from a specific set.
    ///
    /// # Arguments
    ///
    /// * `set` - The cache set index.
    /// * `evictable` - Returns `false` for ways that must not be chosen.
    ///
    /// # Returns
    ///
    /// The index of the way to evict, or `None` if every way is pinned.
    fn get_victim(&mut self, set: usize, evictable: &dyn Fn(usize) -> bool) -> Option<usize>;
}

/// Builds the policy selected by configuration.
///
/// # Arguments
///
/// * `kind` - Policy selector.
/// * `sets` - The number of sets in the cache.
/// * `ways` - The associativity (number of ways) of the cache.
pub fn create(kind: PolicyType, sets: usize, ways: usize) -> Box<dyn ReplacementPolicy> {
    match kind {
        PolicyType::RoundRobin => Box::new(RoundRobinPolicy::new(sets, ways)),
        PolicyType::Lru => Box::new(LruPolicy::new(sets, ways)),
    }
}
