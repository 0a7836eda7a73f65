//! Least Recently Used (LRU) Replacement Policy.
//!
//! This policy evicts the cache line that has not been accessed for the longest time.
//! Each way carries a recency counter. On access, every counter younger than the
//! accessed way's counter is incremented and the accessed way is reset to zero, so the
//! counters of a set always form a permutation of `0..ways`. The victim is the evictable
//! way with the largest counter.
//!
//! # Performance
//!
//! - **Time Complexity:**
//!   - `update()`: O(W) where W is the number of ways (associativity)
//!   - `get_victim()`: O(W)
//! - **Space Complexity:** O(S × W) where S is the number of sets
//! - **Hardware Cost:** High - log2(W) bits per way plus comparators
//! - **Worst Case:** Scanning patterns larger than cache capacity (thrashing)

use super::ReplacementPolicy;

/// LRU Policy state.
#[derive(Debug)]
pub struct LruPolicy {
    /// Recency counters, `sets * ways`, 0 = most recently used.
    counters: Vec<usize>,
    /// Number of ways in the cache.
    ways: usize,
}

impl LruPolicy {
    /// Creates a new LRU policy instance.
    ///
    /// Way `w` starts with counter `w`, so the highest way is the first victim.
    ///
    /// # Arguments
    ///
    /// * `sets` - The number of sets in the cache.
    /// * `ways` - The associativity (number of ways) of the cache.
    pub fn new(sets: usize, ways: usize) -> Self {
        let mut counters = Vec::with_capacity(sets * ways);
        for _ in 0..sets {
            counters.extend(0..ways);
        }
        Self { counters, ways }
    }

    /// Recency counter of one way (0 = most recently used).
    pub fn counter(&self, set: usize, way: usize) -> usize {
        self.counters[set * self.ways + way]
    }
}

impl ReplacementPolicy for LruPolicy {
    fn update(&mut self, set: usize, way: usize) {
        let base = set * self.ways;
        let row = &mut self.counters[base..base + self.ways];
        let accessed = row[way];
        for counter in row.iter_mut() {
            if *counter < accessed {
                *counter += 1;
            }
        }
        row[way] = 0;
    }

    fn get_victim(&mut self, set: usize, evictable: &dyn Fn(usize) -> bool) -> Option<usize> {
        let base = set * self.ways;
        self.counters[base..base + self.ways]
            .iter()
            .enumerate()
            .filter(|(way, _)| evictable(*way))
            .max_by_key(|(_, counter)| **counter)
            .map(|(way, _)| way)
    }
}
