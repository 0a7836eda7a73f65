//! Round-Robin Replacement Policy.
//!
//! This policy evicts lines in a fixed cyclic order, regardless of how recently
//! they were accessed. Each set keeps a pointer that starts at the highest way and
//! walks downward, wrapping to the top after way 0.
//!
//! # Performance
//!
//! - **Time Complexity:**
//!   - `update()`: O(1) (no-op)
//!   - `get_victim()`: O(1), O(W) when ways are pinned
//! - **Space Complexity:** O(S) where S is the number of sets
//! - **Hardware Cost:** Minimal - single counter per set

use super::ReplacementPolicy;

/// Round-robin policy state.
#[derive(Debug)]
pub struct RoundRobinPolicy {
    /// Next way to evict, per set.
    next_way: Vec<usize>,
    /// Number of ways in the cache.
    ways: usize,
}

impl RoundRobinPolicy {
    /// Creates a new round-robin policy instance.
    ///
    /// # Arguments
    ///
    /// * `sets` - The number of sets in the cache.
    /// * `ways` - The associativity (number of ways) of the cache.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            next_way: vec![ways.saturating_sub(1); sets],
            ways,
        }
    }

    const fn step_down(&self, way: usize) -> usize {
        if way == 0 { self.ways - 1 } else { way - 1 }
    }
}

impl ReplacementPolicy for RoundRobinPolicy {
    /// Accesses do not move the pointer.
    fn update(&mut self, _set: usize, _way: usize) {}

    /// Returns the way under the pointer (skipping pinned ways) and moves the
    /// pointer one way down.
    fn get_victim(&mut self, set: usize, evictable: &dyn Fn(usize) -> bool) -> Option<usize> {
        let mut way = self.next_way[set];
        for _ in 0..self.ways {
            if evictable(way) {
                self.next_way[set] = self.step_down(way);
                return Some(way);
            }
            way = self.step_down(way);
        }
        None
    }
}
