//! Address-to-set hash functions.
//!
//! Maps a byte address to a set index using only the bits above the block offset.
//! `Mask` takes the low bits of the block number; `XorFold` folds every higher chunk
//! of the block number into the index so that strided address streams spread across sets.

use crate::common::floor_log2;
use crate::config::HashFunction;

/// Set-index hash bound to one cache geometry.
#[derive(Clone, Copy, Debug)]
pub struct AddressHash {
    kind: HashFunction,
    log_line_size: u32,
    num_sets: usize,
    log_num_sets: u32,
}

impl AddressHash {
    /// Creates a hash for `num_sets` sets of `line_size`-byte lines.
    ///
    /// # Arguments
    ///
    /// * `kind` - Hash function selector.
    /// * `line_size` - Line size in bytes (power of two).
    /// * `num_sets` - Number of sets (power of two).
    pub const fn new(kind: HashFunction, line_size: usize, num_sets: usize) -> Self {
        Self {
            kind,
            log_line_size: floor_log2(line_size),
            num_sets,
            log_num_sets: floor_log2(num_sets),
        }
    }

    /// Computes the set index of `address`.
    pub const fn set_index(&self, address: u64) -> usize {
        let block = address >> self.log_line_size;
        let mask = (self.num_sets as u64).wrapping_sub(1);
        match self.kind {
            HashFunction::Mask => (block & mask) as usize,
            HashFunction::XorFold => {
                if self.log_num_sets == 0 {
                    return 0;
                }
                let mut remaining = block;
                let mut index = 0;
                while remaining != 0 {
                    index ^= remaining & mask;
                    remaining >>= self.log_num_sets;
                }
                index as usize
            }
        }
    }
}
