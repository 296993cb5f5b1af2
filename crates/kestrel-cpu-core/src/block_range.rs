//! Index from guest address ranges to the blocks translated from them,
//! driving cache invalidation on guest code writes.

use std::collections::btree_map::BTreeMap;
use std::collections::HashSet;

/// Maps the closed guest address interval a block was lifted from to the
/// block's location hash. Queries return every block whose interval
/// overlaps any of the written ranges.
#[derive(Default)]
pub struct BlockRangeInformation {
    // Keyed by (interval start, location hash); the value is the inclusive
    // interval end. Keeping the hash in the key lets distinct blocks share
    // a start address.
    ranges: BTreeMap<(u32, u64), u32>,
}

impl BlockRangeInformation {
    pub fn new() -> BlockRangeInformation {
        BlockRangeInformation::default()
    }

    /// Records that the block keyed by `location_hash` covers the closed
    /// interval `[start, end]`.
    pub fn add_range(&mut self, start: u32, end: u32, location_hash: u64) {
        debug_assert!(start <= end);
        self.ranges.insert((start, location_hash), end);
    }

    /// Removes and returns the location hashes of every block overlapping
    /// any of the closed intervals in `ranges`.
    pub fn invalidate_ranges(&mut self, ranges: &[(u32, u32)]) -> HashSet<u64> {
        let mut hit = HashSet::new();
        let mut dead_keys = Vec::new();
        for &(query_start, query_end) in ranges {
            debug_assert!(query_start <= query_end);
            for (&(start, hash), &end) in self.ranges.range(..=(query_end, u64::MAX)) {
                if end >= query_start {
                    hit.insert(hash);
                    dead_keys.push((start, hash));
                }
            }
        }
        for key in dead_keys {
            self.ranges.remove(&key);
        }
        hit
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_blocks_are_returned_and_removed() {
        let mut info = BlockRangeInformation::new();
        info.add_range(0x200, 0x205, 1);
        info.add_range(0x206, 0x207, 2);
        info.add_range(0x300, 0x30F, 3);

        let hit = info.invalidate_ranges(&[(0x204, 0x206)]);
        assert_eq!(hit, HashSet::from([1, 2]));

        // Already removed; a second write to the same area hits nothing.
        let hit = info.invalidate_ranges(&[(0x204, 0x206)]);
        assert!(hit.is_empty());

        let hit = info.invalidate_ranges(&[(0x000, 0xFFF)]);
        assert_eq!(hit, HashSet::from([3]));
    }

    #[test]
    fn disjoint_ranges_do_not_match() {
        let mut info = BlockRangeInformation::new();
        info.add_range(0x200, 0x203, 1);
        assert!(info.invalidate_ranges(&[(0x204, 0x20F)]).is_empty());
        assert!(info.invalidate_ranges(&[(0x1F0, 0x1FF)]).is_empty());
        assert_eq!(info.invalidate_ranges(&[(0x203, 0x203)]), HashSet::from([1]));
    }

    #[test]
    fn blocks_sharing_a_start_are_distinct() {
        let mut info = BlockRangeInformation::new();
        info.add_range(0x200, 0x201, 1);
        info.add_range(0x200, 0x209, 2);
        let hit = info.invalidate_ranges(&[(0x208, 0x208)]);
        assert_eq!(hit, HashSet::from([2]));
        let hit = info.invalidate_ranges(&[(0x200, 0x200)]);
        assert_eq!(hit, HashSet::from([1]));
    }
}
