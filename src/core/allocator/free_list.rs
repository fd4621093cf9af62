//! Free blocks indexed by cluster-rounded length

use std::collections::{BTreeMap, VecDeque};

/// Multi-valued map from free length to block indices
///
/// Key 0 holds recyclable slots that own no clusters. Within a length the
/// indices are kept in the order they were freed, and lookups hand out the
/// oldest first.
#[derive(Debug, Default, Clone)]
pub struct FreeLengthMap {
    buckets: BTreeMap<u64, VecDeque<u32>>,
    len: usize,
}

impl FreeLengthMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// File block `index` under `length`
    pub fn insert(&mut self, length: u64, index: u32) {
        self.buckets.entry(length).or_default().push_back(index);
        self.len += 1;
    }

    /// Remove block `index` from the `length` bucket
    pub fn remove(&mut self, length: u64, index: u32) -> bool {
        let Some(bucket) = self.buckets.get_mut(&length) else {
            return false;
        };
        let Some(position) = bucket.iter().position(|&i| i == index) else {
            return false;
        };

        bucket.remove(position);
        if bucket.is_empty() {
            self.buckets.remove(&length);
        }
        self.len -= 1;
        true
    }

    /// Smallest free length that is at least `length`, with its oldest index
    pub fn find_at_least(&self, length: u64) -> Option<(u64, u32)> {
        self.buckets
            .range(length..)
            .find_map(|(&key, bucket)| bucket.front().map(|&index| (key, index)))
    }

    /// Take the oldest index filed under exactly `length`
    pub fn pop(&mut self, length: u64) -> Option<u32> {
        let bucket = self.buckets.get_mut(&length)?;
        let index = bucket.pop_front();
        if bucket.is_empty() {
            self.buckets.remove(&length);
        }
        if index.is_some() {
            self.len -= 1;
        }
        index
    }

    /// Take a recyclable zero-length slot
    pub fn pop_slot(&mut self) -> Option<u32> {
        self.pop(0)
    }

    /// Oldest recyclable slot, left in place
    pub fn peek_slot(&self) -> Option<u32> {
        self.buckets.get(&0).and_then(|bucket| bucket.front().copied())
    }

    pub fn has_slot(&self) -> bool {
        self.buckets.contains_key(&0)
    }

    /// All tracked indices, zero-length slots included
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Recyclable zero-length slots
    pub fn slot_count(&self) -> usize {
        self.buckets.get(&0).map_or(0, VecDeque::len)
    }

    /// Free blocks that own storage
    pub fn storage_count(&self) -> usize {
        self.len - self.slot_count()
    }

    /// Total free bytes across all storage blocks
    pub fn free_bytes(&self) -> u64 {
        self.buckets
            .iter()
            .map(|(&length, bucket)| length * bucket.len() as u64)
            .sum()
    }

    /// Free storage blocks as `(length, index)`, shortest first
    pub fn iter_storage(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.buckets
            .range(1..)
            .flat_map(|(&length, bucket)| bucket.iter().map(move |&index| (length, index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smallest_sufficient_length() {
        let mut map = FreeLengthMap::new();
        map.insert(4096, 1);
        map.insert(16384, 2);
        map.insert(8192, 3);

        assert_eq!(map.find_at_least(4096), Some((4096, 1)));
        assert_eq!(map.find_at_least(5000), Some((8192, 3)));
        assert_eq!(map.find_at_least(12288), Some((16384, 2)));
        assert_eq!(map.find_at_least(20480), None);
    }

    #[test]
    fn test_fifo_within_bucket() {
        let mut map = FreeLengthMap::new();
        map.insert(8192, 7);
        map.insert(8192, 3);
        map.insert(8192, 5);

        assert_eq!(map.find_at_least(8192), Some((8192, 7)));
        assert_eq!(map.pop(8192), Some(7));
        assert_eq!(map.pop(8192), Some(3));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_remove_specific_index() {
        let mut map = FreeLengthMap::new();
        map.insert(4096, 1);
        map.insert(4096, 2);

        assert!(map.remove(4096, 2));
        assert!(!map.remove(4096, 2));
        assert!(!map.remove(8192, 1));
        assert!(map.remove(4096, 1));
        assert!(map.is_empty());
        assert_eq!(map.find_at_least(1), None);
    }

    #[test]
    fn test_slots_are_not_storage() {
        let mut map = FreeLengthMap::new();
        map.insert(0, 4);
        map.insert(0, 6);
        map.insert(4096, 1);

        assert!(map.has_slot());
        assert_eq!(map.slot_count(), 2);
        assert_eq!(map.storage_count(), 1);
        assert_eq!(map.free_bytes(), 4096);
        // A positive request never lands on a slot
        assert_eq!(map.find_at_least(1), Some((4096, 1)));
        assert_eq!(map.iter_storage().collect::<Vec<_>>(), vec![(4096, 1)]);

        assert_eq!(map.peek_slot(), Some(4));
        assert_eq!(map.pop_slot(), Some(4));
        assert_eq!(map.pop_slot(), Some(6));
        assert_eq!(map.peek_slot(), None);
        assert!(!map.has_slot());
    }
}
