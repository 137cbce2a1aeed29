//! Candidate id sets over Roaring bitmaps.
//!
//! The planner's intersection-of-unions algebra runs on these; the on-disk
//! posting lists stay delta-varint encoded and are only expanded into an
//! `IdSet` per query.

use roaring::RoaringBitmap;

use crate::posting::CompressedIds;

/// A set of candidate file ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdSet {
    bitmap: RoaringBitmap,
}

impl IdSet {
    /// Create an empty set.
    pub fn new() -> Self {
        IdSet {
            bitmap: RoaringBitmap::new(),
        }
    }

    /// The set of every assigned file id, `0..file_count`.
    pub fn universe(file_count: u32) -> Self {
        let mut bitmap = RoaringBitmap::new();
        bitmap.insert_range(0..file_count);
        IdSet { bitmap }
    }

    /// Expand a posting list into a set.
    pub fn from_postings(postings: &CompressedIds) -> Self {
        let mut bitmap = RoaringBitmap::new();
        for id in postings.iter() {
            bitmap.insert(id);
        }
        IdSet { bitmap }
    }

    pub fn insert(&mut self, id: u32) {
        self.bitmap.insert(id);
    }

    pub fn contains(&self, id: u32) -> bool {
        self.bitmap.contains(id)
    }

    pub fn len(&self) -> u64 {
        self.bitmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    /// In-place intersection (AND).
    pub fn intersect_with(&mut self, other: &IdSet) {
        self.bitmap &= &other.bitmap;
    }

    /// In-place union (OR).
    pub fn union_with(&mut self, other: &IdSet) {
        self.bitmap |= &other.bitmap;
    }

    /// Iterate ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bitmap.iter()
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.bitmap.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[u32]) -> IdSet {
        let mut s = IdSet::new();
        for &id in ids {
            s.insert(id);
        }
        s
    }

    #[test]
    fn intersect_keeps_common_ids() {
        let mut a = set(&[1, 2, 3]);
        a.intersect_with(&set(&[2, 3, 4]));
        assert_eq!(a.to_vec(), vec![2, 3]);
    }

    #[test]
    fn union_merges() {
        let mut a = set(&[1, 2]);
        a.union_with(&set(&[2, 3]));
        assert_eq!(a.to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn universe_is_dense_prefix() {
        let u = IdSet::universe(4);
        assert_eq!(u.to_vec(), vec![0, 1, 2, 3]);
        assert!(IdSet::universe(0).is_empty());
    }

    #[test]
    fn from_postings_expands_deltas() {
        let mut postings = CompressedIds::new();
        for id in [0, 7, 9] {
            postings.append(id).unwrap();
        }
        assert_eq!(IdSet::from_postings(&postings).to_vec(), vec![0, 7, 9]);
    }
}
