//! The group map: `(left_splitter, right_splitter) -> group_id`,
//! plus the endpoint adjacency used by the middle-split and one-end-missing
//! routing policies.
//!
//! Keys are always stored in canonical `(min, max)` order; [`OPEN`] stands
//! for "no splitter at this end" (contig start/end). This table is grown
//! only while routing decisions are otherwise serialized and read
//! lock-free between those points — callers enforce that by only calling
//! [`GroupTable::insert`] from the single state-owning thread.

use std::collections::HashMap;

/// Sentinel meaning "this end of the segment has no splitter".
pub const OPEN: u64 = u64::MAX;

/// An ordered splitter-pair key, always stored as `(min(a,b), max(a,b))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub left: u64,
    pub right: u64,
}

impl GroupKey {
    pub fn new(a: u64, b: u64) -> Self {
        if a <= b {
            GroupKey { left: a, right: b }
        } else {
            GroupKey { left: b, right: a }
        }
    }
}

/// Grow-only `(left, right) -> group_id` map with endpoint adjacency for
/// the middle-split ("both ends present, no direct hit") and one-end
/// candidate-enumeration routing policies.
#[derive(Default)]
pub struct GroupTable {
    by_key: HashMap<GroupKey, u64>,
    /// `endpoint -> other endpoints it has been paired with`, symmetric:
    /// inserting key `(a, b)` adds `b` to `adjacency[a]` and `a` to
    /// `adjacency[b]` (a == b is pushed once, for a self-paired key).
    adjacency: HashMap<u64, Vec<u64>>,
}

impl GroupTable {
    pub fn new() -> Self {
        GroupTable::default()
    }

    pub fn get(&self, key: GroupKey) -> Option<u64> {
        self.by_key.get(&key).copied()
    }

    /// Registers `key -> group_id`. Must only be called at a barrier.
    pub fn insert(&mut self, key: GroupKey, group_id: u64) {
        self.by_key.insert(key, group_id);
        self.adjacency.entry(key.left).or_default().push(key.right);
        if key.left != key.right {
            self.adjacency.entry(key.right).or_default().push(key.left);
        }
    }

    /// Other endpoints that `endpoint` has been observed paired with.
    pub fn adjacent(&self, endpoint: u64) -> &[u64] {
        self.adjacency.get(&endpoint).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Finds any `m` such that both `(left, m)` and `(m, right)` are
    /// existing groups. Returns the first candidate found.
    pub fn find_middle_splitter(&self, left: u64, right: u64) -> Option<u64> {
        for &m in self.adjacent(left) {
            if self.by_key.contains_key(&GroupKey::new(m, right)) {
                return Some(m);
            }
        }
        None
    }

    /// Existing group ids sharing `endpoint` at either position, as
    /// `(other_endpoint, group_id)` pairs.
    pub fn groups_sharing_endpoint(&self, endpoint: u64) -> Vec<(u64, u64)> {
        self.adjacent(endpoint)
            .iter()
            .filter_map(|&other| {
                self.by_key
                    .get(&GroupKey::new(endpoint, other))
                    .map(|&gid| (other, gid))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_canonicalized() {
        assert_eq!(GroupKey::new(5, 3), GroupKey::new(3, 5));
    }

    #[test]
    fn find_middle_splitter_locates_bridging_endpoint() {
        let mut t = GroupTable::new();
        t.insert(GroupKey::new(10, 20), 0);
        t.insert(GroupKey::new(20, 30), 1);
        assert_eq!(t.find_middle_splitter(10, 30), Some(20));
        assert_eq!(t.find_middle_splitter(10, 999), None);
    }

    #[test]
    fn groups_sharing_endpoint_lists_all_pairs() {
        let mut t = GroupTable::new();
        t.insert(GroupKey::new(10, 20), 0);
        t.insert(GroupKey::new(10, 30), 1);
        let mut shared = t.groups_sharing_endpoint(10);
        shared.sort();
        assert_eq!(shared, vec![(20, 0), (30, 1)]);
    }

    #[test]
    fn open_end_key_is_distinct_per_other_endpoint() {
        let mut t = GroupTable::new();
        t.insert(GroupKey::new(OPEN, 5), 0);
        t.insert(GroupKey::new(OPEN, 9), 1);
        assert_eq!(t.get(GroupKey::new(5, OPEN)), Some(0));
        assert_eq!(t.get(GroupKey::new(9, OPEN)), Some(1));
    }
}
