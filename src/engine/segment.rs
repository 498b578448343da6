//! Contig cutting and per-segment group routing.
//!
//! [`cut_contig`] walks a contig with a rolling k-mer window and slices it
//! at every splitter hit, producing overlapping segments (overlap = *k*,
//! the shared splitter). [`orient`] decides, from the two boundary
//! splitters, whether a segment is stored direct or reverse-complemented.
//! [`decide_placement`] implements the five-step group routing policy.

use std::collections::HashMap;

use crate::kmer::KmerWindow;
use crate::segstore::SegmentStore;

use super::group_table::{GroupKey, GroupTable, OPEN};
use super::splitter::{fallback_estimate_threshold, FallbackMinimizerMap, SplitterSet};

/// One contig slice produced by [`cut_contig`], in the contig's own
/// (unoriented) coordinate space.
#[derive(Debug, Clone, Copy)]
pub struct SegmentCut {
    pub start: usize,
    pub end: usize,
    pub left: u64,
    pub right: u64,
    left_is_direct: Option<bool>,
    right_is_direct: Option<bool>,
}

/// Slices `codes` at every splitter hit: each cut spans from
/// the previous cut point through the full splitter k-mer, so adjacent
/// segments share exactly `k` bytes.
pub fn cut_contig(codes: &[u8], k: u32, segment_size: u32, splitters: &SplitterSet) -> Vec<SegmentCut> {
    debug_assert_eq!(k, splitters.k());
    let _ = segment_size; // splitters were already chosen at this spacing during Phase A

    let mut cuts = Vec::new();
    let mut window = KmerWindow::new(k);
    let mut seg_start = 0usize;
    let mut left = OPEN;
    let mut left_is_direct: Option<bool> = None;

    for pos in 0..codes.len() {
        if let Some(km) = window.push(codes[pos]) {
            if splitters.contains(km.canonical) {
                let end = pos + 1;
                cuts.push(SegmentCut {
                    start: seg_start,
                    end,
                    left,
                    right: km.canonical,
                    left_is_direct,
                    right_is_direct: Some(km.is_direct),
                });
                left = km.canonical;
                left_is_direct = Some(km.is_direct);
                seg_start = end - k as usize;
            }
        }
    }

    if seg_start < codes.len() {
        cuts.push(SegmentCut {
            start: seg_start,
            end: codes.len(),
            left,
            right: OPEN,
            left_is_direct,
            right_is_direct: None,
        });
    }

    cuts
}

/// Orientation and canonical group key for one cut: "the
/// lexicographic `min(left, right)` ordering chooses whether to store the
/// direct or reverse-complement bytes; when only one end is a known
/// splitter, orientation derives from that end."
pub fn orient(cut: &SegmentCut, codes: &[u8]) -> (Vec<u8>, bool, GroupKey) {
    let is_rev_comp = match (cut.left == OPEN, cut.right == OPEN) {
        (false, false) => cut.left > cut.right,
        (false, true) => !cut.left_is_direct.unwrap_or(true),
        (true, false) => !cut.right_is_direct.unwrap_or(true),
        (true, true) => false,
    };

    let bytes = if is_rev_comp {
        reverse_complement(&codes[cut.start..cut.end])
    } else {
        codes[cut.start..cut.end].to_vec()
    };

    (bytes, is_rev_comp, GroupKey::new(cut.left, cut.right))
}

fn reverse_complement(codes: &[u8]) -> Vec<u8> {
    crate::alphabet::reverse_complement(codes)
}

/// Where a segment ends up: either one group, or a middle-split into two
/// already-existing groups at the bridging splitter `m`. `mid` is the
/// boundary position in the *unsplit* segment's coordinate space (as if `m`
/// occurred there); the two pieces that are actually stored overlap by `k`
/// around it, so the left piece is `bytes[..mid]` and the right piece is
/// `bytes[mid - k..]` (see [`super::Engine`]'s use of this placement).
#[derive(Debug, Clone, Copy)]
pub enum Placement {
    Single { group_id: u64 },
    Split { mid: usize, left_group: u64, right_group: u64 },
}

/// Implements the group-routing policy for one oriented segment.
/// `key` must already be canonicalized (see [`orient`]). Creates a new
/// group (possibly a raw one, for segments with no splitter context at
/// either end) as a last resort.
#[allow(clippy::too_many_arguments)]
pub fn decide_placement(
    group_table: &mut GroupTable,
    fallback: &FallbackMinimizerMap,
    segstore: &SegmentStore,
    raw_round_robin: &mut u64,
    key: GroupKey,
    bytes: &[u8],
    k: u32,
    segment_size: u32,
) -> Placement {
    if key.left == OPEN && key.right == OPEN {
        // No splitter context at either end: route via fallback voting if
        // possible, otherwise a raw group. Raw groups round-robin rather than sharing a
        // single (~0, ~0) key so unrelated segments don't collide on one
        // reference.
        if let Some(gid) = route_fallback(group_table, fallback, segstore, bytes, k, segment_size) {
            return Placement::Single { group_id: gid };
        }
        let gid = *raw_round_robin % crate::segstore::RAW_GROUP_COUNT;
        *raw_round_robin += 1;
        return Placement::Single { group_id: gid };
    }

    if let Some(gid) = group_table.get(key) {
        return Placement::Single { group_id: gid };
    }

    if key.left != OPEN && key.right != OPEN {
        if let Some(m) = group_table.find_middle_splitter(key.left, key.right) {
            let left_group = group_table
                .get(GroupKey::new(key.left, m))
                .expect("find_middle_splitter only returns bridging endpoints with existing groups");
            let right_group = group_table
                .get(GroupKey::new(m, key.right))
                .expect("find_middle_splitter only returns bridging endpoints with existing groups");
            let mid = best_split_point(segstore, left_group, right_group, bytes, k);
            return Placement::Split { mid, left_group, right_group };
        }
    }

    let known_end = if key.left != OPEN {
        Some(key.left)
    } else if key.right != OPEN {
        Some(key.right)
    } else {
        None
    };
    if let Some(end) = known_end {
        if let Some(gid) = route_one_end(group_table, segstore, end, bytes) {
            return Placement::Single { group_id: gid };
        }
    }

    if let Some(gid) = route_fallback(group_table, fallback, segstore, bytes, k, segment_size) {
        return Placement::Single { group_id: gid };
    }

    let gid = segstore.new_group();
    group_table.insert(key, gid);
    Placement::Single { group_id: gid }
}

/// §4.5 step 2, "miss and one end present": candidates sharing the known
/// endpoint, ranked by reference-length proximity, each tried with
/// `estimate`'s upper bound tightened to the best cost seen so far.
fn route_one_end(group_table: &GroupTable, segstore: &SegmentStore, known_end: u64, bytes: &[u8]) -> Option<u64> {
    let mut candidates = group_table.groups_sharing_endpoint(known_end);
    candidates.sort_by_key(|&(_other, gid)| {
        let len = segstore.reference_len(gid).unwrap_or(usize::MAX);
        (len as i64 - bytes.len() as i64).abs()
    });

    let mut best: Option<(u64, usize)> = None;
    for (_other, gid) in candidates {
        let upper = best.map(|(_, cost)| cost).unwrap_or(usize::MAX);
        if let Ok(cost) = segstore.estimate(gid, bytes, upper) {
            if best.map_or(true, |(_, b)| cost < b) {
                best = Some((gid, cost));
            }
        }
    }
    best.map(|(gid, _)| gid)
}

/// §4.5 step 2, "no end usable, or all above fail": tallies fallback
/// minimizer candidates seen inside `bytes`, then accepts the
/// most-supported one whose `estimate` clears the (short-segment-aware)
/// threshold.
fn route_fallback(
    group_table: &GroupTable,
    fallback: &FallbackMinimizerMap,
    segstore: &SegmentStore,
    bytes: &[u8],
    k: u32,
    segment_size: u32,
) -> Option<u64> {
    let mut tally: HashMap<(u64, u64), usize> = HashMap::new();
    let mut window = KmerWindow::new(k);
    for &c in bytes {
        if let Some(km) = window.push(c) {
            for &pair in fallback.candidates(km.canonical) {
                *tally.entry(pair).or_insert(0) += 1;
            }
        }
    }

    let mut ranked: Vec<((u64, u64), usize)> = tally.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let threshold = fallback_estimate_threshold(bytes.len(), segment_size);
    for (pair, _votes) in ranked {
        if let Some(gid) = group_table.get(GroupKey::new(pair.0, pair.1)) {
            if let Ok(cost) = segstore.estimate(gid, bytes, threshold) {
                if cost <= threshold {
                    return Some(gid);
                }
            }
        }
    }
    None
}

/// Approximates the optimal middle-split point by summing
/// each half's per-byte coding cost against its own candidate reference
/// and minimizing the total. This treats each `coding_cost_vector` call as
/// if the whole segment were encoded against that single reference, which
/// is only exact right at the true split point — a documented
/// approximation (see DESIGN.md) rather than a full two-reference
/// dynamic-programming split search.
///
/// The returned `mid` is constrained to `[k, n]` so that, once the caller
/// slices `bytes[..mid]` and `bytes[mid - k..]` (the two pieces overlap by
/// `k` at the bridging splitter, per the shared-splitter invariant), both
/// pieces are at least `k` bytes long.
fn best_split_point(segstore: &SegmentStore, left_group: u64, right_group: u64, bytes: &[u8], k: u32) -> usize {
    let n = bytes.len();
    let k = k as usize;
    if k >= n {
        return n;
    }

    let left_cost = segstore.coding_cost_vector(left_group, bytes, true);
    let right_cost = segstore.coding_cost_vector(right_group, bytes, false);
    let (left_cost, right_cost) = match (left_cost, right_cost) {
        (Ok(l), Ok(r)) => (l, r),
        _ => return (n / 2).clamp(k, n),
    };

    let mut prefix = vec![0u64; n + 1];
    for i in 0..n {
        prefix[i + 1] = prefix[i] + left_cost[i] as u64;
    }
    let mut suffix = vec![0u64; n + 1];
    for i in (0..n).rev() {
        suffix[i] = suffix[i + 1] + right_cost[i] as u64;
    }

    let mut best_i = (n / 2).clamp(k, n);
    let mut best_cost = u64::MAX;
    for i in k..=n {
        let cost = prefix[i] + suffix[i];
        if cost < best_cost {
            best_cost = cost;
            best_i = i;
        }
    }
    best_i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::encode_seq;

    fn splitters_with(k: u32, values: &[u64]) -> SplitterSet {
        let mut s = SplitterSet::new(k, values.len().max(16));
        for &v in values {
            s.insert(v);
        }
        s
    }

    #[test]
    fn cut_contig_with_no_splitters_yields_one_open_segment() {
        let codes = encode_seq(b"ACGTACGTACGT");
        let splitters = splitters_with(4, &[]);
        let cuts = cut_contig(&codes, 4, 50, &splitters);
        assert_eq!(cuts.len(), 1);
        assert_eq!(cuts[0].start, 0);
        assert_eq!(cuts[0].end, codes.len());
        assert_eq!(cuts[0].left, OPEN);
        assert_eq!(cuts[0].right, OPEN);
    }

    #[test]
    fn cut_contig_splits_on_a_chosen_splitter_with_k_overlap() {
        let seq = b"AAAAACCCCCGGGGGTTTTT";
        let codes = encode_seq(seq);
        let k = 5;
        let mut window = KmerWindow::new(k);
        let mut mid_kmer = None;
        for (i, &c) in codes.iter().enumerate() {
            if let Some(km) = window.push(c) {
                if i == 12 {
                    mid_kmer = Some(km.canonical);
                }
            }
        }
        let mid_kmer = mid_kmer.unwrap();
        let splitters = splitters_with(k, &[mid_kmer]);
        let cuts = cut_contig(&codes, k, 50, &splitters);
        assert_eq!(cuts.len(), 2);
        assert_eq!(cuts[1].start, cuts[0].end - k as usize);
        assert_eq!(cuts[0].right, mid_kmer);
        assert_eq!(cuts[1].left, mid_kmer);
    }

    #[test]
    fn orient_with_both_ends_open_keeps_direct_orientation() {
        let cut = SegmentCut {
            start: 0,
            end: 8,
            left: OPEN,
            right: OPEN,
            left_is_direct: None,
            right_is_direct: None,
        };
        let codes = encode_seq(b"ACGTACGT");
        let (bytes, is_rev_comp, key) = orient(&cut, &codes);
        assert!(!is_rev_comp);
        assert_eq!(bytes, codes);
        assert_eq!(key, GroupKey::new(OPEN, OPEN));
    }

    #[test]
    fn orient_flips_to_reverse_complement_when_left_exceeds_right() {
        let cut = SegmentCut {
            start: 0,
            end: 8,
            left: 900,
            right: 100,
            left_is_direct: Some(true),
            right_is_direct: Some(true),
        };
        let codes = encode_seq(b"ACGTACGT");
        let (bytes, is_rev_comp, key) = orient(&cut, &codes);
        assert!(is_rev_comp);
        assert_eq!(bytes, reverse_complement(&codes));
        assert_eq!(key, GroupKey::new(900, 100));
    }
}
