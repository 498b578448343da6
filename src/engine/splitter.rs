//! Splitter discovery and the splitter set itself.
//!
//! A [`SplitterSet`] is the grow-only set of canonical k-mer values chosen
//! as segment boundaries, mirrored by a [`super::bloom::BloomFilter`] for
//! fast negative lookups. [`discover`] runs Phase A once, against the
//! reference sample only, producing the initial splitter set plus a
//! fallback-minimizer map used later when a
//! segment can't be routed any other way.

use std::collections::{HashMap, HashSet};

use crate::kmer::KmerWindow;

use super::bloom::BloomFilter;

/// Fraction of k-mers (by hash) retained as fallback-minimizer candidates;
/// keeps the global candidate map a small sample of all k-mers rather than
/// indexing every position (`hash(k) XOR magic < fraction * 2^64`). Chosen
/// so the map stays proportionate to the splitter count on typical genomes
/// (recorded as an Open Question resolution in DESIGN.md).
const FALLBACK_FRACTION: f64 = 1.0 / 64.0;
const FALLBACK_MAGIC: u64 = 0x9E3779B97F4A7C15;

/// A segment shorter than this many bases (half the target segment size)
/// is "short" for the purposes of the fallback-minimizer acceptance
/// threshold.
fn is_short_segment(len: usize, segment_size: u32) -> bool {
    len < segment_size as usize / 2
}

pub fn fallback_estimate_threshold(len: usize, segment_size: u32) -> usize {
    if is_short_segment(len, segment_size) {
        len * 9 / 10
    } else {
        len / 5
    }
}

fn fallback_eligible(canonical: u64) -> bool {
    let h = canonical ^ FALLBACK_MAGIC;
    // Compare the hashed value against `FALLBACK_FRACTION * 2^64` using a
    // widening multiply so the fraction doesn't need float precision at
    // the full u64 range.
    let scaled = ((h as u128) * 1_000_000u128) >> 64;
    scaled < (FALLBACK_FRACTION * 1_000_000.0) as u128
}

/// The grow-only splitter set: canonical k-mer values chosen as
/// segment boundaries, plus a Bloom mirror for fast negative lookups.
pub struct SplitterSet {
    k: u32,
    set: HashSet<u64>,
    bloom: BloomFilter,
}

impl SplitterSet {
    pub fn new(k: u32, expected_items: usize) -> Self {
        SplitterSet {
            k,
            set: HashSet::new(),
            bloom: BloomFilter::with_capacity(expected_items.max(16)),
        }
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn contains(&self, value: u64) -> bool {
        // Bloom filter first (cheap negative), exact set second.
        self.bloom.contains(value) && self.set.contains(&value)
    }

    /// Adds `value` to the set. Must only be called at a synchronization
    /// barrier.
    pub fn insert(&mut self, value: u64) -> bool {
        if self.bloom.load_factor() > 0.3 {
            let keys: Vec<u64> = self.set.iter().copied().collect();
            self.bloom.resize_and_rebuild(keys.into_iter());
        }
        self.bloom.insert(value);
        self.set.insert(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.set.iter().copied()
    }

    /// Sorted snapshot of the splitter set, as written to the `splitters`
    /// archive stream.
    pub fn sorted_values(&self) -> Vec<u64> {
        let mut v: Vec<u64> = self.set.iter().copied().collect();
        v.sort_unstable();
        v
    }
}

/// `k-mer -> candidate (splitter_a, splitter_b) pairs` sampled at Phase A
/// and consulted when a segment can't be routed by its own endpoints
///.
#[derive(Default)]
pub struct FallbackMinimizerMap {
    map: HashMap<u64, Vec<(u64, u64)>>,
}

impl FallbackMinimizerMap {
    pub fn new() -> Self {
        FallbackMinimizerMap::default()
    }

    pub fn candidates(&self, kmer: u64) -> &[(u64, u64)] {
        self.map.get(&kmer).map(Vec::as_slice).unwrap_or(&[])
    }

    fn register_candidate(&mut self, kmer: u64) {
        if fallback_eligible(kmer) {
            self.map.entry(kmer).or_default();
        }
    }

    fn record_span(&mut self, fallback_kmers_in_span: &[u64], prev_splitter: u64, new_splitter: u64) {
        for &kmer in fallback_kmers_in_span {
            if let Some(entries) = self.map.get_mut(&kmer) {
                entries.push((prev_splitter, new_splitter));
            }
        }
    }
}

/// Result of Phase A splitter discovery over the reference sample.
pub struct DiscoveryResult {
    pub splitters: SplitterSet,
    pub fallback: FallbackMinimizerMap,
    /// Canonical k-mer values that occurred more than once in the
    /// reference — retained only in adaptive mode, to exclude from
    /// consideration as second-sweep splitters.
    pub duplicated: HashSet<u64>,
}

/// Runs Phase A over `reference_contigs` (each a slice of numeric
/// IUPAC codes), selecting splitters every `segment_size` bases and
/// recording the rightmost candidate of each contig as well.
pub fn discover(
    reference_contigs: &[Vec<u8>],
    k: u32,
    segment_size: u32,
    adaptive: bool,
) -> DiscoveryResult {
    // Step 1: collect every ACGT canonical k-mer, sort, keep singletons.
    let mut all_kmers: Vec<u64> = Vec::new();
    for contig in reference_contigs {
        let mut window = KmerWindow::new(k);
        for &code in contig {
            if let Some(km) = window.push(code) {
                all_kmers.push(km.canonical);
            }
        }
    }
    all_kmers.sort_unstable();

    let mut singletons: HashSet<u64> = HashSet::new();
    let mut duplicated: HashSet<u64> = HashSet::new();
    let mut i = 0;
    while i < all_kmers.len() {
        let mut j = i + 1;
        while j < all_kmers.len() && all_kmers[j] == all_kmers[i] {
            j += 1;
        }
        if j - i == 1 {
            singletons.insert(all_kmers[i]);
        } else if adaptive {
            duplicated.insert(all_kmers[i]);
        }
        i = j;
    }

    // Step 2: register fallback-minimizer candidates from the singleton set.
    let mut fallback = FallbackMinimizerMap::new();
    for &kmer in &singletons {
        fallback.register_candidate(kmer);
    }

    let mut splitters = SplitterSet::new(k, singletons.len().max(16));

    // Step 3/4: replay contigs, cutting a splitter every `segment_size`
    // bases once a singleton k-mer is seen, and always taking the
    // rightmost candidate of each contig.
    for contig in reference_contigs {
        let mut window = KmerWindow::new(k);
        let mut base_counter: u32 = 0;
        let mut prev_splitter: u64 = super::group_table::OPEN;
        let mut span_fallback_kmers: Vec<u64> = Vec::new();
        let mut last_singleton_seen: Option<u64> = None;

        for &code in contig {
            base_counter += 1;
            let km = match window.push(code) {
                Some(km) => km,
                None => continue,
            };
            if fallback.map.contains_key(&km.canonical) {
                span_fallback_kmers.push(km.canonical);
            }
            if singletons.contains(&km.canonical) {
                last_singleton_seen = Some(km.canonical);
                if base_counter >= segment_size {
                    splitters.insert(km.canonical);
                    fallback.record_span(&span_fallback_kmers, prev_splitter, km.canonical);
                    span_fallback_kmers.clear();
                    prev_splitter = km.canonical;
                    base_counter = 0;
                }
            }
        }

        // Rightmost candidate of the contig, if it wasn't already chosen
        // as the last cut (keeps a splitter anchored at each contig tail).
        if let Some(last) = last_singleton_seen {
            if splitters.insert(last) {
                fallback.record_span(&span_fallback_kmers, prev_splitter, last);
            }
        }
    }

    DiscoveryResult {
        splitters,
        fallback,
        duplicated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::encode_seq;

    #[test]
    fn discovery_produces_at_least_one_splitter_for_a_long_contig() {
        let seq = encode_seq(&b"ACGTTCAGGCATGGACCTTAGCCA".repeat(10));
        let result = discover(&[seq], 15, 50, false);
        assert!(result.splitters.len() >= 1);
    }

    #[test]
    fn repeated_kmers_are_excluded_from_splitters() {
        // Every 4-mer in a long run of "ACGT" repeats, so nothing should
        // qualify as a singleton splitter candidate.
        let seq = encode_seq(&b"ACGT".repeat(50));
        let result = discover(&[seq], 4, 20, false);
        assert_eq!(result.splitters.len(), 0);
    }

    #[test]
    fn adaptive_mode_records_duplicated_kmers() {
        let seq = encode_seq(&b"ACGT".repeat(50));
        let result = discover(&[seq], 4, 20, true);
        assert!(!result.duplicated.is_empty());
    }
}
