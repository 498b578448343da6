//! Blocked Bloom filter mirroring the splitter set: a fast
//! negative-lookup path so most non-splitter k-mers never touch the
//! (larger, slower) splitter hash set at all.
//!
//! Double-hashing (Kirsch–Mitzenmacher): one 64-bit hash is split into two
//! independent 64-bit values `(h1, h2)`, and probe `i` uses
//! `h1 + i*h2 mod block_bits`, confined to a single cache-line-sized block
//! selected by `h1 mod num_blocks` so every lookup touches one block.

use xxhash_rust::xxh3::xxh3_64;
use xxhash_rust::xxh64::xxh64;

const BLOCK_BITS: usize = 512; // one 64-byte cache line
const BLOCK_WORDS: usize = BLOCK_BITS / 64;

/// A resizable blocked Bloom filter over canonical k-mer values.
pub struct BloomFilter {
    blocks: Vec<[u64; BLOCK_WORDS]>,
    num_hashes: usize,
    inserted: usize,
}

fn hash_pair(key: u64) -> (u64, u64) {
    (xxh3_64(&key.to_le_bytes()), xxh64(&key.to_le_bytes(), 0x9e3779b97f4a7c15))
}

impl BloomFilter {
    /// Creates a filter sized for roughly `expected_items`, at a fixed
    /// number of hash functions (4, a reasonable default for the load
    /// factors this filter is resized to stay under — see [`Self::load_factor`]).
    pub fn with_capacity(expected_items: usize) -> Self {
        let num_blocks = (expected_items.max(1) * 2 / BLOCK_BITS).max(1);
        BloomFilter {
            blocks: vec![[0u64; BLOCK_WORDS]; num_blocks],
            num_hashes: 4,
            inserted: 0,
        }
    }

    fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Fraction of `expected_items` capacity consumed relative to the
    /// total bit budget; the engine resizes once this exceeds 0.3.
    pub fn load_factor(&self) -> f64 {
        let total_bits = (self.num_blocks() * BLOCK_BITS) as f64;
        self.inserted as f64 / total_bits
    }

    pub fn insert(&mut self, key: u64) {
        let (mut h1, mut h2) = hash_pair(key);
        let block = &mut self.blocks[(h1 % self.num_blocks() as u64) as usize];
        for i in 1..=self.num_hashes as u64 {
            h1 = h1.wrapping_add(h2);
            h2 = h2.wrapping_add(i);
            let bit = (h1 % BLOCK_BITS as u64) as usize;
            block[bit / 64] |= 1u64 << (bit % 64);
        }
        self.inserted += 1;
    }

    pub fn contains(&self, key: u64) -> bool {
        let (mut h1, mut h2) = hash_pair(key);
        let block = &self.blocks[(h1 % self.num_blocks() as u64) as usize];
        for i in 1..=self.num_hashes as u64 {
            h1 = h1.wrapping_add(h2);
            h2 = h2.wrapping_add(i);
            let bit = (h1 % BLOCK_BITS as u64) as usize;
            if block[bit / 64] & (1u64 << (bit % 64)) == 0 {
                return false;
            }
        }
        true
    }

    /// Rebuilds the filter at roughly double capacity, re-inserting every
    /// key in `all_keys` (the engine calls this with the full splitter set
    /// once [`Self::load_factor`] crosses the 0.3 threshold).
    pub fn resize_and_rebuild(&mut self, all_keys: impl Iterator<Item = u64>) {
        let new_blocks = (self.num_blocks() * 2).max(1);
        self.blocks = vec![[0u64; BLOCK_WORDS]; new_blocks];
        self.inserted = 0;
        for key in all_keys {
            self.insert(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_are_reported_present() {
        let mut bf = BloomFilter::with_capacity(1000);
        let keys = [1u64, 2, 100, 123456789, u64::MAX];
        for &k in &keys {
            bf.insert(k);
        }
        for &k in &keys {
            assert!(bf.contains(k));
        }
    }

    #[test]
    fn load_factor_grows_with_insertions() {
        let mut bf = BloomFilter::with_capacity(1000);
        let before = bf.load_factor();
        for k in 0..500u64 {
            bf.insert(k);
        }
        assert!(bf.load_factor() > before);
    }

    #[test]
    fn resize_preserves_membership() {
        let mut bf = BloomFilter::with_capacity(16);
        let keys: Vec<u64> = (0..64).collect();
        for &k in &keys {
            bf.insert(k);
        }
        bf.resize_and_rebuild(keys.iter().copied());
        for &k in &keys {
            assert!(bf.contains(k));
        }
    }
}
