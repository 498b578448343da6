//! Open-addressed hash index over canonical k-mers of a reference buffer,
//! used by [`super::LzDiff`] to find match candidates during encoding.
//!
//! Only the *position* is stored per slot, never the key itself: a lookup
//! re-derives the candidate's actual bytes from the reference buffer and
//! compares them directly against the query, which both confirms a true
//! hit and rejects hash collisions in one step. This mirrors the reference
//! implementation's space trade-off of storing positions rather than full
//! keys, and its choice of a narrower position type when the reference is
//! short enough.
//!
//! Positions are always multiples of `hashing_step` (only every
//! `hashing_step`-th start position is indexed), so each slot stores
//! `position / hashing_step` rather than the raw position, which is what
//! lets the "narrow" variant cover reference lengths up to
//! `65535 * hashing_step`.

use xxhash_rust::xxh3::xxh3_64;

const EMPTY_NARROW: u16 = u16::MAX;
const EMPTY_WIDE: u32 = u32::MAX;

/// Threshold (in indexed positions, i.e. `reference_len / hashing_step`)
/// below which the narrow (16-bit) slot width is used.
const NARROW_THRESHOLD: u64 = 65535;

enum Slots {
    Narrow(Vec<u16>),
    Wide(Vec<u32>),
}

pub struct HashIndex {
    slots: Slots,
    mask: u64,
    hashing_step: u32,
}

impl HashIndex {
    /// Builds an index from `(canonical_kmer, start_position)` candidates.
    /// `start_position` must always be a multiple of `hashing_step`.
    pub fn build(candidates: &[(u64, usize)], reference_len: usize, hashing_step: u32) -> Self {
        let indexed_positions = (reference_len as u64 / hashing_step as u64).max(1);
        let narrow = indexed_positions < NARROW_THRESHOLD;

        let min_size = ((candidates.len() as f64 / 0.7).ceil() as u64).max(16);
        let size = min_size.next_power_of_two();
        let mask = size - 1;

        let mut slots = if narrow {
            Slots::Narrow(vec![EMPTY_NARROW; size as usize])
        } else {
            Slots::Wide(vec![EMPTY_WIDE; size as usize])
        };

        for &(key, pos) in candidates {
            let h_pos = (pos as u64) / hashing_step as u64;
            let mut idx = xxh3_64(&key.to_le_bytes()) & mask;
            loop {
                let occupied = match &slots {
                    Slots::Narrow(v) => v[idx as usize] != EMPTY_NARROW,
                    Slots::Wide(v) => v[idx as usize] != EMPTY_WIDE,
                };
                if !occupied {
                    break;
                }
                idx = (idx + 1) & mask;
            }
            match &mut slots {
                Slots::Narrow(v) => v[idx as usize] = h_pos as u16,
                Slots::Wide(v) => v[idx as usize] = h_pos as u32,
            }
        }

        HashIndex {
            slots,
            mask,
            hashing_step,
        }
    }

    /// Iterates reference start positions that hash to the same bucket
    /// chain as `key`, up to `max_tries` slots or the first empty slot,
    /// calling `visit` with each candidate's reference start position.
    /// Returns early (stops visiting) once `visit` returns `false`.
    pub fn probe(&self, key: u64, max_tries: usize, mut visit: impl FnMut(usize) -> bool) {
        let mut idx = xxh3_64(&key.to_le_bytes()) & self.mask;
        for _ in 0..max_tries {
            let h_pos = match &self.slots {
                Slots::Narrow(v) => {
                    let s = v[idx as usize];
                    if s == EMPTY_NARROW {
                        return;
                    }
                    s as u64
                }
                Slots::Wide(v) => {
                    let s = v[idx as usize];
                    if s == EMPTY_WIDE {
                        return;
                    }
                    s as u64
                }
            };
            let pos = (h_pos * self.hashing_step as u64) as usize;
            if !visit(pos) {
                return;
            }
            idx = (idx + 1) & self.mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_probe_round_trip() {
        let candidates = vec![(111u64, 0usize), (222u64, 4usize), (333u64, 8usize)];
        let index = HashIndex::build(&candidates, 100, 4);
        let mut seen = Vec::new();
        index.probe(222, 64, |pos| {
            seen.push(pos);
            true
        });
        assert!(seen.contains(&4));
    }

    #[test]
    fn wide_variant_used_for_long_references() {
        let reference_len = (NARROW_THRESHOLD as usize + 10) * 4;
        let candidates: Vec<(u64, usize)> = (0..10).map(|i| (i as u64, i * 4)).collect();
        let index = HashIndex::build(&candidates, reference_len, 4);
        assert!(matches!(index.slots, Slots::Wide(_)));
    }

    #[test]
    fn narrow_variant_used_for_short_references() {
        let candidates: Vec<(u64, usize)> = (0..10).map(|i| (i as u64, i * 4)).collect();
        let index = HashIndex::build(&candidates, 1000, 4);
        assert!(matches!(index.slots, Slots::Narrow(_)));
    }
}
