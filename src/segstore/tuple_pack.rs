//! Reference-storage helpers for C4: periodicity detection and the
//! tuple-packing scheme used when a reference's alphabet is narrow enough
//! that packing several symbols per byte beats zstd on raw bytes alone.

/// Plain bytes at high zstd effort.
pub const VARIANT_PLAIN: u8 = 0;
/// Tuple-packed bytes, trailer byte carries `(bytes_per_tuple << 4) | trailing_count`.
pub const VARIANT_PACKED: u8 = 1;

const STRIDE_RANGE: std::ops::Range<usize> = 4..32;
const PERIODICITY_THRESHOLD: f64 = 0.5;

/// Scores `reference` for internal periodicity over strides `4..32`: the
/// fraction of ACGT positions `i` where `ref[i] == ref[i + stride]`. Returns
/// the best stride's fraction, or `0.0` if the reference has fewer than two
/// ACGT positions at any candidate stride.
pub fn best_periodicity(reference: &[u8]) -> f64 {
    let mut best = 0.0f64;
    for stride in STRIDE_RANGE {
        if stride >= reference.len() {
            continue;
        }
        let mut total = 0u64;
        let mut same = 0u64;
        for i in 0..reference.len() - stride {
            if reference[i] > crate::alphabet::T || reference[i + stride] > crate::alphabet::T {
                continue;
            }
            total += 1;
            if reference[i] == reference[i + stride] {
                same += 1;
            }
        }
        if total == 0 {
            continue;
        }
        let frac = same as f64 / total as f64;
        if frac > best {
            best = frac;
        }
    }
    best
}

/// Picks the packing radix for `reference`'s actual alphabet: 4 (2 bits) if
/// every symbol is ACGT, 6 (≈2.6 bits, packed 3-per-byte) if the alphabet
/// has at most 6 distinct values, 16 (4 bits, packed 2-per-byte) if at most
/// 16 — which is always true for this crate's 16-symbol alphabet, so this
/// is really choosing between three fixed widths of "how densely do the
/// symbols actually used here pack".
fn choose_radix(reference: &[u8]) -> (u32, u32) {
    let mut present = [false; 16];
    for &b in reference {
        present[b as usize] = true;
    }
    let distinct = present.iter().filter(|&&p| p).count();
    if distinct <= 4 {
        (4, 4) // 4 symbols/byte, base 4
    } else if distinct <= 6 {
        (3, 6) // 3 symbols/byte, base 6
    } else {
        (2, 16) // 2 symbols/byte, base 16
    }
}

/// Packs `reference` (numeric codes `0..16`) into tuples of `per_byte`
/// symbols per output byte using `radix`, appending a trailer byte
/// `(per_byte << 4) | trailing_count` where `trailing_count` is the number
/// of symbols represented by the final (partially filled) output byte.
pub fn pack(reference: &[u8]) -> Vec<u8> {
    let (per_byte, radix) = choose_radix(reference);
    let mut out = Vec::with_capacity(reference.len() / per_byte as usize + 2);

    let mut chunk_iter = reference.chunks(per_byte as usize);
    let mut last_len = per_byte as usize;
    for chunk in &mut chunk_iter {
        let mut v: u32 = 0;
        for &sym in chunk {
            v = v * radix + sym as u32;
        }
        for _ in chunk.len()..per_byte as usize {
            v *= radix; // pad short trailing chunk with zeros
        }
        out.push(v as u8);
        last_len = chunk.len();
    }

    out.push(((per_byte as u8) << 4) | (last_len as u8 & 0x0F));
    out
}

/// Inverse of [`pack`]; `original_len` is the exact symbol count to
/// reconstruct (needed because the last output byte may be zero-padded).
pub fn unpack(packed: &[u8], original_len: usize) -> Vec<u8> {
    let marker = packed[packed.len() - 1];
    let per_byte = (marker >> 4) as usize;
    let radix = match per_byte {
        4 => 4u32,
        3 => 6,
        2 => 16,
        _ => unreachable!("packed reference trailer carries an invalid tuple width"),
    };
    let body = &packed[..packed.len() - 1];

    let mut out = Vec::with_capacity(original_len);
    for &byte in body {
        let mut v = byte as u32;
        let mut syms = [0u8; 4];
        for i in (0..per_byte).rev() {
            syms[i] = (v % radix) as u8;
            v /= radix;
        }
        out.extend_from_slice(&syms[..per_byte]);
    }
    out.truncate(original_len);
    out
}

/// Decides which reference-storage variant to use and returns the variant
/// tag plus the bytes to compress (either `reference` itself for
/// [`VARIANT_PLAIN`] or [`pack`]'s output for [`VARIANT_PACKED`]).
pub fn choose_storage(reference: &[u8]) -> (u8, Vec<u8>) {
    if best_periodicity(reference) >= PERIODICITY_THRESHOLD {
        (VARIANT_PLAIN, reference.to_vec())
    } else {
        (VARIANT_PACKED, pack(reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trip_acgt_only() {
        let reference: Vec<u8> = b"ACGTACGTACGTACGTACGTACG"
            .iter()
            .map(|&b| crate::alphabet::to_code(b))
            .collect();
        let packed = pack(&reference);
        let unpacked = unpack(&packed, reference.len());
        assert_eq!(unpacked, reference);
    }

    #[test]
    fn pack_unpack_round_trip_with_ambiguity_codes() {
        let reference: Vec<u8> = b"ACGTRYSWACGTRYSWACGT"
            .iter()
            .map(|&b| crate::alphabet::to_code(b))
            .collect();
        let packed = pack(&reference);
        let unpacked = unpack(&packed, reference.len());
        assert_eq!(unpacked, reference);
    }

    #[test]
    fn periodic_reference_scores_high() {
        let reference: Vec<u8> = b"ACGT".repeat(20).iter().map(|&b| crate::alphabet::to_code(b)).collect();
        assert!(best_periodicity(&reference) >= PERIODICITY_THRESHOLD);
    }

    #[test]
    fn periodic_reference_scores_higher_than_aperiodic_one() {
        let periodic: Vec<u8> = b"ACGT".repeat(40).iter().map(|&b| crate::alphabet::to_code(b)).collect();
        let mut aperiodic = Vec::new();
        let mut state: u32 = 12345;
        for _ in 0..160 {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            aperiodic.push(crate::alphabet::to_code(b"ACGT"[(state >> 16) as usize % 4]));
        }
        assert!(best_periodicity(&periodic) > best_periodicity(&aperiodic));
    }
}
