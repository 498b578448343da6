//! C3 — the reference-relative differential encoder (LZ-diff).
//!
//! One [`LzDiff`] is owned by each group (C4): it is prepared once against
//! the group's reference bytes, then `encode`s every other member of the
//! group as a token stream of literals, N-runs, and matches against that
//! reference. The index lives in [`hash_index`].

mod hash_index;

use hash_index::HashIndex;

use crate::alphabet;

/// One k-mer is indexed every `hashing_step` reference positions ("sparse"
/// hash table). The V1 codec disables this (indexes every position, no
/// back-extension); V2 uses the sparse scheme with back-extension.
const HASHING_STEP_V2: u32 = 4;
const HASHING_STEP_V1: u32 = 1;

const MAX_NO_TRIES: usize = 64;
const MIN_NRUN_LEN: usize = 4;

/// Selects the token-stream dialect. Archives with format major ≥ 2 always
/// encode with V2; V1 remains only to decode legacy archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecVersion {
    V1,
    V2,
}

impl CodecVersion {
    fn hashing_step(self) -> u32 {
        match self {
            CodecVersion::V1 => HASHING_STEP_V1,
            CodecVersion::V2 => HASHING_STEP_V2,
        }
    }

    /// V1 never rolls back already-emitted literals to try a longer
    /// back-extended match; V2 does. This is the one behavioral difference
    /// between the two dialects — the token grammar itself (literal / N-run
    /// / match byte layout) is shared.
    fn uses_back_extension(self) -> bool {
        matches!(self, CodecVersion::V2)
    }
}

/// Reference-relative encoder/decoder for one group.
pub struct LzDiff {
    version: CodecVersion,
    min_match_len: usize,
    key_len: usize,
    hashing_step: u32,
    index: Option<HashIndex>,
    reference: Vec<u8>,
}

impl LzDiff {
    /// Creates a codec for `min_match_len` ∈ `[15, 32]`.
    pub fn new(version: CodecVersion, min_match_len: u32) -> Self {
        let hashing_step = version.hashing_step();
        let key_len = (min_match_len - hashing_step + 1) as usize;
        LzDiff {
            version,
            min_match_len: min_match_len as usize,
            key_len,
            hashing_step,
            index: None,
            reference: Vec::new(),
        }
    }

    pub fn min_match_len(&self) -> usize {
        self.min_match_len
    }

    pub fn reference(&self) -> &[u8] {
        &self.reference
    }

    /// Builds the hash index over canonical-value k-mers of `reference`
    ///. Must be called before `encode`/`decode`.
    pub fn prepare(&mut self, reference: Vec<u8>) {
        let candidates = self.collect_candidates(&reference);
        self.index = Some(HashIndex::build(&candidates, reference.len(), self.hashing_step));
        self.reference = reference;
    }

    /// Canonical-value k-mers (not reverse-complement-folded — the index
    /// keys on the *direct* 2-bit code of the window, matching the
    /// reference position it starts at) at every `hashing_step`-th
    /// position, paired with their start offset.
    fn collect_candidates(&self, reference: &[u8]) -> Vec<(u64, usize)> {
        let mut out = Vec::new();
        let mut pos = 0usize;
        while pos + self.key_len <= reference.len() {
            if let Some(code) = Self::direct_code(&reference[pos..pos + self.key_len]) {
                out.push((code, pos));
            }
            pos += self.hashing_step as usize;
        }
        out
    }

    /// Packs `key_len` ACGT codes into a 2-bit-per-base value, or `None` if
    /// any symbol is not ACGT (the key is then "invalid").
    fn direct_code(codes: &[u8]) -> Option<u64> {
        let mut x = 0u64;
        for &c in codes {
            if c > alphabet::T {
                return None;
            }
            x = (x << 2) | c as u64;
        }
        Some(x)
    }

    fn get_nrun_len(text: &[u8], max_len: usize) -> usize {
        if max_len < 3 || text[0] != alphabet::N || text[1] != alphabet::N || text[2] != alphabet::N {
            return 0;
        }
        let mut len = 3;
        while len < max_len && text[len] == alphabet::N {
            len += 1;
        }
        len
    }

    fn compare_fwd(a: &[u8], b: &[u8], max_len: usize) -> usize {
        let mut len = 0;
        while len < max_len && a[len] == b[len] {
            len += 1;
        }
        len
    }

    /// Extends backward from `text[..i]` / `reference[..ref_pos]`, up to
    /// `max_back` bytes, while both sides keep matching.
    fn compare_bck(&self, text: &[u8], i: usize, ref_pos: usize, max_back: usize) -> usize {
        let mut b = 0;
        while b < max_back && text[i - 1 - b] == self.reference[ref_pos - 1 - b] {
            b += 1;
        }
        b
    }

    /// Probes the hash index for the best match starting at cursor `i` in
    /// `text`, extending forward and (for V2) backward into the
    /// `no_prev_literals` bytes already emitted as literals. Returns
    /// `(ref_pos, len_bck, len_fwd)` when the combined length reaches
    /// `min_match_len`.
    fn find_best_match(
        &self,
        key: u64,
        text: &[u8],
        i: usize,
        max_len: usize,
        no_prev_literals: usize,
    ) -> Option<(usize, usize, usize)> {
        let index = self.index.as_ref()?;
        let mut best: Option<(usize, usize, usize)> = None; // (ref_pos, len_bck, len_fwd)
        let mut tries = 0usize;

        index.probe(key, MAX_NO_TRIES, |ref_pos| {
            tries += 1;
            let cand = &self.reference[ref_pos..];
            let f_len = Self::compare_fwd(&text[i..], cand, max_len.min(cand.len()));

            let b_len = if self.version.uses_back_extension() {
                let max_back = no_prev_literals.min(ref_pos);
                self.compare_bck(text, i, ref_pos, max_back)
            } else {
                0
            };

            let total = b_len + f_len;
            let cur_total = best.map(|(_, bb, ff)| bb + ff).unwrap_or(0);
            if total > cur_total {
                best = Some((ref_pos, b_len, f_len));
            }
            tries < MAX_NO_TRIES
        });

        best.filter(|(_, b, f)| b + f >= self.min_match_len)
    }

    /// Encodes `text` against the prepared reference, writing the token
    /// stream to `out`. Never materializes a `Token` list — tokens are
    /// written directly as bytes, matching the original's single-pass
    /// encoder.
    pub fn encode(&self, text: &[u8]) -> Vec<u8> {
        let mut encoded = Vec::new();
        self.run(text, &mut Sink::Bytes(&mut encoded), usize::MAX);
        encoded
    }

    /// Runs the encoder without materializing the delta, returning the
    /// total token-byte cost, aborting early once it would exceed
    /// `upper_bound`.
    pub fn estimate(&self, text: &[u8], upper_bound: usize) -> usize {
        let mut cost = 0usize;
        self.run(text, &mut Sink::Cost(&mut cost), upper_bound)
    }

    /// Per-input-byte cost vector: a match/N-run contributes its
    /// whole token cost to either the first byte of its span (`prefix_mode`)
    /// or the last, and 0 to every other byte it spans.
    pub fn coding_cost_vector(&self, text: &[u8], prefix_mode: bool) -> Vec<u32> {
        let mut costs = Vec::with_capacity(text.len());
        self.run(text, &mut Sink::CostVector(&mut costs, prefix_mode), usize::MAX);
        costs
    }

    /// Shared encode/estimate/cost-vector driver: identical matching policy,
    /// differing only in what happens to each emitted token.
    fn run(&self, text: &[u8], sink: &mut Sink, upper_bound: usize) -> usize {
        let text_size = text.len();
        let mut i = 0usize;
        let mut pred_pos = 0usize;
        let mut no_prev_literals = 0usize;

        while i + self.key_len < text_size {
            let key = Self::direct_code(&text[i..i + self.key_len]);

            if key.is_none() {
                let max_len = text_size - i;
                let nrun_len = Self::get_nrun_len(&text[i..], max_len);
                if nrun_len >= MIN_NRUN_LEN {
                    sink.emit_nrun(nrun_len);
                    i += nrun_len;
                    no_prev_literals = 0;
                } else {
                    sink.emit_literal(text[i]);
                    i += 1;
                    pred_pos += 1;
                    no_prev_literals += 1;
                }
                if sink.cost() > upper_bound {
                    return sink.cost();
                }
                continue;
            }

            let max_len = text_size - i;
            match self.find_best_match(key.unwrap(), text, i, max_len, no_prev_literals) {
                None => {
                    sink.emit_literal(text[i]);
                    i += 1;
                    pred_pos += 1;
                    no_prev_literals += 1;
                }
                Some((ref_pos, len_bck, len_fwd)) => {
                    if len_bck > 0 {
                        sink.rollback(len_bck);
                        i -= len_bck;
                        pred_pos -= len_bck;
                    }
                    let match_pos = ref_pos - len_bck;
                    let total_len = len_bck + len_fwd;
                    sink.emit_match(match_pos, total_len, pred_pos, self.min_match_len);
                    pred_pos = match_pos + total_len;
                    i += total_len;
                    no_prev_literals = 0;
                }
            }

            if sink.cost() > upper_bound {
                return sink.cost();
            }
        }

        while i < text_size {
            sink.emit_literal(text[i]);
            i += 1;
        }

        sink.cost()
    }

    /// Decodes a token stream produced by [`LzDiff::encode`] back into
    /// bytes, using this codec's prepared reference and `min_match_len` to
    /// recover true match lengths from the stored `len - min_match_len`
    /// field.
    pub fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let mut decoded = Vec::new();
        let mut pred_pos = 0usize;
        let mut p = 0usize;

        while p < encoded.len() {
            let b = encoded[p];
            if b == NRUN_MARKER {
                p += 1;
                let (len_minus, np) = read_int(encoded, p)?;
                if encoded.get(np) != Some(&alphabet::N) {
                    return Err(DecodeError::MalformedToken);
                }
                p = np + 1;
                let len = (len_minus + MIN_NRUN_LEN as i64) as usize;
                decoded.resize(decoded.len() + len, alphabet::N);
            } else if b == LITERAL_ESCAPE {
                decoded.push(LITERAL_ESCAPE);
                p += 1;
                pred_pos += 1;
            } else if (b'A'..=(b'A' + 20)).contains(&b) {
                decoded.push(b - b'A');
                p += 1;
                pred_pos += 1;
            } else {
                let (dif_pos, np) = read_int(encoded, p)?;
                if encoded.get(np) != Some(&b',') {
                    return Err(DecodeError::MalformedToken);
                }
                let (len_minus, np2) = read_int(encoded, np + 1)?;
                if encoded.get(np2) != Some(&b'.') {
                    return Err(DecodeError::MalformedToken);
                }
                p = np2 + 1;

                let ref_pos = dif_pos + pred_pos as i64;
                if ref_pos < 0 {
                    return Err(DecodeError::OutOfRange);
                }
                let ref_pos = ref_pos as usize;
                let len = (len_minus + self.min_match_len as i64) as usize;
                let end = ref_pos.checked_add(len).ok_or(DecodeError::OutOfRange)?;
                if end > self.reference.len() {
                    return Err(DecodeError::OutOfRange);
                }
                decoded.extend_from_slice(&self.reference[ref_pos..end]);
                pred_pos = end;
            }
        }

        Ok(decoded)
    }
}

/// N-run start marker (outside the printable literal/digit range).
const NRUN_MARKER: u8 = 0x1E;
/// Rare escape for a literal byte whose code is outside `0..=20` (never
/// produced by this crate's 16-symbol alphabet, but accepted on decode for
/// forward compatibility with archives carrying a wider symbol set).
const LITERAL_ESCAPE: u8 = b'!';

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed token in delta stream")]
    MalformedToken,
    #[error("delta references an out-of-range reference position")]
    OutOfRange,
}

fn read_int(buf: &[u8], mut p: usize) -> Result<(i64, usize), DecodeError> {
    let mut neg = false;
    if buf.get(p) == Some(&b'-') {
        neg = true;
        p += 1;
    }
    let mut x: i64 = 0;
    let start = p;
    while let Some(&b) = buf.get(p) {
        if !b.is_ascii_digit() {
            break;
        }
        x = x * 10 + (b - b'0') as i64;
        p += 1;
    }
    if p == start {
        return Err(DecodeError::MalformedToken);
    }
    Ok((if neg { -x } else { x }, p))
}

fn append_int(out: &mut Vec<u8>, mut x: i64) {
    if x == 0 {
        out.push(b'0');
        return;
    }
    if x < 0 {
        out.push(b'-');
        x = -x;
    }
    let start = out.len();
    while x > 0 {
        out.push(b'0' + (x % 10) as u8);
        x /= 10;
    }
    out[start..].reverse();
}

/// Destination for one token's encoded form: either the literal bytes
/// (encode), a running cost total with early-abort (estimate), or a
/// per-input-byte cost vector (coding_cost_vector). Keeping the matching
/// policy in [`LzDiff::run`] shared across all three avoids re-deriving the
/// greedy/back-extension logic three times.
enum Sink<'a> {
    Bytes(&'a mut Vec<u8>),
    Cost(&'a mut usize),
    CostVector(&'a mut Vec<u32>, bool),
}

impl<'a> Sink<'a> {
    fn cost(&self) -> usize {
        match self {
            Sink::Bytes(v) => v.len(),
            Sink::Cost(c) => **c,
            Sink::CostVector(v, _) => v.iter().map(|&x| x as usize).sum(),
        }
    }

    fn emit_literal(&mut self, code: u8) {
        match self {
            Sink::Bytes(v) => {
                if code <= 20 {
                    v.push(b'A' + code);
                } else {
                    v.push(LITERAL_ESCAPE);
                }
            }
            Sink::Cost(c) => **c += 1,
            Sink::CostVector(v, _) => v.push(1),
        }
    }

    fn emit_nrun(&mut self, len: usize) {
        let cost = 2 + digit_len((len - MIN_NRUN_LEN) as u64);
        match self {
            Sink::Bytes(v) => {
                v.push(NRUN_MARKER);
                append_int(v, (len - MIN_NRUN_LEN) as i64);
                v.push(alphabet::N);
            }
            Sink::Cost(c) => **c += cost,
            Sink::CostVector(v, prefix) => {
                if *prefix {
                    v.push(cost as u32);
                    v.extend(std::iter::repeat(0).take(len - 1));
                } else {
                    v.extend(std::iter::repeat(0).take(len - 1));
                    v.push(cost as u32);
                }
            }
        }
    }

    fn emit_match(&mut self, ref_pos: usize, len: usize, pred_pos: usize, min_match_len: usize) {
        let dif_pos = ref_pos as i64 - pred_pos as i64;
        let cost = int_len(dif_pos) + 1 + digit_len((len - min_match_len) as u64) + 1;
        match self {
            Sink::Bytes(v) => {
                append_int(v, dif_pos);
                v.push(b',');
                append_int(v, (len - min_match_len) as i64);
                v.push(b'.');
            }
            Sink::Cost(c) => **c += cost,
            Sink::CostVector(v, prefix) => {
                if *prefix {
                    v.push(cost as u32);
                    v.extend(std::iter::repeat(0).take(len - 1));
                } else {
                    v.extend(std::iter::repeat(0).take(len - 1));
                    v.push(cost as u32);
                }
            }
        }
    }

    fn rollback(&mut self, len_bck: usize) {
        match self {
            Sink::Bytes(v) => {
                for _ in 0..len_bck {
                    v.pop();
                }
            }
            Sink::Cost(c) => **c = c.saturating_sub(len_bck),
            Sink::CostVector(v, _) => {
                for _ in 0..len_bck {
                    v.pop();
                }
            }
        }
    }
}

fn digit_len(x: u64) -> usize {
    if x == 0 {
        return 1;
    }
    let mut n = 0;
    let mut x = x;
    while x > 0 {
        n += 1;
        x /= 10;
    }
    n
}

fn int_len(x: i64) -> usize {
    if x >= 0 {
        digit_len(x as u64)
    } else {
        1 + digit_len((-x) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::encode_seq;

    fn codec(reference: &[u8], version: CodecVersion) -> LzDiff {
        let mut lz = LzDiff::new(version, 20);
        lz.prepare(encode_seq(reference));
        lz
    }

    #[test]
    fn identical_sequence_round_trips_as_one_match() {
        let reference = b"ACGTACGGTTCAGTCAGGTACCAGTACGTTGACCATGGAGTTCAGGACTTGCA".repeat(4);
        let lz = codec(&reference, CodecVersion::V2);
        let member = encode_seq(&reference);
        let encoded = lz.encode(&member);
        let decoded = lz.decode(&encoded).unwrap();
        assert_eq!(decoded, member);
    }

    #[test]
    fn single_snp_round_trips() {
        let reference = b"ACGTACGGTTCAGTCAGGTACCAGTACGTTGACCATGGAGTTCAGGACTTGCA".repeat(4);
        let lz = codec(&reference, CodecVersion::V2);

        let mut mutated = reference.clone();
        let mid = mutated.len() / 2;
        mutated[mid] = if mutated[mid] == b'A' { b'C' } else { b'A' };
        let member = encode_seq(&mutated);

        let encoded = lz.encode(&member);
        let decoded = lz.decode(&encoded).unwrap();
        assert_eq!(decoded, member);
    }

    #[test]
    fn n_run_round_trips() {
        let reference = b"ACGTACGGTTCAGTCAGGTACCAGTACGTTGACCATGGAGTTCAGGACTTGCA".repeat(4);
        let lz = codec(&reference, CodecVersion::V2);

        let mut mutated = reference.clone();
        for b in mutated[10..20].iter_mut() {
            *b = b'N';
        }
        let member = encode_seq(&mutated);

        let encoded = lz.encode(&member);
        let decoded = lz.decode(&encoded).unwrap();
        assert_eq!(decoded, member);
    }

    #[test]
    fn v1_codec_has_no_back_extension() {
        assert!(!CodecVersion::V1.uses_back_extension());
        assert!(CodecVersion::V2.uses_back_extension());
    }

    #[test]
    fn estimate_matches_encode_length() {
        let reference = b"ACGTACGGTTCAGTCAGGTACCAGTACGTTGACCATGGAGTTCAGGACTTGCA".repeat(4);
        let lz = codec(&reference, CodecVersion::V2);
        let member = encode_seq(&reference);
        let encoded = lz.encode(&member);
        let estimated = lz.estimate(&member, usize::MAX);
        assert_eq!(estimated, encoded.len());
    }

    #[test]
    fn coding_cost_vector_has_one_entry_per_input_byte() {
        let reference = b"ACGTACGGTTCAGTCAGGTACCAGTACGTTGACCATGGAGTTCAGGACTTGCA".repeat(4);
        let lz = codec(&reference, CodecVersion::V2);
        let member = encode_seq(&reference);
        let costs = lz.coding_cost_vector(&member, true);
        assert_eq!(costs.len(), member.len());
    }

    #[test]
    fn appended_tail_literal_outside_any_match_round_trips() {
        let reference = b"ACGTACGGTTCAGTCAGGTACCAGTACGTTGACCATGGAGTTCAGGACTTGCA".repeat(4);
        let lz = codec(&reference, CodecVersion::V2);

        let mut mutated = reference.clone();
        mutated.extend_from_slice(b"GGGGCCCCTTTTAAAA");
        let member = encode_seq(&mutated);

        let encoded = lz.encode(&member);
        let decoded = lz.decode(&encoded).unwrap();
        assert_eq!(decoded, member);
    }
}
