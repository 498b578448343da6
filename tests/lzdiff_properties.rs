//! Property-style checks for the LZ-diff codec (C3) and the splitter set's
//! monotonicity guarantee, exercised across a spread of deterministic inputs
//! rather than the teacher's typical single hand-picked example per test.

use pgarc::alphabet::encode_seq;
use pgarc::lzdiff::{CodecVersion, LzDiff};
use pgarc::{Compressor, CompressorConfig, Decompressor, DecompressorConfig};
use tempfile::tempdir;

fn lcg(seed: &mut u64) -> u64 {
    *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    *seed
}

fn random_dna(seed: &mut u64, len: usize) -> Vec<u8> {
    const BASES: &[u8] = b"ACGT";
    (0..len).map(|_| BASES[(lcg(seed) >> 33) as usize % 4]).collect()
}

/// Invariant 1: `decode(encode(S, R), R) == S` for a spread of references and
/// candidates, including ones built by mutating a handful of positions of
/// the reference (the common case this codec is tuned for).
#[test]
fn encode_decode_round_trips_for_many_candidates() {
    let mut seed = 0xC0FFEEu64;
    for trial in 0..40 {
        let ref_len = 80 + (trial % 5) * 40;
        let reference = random_dna(&mut seed, ref_len);

        let mut candidate = reference.clone();
        let mutations = trial % 7;
        for _ in 0..mutations {
            let pos = (lcg(&mut seed) as usize) % candidate.len();
            candidate[pos] = b"ACGT"[(lcg(&mut seed) >> 40) as usize % 4];
        }
        // Every 5th trial also exercises an N-run.
        if trial % 5 == 0 && candidate.len() > 10 {
            for b in candidate[3..9].iter_mut() {
                *b = b'N';
            }
        }

        let mut codec = LzDiff::new(CodecVersion::V2, 20);
        codec.prepare(encode_seq(&reference));
        let encoded = codec.encode(&encode_seq(&candidate));
        let decoded = codec.decode(&encoded).expect("decode must succeed for a self-produced encoding");
        assert_eq!(decoded, encode_seq(&candidate), "round-trip mismatch on trial {trial}");
    }
}

#[test]
fn encoding_a_sequence_identical_to_the_reference_yields_an_empty_delta() {
    let reference = random_dna(&mut 42, 200);
    let mut codec = LzDiff::new(CodecVersion::V2, 20);
    codec.prepare(encode_seq(&reference));
    let encoded = codec.encode(&encode_seq(&reference));
    assert!(encoded.is_empty(), "identical sequence should produce the reserved empty delta");
    let decoded = codec.decode(&encoded).unwrap();
    assert_eq!(decoded, encode_seq(&reference));
}

/// Invariant 7: across an append sequence, the splitter set and group map
/// only grow. Checked indirectly: every group id addressable in the base
/// archive must still resolve to the same reference-relative content after
/// appending a further sample.
#[test]
fn splitter_and_group_state_are_supersets_after_append() {
    let dir = tempdir().unwrap();
    let base_path = dir.path().join("base.pgarc");
    let appended_path = dir.path().join("appended.pgarc");

    let config = CompressorConfig {
        k: 11,
        min_match_len: 15,
        segment_size: 30,
        pack_cardinality: 10,
        num_threads: 2,
        adaptive: false,
        concatenated_genomes: false,
    };

    let reference = encode_seq(&b"ACGT".repeat(30));
    let mut compressor = Compressor::create(&base_path, config).unwrap();
    compressor.add_sample("ref_sample", &[("chr1".into(), reference.clone())]).unwrap();
    compressor.close().unwrap();

    let base_archive = std::sync::Arc::new(pgarc::archive::Archive::open(&base_path).unwrap());
    let base_splitters_id = base_archive.get_stream_id("splitters").unwrap();
    let (base_splitters_raw, _) = base_archive.get_part(base_splitters_id, 0).unwrap().unwrap();

    let mut appender = Compressor::append(&base_path, &appended_path, config).unwrap();
    let mut mutant = b"ACGT".repeat(30);
    mutant[50] = b'T';
    appender
        .add_sample("mutant", &[("chr1".into(), encode_seq(&mutant))])
        .unwrap();
    appender.close().unwrap();

    let appended_archive = pgarc::archive::Archive::open(&appended_path).unwrap();
    let appended_splitters_id = appended_archive.get_stream_id("splitters").unwrap();
    let (appended_splitters_raw, _) = appended_archive.get_part(appended_splitters_id, 0).unwrap().unwrap();

    let base_set: std::collections::HashSet<[u8; 8]> =
        base_splitters_raw.chunks_exact(8).map(|c| c.try_into().unwrap()).collect();
    let appended_set: std::collections::HashSet<[u8; 8]> =
        appended_splitters_raw.chunks_exact(8).map(|c| c.try_into().unwrap()).collect();
    assert!(base_set.is_subset(&appended_set), "the splitter set must only grow across an append");

    let mut dec = Decompressor::open(&appended_path, DecompressorConfig::default()).unwrap();
    let got = dec.get_contig_sequence("ref_sample", "chr1", 0, reference.len() as i64 - 1).unwrap();
    assert_eq!(got, pgarc::alphabet::decode_seq(&reference));
}
