//! Black-box round-trip scenarios driven entirely through the public
//! `Compressor`/`Decompressor` facade, one archive file per test.

use pgarc::alphabet::{decode_seq, encode_seq};
use pgarc::{Compressor, CompressorConfig, Decompressor, DecompressorConfig};
use tempfile::tempdir;

fn small_config() -> CompressorConfig {
    CompressorConfig {
        k: 11,
        min_match_len: 15,
        segment_size: 30,
        pack_cardinality: 10,
        num_threads: 2,
        adaptive: false,
        concatenated_genomes: false,
    }
}

#[test]
fn n_run_collapses_to_a_single_token_and_round_trips() {
    // S5: `ACGT` + 1000 x `N` + `ACGT`.
    let dir = tempdir().unwrap();
    let path = dir.path().join("s5.pgarc");

    let mut reference = b"ACGT".repeat(20);
    let mut mutant = b"ACGT".to_vec();
    mutant.extend(std::iter::repeat(b'N').take(1000));
    mutant.extend_from_slice(b"ACGT");
    reference.truncate(mutant.len().max(reference.len()));

    let mut compressor = Compressor::create(&path, small_config()).unwrap();
    compressor
        .add_sample("ref_sample", &[("chr1".into(), encode_seq(&reference))])
        .unwrap();
    compressor
        .add_sample("n_sample", &[("chr1".into(), encode_seq(&mutant))])
        .unwrap();
    compressor.close().unwrap();

    let mut dec = Decompressor::open(&path, DecompressorConfig::default()).unwrap();
    let seq = dec.get_contig_sequence("n_sample", "chr1", 0, mutant.len() as i64 - 1).unwrap();
    assert_eq!(seq, mutant);
    assert_eq!(decode_seq(&encode_seq(&seq)), mutant);
    dec.close().unwrap();
}

#[test]
fn append_preserves_content_of_the_original_archive_and_the_new_sample() {
    // S6: create(A, [ref]), append(A, extra) -> both samples readable, content
    // identical to what would have been ingested directly.
    let dir = tempdir().unwrap();
    let base_path = dir.path().join("base.pgarc");
    let appended_path = dir.path().join("appended.pgarc");

    let reference = encode_seq(&b"ACGT".repeat(25));
    let extra = encode_seq(&{
        let mut v = b"ACGT".repeat(25);
        v[50] = b'T';
        v
    });

    let mut compressor = Compressor::create(&base_path, small_config()).unwrap();
    compressor.add_sample("ref_sample", &[("chr1".into(), reference.clone())]).unwrap();
    compressor.close().unwrap();

    let mut appender = Compressor::append(&base_path, &appended_path, small_config()).unwrap();
    appender.add_sample("extra_sample", &[("chr1".into(), extra.clone())]).unwrap();
    appender.close().unwrap();

    let mut dec = Decompressor::open(&appended_path, DecompressorConfig::default()).unwrap();
    assert_eq!(dec.list_samples(), vec!["ref_sample".to_string(), "extra_sample".to_string()]);

    let got_ref = dec.get_contig_sequence("ref_sample", "chr1", 0, reference.len() as i64 - 1).unwrap();
    assert_eq!(got_ref, decode_seq(&reference));

    let got_extra = dec.get_contig_sequence("extra_sample", "chr1", 0, extra.len() as i64 - 1).unwrap();
    assert_eq!(got_extra, decode_seq(&extra));
    dec.close().unwrap();
}

#[test]
fn dedup_inserting_the_same_segment_twice_reuses_the_in_group_id() {
    // Invariant 6: the same non-reference segment inserted twice into the
    // same group gets the same in_group_id and the delta stream does not
    // grow on the second insert.
    let dir = tempdir().unwrap();
    let path = dir.path().join("dedup.pgarc");

    let reference = encode_seq(&b"ACGT".repeat(25));
    let mut mutated = b"ACGT".repeat(25);
    mutated[50] = b'T';
    let mutated = encode_seq(&mutated);

    let mut compressor = Compressor::create(&path, small_config()).unwrap();
    compressor.add_sample("ref_sample", &[("chr1".into(), reference)]).unwrap();
    compressor
        .add_sample("dup_a", &[("chr1".into(), mutated.clone())])
        .unwrap();
    compressor
        .add_sample("dup_b", &[("chr1".into(), mutated.clone())])
        .unwrap();
    compressor.close().unwrap();

    let archive = std::sync::Arc::new(pgarc::archive::Archive::open(&path).unwrap());
    let (k, _mml, pack, seg_size) = pgarc::engine::read_params(&archive).unwrap();
    let collection = pgarc::collection::Collection::open(archive, k, seg_size, pack).unwrap();
    let desc_a = collection.get_contig_desc("dup_a", "chr1").unwrap();
    let desc_b = collection.get_contig_desc("dup_b", "chr1").unwrap();
    assert_eq!(desc_a.segments.len(), desc_b.segments.len());
    for (a, b) in desc_a.segments.iter().zip(desc_b.segments.iter()) {
        assert_eq!(a.group_id, b.group_id);
        assert_eq!(a.in_group_id, b.in_group_id);
    }
}

#[test]
fn region_query_matches_a_slice_of_the_full_reconstructed_sequence() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("region.pgarc");

    let mut seq = b"ACGT".repeat(25);
    seq[60] = b'T';

    let mut compressor = Compressor::create(&path, small_config()).unwrap();
    compressor
        .add_sample("ref_sample", &[("chr1".into(), encode_seq(&b"ACGT".repeat(25)))])
        .unwrap();
    compressor.add_sample("sample", &[("chr1".into(), encode_seq(&seq))]).unwrap();
    compressor.close().unwrap();

    let mut dec = Decompressor::open(&path, DecompressorConfig::default()).unwrap();
    let full = dec.get_contig_sequence("sample", "chr1", 0, seq.len() as i64 - 1).unwrap();
    assert_eq!(full, seq);

    for &(from, to) in &[(0i64, 9i64), (10, 40), (55, 65), (90, 99)] {
        let region = dec.get_contig_sequence("sample", "chr1", from, to).unwrap();
        assert_eq!(region, seq[from as usize..=to as usize]);
    }
}
