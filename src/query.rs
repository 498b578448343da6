//! The public read-side facade: opens an archive built by
//! [`crate::engine::Compressor`] and answers region queries by walking C2's
//! segment list for a contig, fetching each segment's bytes through C4, and
//! reassembling them with [`crate::lzdiff`] doing the actual decode.
//!
//! Reconstruction concatenates each segment's bytes in contig order,
//! trimming the leading `k` bytes of every segment but the first (adjacent
//! segments share exactly `k` bytes — the splitter that separates them),
//! and reverse-complementing any segment whose `is_rev_comp` flag is set.
//! The requested `[from, to]` interval is then clamped into `[0, len-1]`
//! and sliced out of the reassembled contig.

use std::path::Path;
use std::sync::Arc;

use crate::archive::Archive;
use crate::collection::Collection;
use crate::engine::{read_group_count, read_params};
use crate::error::{ArchiveError, CatalogError, QueryError, SegstoreError};
use crate::lzdiff::{CodecVersion, DecodeError};
use crate::segstore::SegmentStore;

/// Read-side tuning knobs. Currently just the worker count a caller
/// may use for its own parallel queries; the facade itself does no
/// internal parallel dispatch since a single region query is inherently
/// sequential (each segment's bytes feed the next).
#[derive(Debug, Clone, Copy)]
pub struct DecompressorConfig {
    pub num_threads: usize,
}

impl Default for DecompressorConfig {
    fn default() -> Self {
        DecompressorConfig {
            num_threads: num_cpus::get(),
        }
    }
}

/// The public read-side facade: wraps a read-mode [`Archive`], [`Collection`],
/// and [`SegmentStore`] over one archive file.
pub struct Decompressor {
    archive: Arc<Archive>,
    collection: Collection,
    segstore: SegmentStore,
    k: u32,
    #[allow(dead_code)]
    config: DecompressorConfig,
}

impl Decompressor {
    /// Opens `path` for reading. Re-derives `k`/`min_match_len`/
    /// `pack_cardinality`/`segment_size` from the archive's own `params`
    /// stream rather than requiring the caller to supply them again.
    pub fn open(path: &Path, config: DecompressorConfig) -> Result<Self, ArchiveError> {
        let archive = Arc::new(Archive::open(path)?);
        let (k, min_match_len, pack_cardinality, segment_size) = read_params(&archive)?;

        let collection = Collection::open(archive.clone(), k, segment_size, pack_cardinality)?;

        let segstore = SegmentStore::new(archive.clone(), pack_cardinality as u64, min_match_len, CodecVersion::V2);
        let num_groups = read_group_count(&archive)?;
        for _ in 0..num_groups {
            segstore.new_group();
        }

        log::info!("pgarc: opened archive {} for reading (k={}, groups={})", path.display(), k, num_groups);

        Ok(Decompressor {
            archive,
            collection,
            segstore,
            k,
            config,
        })
    }

    /// Every sample name in the archive, in ingestion order (the first is
    /// the reference sample).
    pub fn list_samples(&self) -> Vec<String> {
        self.collection.get_sample_list()
    }

    /// Every contig name registered under `sample`.
    pub fn list_contigs(&mut self, sample: &str) -> Result<Vec<String>, CatalogError> {
        self.collection.get_contig_list(sample)
    }

    /// Resolves an optionally-empty `sample` to a concrete sample name for
    /// `contig`: an empty sample is only accepted
    /// when `contig` names a contig present in exactly one sample.
    fn resolve_sample(&self, sample: &str, contig: &str) -> Result<String, QueryError> {
        if !sample.is_empty() {
            return Ok(sample.to_owned());
        }
        let hits = self.collection.get_samples_for_contig(contig)?;
        match hits.len() {
            0 => Err(QueryError::NotFound {
                sample: sample.to_owned(),
                contig: contig.to_owned(),
            }),
            1 => Ok(hits.into_iter().next().unwrap()),
            _ => Err(QueryError::Ambiguous(contig.to_owned())),
        }
    }

    fn contig_segments(&mut self, sample: &str, contig: &str) -> Result<Vec<crate::collection::SegmentDesc>, QueryError> {
        match self.collection.get_contig_desc(sample, contig) {
            Ok(desc) => Ok(desc.segments),
            Err(CatalogError::UnknownContig { sample, contig }) => Err(QueryError::NotFound { sample, contig }),
            Err(CatalogError::UnknownSample(sample)) => Err(QueryError::NotFound {
                sample,
                contig: contig.to_owned(),
            }),
            Err(other) => Err(QueryError::Catalog(other)),
        }
    }

    fn fetch_segment(&self, group_id: u32, in_group_id: u32, contig: &str) -> Result<Vec<u8>, QueryError> {
        match self.segstore.get(group_id as u64, in_group_id as u64) {
            Ok(bytes) => Ok(bytes),
            Err(SegstoreError::Decode(DecodeError::OutOfRange)) => Err(QueryError::CodecCorruption(contig.to_owned())),
            Err(other) => Err(QueryError::Segstore(other)),
        }
    }

    /// Reassembles `contig` (as numeric IUPAC codes) for `sample`.
    fn reconstruct(&mut self, sample: &str, contig: &str) -> Result<Vec<u8>, QueryError> {
        let segments = self.contig_segments(sample, contig)?;
        let mut full = Vec::new();
        for (i, seg) in segments.iter().enumerate() {
            let raw = self.fetch_segment(seg.group_id, seg.in_group_id, contig)?;
            let oriented = if seg.is_rev_comp {
                crate::alphabet::reverse_complement(&raw)
            } else {
                raw
            };
            if i == 0 || oriented.len() <= self.k as usize {
                full.extend_from_slice(&oriented);
            } else {
                full.extend_from_slice(&oriented[self.k as usize..]);
            }
        }
        Ok(full)
    }

    /// Total length of `contig` in `sample`, computed from segment lengths
    /// without decoding any segment bytes: each non-first segment
    /// contributes `raw_length - k` (the shared splitter is not
    /// double-counted).
    pub fn get_contig_length(&mut self, sample: &str, contig: &str) -> Result<u64, QueryError> {
        let resolved = self.resolve_sample(sample, contig)?;
        let segments = self.contig_segments(&resolved, contig)?;
        let mut total = 0u64;
        for (i, seg) in segments.iter().enumerate() {
            if i == 0 || (seg.raw_length as u64) <= self.k as u64 {
                total += seg.raw_length as u64;
            } else {
                total += seg.raw_length as u64 - self.k as u64;
            }
        }
        Ok(total)
    }

    /// Reassembles `contig` for `sample` and returns the requested
    /// `[from, to]` interval as uppercase ASCII: both endpoints
    /// are clamped into `[0, len-1]` and swapped if
    /// `from > to`.
    pub fn get_contig_sequence(&mut self, sample: &str, contig: &str, from: i64, to: i64) -> Result<Vec<u8>, QueryError> {
        let resolved = self.resolve_sample(sample, contig)?;
        let full = self.reconstruct(&resolved, contig)?;
        if full.is_empty() {
            return Ok(Vec::new());
        }
        let len = full.len() as i64;
        let clamp = |v: i64| v.max(0).min(len - 1);
        let (lo, hi) = {
            let a = clamp(from);
            let b = clamp(to);
            if a <= b {
                (a, b)
            } else {
                (b, a)
            }
        };
        Ok(crate::alphabet::decode_seq(&full[lo as usize..=hi as usize]))
    }

    /// Flushes and closes the underlying archive.
    pub fn close(self) -> Result<(), ArchiveError> {
        self.archive.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::encode_seq;
    use crate::engine::{Compressor, CompressorConfig};
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
    fn identity_round_trip_via_decompressor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s1.pgarc");

        let reference = b"ACGTACGTACGTACGTACGT".to_vec();
        let mut compressor = Compressor::create(&path, small_config()).unwrap();
        compressor.add_sample("ref_sample", &[("chr1".into(), encode_seq(&reference))]).unwrap();
        compressor.add_sample("query_sample", &[("chr1".into(), encode_seq(&reference))]).unwrap();
        compressor.close().unwrap();

        let mut dec = Decompressor::open(&path, DecompressorConfig::default()).unwrap();
        assert_eq!(dec.list_samples(), vec!["ref_sample".to_string(), "query_sample".to_string()]);
        assert_eq!(dec.list_contigs("query_sample").unwrap(), vec!["chr1".to_string()]);
        let seq = dec.get_contig_sequence("query_sample", "chr1", 0, reference.len() as i64 - 1).unwrap();
        assert_eq!(seq, reference);
        assert_eq!(dec.get_contig_length("query_sample", "chr1").unwrap(), reference.len() as u64);
        dec.close().unwrap();
    }

    #[test]
    fn single_snp_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s2.pgarc");

        let reference = b"ACGT".repeat(20);
        let mut mutated = reference.clone();
        mutated[40] = b'T';

        let mut compressor = Compressor::create(&path, small_config()).unwrap();
        compressor.add_sample("ref_sample", &[("chr1".into(), encode_seq(&reference))]).unwrap();
        compressor.add_sample("mutant", &[("chr1".into(), encode_seq(&mutated))]).unwrap();
        compressor.close().unwrap();

        let mut dec = Decompressor::open(&path, DecompressorConfig::default()).unwrap();
        let seq = dec.get_contig_sequence("mutant", "chr1", 0, mutated.len() as i64 - 1).unwrap();
        assert_eq!(seq, mutated);
    }

    #[test]
    fn range_is_clamped_into_bounds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s3.pgarc");

        let reference = encode_seq(&b"ACGTACGTAC".repeat(2));
        let mut compressor = Compressor::create(&path, small_config()).unwrap();
        compressor.add_sample("ref_sample", &[("chr1".into(), reference.clone())]).unwrap();
        compressor.close().unwrap();

        let mut dec = Decompressor::open(&path, DecompressorConfig::default()).unwrap();
        let seq = dec.get_contig_sequence("ref_sample", "chr1", -5, 1000).unwrap();
        assert_eq!(seq, crate::alphabet::decode_seq(&reference));
    }

    #[test]
    fn unqualified_query_resolves_unique_contig_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s4.pgarc");

        let reference = encode_seq(b"ACGTACGTACGTACGTACGT");
        let mut compressor = Compressor::create(&path, small_config()).unwrap();
        compressor.add_sample("only_sample", &[("uniq".into(), reference.clone())]).unwrap();
        compressor.close().unwrap();

        let mut dec = Decompressor::open(&path, DecompressorConfig::default()).unwrap();
        let seq = dec.get_contig_sequence("", "uniq", 0, reference.len() as i64 - 1).unwrap();
        assert_eq!(seq, crate::alphabet::decode_seq(&reference));
    }

    #[test]
    fn unqualified_query_is_ambiguous_across_samples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s5.pgarc");

        let reference = encode_seq(&b"ACGT".repeat(10));
        let mut compressor = Compressor::create(&path, small_config()).unwrap();
        compressor.add_sample("sample_a", &[("shared".into(), reference.clone())]).unwrap();
        compressor.add_sample("sample_b", &[("shared".into(), reference.clone())]).unwrap();
        compressor.close().unwrap();

        let mut dec = Decompressor::open(&path, DecompressorConfig::default()).unwrap();
        let err = dec.get_contig_sequence("", "shared", 0, 1).unwrap_err();
        assert!(matches!(err, QueryError::Ambiguous(_)));
    }

    #[test]
    fn unknown_contig_is_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s6.pgarc");

        let reference = encode_seq(b"ACGTACGTACGTACGTACGT");
        let mut compressor = Compressor::create(&path, small_config()).unwrap();
        compressor.add_sample("only_sample", &[("chr1".into(), reference)]).unwrap();
        compressor.close().unwrap();

        let mut dec = Decompressor::open(&path, DecompressorConfig::default()).unwrap();
        let err = dec.get_contig_sequence("only_sample", "does_not_exist", 0, 1).unwrap_err();
        assert!(matches!(err, QueryError::NotFound { .. }));
    }
}
