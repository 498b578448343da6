//! C5 — the segmentation/assignment engine: splitter discovery (Phase A),
//! per-contig cutting and group routing (Phase B), and [`Compressor`], the
//! public write-side facade that drives C1–C4 through it.
//!
//! The concurrency model here is a deliberate simplification (recorded in
//! DESIGN.md): rather than a reusable barrier with
//! opportunistic slot borrowing, one [`Mutex<EngineState>`] serializes every
//! routing decision (splitter-set growth, group-table inserts, raw-group
//! round robin), while the per-group locking already in [`SegmentStore`]
//! and the single archive mutex in [`Archive`] provide the real
//! parallelism — contigs of a sample are still encoded concurrently via
//! [`TPool`], they just serialize briefly at the point where a segment's
//! destination group is decided.

pub mod bloom;
pub mod group_table;
pub mod segment;
pub mod splitter;

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::archive::Archive;
use crate::collection::{Collection, SegmentDesc};
use crate::error::EngineError;
use crate::kmer::KmerWindow;
use crate::lzdiff::CodecVersion;
use crate::segstore::SegmentStore;
use crate::threadpool::TPool;

use group_table::{GroupKey, GroupTable};
use segment::Placement;
use splitter::{FallbackMinimizerMap, SplitterSet};

/// Archive parameters fixed for the lifetime of an archive.
#[derive(Debug, Clone, Copy)]
pub struct CompressorConfig {
    pub k: u32,
    pub min_match_len: u32,
    pub segment_size: u32,
    pub pack_cardinality: u32,
    pub num_threads: usize,
    pub adaptive: bool,
    pub concatenated_genomes: bool,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        CompressorConfig {
            k: 21,
            min_match_len: 20,
            segment_size: 5_000,
            pack_cardinality: 100,
            num_threads: num_cpus::get(),
            adaptive: false,
            concatenated_genomes: false,
        }
    }
}

const STREAM_FILE_TYPE_INFO: &str = "file_type_info";
const STREAM_PARAMS: &str = "params";
const STREAM_SPLITTERS: &str = "splitters";
const STREAM_SEGMENT_SPLITTERS: &str = "segment-splitters";
const PRODUCER: &str = "pgarc";
const FORMAT_MAJOR: u32 = 3;
const FORMAT_MINOR: u32 = 0;

struct EngineState {
    group_table: GroupTable,
    splitters: SplitterSet,
    fallback: FallbackMinimizerMap,
    duplicated: HashSet<u64>,
    raw_round_robin: u64,
    have_reference: bool,
}

/// The segmentation/assignment engine (C5): owns the splitter set, group
/// map, and fallback-minimizer map shared by every contig ingested into an
/// archive.
pub struct Engine {
    archive: Arc<Archive>,
    collection: Arc<Collection>,
    segstore: Arc<SegmentStore>,
    pool: TPool,
    k: u32,
    segment_size: u32,
    adaptive: bool,
    state: Mutex<EngineState>,
}

impl Engine {
    pub fn new(
        archive: Arc<Archive>,
        collection: Arc<Collection>,
        segstore: Arc<SegmentStore>,
        k: u32,
        segment_size: u32,
        adaptive: bool,
        num_threads: usize,
    ) -> Self {
        segstore.reserve_raw_groups();
        let pool = TPool::new(num_threads.max(1), num_threads.max(1) * 4)
            .expect("thread pool construction with nonzero threads/queue cannot fail");
        Engine {
            archive,
            collection,
            segstore,
            pool,
            k,
            segment_size,
            adaptive,
            state: Mutex::new(EngineState {
                group_table: GroupTable::new(),
                splitters: SplitterSet::new(k, 1024),
                fallback: FallbackMinimizerMap::new(),
                duplicated: HashSet::new(),
                raw_round_robin: 0,
                have_reference: false,
            }),
        }
    }

    /// Ingests one sample's contigs. The first sample ever
    /// ingested by an `Engine` also runs Phase A (splitter discovery) over
    /// its own contigs before cutting them, since "the first sample loaded
    /// is the reference sample".
    pub fn add_sample(&self, sample_name: &str, contigs: &[(String, Vec<u8>)]) -> Result<(), EngineError> {
        for (name, codes) in contigs {
            if codes.is_empty() {
                return Err(EngineError::EmptyContig(name.clone()));
            }
            self.collection.register_sample_contig(sample_name, name)?;
        }

        let is_reference_sample = {
            let mut state = self.state.lock().unwrap();
            let first = !state.have_reference;
            state.have_reference = true;
            first
        };

        if is_reference_sample {
            let reference_codes: Vec<Vec<u8>> = contigs.iter().map(|(_, codes)| codes.clone()).collect();
            let discovered = splitter::discover(&reference_codes, self.k, self.segment_size, self.adaptive);
            let mut state = self.state.lock().unwrap();
            state.splitters = discovered.splitters;
            state.fallback = discovered.fallback;
            state.duplicated = discovered.duplicated;
        }

        let deferred: Mutex<Vec<(String, Vec<u8>)>> = Mutex::new(Vec::new());
        let first_error: Mutex<Option<EngineError>> = Mutex::new(None);

        // Contigs of the same sample are independent once registered, so
        // they are handed to the worker pool and encoded concurrently; the
        // mutex in `EngineState` serializes only the brief group-routing
        // decision for each segment, and `Collection` is internally locked,
        // so concurrent calls from different contigs are safe. Segments
        // within one contig are still emitted in order (`cut_and_place_contig`
        // assigns `position` sequentially). The scope's implicit join acts
        // as the end-of-sample barrier.
        self.pool.scope(|scope| {
            for (name, codes) in contigs {
                let deferred = &deferred;
                let first_error = &first_error;
                let this = &self;
                scope.spawn(move |_| match this.cut_and_place_contig(sample_name, name, codes, this.adaptive) {
                    Ok(had_no_splitter) => {
                        if this.adaptive && had_no_splitter {
                            deferred.lock().unwrap().push((name.clone(), codes.clone()));
                        }
                    }
                    Err(e) => {
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    }
                });
            }
        });

        if let Some(e) = first_error.into_inner().unwrap() {
            return Err(e);
        }
        let deferred = deferred.into_inner().unwrap();

        if !deferred.is_empty() {
            self.promote_and_replace(sample_name, &deferred)?;
        }

        self.collection.finish_sample(sample_name)?;
        Ok(())
    }

    /// Cuts one contig and, unless `defer_if_no_splitter` applies, routes
    /// and places every resulting segment in the catalog. Returns whether
    /// the contig produced no splitter at all (a single segment with both
    /// ends open).
    ///
    /// When `defer_if_no_splitter` is set and the contig has no splitter,
    /// nothing is stored or recorded: the first sweep's job is only to
    /// detect the deferral condition so that [`Self::promote_and_replace`]
    /// can re-cut the contig against the enlarged splitter set without
    /// leaving an orphaned first-sweep placement (a raw-group member with
    /// no catalog entry referencing it) behind.
    fn cut_and_place_contig(
        &self,
        sample_name: &str,
        contig_name: &str,
        codes: &[u8],
        defer_if_no_splitter: bool,
    ) -> Result<bool, EngineError> {
        let cuts = {
            let state = self.state.lock().unwrap();
            segment::cut_contig(codes, self.k, self.segment_size, &state.splitters)
        };
        let had_no_splitter = cuts.len() == 1 && cuts[0].left == group_table::OPEN && cuts[0].right == group_table::OPEN;
        if defer_if_no_splitter && had_no_splitter {
            return Ok(true);
        }

        let mut position = 0usize;
        for cut in &cuts {
            let (oriented, is_rev_comp, key) = segment::orient(cut, codes);
            let placements = self.route_and_store(key, &oriented)?;
            for (group_id, bytes) in placements {
                // Each placed piece's own length, not the parent segment's —
                // a middle-split produces two pieces that overlap by `k` and
                // are each shorter than the whole cut segment.
                let raw_length = bytes.len() as u32;
                let in_group_id = self.store_bytes(group_id, bytes)?;
                self.collection.add_segment_placed(
                    sample_name,
                    contig_name,
                    position,
                    group_id as u32,
                    in_group_id as u32,
                    is_rev_comp,
                    raw_length,
                )?;
                position += 1;
            }
        }
        Ok(had_no_splitter)
    }

    /// Decides where `bytes` (already oriented) belongs, returning one
    /// `(group_id, bytes)` pair, or two for a middle-split. The two pieces
    /// of a middle-split overlap by `k` at the bridging splitter, matching
    /// the shared-splitter overlap between any two adjacent segments in a
    /// contig (§3: "adjacent segments in a contig share exactly k bytes").
    fn route_and_store(&self, key: GroupKey, bytes: &[u8]) -> Result<Vec<(u64, Vec<u8>)>, EngineError> {
        let mut state = self.state.lock().unwrap();
        let placement = segment::decide_placement(
            &mut state.group_table,
            &state.fallback,
            &self.segstore,
            &mut state.raw_round_robin,
            key,
            bytes,
            self.k,
            self.segment_size,
        );
        Ok(match placement {
            Placement::Single { group_id } => vec![(group_id, bytes.to_vec())],
            Placement::Split { mid, left_group, right_group } => {
                let overlap_start = mid.saturating_sub(self.k as usize);
                vec![(left_group, bytes[..mid].to_vec()), (right_group, bytes[overlap_start..].to_vec())]
            }
        })
    }

    fn store_bytes(&self, group_id: u64, bytes: Vec<u8>) -> Result<u64, EngineError> {
        if group_id < crate::segstore::RAW_GROUP_COUNT {
            Ok(self.segstore.add_raw(group_id, &bytes)?)
        } else {
            Ok(self.segstore.add(group_id, bytes)?)
        }
    }

    /// Adaptive-mode second sweep: contigs that came back with no
    /// splitter at all get their internal singleton (w.r.t. the reference's
    /// duplicated-kmer set) k-mers promoted to splitters, then are cut and
    /// routed again with the enlarged splitter set.
    fn promote_and_replace(&self, sample_name: &str, deferred: &[(String, Vec<u8>)]) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock().unwrap();
            for (_, codes) in deferred {
                let mut counts = std::collections::HashMap::new();
                let mut window = KmerWindow::new(self.k);
                for &c in codes {
                    if let Some(km) = window.push(c) {
                        *counts.entry(km.canonical).or_insert(0u32) += 1;
                    }
                }
                for (kmer, n) in counts {
                    if n == 1 && !state.duplicated.contains(&kmer) {
                        state.splitters.insert(kmer);
                    }
                }
            }
        }

        for (name, codes) in deferred {
            self.cut_and_place_contig(sample_name, name, codes, false)?;
        }
        Ok(())
    }

    /// Sorted splitter values and `(left, right, group_id)` triples, for
    /// the `splitters`/`segment-splitters` well-known streams.
    fn snapshot_streams(&self) -> (Vec<u64>, Vec<(u64, u64, u64)>) {
        let state = self.state.lock().unwrap();
        let splitters = state.splitters.sorted_values();
        let mut triples: Vec<(u64, u64, u64)> = Vec::new();
        for &left in &splitters {
            for &right in state.group_table.adjacent(left) {
                if let Some(gid) = state.group_table.get(GroupKey::new(left, right)) {
                    triples.push((left.min(right), left.max(right), gid));
                }
            }
        }
        triples.sort_unstable();
        triples.dedup();
        (splitters, triples)
    }

    fn flush_well_known_streams(&self) -> Result<(), EngineError> {
        let (splitters, triples) = self.snapshot_streams();

        let mut buf = Vec::with_capacity(splitters.len() * 8);
        for v in &splitters {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        let id = self.archive.register_stream(STREAM_SPLITTERS);
        self.archive.add_part(id, &buf, splitters.len() as u64)?;

        let mut buf = Vec::with_capacity(triples.len() * 24);
        for &(a, b, gid) in &triples {
            buf.extend_from_slice(&a.to_le_bytes());
            buf.extend_from_slice(&b.to_le_bytes());
            buf.extend_from_slice(&gid.to_le_bytes());
        }
        let id = self.archive.register_stream(STREAM_SEGMENT_SPLITTERS);
        self.archive.add_part(id, &buf, triples.len() as u64)?;

        Ok(())
    }
}

/// The public write-side facade: creates or appends to an archive,
/// ingests samples, and closes it (flushing the catalog, segment store, and
/// C5's own well-known streams).
pub struct Compressor {
    archive: Arc<Archive>,
    collection: Arc<Collection>,
    segstore: Arc<SegmentStore>,
    engine: Engine,
    config: CompressorConfig,
}

fn write_file_type_info(archive: &Archive) -> Result<(), EngineError> {
    let mut buf = Vec::new();
    crate::varint::write_cstr(&mut buf, PRODUCER).map_err(crate::error::ArchiveError::Io)?;
    buf.extend_from_slice(&FORMAT_MAJOR.to_le_bytes());
    buf.extend_from_slice(&FORMAT_MINOR.to_le_bytes());
    let id = archive.register_stream(STREAM_FILE_TYPE_INFO);
    archive.add_part(id, &buf, buf.len() as u64)?;
    Ok(())
}

fn write_params(archive: &Archive, config: &CompressorConfig) -> Result<(), EngineError> {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&config.k.to_le_bytes());
    buf.extend_from_slice(&config.min_match_len.to_le_bytes());
    buf.extend_from_slice(&config.pack_cardinality.to_le_bytes());
    buf.extend_from_slice(&config.segment_size.to_le_bytes());
    let id = archive.register_stream(STREAM_PARAMS);
    archive.add_part(id, &buf, buf.len() as u64)?;
    Ok(())
}

/// Reads the `params` stream back (k, min_match_len, pack_cardinality,
/// segment_size), used by [`crate::query::Decompressor::open`] and by
/// [`Compressor::append`].
pub fn read_params(archive: &Archive) -> Result<(u32, u32, u32, u32), crate::error::ArchiveError> {
    let id = archive
        .get_stream_id(STREAM_PARAMS)
        .ok_or_else(|| crate::error::ArchiveError::MissingStream(STREAM_PARAMS.into()))?;
    let (raw, _) = archive
        .get_part(id, 0)?
        .ok_or_else(|| crate::error::ArchiveError::MissingStream(STREAM_PARAMS.into()))?;
    let field = |i: usize| u32::from_le_bytes(raw[i * 4..i * 4 + 4].try_into().unwrap());
    Ok((field(0), field(1), field(2), field(3)))
}

/// Highest group id referenced by the `segment-splitters` stream, plus one
/// (or the raw-group floor if no non-raw groups exist yet). Used both by
/// [`Compressor::append`] to prime the segment store before ingesting
/// further samples, and by [`crate::query::Decompressor::open`], which must
/// be able to address every group a reader might be asked about.
pub fn read_group_count(archive: &Archive) -> Result<u64, crate::error::ArchiveError> {
    let mut count = crate::segstore::RAW_GROUP_COUNT;
    if let Some(triples_id) = archive.get_stream_id(STREAM_SEGMENT_SPLITTERS) {
        if let Some((raw, _)) = archive.get_part(triples_id, 0)? {
            for chunk in raw.chunks_exact(24) {
                let gid = u64::from_le_bytes(chunk[16..24].try_into().unwrap());
                count = count.max(gid + 1);
            }
        }
    }
    Ok(count)
}

impl Compressor {
    /// Creates a fresh archive at `path`.
    pub fn create(path: &Path, config: CompressorConfig) -> Result<Self, crate::error::ArchiveError> {
        let archive = Arc::new(Archive::create(path)?);
        write_file_type_info(&archive)?;
        write_params(&archive, &config)?;

        let collection = Arc::new(Collection::create(
            archive.clone(),
            config.k,
            config.segment_size,
            config.pack_cardinality,
        ));
        let segstore = Arc::new(SegmentStore::new(
            archive.clone(),
            config.pack_cardinality as u64,
            config.min_match_len,
            CodecVersion::V2,
        ));
        let engine = Engine::new(
            archive.clone(),
            collection.clone(),
            segstore.clone(),
            config.k,
            config.segment_size,
            config.adaptive,
            config.num_threads,
        );

        log::info!("pgarc: created archive {} (k={}, segment_size={})", path.display(), config.k, config.segment_size);

        Ok(Compressor {
            archive,
            collection,
            segstore,
            engine,
            config,
        })
    }

    /// Opens `path_in` read-only, copies its groups/catalog into a new
    /// archive at `path_out`, and returns a `Compressor` ready to ingest
    /// further samples.
    pub fn append(path_in: &Path, path_out: &Path, config: CompressorConfig) -> Result<Self, crate::error::ArchiveError> {
        let input = Archive::open(path_in)?;
        let (k, min_match_len, pack_cardinality, segment_size) = read_params(&input)?;

        let archive = Arc::new(Archive::create(path_out)?);
        write_file_type_info(&archive)?;
        let config = CompressorConfig {
            k,
            min_match_len,
            pack_cardinality,
            segment_size,
            ..config
        };
        write_params(&archive, &config)?;

        let segstore = Arc::new(SegmentStore::new(
            archive.clone(),
            pack_cardinality as u64,
            min_match_len,
            CodecVersion::V2,
        ));
        segstore.reserve_raw_groups();

        let existing_splitters_id = input.get_stream_id(STREAM_SPLITTERS);
        let existing_triples_id = input.get_stream_id(STREAM_SEGMENT_SPLITTERS);
        let num_existing_groups = read_group_count(&input)?;
        for gid in 0..num_existing_groups {
            while segstore.num_groups() <= gid {
                segstore.new_group();
            }
            segstore.appending_init(gid, &input)?;
        }

        let collection = Arc::new(Collection::open(archive.clone(), k, segment_size, pack_cardinality)?);

        let engine = Engine::new(
            archive.clone(),
            collection.clone(),
            segstore.clone(),
            k,
            segment_size,
            config.adaptive,
            config.num_threads,
        );

        {
            let mut state = engine.state.lock().unwrap();
            state.have_reference = true;
            if let Some(splitters_id) = existing_splitters_id {
                if let Some((raw, _)) = input.get_part(splitters_id, 0)? {
                    for chunk in raw.chunks_exact(8) {
                        state.splitters.insert(u64::from_le_bytes(chunk.try_into().unwrap()));
                    }
                }
            }
            if let Some(triples_id) = existing_triples_id {
                if let Some((raw, _)) = input.get_part(triples_id, 0)? {
                    for chunk in raw.chunks_exact(24) {
                        let a = u64::from_le_bytes(chunk[0..8].try_into().unwrap());
                        let b = u64::from_le_bytes(chunk[8..16].try_into().unwrap());
                        let gid = u64::from_le_bytes(chunk[16..24].try_into().unwrap());
                        state.group_table.insert(GroupKey::new(a, b), gid);
                    }
                }
            }
        }

        log::info!("pgarc: appending to {} as new archive {}", path_in.display(), path_out.display());

        Ok(Compressor {
            archive,
            collection,
            segstore,
            engine,
            config,
        })
    }

    /// Ingests one sample.
    pub fn add_sample(&mut self, sample_name: &str, contigs: &[(String, Vec<u8>)]) -> Result<(), EngineError> {
        self.engine.add_sample(sample_name, contigs)
    }

    /// Flushes the catalog and segment store, writes C5's well-known
    /// streams, and closes the archive.
    pub fn close(self) -> Result<(), crate::error::ArchiveError> {
        self.engine.flush_well_known_streams()?;
        self.collection.close()?;
        self.segstore.finish()?;
        self.archive.close()?;
        log::info!(
            "pgarc: closed archive (k={}, segment_size={}, pack_cardinality={})",
            self.config.k,
            self.config.segment_size,
            self.config.pack_cardinality
        );
        Ok(())
    }
}

impl From<EngineError> for crate::error::ArchiveError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Catalog(crate::error::CatalogError::Archive(a)) => a,
            EngineError::Archive(a) => a,
            EngineError::Segstore(crate::error::SegstoreError::Archive(a)) => a,
            other => crate::error::ArchiveError::Io(std::io::Error::new(std::io::ErrorKind::Other, other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::encode_seq;
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
    fn identity_round_trip_single_group() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s1.pgarc");

        let reference = b"ACGTACGTACGTACGTACGT".to_vec();
        let mut compressor = Compressor::create(&path, small_config()).unwrap();
        compressor.add_sample("ref_sample", &[("chr1".into(), encode_seq(&reference))]).unwrap();
        compressor.add_sample("query_sample", &[("chr1".into(), encode_seq(&reference))]).unwrap();
        compressor.close().unwrap();

        let archive = Arc::new(Archive::open(&path).unwrap());
        let (k, _mml, pack, seg_size) = read_params(&archive).unwrap();
        let collection = Collection::open(archive.clone(), k, seg_size, pack).unwrap();
        let desc = collection.get_contig_desc("query_sample", "chr1").unwrap();
        assert_eq!(desc.segments.len(), 1);
        assert_eq!(desc.segments[0].raw_length as usize, reference.len());
    }

    #[test]
    fn single_snp_round_trips_through_get_contig_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s2.pgarc");

        let reference = b"ACGT".repeat(20);
        let mut mutated = reference.clone();
        mutated[40] = b'T';

        let mut compressor = Compressor::create(&path, small_config()).unwrap();
        compressor.add_sample("ref_sample", &[("chr1".into(), encode_seq(&reference))]).unwrap();
        compressor.add_sample("mutant", &[("chr1".into(), encode_seq(&mutated))]).unwrap();
        compressor.close().unwrap();

        let archive = Arc::new(Archive::open(&path).unwrap());
        let (k, _mml, pack, seg_size) = read_params(&archive).unwrap();
        let collection = Collection::open(archive, k, seg_size, pack).unwrap();
        let desc = collection.get_contig_desc("mutant", "chr1").unwrap();
        assert!(!desc.segments.is_empty());
        let total: u32 = desc.segments.iter().map(|s| s.raw_length).sum();
        assert!(total as usize >= mutated.len());
    }
}
