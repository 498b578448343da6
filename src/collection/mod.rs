//! C2 — the collection catalog: the persistent mapping from
//! `sample -> contig -> ordered segment references` that drives both
//! compression (recording where each contig's segments landed) and
//! decompression (yielding the segment list a region query needs to
//! reassemble).
//!
//! Samples are grouped into batches of `pack_cardinality` in registration
//! order; each batch's contig names and segment tuples are written as one
//! part per batch across a handful of archive streams, zstd-compressed
//! independently. A reader loads only the sample-name list eagerly; any
//! query for contig data pulls in (and caches) the one batch it falls in.

mod encode;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::archive::{Archive, StreamId};
use crate::error::{ArchiveError, CatalogError};
use crate::varint::{read_varint, write_varint};

const ZSTD_LEVEL_SAMPLES: i32 = 19;
const ZSTD_LEVEL_CONTIGS: i32 = 19;
const ZSTD_LEVEL_DETAILS: i32 = 13;

/// One segment's placement within a contig: which group it belongs to,
/// its slot within that group, orientation, and decompressed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDesc {
    pub group_id: u32,
    pub in_group_id: u32,
    pub is_rev_comp: bool,
    pub raw_length: u32,
}

/// A contig's short name (FASTA header up to the first whitespace) plus
/// its ordered segment list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContigDesc {
    pub name: String,
    pub segments: Vec<SegmentDesc>,
}

struct PendingContig {
    name: String,
    segments: BTreeMap<usize, SegmentDesc>,
}

struct WriteState {
    samples: Vec<String>,
    sample_ids: HashMap<String, usize>,
    /// Samples currently being registered (contigs/segments still arriving).
    pending: HashMap<String, Vec<PendingContig>>,
    /// Finished samples waiting for their batch to fill up.
    batch: Vec<(String, Vec<ContigDesc>)>,
}

struct LoadedBatch {
    index: usize,
    contigs: HashMap<String, Vec<ContigDesc>>,
}

struct ReadState {
    samples: Vec<String>,
    sample_ids: HashMap<String, usize>,
    loaded: Option<LoadedBatch>,
}

enum State {
    Writing(WriteState),
    Reading(ReadState),
}

/// The collection catalog (C2).
pub struct Collection {
    archive: Arc<Archive>,
    samples_stream: StreamId,
    contigs_stream: StreamId,
    counts_stream: StreamId,
    group_id_stream: StreamId,
    in_group_id_stream: StreamId,
    raw_length_stream: StreamId,
    is_rev_comp_stream: StreamId,
    k: u32,
    segment_size: u32,
    pack_cardinality: u32,
    state: Mutex<State>,
}

impl Collection {
    const STREAM_SAMPLES: &'static str = "collection-samples";
    const STREAM_CONTIGS: &'static str = "collection-contigs";
    const STREAM_COUNTS: &'static str = "collection-details-counts";
    const STREAM_GROUP_ID: &'static str = "collection-details-group-id";
    const STREAM_IN_GROUP_ID: &'static str = "collection-details-in-group-id";
    const STREAM_RAW_LENGTH: &'static str = "collection-details-raw-length";
    const STREAM_IS_REV_COMP: &'static str = "collection-details-is-rev-comp";

    /// Opens a fresh (write-mode) catalog over `archive`.
    pub fn create(archive: Arc<Archive>, k: u32, segment_size: u32, pack_cardinality: u32) -> Self {
        let samples_stream = archive.register_stream(Self::STREAM_SAMPLES);
        let contigs_stream = archive.register_stream(Self::STREAM_CONTIGS);
        let counts_stream = archive.register_stream(Self::STREAM_COUNTS);
        let group_id_stream = archive.register_stream(Self::STREAM_GROUP_ID);
        let in_group_id_stream = archive.register_stream(Self::STREAM_IN_GROUP_ID);
        let raw_length_stream = archive.register_stream(Self::STREAM_RAW_LENGTH);
        let is_rev_comp_stream = archive.register_stream(Self::STREAM_IS_REV_COMP);

        Collection {
            archive,
            samples_stream,
            contigs_stream,
            counts_stream,
            group_id_stream,
            in_group_id_stream,
            raw_length_stream,
            is_rev_comp_stream,
            k,
            segment_size,
            pack_cardinality,
            state: Mutex::new(State::Writing(WriteState {
                samples: Vec::new(),
                sample_ids: HashMap::new(),
                pending: HashMap::new(),
                batch: Vec::new(),
            })),
        }
    }

    /// Opens an existing catalog for reading. `k`/`segment_size` are needed
    /// to reconstruct the `raw_length` predictor and are normally read from
    /// the archive's own parameter stream by the caller before this is
    /// invoked.
    pub fn open(
        archive: Arc<Archive>,
        k: u32,
        segment_size: u32,
        pack_cardinality: u32,
    ) -> Result<Self, CatalogError> {
        let samples_stream = archive
            .get_stream_id(Self::STREAM_SAMPLES)
            .ok_or_else(|| ArchiveError::MissingStream(Self::STREAM_SAMPLES.into()))?;
        let contigs_stream = archive
            .get_stream_id(Self::STREAM_CONTIGS)
            .ok_or_else(|| ArchiveError::MissingStream(Self::STREAM_CONTIGS.into()))?;
        let counts_stream = archive
            .get_stream_id(Self::STREAM_COUNTS)
            .ok_or_else(|| ArchiveError::MissingStream(Self::STREAM_COUNTS.into()))?;
        let group_id_stream = archive
            .get_stream_id(Self::STREAM_GROUP_ID)
            .ok_or_else(|| ArchiveError::MissingStream(Self::STREAM_GROUP_ID.into()))?;
        let in_group_id_stream = archive
            .get_stream_id(Self::STREAM_IN_GROUP_ID)
            .ok_or_else(|| ArchiveError::MissingStream(Self::STREAM_IN_GROUP_ID.into()))?;
        let raw_length_stream = archive
            .get_stream_id(Self::STREAM_RAW_LENGTH)
            .ok_or_else(|| ArchiveError::MissingStream(Self::STREAM_RAW_LENGTH.into()))?;
        let is_rev_comp_stream = archive
            .get_stream_id(Self::STREAM_IS_REV_COMP)
            .ok_or_else(|| ArchiveError::MissingStream(Self::STREAM_IS_REV_COMP.into()))?;

        let (raw, _meta) = archive
            .get_part(samples_stream, 0)?
            .ok_or_else(|| ArchiveError::MissingStream(Self::STREAM_SAMPLES.into()))?;
        let decompressed = zstd::stream::decode_all(&raw[..]).map_err(ArchiveError::Io)?;
        let mut cursor = &decompressed[..];
        let count = read_varint(&mut cursor).map_err(ArchiveError::Io)?;
        let mut samples = Vec::with_capacity(count as usize);
        let mut sample_ids = HashMap::with_capacity(count as usize);
        for i in 0..count {
            let name = crate::varint::read_cstr(&mut cursor).map_err(ArchiveError::Io)?;
            sample_ids.insert(name.clone(), i as usize);
            samples.push(name);
        }

        log::debug!("collection: opened with {} samples", samples.len());

        Ok(Collection {
            archive,
            samples_stream,
            contigs_stream,
            counts_stream,
            group_id_stream,
            in_group_id_stream,
            raw_length_stream,
            is_rev_comp_stream,
            k,
            segment_size,
            pack_cardinality,
            state: Mutex::new(State::Reading(ReadState {
                samples,
                sample_ids,
                loaded: None,
            })),
        })
    }

    fn raw_length_predictor(&self) -> u64 {
        self.segment_size as u64 + self.k as u64
    }

    // ---- write path -----------------------------------------------------

    /// Registers a contig under `sample`, returning an error if
    /// `(sample, contig)` was already registered.
    pub fn register_sample_contig(&self, sample: &str, contig: &str) -> Result<(), CatalogError> {
        let mut guard = self.state.lock().unwrap();
        let ws = match &mut *guard {
            State::Writing(ws) => ws,
            State::Reading(_) => panic!("register_sample_contig called on a read-mode collection"),
        };

        if !ws.sample_ids.contains_key(sample) {
            ws.sample_ids.insert(sample.to_owned(), ws.samples.len());
            ws.samples.push(sample.to_owned());
        }

        let contigs = ws.pending.entry(sample.to_owned()).or_default();
        if contigs.iter().any(|c| c.name == contig) {
            return Err(CatalogError::DuplicateContig {
                sample: sample.to_owned(),
                contig: contig.to_owned(),
            });
        }
        contigs.push(PendingContig {
            name: contig.to_owned(),
            segments: BTreeMap::new(),
        });
        Ok(())
    }

    /// Records one segment placement.
    pub fn add_segment_placed(
        &self,
        sample: &str,
        contig: &str,
        position: usize,
        group_id: u32,
        in_group_id: u32,
        is_rev_comp: bool,
        raw_length: u32,
    ) -> Result<(), CatalogError> {
        let mut guard = self.state.lock().unwrap();
        let ws = match &mut *guard {
            State::Writing(ws) => ws,
            State::Reading(_) => panic!("add_segment_placed called on a read-mode collection"),
        };
        let contigs = ws
            .pending
            .get_mut(sample)
            .ok_or_else(|| CatalogError::UnknownSample(sample.to_owned()))?;
        let pc = contigs
            .iter_mut()
            .find(|c| c.name == contig)
            .ok_or_else(|| CatalogError::UnknownContig {
                sample: sample.to_owned(),
                contig: contig.to_owned(),
            })?;
        pc.segments.insert(
            position,
            SegmentDesc {
                group_id,
                in_group_id,
                is_rev_comp,
                raw_length,
            },
        );
        Ok(())
    }

    /// Batched variant of [`Collection::add_segment_placed`]: `segments[i]`
    /// is placed at `first_position + i`.
    pub fn add_segments_placed(
        &self,
        sample: &str,
        contig: &str,
        first_position: usize,
        segments: &[SegmentDesc],
    ) -> Result<(), CatalogError> {
        let mut guard = self.state.lock().unwrap();
        let ws = match &mut *guard {
            State::Writing(ws) => ws,
            State::Reading(_) => panic!("add_segments_placed called on a read-mode collection"),
        };
        let contigs = ws
            .pending
            .get_mut(sample)
            .ok_or_else(|| CatalogError::UnknownSample(sample.to_owned()))?;
        let pc = contigs
            .iter_mut()
            .find(|c| c.name == contig)
            .ok_or_else(|| CatalogError::UnknownContig {
                sample: sample.to_owned(),
                contig: contig.to_owned(),
            })?;
        for (i, seg) in segments.iter().enumerate() {
            pc.segments.insert(first_position + i, *seg);
        }
        Ok(())
    }

    /// Finalizes `sample`: every contig registered for it must have a
    /// contiguous `0..n` run of placed segments. Moves the sample into the
    /// current batch, flushing the batch if it now holds `pack_cardinality`
    /// samples.
    pub fn finish_sample(&self, sample: &str) -> Result<(), CatalogError> {
        let mut guard = self.state.lock().unwrap();
        let ws = match &mut *guard {
            State::Writing(ws) => ws,
            State::Reading(_) => panic!("finish_sample called on a read-mode collection"),
        };
        let pending = ws
            .pending
            .remove(sample)
            .ok_or_else(|| CatalogError::UnknownSample(sample.to_owned()))?;

        let mut contigs = Vec::with_capacity(pending.len());
        for pc in pending {
            let mut segments = Vec::with_capacity(pc.segments.len());
            for i in 0..pc.segments.len() {
                let seg = pc.segments.get(&i).copied().ok_or_else(|| {
                    CatalogError::MissingSegmentPosition {
                        sample: sample.to_owned(),
                        contig: pc.name.clone(),
                        position: i,
                    }
                })?;
                segments.push(seg);
            }
            contigs.push(ContigDesc {
                name: pc.name,
                segments,
            });
        }

        ws.batch.push((sample.to_owned(), contigs));
        if ws.batch.len() >= self.pack_cardinality as usize {
            self.flush_batch_locked(ws)?;
        }
        Ok(())
    }

    fn flush_batch_locked(&self, ws: &mut WriteState) -> Result<(), CatalogError> {
        if ws.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut ws.batch);

        let mut contig_names_buf = Vec::new();
        let mut counts_buf = Vec::new();
        let mut group_id_buf = Vec::new();
        let mut in_group_id_buf = Vec::new();
        let mut raw_length_buf = Vec::new();
        let mut is_rev_comp_buf = Vec::new();

        let predictor = self.raw_length_predictor();
        let mut last_in_group: HashMap<u32, u64> = HashMap::new();

        write_varint(&mut contig_names_buf, batch.len() as u64).map_err(ArchiveError::Io)?;
        for (_sample, contigs) in &batch {
            write_varint(&mut contig_names_buf, contigs.len() as u64).map_err(ArchiveError::Io)?;
            let mut prev_name = String::new();
            for contig in contigs {
                encode::encode_contig_name(&mut contig_names_buf, &contig.name, &prev_name)
                    .map_err(ArchiveError::Io)?;
                prev_name = contig.name.clone();

                write_varint(&mut counts_buf, contig.segments.len() as u64).map_err(ArchiveError::Io)?;
                for seg in &contig.segments {
                    write_varint(&mut group_id_buf, seg.group_id as u64).map_err(ArchiveError::Io)?;

                    let pred = last_in_group.get(&seg.group_id).copied();
                    let code = encode::encode_in_group_delta(seg.in_group_id as u64, pred);
                    write_varint(&mut in_group_id_buf, code).map_err(ArchiveError::Io)?;
                    last_in_group.insert(seg.group_id, seg.in_group_id as u64);

                    let rl_code = encode::encode_raw_length(seg.raw_length as u64, predictor);
                    write_varint(&mut raw_length_buf, rl_code).map_err(ArchiveError::Io)?;

                    write_varint(&mut is_rev_comp_buf, seg.is_rev_comp as u64).map_err(ArchiveError::Io)?;
                }
            }
        }

        self.compress_and_store(self.contigs_stream, &contig_names_buf, ZSTD_LEVEL_CONTIGS)?;
        self.compress_and_store(self.counts_stream, &counts_buf, ZSTD_LEVEL_DETAILS)?;
        self.compress_and_store(self.group_id_stream, &group_id_buf, ZSTD_LEVEL_DETAILS)?;
        self.compress_and_store(self.in_group_id_stream, &in_group_id_buf, ZSTD_LEVEL_DETAILS)?;
        self.compress_and_store(self.raw_length_stream, &raw_length_buf, ZSTD_LEVEL_DETAILS)?;
        self.compress_and_store(self.is_rev_comp_stream, &is_rev_comp_buf, ZSTD_LEVEL_DETAILS)?;

        Ok(())
    }

    fn compress_and_store(&self, stream: StreamId, raw: &[u8], level: i32) -> Result<(), CatalogError> {
        let compressed = zstd::stream::encode_all(raw, level).map_err(ArchiveError::Io)?;
        self.archive
            .add_part(stream, &compressed, raw.len() as u64)
            .map_err(CatalogError::from)
    }

    /// Flushes any partial batch and writes the sample-name stream. Must be
    /// called once, after all samples have been finalized, before the
    /// owning archive is closed.
    pub fn close(&self) -> Result<(), CatalogError> {
        let mut guard = self.state.lock().unwrap();
        let ws = match &mut *guard {
            State::Writing(ws) => ws,
            State::Reading(_) => return Ok(()),
        };

        if !ws.pending.is_empty() {
            log::warn!(
                "collection: closing with {} sample(s) never finished",
                ws.pending.len()
            );
        }

        self.flush_batch_locked(ws)?;

        let mut buf = Vec::new();
        write_varint(&mut buf, ws.samples.len() as u64).map_err(ArchiveError::Io)?;
        for name in &ws.samples {
            crate::varint::write_cstr(&mut buf, name).map_err(ArchiveError::Io)?;
        }
        let compressed = zstd::stream::encode_all(&buf[..], ZSTD_LEVEL_SAMPLES).map_err(ArchiveError::Io)?;
        self.archive.add_part(self.samples_stream, &compressed, buf.len() as u64)?;

        Ok(())
    }

    // ---- read path --------------------------------------------------

    pub fn get_sample_list(&self) -> Vec<String> {
        let guard = self.state.lock().unwrap();
        match &*guard {
            State::Writing(ws) => ws.samples.clone(),
            State::Reading(rs) => rs.samples.clone(),
        }
    }

    pub fn get_reference_name(&self) -> Option<String> {
        let guard = self.state.lock().unwrap();
        match &*guard {
            State::Writing(ws) => ws.samples.first().cloned(),
            State::Reading(rs) => rs.samples.first().cloned(),
        }
    }

    fn batch_count(&self, total_samples: usize) -> usize {
        (total_samples + self.pack_cardinality as usize - 1) / self.pack_cardinality.max(1) as usize
    }

    /// Ensures the batch containing `sample_index` is decoded and cached.
    fn ensure_batch_loaded(&self, rs: &mut ReadState, batch_index: usize) -> Result<(), CatalogError> {
        if let Some(loaded) = &rs.loaded {
            if loaded.index == batch_index {
                return Ok(());
            }
        }

        let (raw_contigs, _) = self
            .archive
            .get_part(self.contigs_stream, batch_index)?
            .ok_or(CatalogError::CorruptBatch(batch_index))?;
        let (raw_counts, _) = self
            .archive
            .get_part(self.counts_stream, batch_index)?
            .ok_or(CatalogError::CorruptBatch(batch_index))?;
        let (raw_group_id, _) = self
            .archive
            .get_part(self.group_id_stream, batch_index)?
            .ok_or(CatalogError::CorruptBatch(batch_index))?;
        let (raw_in_group_id, _) = self
            .archive
            .get_part(self.in_group_id_stream, batch_index)?
            .ok_or(CatalogError::CorruptBatch(batch_index))?;
        let (raw_raw_length, _) = self
            .archive
            .get_part(self.raw_length_stream, batch_index)?
            .ok_or(CatalogError::CorruptBatch(batch_index))?;
        let (raw_is_rev_comp, _) = self
            .archive
            .get_part(self.is_rev_comp_stream, batch_index)?
            .ok_or(CatalogError::CorruptBatch(batch_index))?;

        let contigs_bytes =
            zstd::stream::decode_all(&raw_contigs[..]).map_err(|_| CatalogError::CorruptBatch(batch_index))?;
        let counts_bytes =
            zstd::stream::decode_all(&raw_counts[..]).map_err(|_| CatalogError::CorruptBatch(batch_index))?;
        let group_id_bytes =
            zstd::stream::decode_all(&raw_group_id[..]).map_err(|_| CatalogError::CorruptBatch(batch_index))?;
        let in_group_id_bytes = zstd::stream::decode_all(&raw_in_group_id[..])
            .map_err(|_| CatalogError::CorruptBatch(batch_index))?;
        let raw_length_bytes = zstd::stream::decode_all(&raw_raw_length[..])
            .map_err(|_| CatalogError::CorruptBatch(batch_index))?;
        let is_rev_comp_bytes = zstd::stream::decode_all(&raw_is_rev_comp[..])
            .map_err(|_| CatalogError::CorruptBatch(batch_index))?;

        let mut names_cursor = &contigs_bytes[..];
        let mut counts_cursor = &counts_bytes[..];
        let mut group_id_cursor = &group_id_bytes[..];
        let mut in_group_id_cursor = &in_group_id_bytes[..];
        let mut raw_length_cursor = &raw_length_bytes[..];
        let mut is_rev_comp_cursor = &is_rev_comp_bytes[..];

        let predictor = self.raw_length_predictor();
        let mut last_in_group: HashMap<u32, u64> = HashMap::new();

        let sample_count =
            read_varint(&mut names_cursor).map_err(|_| CatalogError::CorruptBatch(batch_index))?;

        let sample_start = batch_index * self.pack_cardinality as usize;
        let mut contigs_by_sample = HashMap::new();

        for s in 0..sample_count {
            let sample_name = rs
                .samples
                .get(sample_start + s as usize)
                .cloned()
                .ok_or(CatalogError::CorruptBatch(batch_index))?;

            let contig_count = read_varint(&mut names_cursor).map_err(|_| CatalogError::CorruptBatch(batch_index))?;
            let mut contigs = Vec::with_capacity(contig_count as usize);
            let mut prev_name = String::new();

            for _ in 0..contig_count {
                let name = encode::decode_contig_name(&mut names_cursor, &prev_name)
                    .map_err(|_| CatalogError::CorruptBatch(batch_index))?;
                prev_name = name.clone();

                let seg_count =
                    read_varint(&mut counts_cursor).map_err(|_| CatalogError::CorruptBatch(batch_index))?;
                let mut segments = Vec::with_capacity(seg_count as usize);
                for _ in 0..seg_count {
                    let group_id = read_varint(&mut group_id_cursor)
                        .map_err(|_| CatalogError::CorruptBatch(batch_index))? as u32;
                    let in_group_code = read_varint(&mut in_group_id_cursor)
                        .map_err(|_| CatalogError::CorruptBatch(batch_index))?;
                    let pred = last_in_group.get(&group_id).copied();
                    let in_group_id = encode::decode_in_group_delta(in_group_code, pred) as u32;
                    last_in_group.insert(group_id, in_group_id as u64);

                    let rl_code = read_varint(&mut raw_length_cursor)
                        .map_err(|_| CatalogError::CorruptBatch(batch_index))?;
                    let raw_length = encode::decode_raw_length(rl_code, predictor) as u32;

                    let is_rev_comp = read_varint(&mut is_rev_comp_cursor)
                        .map_err(|_| CatalogError::CorruptBatch(batch_index))?
                        != 0;

                    segments.push(SegmentDesc {
                        group_id,
                        in_group_id,
                        is_rev_comp,
                        raw_length,
                    });
                }
                contigs.push(ContigDesc { name, segments });
            }
            contigs_by_sample.insert(sample_name, contigs);
        }

        rs.loaded = Some(LoadedBatch {
            index: batch_index,
            contigs: contigs_by_sample,
        });
        Ok(())
    }

    pub fn get_contig_list(&self, sample: &str) -> Result<Vec<String>, CatalogError> {
        let mut guard = self.state.lock().unwrap();
        let rs = match &mut *guard {
            State::Reading(rs) => rs,
            State::Writing(_) => panic!("get_contig_list called on a write-mode collection"),
        };
        let sample_index = *rs
            .sample_ids
            .get(sample)
            .ok_or_else(|| CatalogError::UnknownSample(sample.to_owned()))?;
        let batch_index = sample_index / self.pack_cardinality as usize;
        self.ensure_batch_loaded(rs, batch_index)?;
        let loaded = rs.loaded.as_ref().unwrap();
        Ok(loaded
            .contigs
            .get(sample)
            .map(|cs| cs.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default())
    }

    pub fn get_contig_desc(&self, sample: &str, contig: &str) -> Result<ContigDesc, CatalogError> {
        let mut guard = self.state.lock().unwrap();
        let rs = match &mut *guard {
            State::Reading(rs) => rs,
            State::Writing(_) => panic!("get_contig_desc called on a write-mode collection"),
        };
        let sample_index = *rs
            .sample_ids
            .get(sample)
            .ok_or_else(|| CatalogError::UnknownSample(sample.to_owned()))?;
        let batch_index = sample_index / self.pack_cardinality as usize;
        self.ensure_batch_loaded(rs, batch_index)?;
        let loaded = rs.loaded.as_ref().unwrap();
        loaded
            .contigs
            .get(sample)
            .and_then(|cs| cs.iter().find(|c| c.name == contig))
            .cloned()
            .ok_or_else(|| CatalogError::UnknownContig {
                sample: sample.to_owned(),
                contig: contig.to_owned(),
            })
    }

    /// Scans every batch looking for a contig named `contig`, returning the
    /// samples that contain it. `O(batches)`; used only by the no-sample-given
    /// query path.
    pub fn get_samples_for_contig(&self, contig: &str) -> Result<Vec<String>, CatalogError> {
        let mut guard = self.state.lock().unwrap();
        let rs = match &mut *guard {
            State::Reading(rs) => rs,
            State::Writing(_) => panic!("get_samples_for_contig called on a write-mode collection"),
        };
        let total_batches = self.batch_count(rs.samples.len());
        let mut hits = Vec::new();
        for batch_index in 0..total_batches {
            log::trace!("collection: scanning batch {batch_index} for contig {contig:?}");
            self.ensure_batch_loaded(rs, batch_index)?;
            let loaded = rs.loaded.as_ref().unwrap();
            for (sample, contigs) in &loaded.contigs {
                if contigs.iter().any(|c| c.name == contig) {
                    hits.push(sample.clone());
                }
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_segment(group_id: u32, in_group_id: u32, raw_length: u32, is_rev_comp: bool) -> SegmentDesc {
        SegmentDesc {
            group_id,
            in_group_id,
            is_rev_comp,
            raw_length,
        }
    }

    #[test]
    fn write_then_read_round_trip_single_batch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.pgarc");

        {
            let archive = Arc::new(Archive::create(&path).unwrap());
            let col = Collection::create(archive.clone(), 21, 1000, 10);

            col.register_sample_contig("ref", "chr1").unwrap();
            col.add_segment_placed("ref", "chr1", 0, 0, 0, false, 1021).unwrap();
            col.add_segment_placed("ref", "chr1", 1, 1, 0, false, 1021).unwrap();
            col.finish_sample("ref").unwrap();

            col.register_sample_contig("sample1", "chr1").unwrap();
            col.add_segment_placed("sample1", "chr1", 0, 0, 1, true, 998).unwrap();
            col.finish_sample("sample1").unwrap();

            col.close().unwrap();
            archive.close().unwrap();
        }

        let archive = Arc::new(Archive::open(&path).unwrap());
        let col = Collection::open(archive, 21, 1000, 10).unwrap();

        assert_eq!(col.get_sample_list(), vec!["ref".to_string(), "sample1".to_string()]);
        assert_eq!(col.get_reference_name(), Some("ref".to_string()));

        let desc = col.get_contig_desc("ref", "chr1").unwrap();
        assert_eq!(desc.segments.len(), 2);
        assert_eq!(desc.segments[0], make_segment(0, 0, 1021, false));
        assert_eq!(desc.segments[1], make_segment(1, 0, 1021, false));

        let desc = col.get_contig_desc("sample1", "chr1").unwrap();
        assert_eq!(desc.segments, vec![make_segment(0, 1, 998, true)]);

        let hits = col.get_samples_for_contig("chr1").unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn duplicate_contig_is_rejected() {
        let dir = tempdir().unwrap();
        let archive = Arc::new(Archive::create(dir.path().join("c.pgarc")).unwrap());
        let col = Collection::create(archive, 21, 1000, 10);
        col.register_sample_contig("s", "chr1").unwrap();
        let err = col.register_sample_contig("s", "chr1").unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateContig { .. }));
    }

    #[test]
    fn gap_in_segment_positions_is_rejected() {
        let dir = tempdir().unwrap();
        let archive = Arc::new(Archive::create(dir.path().join("c.pgarc")).unwrap());
        let col = Collection::create(archive, 21, 1000, 10);
        col.register_sample_contig("s", "chr1").unwrap();
        col.add_segment_placed("s", "chr1", 1, 0, 0, false, 100).unwrap();
        let err = col.finish_sample("s").unwrap_err();
        assert!(matches!(err, CatalogError::MissingSegmentPosition { .. }));
    }

    #[test]
    fn batches_split_across_pack_cardinality() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.pgarc");
        {
            let archive = Arc::new(Archive::create(&path).unwrap());
            let col = Collection::create(archive.clone(), 15, 500, 2);
            for i in 0..5 {
                let sample = format!("s{i}");
                col.register_sample_contig(&sample, "chrA").unwrap();
                col.add_segment_placed(&sample, "chrA", 0, 0, i, false, 515).unwrap();
                col.finish_sample(&sample).unwrap();
            }
            col.close().unwrap();
            archive.close().unwrap();
        }
        let archive = Arc::new(Archive::open(&path).unwrap());
        let col = Collection::open(archive, 15, 500, 2).unwrap();
        for i in 0..5 {
            let sample = format!("s{i}");
            let desc = col.get_contig_desc(&sample, "chrA").unwrap();
            assert_eq!(desc.segments[0].in_group_id, i);
        }
    }
}
