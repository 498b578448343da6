//! C4 — the segment store: per-group reference and delta-pack management
//! sitting behind the archive container (C1).
//!
//! Each group owns a reference buffer, a reference-relative codec prepared
//! against it ([`crate::lzdiff::LzDiff`]), and a growing list of member
//! deltas batched into `pack_cardinality`-sized packs. Two archive streams
//! per group carry this to disk: `x<id>r` (the reference, compressed once)
//! and `x<id>d` (one part per full pack, plus a trailing partial pack).
//! Groups `0..16` are "raw" (no reference, no codec — members are stored
//! verbatim).

mod stream_name;
mod tuple_pack;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::archive::Archive;
use crate::error::SegstoreError;
use crate::lzdiff::{CodecVersion, LzDiff};

/// Number of groups reserved for verbatim ("raw") storage, never
/// reference/delta-coded.
pub const RAW_GROUP_COUNT: u64 = 16;

const PACK_SEPARATOR: u8 = 0xFF;
const ZSTD_LEVEL_REFERENCE_PLAIN: i32 = 19;
const ZSTD_LEVEL_REFERENCE_PACKED: i32 = 13;
const ZSTD_LEVEL_DELTA_PACK: i32 = 19;

/// Cached, decoded form of a group's reference, computed once per process
/// the first time it's needed.
struct ReferenceCache {
    bytes: Vec<u8>,
    codec: LzDiff,
}

/// One group's in-memory writer/reader state. A raw group (`id < 16`) never
/// populates `reference`/`codec`/`pending`; it only uses `raw_members`.
struct GroupState {
    group_id: u64,
    is_raw: bool,
    reference: Option<ReferenceCache>,
    /// Deltas queued for the pack currently being built, plus a dedup index
    /// from delta bytes to the `in_group_id` already assigned to them
    /// within this pack.
    pending: Vec<Vec<u8>>,
    pending_index: HashMap<Vec<u8>, u64>,
    /// Verbatim members queued for a raw group's next flush.
    raw_pending: Vec<Vec<u8>>,
    /// Total members ever placed in this group (including the reference
    /// itself at `in_group_id = 0`), used to compute new `in_group_id`s and
    /// to locate a given id's pack/offset on read.
    member_count: u64,
    ref_stream: String,
    delta_stream: String,
}

impl GroupState {
    fn new(group_id: u64) -> Self {
        let is_raw = group_id < RAW_GROUP_COUNT;
        GroupState {
            group_id,
            is_raw,
            reference: None,
            pending: Vec::new(),
            pending_index: HashMap::new(),
            raw_pending: Vec::new(),
            member_count: 0,
            ref_stream: stream_name::reference_stream(group_id),
            delta_stream: stream_name::delta_stream(group_id),
        }
    }
}

/// The segment store (C4): owns every group's codec, pending pack, and
/// archive stream handles.
pub struct SegmentStore {
    archive: Arc<Archive>,
    pack_cardinality: u64,
    min_match_len: u32,
    codec_version: CodecVersion,
    groups: RwLock<Vec<Mutex<GroupState>>>,
}

impl SegmentStore {
    pub fn new(
        archive: Arc<Archive>,
        pack_cardinality: u64,
        min_match_len: u32,
        codec_version: CodecVersion,
    ) -> Self {
        SegmentStore {
            archive,
            pack_cardinality,
            min_match_len,
            codec_version,
            groups: RwLock::new(Vec::new()),
        }
    }

    pub fn num_groups(&self) -> u64 {
        self.groups.read().unwrap().len() as u64
    }

    /// Allocates a new group id, registering its archive streams. Must be
    /// called only while routing decisions are otherwise serialized, since
    /// new groups are only ever appended, never inserted out of order.
    pub fn new_group(&self) -> u64 {
        let mut groups = self.groups.write().unwrap();
        let id = groups.len() as u64;
        let state = GroupState::new(id);
        self.archive.register_stream(&state.ref_stream);
        self.archive.register_stream(&state.delta_stream);
        groups.push(Mutex::new(state));
        id
    }

    /// Ensures raw groups `0..16` exist up front, regardless of whether any
    /// sample actually uses them.
    pub fn reserve_raw_groups(&self) {
        while self.num_groups() < RAW_GROUP_COUNT {
            self.new_group();
        }
    }

    fn with_group<T>(&self, group_id: u64, f: impl FnOnce(&mut GroupState) -> Result<T, SegstoreError>) -> Result<T, SegstoreError> {
        let groups = self.groups.read().unwrap();
        let cell = groups
            .get(group_id as usize)
            .ok_or(SegstoreError::UnknownGroup(group_id))?;
        let mut state = cell.lock().unwrap();
        f(&mut state)
    }

    /// Appends `bytes` verbatim to a raw group (`group_id < 16`), returning
    /// its `in_group_id`. Pack separators (`0xFF`) keep members delimited
    /// within a flushed pack.
    pub fn add_raw(&self, group_id: u64, bytes: &[u8]) -> Result<u64, SegstoreError> {
        self.with_group(group_id, |g| {
            debug_assert!(g.is_raw, "add_raw called on a non-raw group");
            let in_group_id = g.member_count;
            g.raw_pending.push(bytes.to_vec());
            g.member_count += 1;
            if g.raw_pending.len() as u64 >= self.pack_cardinality {
                flush_raw_pack(&self.archive, g)?;
            }
            Ok(in_group_id)
        })
    }

    /// Adds `bytes` to a non-raw group. The first call establishes the
    /// group's reference; every later call encodes against it, dedupes
    /// within the current pack, and flushes a full pack to the archive.
    pub fn add(&self, group_id: u64, bytes: Vec<u8>) -> Result<u64, SegstoreError> {
        self.with_group(group_id, |g| {
            debug_assert!(!g.is_raw, "add called on a raw group; use add_raw");

            if g.reference.is_none() {
                let (variant, payload) = tuple_pack::choose_storage(&bytes);
                let level = match variant {
                    tuple_pack::VARIANT_PLAIN => ZSTD_LEVEL_REFERENCE_PLAIN,
                    _ => ZSTD_LEVEL_REFERENCE_PACKED,
                };
                let compressed = zstd::stream::encode_all(&payload[..], level).map_err(crate::error::ArchiveError::Io)?;
                let mut on_disk = compressed;
                on_disk.push(variant);

                let ref_id = self.archive.get_stream_id(&g.ref_stream).expect("ref stream registered at group creation");
                self.archive.add_part(ref_id, &on_disk, bytes.len() as u64)?;

                let mut codec = LzDiff::new(self.codec_version, self.min_match_len);
                codec.prepare(bytes.clone());
                g.reference = Some(ReferenceCache { bytes, codec });
                g.member_count = 1;
                return Ok(0);
            }

            let cache = g.reference.as_ref().unwrap();
            let delta = cache.codec.encode(&bytes);

            if delta.is_empty() {
                return Ok(0);
            }

            if let Some(&existing) = g.pending_index.get(&delta) {
                return Ok(existing);
            }

            let in_group_id = g.member_count;
            g.pending_index.insert(delta.clone(), in_group_id);
            g.pending.push(delta);
            g.member_count += 1;

            if g.pending.len() as u64 >= self.pack_cardinality {
                flush_delta_pack(&self.archive, g)?;
            }

            Ok(in_group_id)
        })
    }

    /// Fetches the decoded bytes for `in_group_id` of `group_id`. For raw
    /// groups this is identical to [`SegmentStore::get_raw`].
    pub fn get(&self, group_id: u64, in_group_id: u64) -> Result<Vec<u8>, SegstoreError> {
        self.with_group(group_id, |g| {
            if g.is_raw {
                return self.fetch_raw_member(g, in_group_id);
            }
            if in_group_id == 0 {
                self.ensure_reference_loaded(g)?;
                return Ok(g.reference.as_ref().unwrap().bytes.clone());
            }

            let delta = self.fetch_delta(g, in_group_id)?;
            self.ensure_reference_loaded(g)?;
            let cache = g.reference.as_ref().unwrap();
            Ok(cache.codec.decode(&delta)?)
        })
    }

    /// Like [`SegmentStore::get`] but never runs the codec: returns the
    /// reference bytes (id 0), the raw delta bytes (id > 0), or for a raw
    /// group the verbatim member bytes either way.
    pub fn get_raw(&self, group_id: u64, in_group_id: u64) -> Result<Vec<u8>, SegstoreError> {
        self.with_group(group_id, |g| {
            if g.is_raw {
                return self.fetch_raw_member(g, in_group_id);
            }
            if in_group_id == 0 {
                self.ensure_reference_loaded(g)?;
                return Ok(g.reference.as_ref().unwrap().bytes.clone());
            }
            self.fetch_delta(g, in_group_id)
        })
    }

    /// Runs [`crate::lzdiff::LzDiff::estimate`] for `bytes` against
    /// `group_id`'s reference, loading it first if necessary.
    pub fn estimate(&self, group_id: u64, bytes: &[u8], upper_bound: usize) -> Result<usize, SegstoreError> {
        self.with_group(group_id, |g| {
            debug_assert!(!g.is_raw, "estimate called on a raw group");
            self.ensure_reference_loaded(g)?;
            Ok(g.reference.as_ref().unwrap().codec.estimate(bytes, upper_bound))
        })
    }

    /// Per-input-byte coding cost of `bytes` against `group_id`'s
    /// reference, used by C5 to pick an
    /// optimal midpoint split between two candidate references.
    pub fn coding_cost_vector(&self, group_id: u64, bytes: &[u8], prefix_mode: bool) -> Result<Vec<u32>, SegstoreError> {
        self.with_group(group_id, |g| {
            debug_assert!(!g.is_raw, "coding_cost_vector called on a raw group");
            self.ensure_reference_loaded(g)?;
            Ok(g.reference.as_ref().unwrap().codec.coding_cost_vector(bytes, prefix_mode))
        })
    }

    /// Length of `group_id`'s reference, loading it first if necessary.
    /// Used to sort one-end-missing candidates by proximity of reference
    /// length to the segment being placed.
    pub fn reference_len(&self, group_id: u64) -> Result<usize, SegstoreError> {
        self.with_group(group_id, |g| {
            debug_assert!(!g.is_raw, "reference_len called on a raw group");
            self.ensure_reference_loaded(g)?;
            Ok(g.reference.as_ref().unwrap().bytes.len())
        })
    }

    fn ensure_reference_loaded(&self, g: &mut GroupState) -> Result<(), SegstoreError> {
        if g.reference.is_some() {
            return Ok(());
        }
        let ref_id = self
            .archive
            .get_stream_id(&g.ref_stream)
            .ok_or(SegstoreError::UnknownGroup(g.group_id))?;
        let (on_disk, raw_len) = self
            .archive
            .get_part(ref_id, 0)?
            .ok_or(SegstoreError::UnknownGroup(g.group_id))?;
        let variant = *on_disk.last().ok_or(SegstoreError::CorruptPack(g.group_id))?;
        let compressed = &on_disk[..on_disk.len() - 1];
        let decompressed =
            zstd::stream::decode_all(compressed).map_err(|_| SegstoreError::CorruptPack(g.group_id))?;
        let bytes = match variant {
            tuple_pack::VARIANT_PLAIN => decompressed,
            tuple_pack::VARIANT_PACKED => tuple_pack::unpack(&decompressed, raw_len as usize),
            _ => return Err(SegstoreError::CorruptPack(g.group_id)),
        };

        let mut codec = LzDiff::new(self.codec_version, self.min_match_len);
        codec.prepare(bytes.clone());
        g.reference = Some(ReferenceCache { bytes, codec });
        Ok(())
    }

    fn fetch_delta(&self, g: &mut GroupState, in_group_id: u64) -> Result<Vec<u8>, SegstoreError> {
        if in_group_id == 0 || in_group_id >= g.member_count {
            return Err(SegstoreError::InGroupIdOutOfRange {
                group_id: g.group_id,
                in_group_id,
                member_count: g.member_count,
            });
        }
        let ordinal = in_group_id - 1; // ids 1.. are deltas; 0 is the reference
        let part_index = (ordinal / self.pack_cardinality) as usize;
        let offset_in_part = (ordinal % self.pack_cardinality) as usize;

        let delta_id = self
            .archive
            .get_stream_id(&g.delta_stream)
            .ok_or(SegstoreError::UnknownGroup(g.group_id))?;

        if let Some((raw, _)) = self.archive.get_part(delta_id, part_index)? {
            let decompressed =
                zstd::stream::decode_all(&raw[..]).map_err(|_| SegstoreError::CorruptPack(g.group_id))?;
            let members: Vec<&[u8]> = decompressed.split(|&b| b == PACK_SEPARATOR).collect();
            return members
                .get(offset_in_part)
                .map(|m| m.to_vec())
                .ok_or(SegstoreError::CorruptPack(g.group_id));
        }

        // Not yet flushed: must be the pack still being built in memory.
        g.pending
            .get(offset_in_part)
            .cloned()
            .ok_or(SegstoreError::InGroupIdOutOfRange {
                group_id: g.group_id,
                in_group_id,
                member_count: g.member_count,
            })
    }

    fn fetch_raw_member(&self, g: &GroupState, in_group_id: u64) -> Result<Vec<u8>, SegstoreError> {
        if in_group_id >= g.member_count {
            return Err(SegstoreError::InGroupIdOutOfRange {
                group_id: g.group_id,
                in_group_id,
                member_count: g.member_count,
            });
        }
        let part_index = (in_group_id / self.pack_cardinality) as usize;
        let offset_in_part = (in_group_id % self.pack_cardinality) as usize;

        let delta_id = self
            .archive
            .get_stream_id(&g.delta_stream)
            .ok_or(SegstoreError::UnknownGroup(g.group_id))?;

        if let Some((raw, _)) = self.archive.get_part(delta_id, part_index)? {
            let members: Vec<&[u8]> = raw.split(|&b| b == PACK_SEPARATOR).collect();
            return members
                .get(offset_in_part)
                .map(|m| m.to_vec())
                .ok_or(SegstoreError::CorruptPack(g.group_id));
        }

        g.raw_pending
            .get(offset_in_part)
            .cloned()
            .ok_or(SegstoreError::InGroupIdOutOfRange {
                group_id: g.group_id,
                in_group_id,
                member_count: g.member_count,
            })
    }

    /// Flushes every group's partial pack at archive close.
    pub fn finish(&self) -> Result<(), SegstoreError> {
        let groups = self.groups.read().unwrap();
        for cell in groups.iter() {
            let mut g = cell.lock().unwrap();
            if g.is_raw {
                if !g.raw_pending.is_empty() {
                    flush_raw_pack(&self.archive, &mut g)?;
                }
            } else if !g.pending.is_empty() {
                flush_delta_pack(&self.archive, &mut g)?;
            }
        }
        Ok(())
    }

    /// Copies all but the last delta-pack part of `group_id` from
    /// `input` unmodified, reloads the last (possibly partial) part into
    /// memory so new members can be appended, and primes the reference
    /// cache from the unmodified, still-packed reference part.
    pub fn appending_init(&self, group_id: u64, input: &Archive) -> Result<(), SegstoreError> {
        self.with_group(group_id, |g| {
            let in_ref_id = input
                .get_stream_id(&g.ref_stream)
                .ok_or(SegstoreError::UnknownGroup(group_id))?;
            if let Some((ref_bytes, raw_len)) = input.get_part(in_ref_id, 0)? {
                let out_ref_id = self
                    .archive
                    .get_stream_id(&g.ref_stream)
                    .expect("ref stream registered at group creation");
                self.archive.add_part(out_ref_id, &ref_bytes, raw_len)?;
            }

            let in_delta_id = input
                .get_stream_id(&g.delta_stream)
                .ok_or(SegstoreError::UnknownGroup(group_id))?;
            let out_delta_id = self
                .archive
                .get_stream_id(&g.delta_stream)
                .expect("delta stream registered at group creation");

            let num_parts = input.num_parts(in_delta_id);
            let mut member_count = if !g.is_raw { 1 } else { 0 }; // reference occupies id 0 for non-raw groups

            for part_index in 0..num_parts {
                let (raw, meta) = input.get_part(in_delta_id, part_index)?.expect("part within range");
                if part_index + 1 < num_parts {
                    self.archive.add_part(out_delta_id, &raw, meta)?;
                    member_count += self.pack_cardinality;
                } else {
                    let members: Vec<Vec<u8>> = if g.is_raw {
                        raw.split(|&b| b == PACK_SEPARATOR).map(|m| m.to_vec()).collect()
                    } else {
                        let decompressed = zstd::stream::decode_all(&raw[..])
                            .map_err(|_| SegstoreError::CorruptPack(group_id))?;
                        decompressed.split(|&b| b == PACK_SEPARATOR).map(|m| m.to_vec()).collect()
                    };
                    member_count += members.len() as u64;
                    if g.is_raw {
                        g.raw_pending = members;
                    } else {
                        g.pending_index = members
                            .iter()
                            .enumerate()
                            .map(|(i, m)| (m.clone(), member_count - members.len() as u64 + i as u64))
                            .collect();
                        g.pending = members;
                    }
                }
            }
            g.member_count = member_count;

            self.ensure_reference_loaded(g)?;
            Ok(())
        })
    }
}

fn flush_delta_pack(archive: &Archive, g: &mut GroupState) -> Result<(), SegstoreError> {
    let mut buf = Vec::new();
    for (i, delta) in g.pending.iter().enumerate() {
        if i > 0 {
            buf.push(PACK_SEPARATOR);
        }
        buf.extend_from_slice(delta);
    }
    let compressed = zstd::stream::encode_all(&buf[..], ZSTD_LEVEL_DELTA_PACK)
        .map_err(crate::error::ArchiveError::Io)?;
    let delta_id = archive
        .get_stream_id(&g.delta_stream)
        .expect("delta stream registered at group creation");
    archive.add_part(delta_id, &compressed, g.pending.len() as u64)?;
    g.pending.clear();
    g.pending_index.clear();
    Ok(())
}

fn flush_raw_pack(archive: &Archive, g: &mut GroupState) -> Result<(), SegstoreError> {
    let mut buf = Vec::new();
    for (i, member) in g.raw_pending.iter().enumerate() {
        if i > 0 {
            buf.push(PACK_SEPARATOR);
        }
        buf.extend_from_slice(member);
    }
    let delta_id = archive
        .get_stream_id(&g.delta_stream)
        .expect("delta stream registered at group creation");
    archive.add_part(delta_id, &buf, g.raw_pending.len() as u64)?;
    g.raw_pending.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::encode_seq;
    use tempfile::tempdir;

    fn store(dir: &tempfile::TempDir, pack_cardinality: u64) -> SegmentStore {
        let archive = Arc::new(Archive::create(dir.path().join("a.pgarc")).unwrap());
        SegmentStore::new(archive, pack_cardinality, 20, CodecVersion::V2)
    }

    #[test]
    fn first_add_becomes_the_reference() {
        let dir = tempdir().unwrap();
        let store = store(&dir, 4);
        let gid = store.new_group();
        let reference = encode_seq(&b"ACGTACGGTTCAGTCAGGTACCAGT".repeat(3));
        let id = store.add(gid, reference.clone()).unwrap();
        assert_eq!(id, 0);
        assert_eq!(store.get(gid, 0).unwrap(), reference);
    }

    #[test]
    fn second_identical_member_reuses_reference_id() {
        let dir = tempdir().unwrap();
        let store = store(&dir, 4);
        let gid = store.new_group();
        let reference = encode_seq(&b"ACGTACGGTTCAGTCAGGTACCAGT".repeat(3));
        store.add(gid, reference.clone()).unwrap();
        let id = store.add(gid, reference.clone()).unwrap();
        assert_eq!(id, 0);
    }

    #[test]
    fn dedup_within_pack_reuses_in_group_id() {
        let dir = tempdir().unwrap();
        let store = store(&dir, 8);
        let gid = store.new_group();
        let reference = encode_seq(&b"ACGTACGGTTCAGTCAGGTACCAGTACGTTGACCATGGAGTTCAGG".repeat(2));
        store.add(gid, reference.clone()).unwrap();

        let mut mutated = reference.clone();
        mutated[5] = (mutated[5] + 1) % 4;

        let first = store.add(gid, mutated.clone()).unwrap();
        let second = store.add(gid, mutated.clone()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn raw_group_round_trips_verbatim() {
        let dir = tempdir().unwrap();
        let store = store(&dir, 4);
        store.reserve_raw_groups();
        let member = encode_seq(b"ACGTACGT");
        let id = store.add_raw(0, &member).unwrap();
        assert_eq!(store.get(0, id).unwrap(), member);
    }

    #[test]
    fn flush_and_reread_after_pack_boundary() {
        let dir = tempdir().unwrap();
        let store = store(&dir, 2);
        let gid = store.new_group();
        let reference = encode_seq(&b"ACGTACGGTTCAGTCAGGTACCAGTACGTTGACCATGGAGTTCAGG".repeat(2));
        store.add(gid, reference.clone()).unwrap();

        let mut m1 = reference.clone();
        m1[1] = (m1[1] + 1) % 4;
        let id1 = store.add(gid, m1.clone()).unwrap();

        let mut m2 = reference.clone();
        m2[2] = (m2[2] + 1) % 4;
        let id2 = store.add(gid, m2.clone()).unwrap(); // triggers a flush at pack_cardinality=2

        let mut m3 = reference.clone();
        m3[3] = (m3[3] + 1) % 4;
        let id3 = store.add(gid, m3.clone()).unwrap();

        assert_eq!(store.get(gid, id1).unwrap(), m1);
        assert_eq!(store.get(gid, id2).unwrap(), m2);
        assert_eq!(store.get(gid, id3).unwrap(), m3);
    }
}
