//! C1 — the archive container: a single file exposing named, appendable
//! byte streams, each a sequence of `(metadata, payload)` parts, indexed by
//! a trailer written at close.
//!
//! An [`Archive`] is opened either for writing (streams are registered and
//! parts appended in a single forward pass, then the trailer is written on
//! [`Archive::close`]) or for reading (the trailer is parsed up front and
//! the file is memory-mapped so [`Archive::get_part`] serves directly from
//! the mapping). The two modes are not mixed within one instance, mirroring
//! how a compression run owns a fresh output archive while optionally
//! holding a read-only handle on a prior archive being appended to.
//!
//! All public operations take `&self` and synchronize through one internal
//! mutex, per the single-lock-per-archive model called for by the
//! concurrency design (workers across the segmentation engine share one
//! `Arc<Archive>`).

mod trailer;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use memmap2::Mmap;

use crate::error::ArchiveError;
use crate::varint::{read_varint, write_varint};

pub use trailer::{PartMeta, StreamMeta};

/// Identifies a stream within one archive. Stable for the archive's
/// lifetime once returned by [`Archive::register_stream`].
pub type StreamId = usize;

enum Backing {
    Writing {
        file: BufWriter<File>,
        offset: u64,
    },
    Reading {
        mmap: Mmap,
    },
    /// Set after `close()` has run; any further call is a programming error.
    Closed,
}

struct Inner {
    backing: Backing,
    streams: Vec<StreamMeta>,
    name_to_id: HashMap<String, StreamId>,
    /// Non-empty when some stream names were deliberately excluded from
    /// `name_to_id` at open time (the "lazy-name prefix" optimization).
    /// Cleared (and `name_to_id` fully populated) the first time any lookup
    /// misses.
    lazy_prefix: String,
    lazy_pending: bool,
    /// Parts queued by `add_part_buffered`, keyed by stream, preserving
    /// registration order across streams via `buffer_order`.
    buffered: HashMap<StreamId, Vec<(Vec<u8>, u64)>>,
    buffer_order: Vec<StreamId>,
}

/// A single-file, named-stream container (C1).
pub struct Archive {
    path: PathBuf,
    input_mode: bool,
    inner: Mutex<Inner>,
}

impl Archive {
    /// Creates a new archive file for writing. Fails if the path already
    /// exists and cannot be truncated.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        log::debug!("archive: created {} for writing", path.display());
        Ok(Archive {
            path,
            input_mode: false,
            inner: Mutex::new(Inner {
                backing: Backing::Writing {
                    file: BufWriter::new(file),
                    offset: 0,
                },
                streams: Vec::new(),
                name_to_id: HashMap::new(),
                lazy_prefix: String::new(),
                lazy_pending: false,
                buffered: HashMap::new(),
                buffer_order: Vec::new(),
            }),
        })
    }

    /// Opens an existing archive file for reading, parsing its trailer and
    /// memory-mapping the payload region.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        Self::open_with_lazy_prefix(path, "")
    }

    /// Like [`Archive::open`], but stream names starting with `lazy_prefix`
    /// are excluded from the eager name→id map; the first lookup of any
    /// such name triggers building the full map. Purely a latency
    /// optimization — semantics are identical to [`Archive::open`].
    pub fn open_with_lazy_prefix<P: AsRef<Path>>(
        path: P,
        lazy_prefix: &str,
    ) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let streams = trailer::parse(&mmap, &path)?;

        let mut name_to_id = HashMap::new();
        let mut lazy_pending = false;
        for (id, s) in streams.iter().enumerate() {
            if !lazy_prefix.is_empty() && s.name.starts_with(lazy_prefix) {
                lazy_pending = true;
                continue;
            }
            name_to_id.insert(s.name.clone(), id);
        }

        log::debug!(
            "archive: opened {} for reading ({} streams, lazy_pending={lazy_pending})",
            path.display(),
            streams.len()
        );

        Ok(Archive {
            path,
            input_mode: true,
            inner: Mutex::new(Inner {
                backing: Backing::Reading { mmap },
                streams,
                name_to_id,
                lazy_prefix: lazy_prefix.to_owned(),
                lazy_pending,
                buffered: HashMap::new(),
                buffer_order: Vec::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_input(&self) -> bool {
        self.input_mode
    }

    /// Registers a stream name, or returns the existing id if already seen.
    pub fn register_stream(&self, name: &str) -> StreamId {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&id) = inner.name_to_id.get(name) {
            return id;
        }
        let id = inner.streams.len();
        inner.streams.push(StreamMeta {
            name: name.to_owned(),
            raw_size: 0,
            parts: Vec::new(),
        });
        inner.name_to_id.insert(name.to_owned(), id);
        id
    }

    /// Resolves a stream name to its id, de-lazying the name map on first
    /// miss if a lazy prefix is in effect.
    pub fn get_stream_id(&self, name: &str) -> Option<StreamId> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&id) = inner.name_to_id.get(name) {
            return Some(id);
        }
        if inner.lazy_pending {
            Self::de_lazy(&mut inner);
        }
        inner.name_to_id.get(name).copied()
    }

    fn de_lazy(inner: &mut Inner) {
        for (id, s) in inner.streams.iter().enumerate() {
            inner.name_to_id.entry(s.name.clone()).or_insert(id);
        }
        inner.lazy_pending = false;
        inner.lazy_prefix.clear();
    }

    /// Appends a part to `stream_id` immediately.
    pub fn add_part(&self, stream_id: StreamId, data: &[u8], meta: u64) -> Result<(), ArchiveError> {
        let mut inner = self.inner.lock().unwrap();
        Self::write_part(&mut inner, stream_id, data, meta)
    }

    fn write_part(
        inner: &mut Inner,
        stream_id: StreamId,
        data: &[u8],
        meta: u64,
    ) -> Result<(), ArchiveError> {
        let (file, offset) = match &mut inner.backing {
            Backing::Writing { file, offset } => (file, offset),
            Backing::Reading { .. } => return Err(ArchiveError::Closed),
            Backing::Closed => return Err(ArchiveError::Closed),
        };

        let part_offset = *offset;
        let meta_bytes = write_varint(file, meta)?;
        file.write_all(data)?;
        *offset += meta_bytes as u64 + data.len() as u64;

        let stream = &mut inner.streams[stream_id];
        stream.parts.push(PartMeta {
            offset: part_offset,
            size: data.len() as u64,
        });
        stream.raw_size += data.len() as u64;

        Ok(())
    }

    /// Queues a part for `stream_id`; it is written on the next
    /// [`Archive::flush`], in the order parts were queued across all
    /// streams (registration order of the enqueue calls, not of the
    /// streams).
    pub fn add_part_buffered(&self, stream_id: StreamId, data: Vec<u8>, meta: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.buffered.entry(stream_id).or_default().push((data, meta));
        inner.buffer_order.push(stream_id);
    }

    /// Drains all buffered parts in enqueue order.
    pub fn flush(&self) -> Result<(), ArchiveError> {
        let mut inner = self.inner.lock().unwrap();
        let order = std::mem::take(&mut inner.buffer_order);
        // Pop items in order; `buffered[stream_id]` preserves per-stream
        // FIFO order since we always push to the back and only drain here.
        let mut cursor: HashMap<StreamId, usize> = HashMap::new();
        for stream_id in order {
            let idx = cursor.entry(stream_id).or_insert(0);
            let (data, meta) = {
                let queue = inner.buffered.get(&stream_id).expect("buffer_order consistency");
                queue[*idx].clone()
            };
            *idx += 1;
            Self::write_part(&mut inner, stream_id, &data, meta)?;
        }
        inner.buffered.clear();
        Ok(())
    }

    /// Reads part `part_index` of `stream_id`.
    pub fn get_part(&self, stream_id: StreamId, part_index: usize) -> Result<Option<(Vec<u8>, u64)>, ArchiveError> {
        let inner = self.inner.lock().unwrap();
        Self::read_part(&inner, stream_id, part_index)
    }

    /// Reads part `part_index` of the stream named `name`.
    pub fn get_part_by_name(&self, name: &str, part_index: usize) -> Result<Option<(Vec<u8>, u64)>, ArchiveError> {
        let id = match self.get_stream_id(name) {
            Some(id) => id,
            None => return Ok(None),
        };
        self.get_part(id, part_index)
    }

    /// Coalesced two-stream read, offered as a single call; served
    /// here as two sequential lookups.
    pub fn get_parts(
        &self,
        name_a: &str,
        part_a: usize,
        name_b: &str,
        part_b: usize,
    ) -> Result<(Option<(Vec<u8>, u64)>, Option<(Vec<u8>, u64)>), ArchiveError> {
        let a = self.get_part_by_name(name_a, part_a)?;
        let b = self.get_part_by_name(name_b, part_b)?;
        Ok((a, b))
    }

    fn read_part(
        inner: &Inner,
        stream_id: StreamId,
        part_index: usize,
    ) -> Result<Option<(Vec<u8>, u64)>, ArchiveError> {
        let stream = match inner.streams.get(stream_id) {
            Some(s) => s,
            None => return Ok(None),
        };
        let part = match stream.parts.get(part_index) {
            Some(p) => p,
            None => return Ok(None),
        };

        match &inner.backing {
            Backing::Reading { mmap } => {
                let mut cursor = &mmap[part.offset as usize..];
                let meta = read_varint(&mut cursor)?;
                let payload_start = part.offset as usize + (mmap.len() - part.offset as usize - cursor.len());
                let payload = &mmap[payload_start..payload_start + part.size as usize];
                if payload.len() != part.size as usize {
                    return Err(ArchiveError::ShortPart {
                        stream: stream.name.clone(),
                        part_index,
                        expected: part.size as usize,
                        actual: payload.len(),
                    });
                }
                Ok(Some((payload.to_vec(), meta)))
            }
            Backing::Writing { file, .. } => {
                // Rare path: reading back a part just written within the
                // same writing session (e.g. in-pack dedup lookups). Seek
                // on a cloned handle rather than disturbing the writer's
                // position.
                let mut f = file.get_ref().try_clone()?;
                f.seek(SeekFrom::Start(part.offset))?;
                let mut meta_reader = std::io::BufReader::new(&mut f);
                let meta = read_varint(&mut meta_reader)?;
                let mut payload = vec![0u8; part.size as usize];
                meta_reader.read_exact(&mut payload)?;
                Ok(Some((payload, meta)))
            }
            Backing::Closed => Err(ArchiveError::Closed),
        }
    }

    pub fn raw_size(&self, stream_id: StreamId) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.streams.get(stream_id).map(|s| s.raw_size).unwrap_or(0)
    }

    pub fn num_parts(&self, stream_id: StreamId) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.streams.get(stream_id).map(|s| s.parts.len()).unwrap_or(0)
    }

    pub fn num_streams(&self) -> usize {
        self.inner.lock().unwrap().streams.len()
    }

    /// Flushes any buffered parts and, for a write-mode archive, appends
    /// the trailer and syncs the file. No-op (besides flushing) for a
    /// read-mode archive.
    pub fn close(&self) -> Result<(), ArchiveError> {
        self.flush()?;
        let mut inner = self.inner.lock().unwrap();
        if let Backing::Writing { file, .. } = &mut inner.backing {
            trailer::write(file, &inner.streams)?;
            file.flush()?;
        }
        inner.backing = Backing::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn register_stream_is_idempotent() {
        let dir = tempdir().unwrap();
        let archive = Archive::create(dir.path().join("a.pgarc")).unwrap();
        let a = archive.register_stream("splitters");
        let b = archive.register_stream("splitters");
        let c = archive.register_stream("params");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn write_then_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.pgarc");

        {
            let archive = Archive::create(&path).unwrap();
            let sid = archive.register_stream("params");
            archive.add_part(sid, b"hello", 7).unwrap();
            archive.add_part(sid, b"world!", 0).unwrap();
            archive.close().unwrap();
        }

        let archive = Archive::open(&path).unwrap();
        let sid = archive.get_stream_id("params").unwrap();
        let (data, meta) = archive.get_part(sid, 0).unwrap().unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(meta, 7);
        let (data, meta) = archive.get_part(sid, 1).unwrap().unwrap();
        assert_eq!(data, b"world!");
        assert_eq!(meta, 0);
        assert!(archive.get_part(sid, 2).unwrap().is_none());
    }

    #[test]
    fn unknown_stream_name_returns_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.pgarc");
        {
            let archive = Archive::create(&path).unwrap();
            archive.close().unwrap();
        }
        let archive = Archive::open(&path).unwrap();
        assert!(archive.get_part_by_name("does-not-exist", 0).unwrap().is_none());
    }

    #[test]
    fn buffered_parts_flush_in_enqueue_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.pgarc");
        {
            let archive = Archive::create(&path).unwrap();
            let sid = archive.register_stream("deltas");
            archive.add_part_buffered(sid, b"first".to_vec(), 1);
            archive.add_part_buffered(sid, b"second".to_vec(), 2);
            archive.flush().unwrap();
            archive.close().unwrap();
        }
        let archive = Archive::open(&path).unwrap();
        let sid = archive.get_stream_id("deltas").unwrap();
        assert_eq!(archive.get_part(sid, 0).unwrap().unwrap().0, b"first");
        assert_eq!(archive.get_part(sid, 1).unwrap().unwrap().0, b"second");
    }

    #[test]
    fn lazy_prefix_resolves_on_first_miss() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.pgarc");
        {
            let archive = Archive::create(&path).unwrap();
            let r = archive.register_stream("x_ref_group7");
            archive.add_part(r, b"REF", 0).unwrap();
            let p = archive.register_stream("params");
            archive.add_part(p, b"P", 0).unwrap();
            archive.close().unwrap();
        }
        let archive = Archive::open_with_lazy_prefix(&path, "x_").unwrap();
        // Non-lazy stream resolves immediately.
        assert!(archive.get_stream_id("params").is_some());
        // Lazy stream still resolves correctly, just later.
        let id = archive.get_stream_id("x_ref_group7").unwrap();
        assert_eq!(archive.get_part(id, 0).unwrap().unwrap().0, b"REF");
    }

    #[test]
    fn get_parts_coalesces_two_streams() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.pgarc");
        {
            let archive = Archive::create(&path).unwrap();
            let a = archive.register_stream("a");
            let b = archive.register_stream("b");
            archive.add_part(a, b"A0", 0).unwrap();
            archive.add_part(b, b"B0", 0).unwrap();
            archive.close().unwrap();
        }
        let archive = Archive::open(&path).unwrap();
        let (a, b) = archive.get_parts("a", 0, "b", 0).unwrap();
        assert_eq!(a.unwrap().0, b"A0");
        assert_eq!(b.unwrap().0, b"B0");
    }
}
