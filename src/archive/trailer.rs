//! Trailer serialization: the index written once at the end of an archive
//! file, read back wholesale when the archive is opened.
//!
//! Layout (all integers via [`crate::varint`]):
//! ```text
//! <stream-count>
//! repeat stream-count times:
//!     <name, null-terminated>
//!     <part-count>
//!     <raw-size>
//!     repeat part-count times:
//!         <offset>
//!         <size>
//! <trailer-size: fixed 8 bytes, little-endian>
//! ```
//! The fixed 8-byte footer lets a reader seek straight to the trailer start
//! from EOF without scanning the file forward.

use std::io::{self, Write};
use std::path::Path;

use crate::error::ArchiveError;
use crate::varint::{read_cstr, read_varint, write_cstr, write_varint};

#[derive(Debug, Clone)]
pub struct PartMeta {
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct StreamMeta {
    pub name: String,
    pub raw_size: u64,
    pub parts: Vec<PartMeta>,
}

/// Writes the trailer for `streams` to `w`, which must currently be
/// positioned at the first byte after the last part payload.
pub fn write<W: Write>(w: &mut W, streams: &[StreamMeta]) -> io::Result<()> {
    let mut buf = Vec::new();

    write_varint(&mut buf, streams.len() as u64)?;
    for s in streams {
        write_cstr(&mut buf, &s.name)?;
        write_varint(&mut buf, s.parts.len() as u64)?;
        write_varint(&mut buf, s.raw_size)?;
        for p in &s.parts {
            write_varint(&mut buf, p.offset)?;
            write_varint(&mut buf, p.size)?;
        }
    }

    w.write_all(&buf)?;
    w.write_all(&(buf.len() as u64).to_le_bytes())?;
    Ok(())
}

/// Parses the trailer out of a fully memory-mapped archive file.
pub fn parse(mmap: &[u8], path: &Path) -> Result<Vec<StreamMeta>, ArchiveError> {
    if mmap.len() < 8 {
        return Err(ArchiveError::TruncatedTrailer(path.to_path_buf()));
    }

    let footer = &mmap[mmap.len() - 8..];
    let trailer_size = u64::from_le_bytes(footer.try_into().unwrap()) as usize;

    if trailer_size > mmap.len() - 8 {
        return Err(ArchiveError::TruncatedTrailer(path.to_path_buf()));
    }

    let trailer_start = mmap.len() - 8 - trailer_size;
    let mut cursor = &mmap[trailer_start..mmap.len() - 8];

    let stream_count = read_varint(&mut cursor)
        .map_err(|_| ArchiveError::TruncatedTrailer(path.to_path_buf()))?;

    let mut streams = Vec::with_capacity(stream_count as usize);
    for _ in 0..stream_count {
        let name = read_cstr(&mut cursor)
            .map_err(|_| ArchiveError::TruncatedTrailer(path.to_path_buf()))?;
        let part_count = read_varint(&mut cursor)
            .map_err(|_| ArchiveError::TruncatedTrailer(path.to_path_buf()))?;
        let raw_size = read_varint(&mut cursor)
            .map_err(|_| ArchiveError::TruncatedTrailer(path.to_path_buf()))?;

        let mut parts = Vec::with_capacity(part_count as usize);
        for _ in 0..part_count {
            let offset = read_varint(&mut cursor)
                .map_err(|_| ArchiveError::TruncatedTrailer(path.to_path_buf()))?;
            let size = read_varint(&mut cursor)
                .map_err(|_| ArchiveError::TruncatedTrailer(path.to_path_buf()))?;
            parts.push(PartMeta { offset, size });
        }

        streams.push(StreamMeta {
            name,
            raw_size,
            parts,
        });
    }

    Ok(streams)
}
