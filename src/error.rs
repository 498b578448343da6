//! Error types for every fallible layer of the archive: container (C1),
//! catalog (C2), query/decode (C3 surfaced through C5), and the
//! segmentation/assignment engine (C5) itself.
//!
//! Each layer gets its own enum so callers can match on the failure kind
//! that actually happened to them rather than a single flat error; the
//! `#[from]` chains let `?` compose across layers without manual wrapping.

use std::path::PathBuf;

/// Failures from the archive container (C1): opening, trailer parsing,
/// and stream/part bookkeeping.
#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("truncated or missing archive trailer in {0}")]
    TruncatedTrailer(PathBuf),

    #[error("unsupported archive format version {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },

    #[error("missing required stream: {0}")]
    MissingStream(String),

    #[error("short read for part {part_index} of stream {stream}: expected {expected} bytes, got {actual}")]
    ShortPart {
        stream: String,
        part_index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("archive already closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Collapses a catalog/segstore/engine error down to its underlying
/// [`ArchiveError`] (or wraps it as an opaque I/O error if it carries no
/// archive cause), for callers whose own fallible surface is archive-level
/// (e.g. [`crate::engine::Compressor::close`]).
fn opaque_io<E: std::fmt::Display>(e: E) -> ArchiveError {
    ArchiveError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

/// Failures from the collection catalog (C2).
#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("duplicate contig {contig:?} in sample {sample:?}")]
    DuplicateContig { sample: String, contig: String },

    #[error("corrupt catalog batch {0}")]
    CorruptBatch(usize),

    #[error("unknown sample {0:?}")]
    UnknownSample(String),

    #[error("unknown contig {contig:?} in sample {sample:?}")]
    UnknownContig { sample: String, contig: String },

    #[error("segment position {position} never placed for contig {contig:?} in sample {sample:?}")]
    MissingSegmentPosition {
        sample: String,
        contig: String,
        position: usize,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Failures from the segment store (C4): reference/pack decoding and
/// group-id bookkeeping.
#[derive(thiserror::Error, Debug)]
pub enum SegstoreError {
    #[error("unknown group {0}")]
    UnknownGroup(u64),

    #[error("in_group_id {in_group_id} out of range for group {group_id} ({member_count} members)")]
    InGroupIdOutOfRange {
        group_id: u64,
        in_group_id: u64,
        member_count: u64,
    },

    #[error("corrupt pack for group {0}")]
    CorruptPack(u64),

    #[error(transparent)]
    Decode(#[from] crate::lzdiff::DecodeError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Failures surfaced to library callers issuing region queries.
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("contig {contig:?} not found in sample {sample:?}")]
    NotFound { sample: String, contig: String },

    #[error("contig {0:?} is present in more than one sample; a sample name is required")]
    Ambiguous(String),

    #[error("codec corruption while decoding contig {0:?}: delta references an out-of-range reference position")]
    CodecCorruption(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Segstore(#[from] SegstoreError),
}

/// Failures from the segmentation/assignment engine (C5) while ingesting
/// new contigs during compression.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("contig {0:?} is empty")]
    EmptyContig(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Segstore(#[from] SegstoreError),
}
