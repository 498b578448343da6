//! pgarc — a pan-genome archive format: reference-relative compression and
//! random access for collections of assembled genomes.
//!
//! A pgarc archive (C1, [`archive`]) holds a catalog (C2, [`collection`])
//! mapping every ingested sample's contigs onto ordered lists of segments,
//! each stored (C4, [`segstore`]) either verbatim or as a delta against a
//! per-group reference coded with the differential encoder (C3,
//! [`lzdiff`]). The segmentation/assignment engine (C5, [`engine`]) decides
//! how a newly ingested contig is cut into segments and which group each
//! one belongs to; [`engine::Compressor`] is the public write-side facade
//! and [`query::Decompressor`] the public read-side one.

pub mod alphabet;
pub mod archive;
pub mod collection;
pub mod engine;
pub mod error;
pub mod kmer;
pub mod lzdiff;
pub mod query;
pub mod segstore;
pub mod threadpool;
pub mod varint;

pub use engine::{Compressor, CompressorConfig};
pub use query::{Decompressor, DecompressorConfig};
