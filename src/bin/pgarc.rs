//! Thin CLI front-end for pgarc archives: six subcommands, each a
//! direct adapter onto the library's `Compressor`/`Decompressor` facade.
//!
//! FASTA parsing and writing lives here, not in the library — sequence-file
//! I/O is explicitly out of the library's scope; the library only ever
//! sees already-decoded bytes.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use pgarc::alphabet;
use pgarc::archive::Archive;
use pgarc::engine::{read_group_count, read_params};
use pgarc::varint;
use pgarc::{Compressor, CompressorConfig, Decompressor, DecompressorConfig};

#[derive(Parser)]
#[command(name = "pgarc")]
#[command(about = "Pan-genome archive: reference-relative compression and random access for collections of assembled genomes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new archive from a reference FASTA plus further samples.
    Create {
        #[arg(short = 'k', long, default_value_t = 21)]
        k: u32,
        #[arg(short = 's', long = "seg-size", default_value_t = 5_000)]
        seg_size: u32,
        #[arg(short = 'l', long = "min-match", default_value_t = 20)]
        min_match: u32,
        #[arg(short = 'b', long = "pack-card", default_value_t = 100)]
        pack_card: u32,
        #[arg(short = 't', long, default_value_t = num_cpus::get())]
        threads: usize,
        /// Treat each input file as one concatenated genome rather than a set of independent contigs.
        #[arg(short = 'c', long)]
        concatenated: bool,
        /// Overwrite an existing output file.
        #[arg(short = 'f', long)]
        force: bool,
        /// Promote singleton internal k-mers to splitters for contigs that miss the reference entirely.
        #[arg(short = 'd', long)]
        adaptive: bool,
        /// Restrict ingestion to the sample names listed in this file (one per line).
        #[arg(short = 'i', long = "sample-list")]
        sample_list: Option<PathBuf>,
        #[arg(short = 'o', long)]
        out: PathBuf,
        reference: PathBuf,
        inputs: Vec<PathBuf>,
    },

    /// Append further samples to an archive, writing a new archive file.
    Append {
        #[arg(short = 't', long, default_value_t = num_cpus::get())]
        threads: usize,
        #[arg(short = 'c', long)]
        concatenated: bool,
        #[arg(short = 'f', long)]
        force: bool,
        #[arg(short = 'd', long)]
        adaptive: bool,
        #[arg(short = 'i', long = "sample-list")]
        sample_list: Option<PathBuf>,
        #[arg(short = 'o', long)]
        out: PathBuf,
        archive: PathBuf,
        inputs: Vec<PathBuf>,
    },

    /// Write every contig of the given samples (or all samples) as FASTA.
    Getset {
        #[arg(short = 't', long, default_value_t = num_cpus::get())]
        threads: usize,
        #[arg(short = 'l', long = "line-len", default_value_t = 80)]
        line_len: usize,
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,
        archive: PathBuf,
        samples: Vec<String>,
    },

    /// Write the requested region queries as FASTA.
    Getctg {
        #[arg(short = 't', long, default_value_t = num_cpus::get())]
        threads: usize,
        #[arg(short = 'l', long = "line-len", default_value_t = 80)]
        line_len: usize,
        /// Reverse-complement every returned sequence before writing it.
        #[arg(short = 'p', long)]
        rev_comp: bool,
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,
        archive: PathBuf,
        queries: Vec<String>,
    },

    /// List every sample in the archive.
    Listset {
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,
        archive: PathBuf,
    },

    /// List every contig for the given samples (all samples if none given).
    Listctg {
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,
        archive: PathBuf,
        samples: Vec<String>,
    },

    /// Print archive metadata: format version, parameters, sample/group counts.
    Info {
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,
        archive: PathBuf,
    },
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("pgarc: error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Create {
            k,
            seg_size,
            min_match,
            pack_card,
            threads,
            concatenated,
            force,
            adaptive,
            sample_list,
            out,
            reference,
            inputs,
        } => cmd_create(CreateArgs {
            config: CompressorConfig {
                k,
                min_match_len: min_match,
                segment_size: seg_size,
                pack_cardinality: pack_card,
                num_threads: threads.max(1),
                adaptive,
                concatenated_genomes: concatenated,
            },
            force,
            sample_list,
            out,
            reference,
            inputs,
        }),
        Command::Append {
            threads,
            concatenated,
            force,
            adaptive,
            sample_list,
            out,
            archive,
            inputs,
        } => cmd_append(AppendArgs {
            threads: threads.max(1),
            concatenated,
            force,
            adaptive,
            sample_list,
            out,
            archive,
            inputs,
        }),
        Command::Getset {
            threads,
            line_len,
            out,
            archive,
            samples,
        } => {
            let _ = threads; // single region reconstruction is inherently sequential
            cmd_getset(&archive, &samples, line_len, out.as_deref())
        }
        Command::Getctg {
            threads,
            line_len,
            rev_comp,
            out,
            archive,
            queries,
        } => {
            let _ = threads;
            cmd_getctg(&archive, &queries, line_len, rev_comp, out.as_deref())
        }
        Command::Listset { out, archive } => cmd_listset(&archive, out.as_deref()),
        Command::Listctg { out, archive, samples } => cmd_listctg(&archive, &samples, out.as_deref()),
        Command::Info { out, archive } => cmd_info(&archive, out.as_deref()),
    }
}

// ---------------------------------------------------------------------------
// create / append
// ---------------------------------------------------------------------------

struct CreateArgs {
    config: CompressorConfig,
    force: bool,
    sample_list: Option<PathBuf>,
    out: PathBuf,
    reference: PathBuf,
    inputs: Vec<PathBuf>,
}

fn cmd_create(args: CreateArgs) -> anyhow::Result<()> {
    if args.out.exists() && !args.force {
        anyhow::bail!("output {} already exists (pass -f to overwrite)", args.out.display());
    }
    let allow = load_sample_filter(args.sample_list.as_deref())?;

    let mut compressor = Compressor::create(&args.out, args.config)?;
    let mut all_inputs = Vec::with_capacity(args.inputs.len() + 1);
    all_inputs.push(args.reference);
    all_inputs.extend(args.inputs);
    ingest_files(&mut compressor, &all_inputs, allow.as_ref())?;
    compressor.close()?;
    Ok(())
}

struct AppendArgs {
    threads: usize,
    concatenated: bool,
    force: bool,
    adaptive: bool,
    sample_list: Option<PathBuf>,
    out: PathBuf,
    archive: PathBuf,
    inputs: Vec<PathBuf>,
}

fn cmd_append(args: AppendArgs) -> anyhow::Result<()> {
    if args.out.exists() && !args.force {
        anyhow::bail!("output {} already exists (pass -f to overwrite)", args.out.display());
    }
    let allow = load_sample_filter(args.sample_list.as_deref())?;

    let config = CompressorConfig {
        num_threads: args.threads,
        adaptive: args.adaptive,
        concatenated_genomes: args.concatenated,
        ..CompressorConfig::default()
    };
    let mut compressor = Compressor::append(&args.archive, &args.out, config)?;
    ingest_files(&mut compressor, &args.inputs, allow.as_ref())?;
    compressor.close()?;
    Ok(())
}

fn ingest_files(compressor: &mut Compressor, paths: &[PathBuf], allow: Option<&HashSet<String>>) -> anyhow::Result<()> {
    for path in paths {
        let sample = sample_name_from_path(path);
        if let Some(allow) = allow {
            if !allow.contains(&sample) {
                log::info!("pgarc: skipping {} (not in sample list)", path.display());
                continue;
            }
        }
        let records = read_fasta(path)?;
        let contigs: Vec<(String, Vec<u8>)> = records
            .into_iter()
            .map(|(name, seq)| (name, alphabet::encode_seq(&seq)))
            .collect();
        compressor.add_sample(&sample, &contigs)?;
    }
    Ok(())
}

fn load_sample_filter(path: Option<&Path>) -> anyhow::Result<Option<HashSet<String>>> {
    let Some(path) = path else { return Ok(None) };
    let text = fs::read_to_string(path)?;
    Ok(Some(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_owned).collect()))
}

fn sample_name_from_path(path: &Path) -> String {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("sample").to_owned()
}

// ---------------------------------------------------------------------------
// getset / getctg
// ---------------------------------------------------------------------------

fn cmd_getset(archive: &Path, samples: &[String], line_len: usize, out: Option<&Path>) -> anyhow::Result<()> {
    let mut dec = Decompressor::open(archive, DecompressorConfig::default())?;
    let targets = if samples.is_empty() { dec.list_samples() } else { samples.to_vec() };

    let mut w = open_output(out)?;
    for sample in &targets {
        for contig in dec.list_contigs(sample)? {
            let len = dec.get_contig_length(sample, &contig)?;
            let seq = dec.get_contig_sequence(sample, &contig, 0, len as i64 - 1)?;
            write_fasta_record(&mut w, &format!("{contig}@{sample}"), &seq, line_len)?;
        }
    }
    dec.close()?;
    Ok(())
}

fn cmd_getctg(archive: &Path, queries: &[String], line_len: usize, rev_comp: bool, out: Option<&Path>) -> anyhow::Result<()> {
    let mut dec = Decompressor::open(archive, DecompressorConfig::default())?;
    let mut w = open_output(out)?;

    for raw in queries {
        let query = match parse_query(raw) {
            Ok(q) => q,
            Err(e) => {
                eprintln!("pgarc: skipping malformed query {raw:?}: {e}");
                continue;
            }
        };
        if query.from < 0 || query.to < 0 {
            log::warn!("pgarc: query {raw:?} has a negative endpoint; clamping to [0, len-1]");
        }
        match dec.get_contig_sequence(&query.sample, &query.contig, query.from, query.to) {
            Ok(mut seq) => {
                if rev_comp {
                    let codes = alphabet::encode_seq(&seq);
                    seq = alphabet::decode_seq(&alphabet::reverse_complement(&codes));
                }
                write_fasta_record(&mut w, raw, &seq, line_len)?;
            }
            Err(e) => eprintln!("pgarc: query {raw:?} failed: {e}"),
        }
    }
    dec.close()?;
    Ok(())
}

struct Query {
    contig: String,
    sample: String,
    from: i64,
    to: i64,
}

/// Parses `name`, `name@sample`, `name:from-to`, `name@sample:from-to`.
fn parse_query(raw: &str) -> anyhow::Result<Query> {
    let (head, range) = match raw.split_once(':') {
        Some((h, r)) => (h, Some(r)),
        None => (raw, None),
    };
    let (contig, sample) = match head.split_once('@') {
        Some((c, s)) => (c.to_owned(), s.to_owned()),
        None => (head.to_owned(), String::new()),
    };
    let (from, to) = match range {
        Some(r) => {
            let (a, b) = r
                .split_once('-')
                .ok_or_else(|| anyhow::anyhow!("malformed range {r:?} in query {raw:?}"))?;
            (a.parse::<i64>()?, b.parse::<i64>()?)
        }
        None => (0, i64::MAX),
    };
    Ok(Query { contig, sample, from, to })
}

// ---------------------------------------------------------------------------
// listset / listctg / info
// ---------------------------------------------------------------------------

fn cmd_listset(archive: &Path, out: Option<&Path>) -> anyhow::Result<()> {
    let dec = Decompressor::open(archive, DecompressorConfig::default())?;
    let mut w = open_output(out)?;
    for sample in dec.list_samples() {
        writeln!(w, "{sample}")?;
    }
    Ok(())
}

fn cmd_listctg(archive: &Path, samples: &[String], out: Option<&Path>) -> anyhow::Result<()> {
    let mut dec = Decompressor::open(archive, DecompressorConfig::default())?;
    let targets = if samples.is_empty() { dec.list_samples() } else { samples.to_vec() };
    let mut w = open_output(out)?;
    for sample in &targets {
        for contig in dec.list_contigs(sample)? {
            writeln!(w, "{sample}\t{contig}")?;
        }
    }
    Ok(())
}

fn cmd_info(archive_path: &Path, out: Option<&Path>) -> anyhow::Result<()> {
    let archive = Archive::open(archive_path)?;
    let (producer, major, minor) = read_file_type_info(&archive)?;
    let (k, min_match_len, pack_cardinality, segment_size) = read_params(&archive)?;
    let num_groups = read_group_count(&archive)?;
    let dec = Decompressor::open(archive_path, DecompressorConfig::default())?;
    let samples = dec.list_samples();

    let mut w = open_output(out)?;
    writeln!(w, "producer: {producer} v{major}.{minor}")?;
    writeln!(w, "k: {k}")?;
    writeln!(w, "min_match_len: {min_match_len}")?;
    writeln!(w, "segment_size: {segment_size}")?;
    writeln!(w, "pack_cardinality: {pack_cardinality}")?;
    writeln!(w, "samples: {}", samples.len())?;
    writeln!(w, "groups: {num_groups}")?;
    Ok(())
}

fn read_file_type_info(archive: &Archive) -> anyhow::Result<(String, u32, u32)> {
    let id = archive
        .get_stream_id("file_type_info")
        .ok_or_else(|| anyhow::anyhow!("missing file_type_info stream"))?;
    let (raw, _) = archive
        .get_part(id, 0)?
        .ok_or_else(|| anyhow::anyhow!("missing file_type_info stream"))?;
    let mut cursor = &raw[..];
    let producer = varint::read_cstr(&mut cursor)?;
    let remaining = raw.len() - cursor.len();
    let major = u32::from_le_bytes(raw[remaining..remaining + 4].try_into()?);
    let minor = u32::from_le_bytes(raw[remaining + 4..remaining + 8].try_into()?);
    Ok((producer, major, minor))
}

// ---------------------------------------------------------------------------
// FASTA I/O
// ---------------------------------------------------------------------------

fn read_fasta(path: &Path) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
    let text = fs::read_to_string(path)?;
    let mut records = Vec::new();
    let mut current_name: Option<String> = None;
    let mut current_seq: Vec<u8> = Vec::new();

    for line in text.lines() {
        if let Some(header) = line.strip_prefix('>') {
            if let Some(name) = current_name.take() {
                records.push((name, std::mem::take(&mut current_seq)));
            }
            current_name = Some(header.split_whitespace().next().unwrap_or("").to_owned());
        } else {
            current_seq.extend(line.trim_end().bytes());
        }
    }
    if let Some(name) = current_name {
        records.push((name, current_seq));
    }
    if records.is_empty() {
        anyhow::bail!("{}: no FASTA records found", path.display());
    }
    Ok(records)
}

fn write_fasta_record(w: &mut dyn Write, header: &str, seq: &[u8], line_len: usize) -> io::Result<()> {
    writeln!(w, ">{header}")?;
    if line_len == 0 {
        w.write_all(seq)?;
        writeln!(w)?;
    } else {
        for chunk in seq.chunks(line_len) {
            w.write_all(chunk)?;
            writeln!(w)?;
        }
    }
    Ok(())
}

fn open_output(path: Option<&Path>) -> anyhow::Result<Box<dyn Write>> {
    match path {
        Some(p) => Ok(Box::new(BufWriter::new(File::create(p)?))),
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}
