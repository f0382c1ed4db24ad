//! Find conserved fuzzy k-mers, pair them into amplicons and score the amplicons.

use std::{
    fs,
    io::Write,
    time::Instant,
    path::{Path, PathBuf},
};
use colored::Colorize;
use const_format::str_repeat;
use crate::{
    Error,
    err::{error, validate_param, add_path},
    ext::{self, sys::{MemoryMeter, ProcessMemory}},
    algo::parse_int,
    seq::{
        fastx::FastaSource,
        counts::{self, KmerCountSource, JfCounter},
    },
    index::{CounterParams, KmerCounter},
    amplicon::{
        AmpliconRegistry, PairParams, SpacedPairFinder,
        pairs::Bins,
        extract, stats,
    },
};
use super::fmt_def;

/// Partition index files are stored in this subdirectory.
pub const PARTITIONS_DIR: &'static str = "partitions";
/// Amplicon sequences are stored in this subdirectory.
pub const FASTAS_DIR: &'static str = "amplicon_fastas";
/// Default k-mer counts cache (outside of the output directory, reused across runs).
pub const COUNTS_DIR: &'static str = "fuzzamp_counts";
pub const PARAMS_FILE: &'static str = "params.json";

/// Initial Jellyfish hash size.
const JF_HASH_SIZE: u64 = 100_000_000;

/// Parameters of the amplicon search.
#[derive(Clone, Debug)]
pub struct FindParams {
    pub counter: CounterParams,
    pub pairs: PairParams,
    /// Discard k-mers that appear more than this number of times in a genome.
    pub max_copies: Option<u64>,
    /// Do not remove partition index files at the end.
    pub keep_index: bool,
    /// Amplicon sequences are extracted in batches of at most this size (bytes).
    pub extract_memory: u64,
}

impl Default for FindParams {
    fn default() -> Self {
        Self {
            counter: CounterParams::default(),
            pairs: PairParams::default(),
            max_copies: None,
            keep_index: false,
            extract_memory: 4_000_000_000,
        }
    }
}

impl FindParams {
    pub fn validate(&self) -> Result<(), Error> {
        self.counter.validate()?;
        self.pairs.validate()?;
        validate_param!(self.extract_memory > 0, "Extraction batch size must be positive");
        Ok(())
    }

    fn to_json(&self, inputs: &[PathBuf]) -> json::JsonValue {
        json::object!{
            inputs: inputs.iter().map(|path| path.to_string_lossy().into_owned()).collect::<Vec<_>>(),
            counter: self.counter.to_json(),
            min_dist: self.pairs.min_dist,
            max_dist: self.pairs.max_dist,
            max_copies: self.max_copies,
            keep_index: self.keep_index,
            extract_memory: self.extract_memory,
        }
    }
}

/// Summary of the amplicon search.
#[derive(Clone, Debug, Default)]
pub struct FindSummary {
    pub conserved: usize,
    pub pairs: usize,
    pub amplicons: usize,
    /// Amplicons, present in at least two genomes (written to the statistics and to FASTA files).
    pub reported: usize,
}

/// Counts k-mers in all genomes and returns conserved groups, split by (genome, contig).
fn find_conserved(
    inputs: &[PathBuf],
    partitions_dir: &Path,
    params: &FindParams,
    count_source: Option<&dyn KmerCountSource>,
    meter: Box<dyn MemoryMeter>,
) -> crate::Result<Bins> {
    let mut counter = KmerCounter::new(params.counter.clone(), partitions_dir, meter)?;
    let n_genomes = inputs.len();
    for (i, path) in inputs.iter().enumerate() {
        let timer = Instant::now();
        log::info!("[{}/{}] Counting k-mers in {}", i + 1, n_genomes, ext::fmt::path(path));
        let skip = match (params.max_copies, count_source) {
            (Some(max_copies), Some(source)) =>
                Some(counts::overrepresented(source.count_kmers(path, params.counter.k)?, max_copies)?),
            _ => None,
        };
        if let Some(set) = &skip {
            log::debug!("    {} k-mers appear more than {} times", set.len(), params.max_copies.unwrap_or(0));
        }
        let summary = counter.count_genome(FastaSource::open(path)?, skip.as_ref())?;
        log::debug!("    {} contigs, {} k-mers ({} ambiguous, {} repetitive skipped) in {}",
            summary.contigs, summary.routed, summary.ambiguous, summary.repetitive,
            ext::fmt::Duration(timer.elapsed()));
        if summary.contigs == 0 {
            log::warn!("No sequences found in {}", ext::fmt::path(path));
        }
    }

    let timer = Instant::now();
    log::info!("Searching for k-mers, conserved across {} genomes", n_genomes);
    let mut bins = Bins::new();
    let counted = counter.genomes();
    for group in counter.collect_conserved(counted)? {
        bins.add(group?);
    }
    log::info!("    Found {} conserved groups in {}", bins.num_groups(), ext::fmt::Duration(timer.elapsed()));
    Ok(bins)
}

/// Runs the whole amplicon search, output directory must not exist.
/// If `count_source` is set together with `params.max_copies`, repetitive k-mers are discarded.
pub fn find_amplicons(
    inputs: &[PathBuf],
    out_dir: &Path,
    params: &FindParams,
    count_source: Option<&dyn KmerCountSource>,
    meter: Box<dyn MemoryMeter>,
) -> crate::Result<FindSummary> {
    if out_dir.exists() {
        return Err(Error::OutputConflict(out_dir.to_owned()));
    }
    params.validate()?;
    if inputs.is_empty() {
        return Err(error!(InvalidInput, "No input genomes provided"));
    }
    if inputs.len() > u32::MAX as usize {
        return Err(error!(InvalidInput, "Too many input genomes ({})", inputs.len()));
    }
    fs::create_dir_all(out_dir).map_err(add_path!(out_dir))?;
    let params_path = out_dir.join(PARAMS_FILE);
    let mut params_file = ext::sys::create_uncompressed(&params_path).map_err(add_path!(params_path))?;
    params.to_json(inputs).write_pretty(&mut params_file, 4).map_err(add_path!(params_path))?;
    params_file.flush().map_err(add_path!(params_path))?;

    let partitions_dir = out_dir.join(PARTITIONS_DIR);
    ext::sys::mkdir(&partitions_dir).map_err(add_path!(partitions_dir))?;
    let bins = find_conserved(inputs, &partitions_dir, params, count_source, meter)?;
    let mut summary = FindSummary {
        conserved: bins.num_groups(),
        ..FindSummary::default()
    };

    let timer = Instant::now();
    log::info!("Pairing conserved k-mers");
    let k = params.counter.k as u32;
    let mut registry = AmpliconRegistry::new();
    let finder = SpacedPairFinder::new(k, params.pairs.clone());
    summary.pairs = finder.find_pairs(bins, |key1, loc1, key2, loc2| {
        registry.register(key1, loc1, key2, loc2);
    });
    summary.amplicons = registry.len();
    if registry.is_empty() {
        log::warn!("No properly spaced pairs of conserved k-mers found");
    }
    log::info!("    {} spaced pairs, {} amplicons in {}", summary.pairs, summary.amplicons,
        ext::fmt::Duration(timer.elapsed()));

    let timer = Instant::now();
    let batches = extract::extraction_batches(&registry, k, params.extract_memory);
    log::info!("Extracting sequences of {} amplicons, present in at least two genomes ({} batches)",
        batches.iter().map(Vec::len).sum::<usize>(), batches.len());
    let fastas_dir = out_dir.join(FASTAS_DIR);
    ext::sys::mkdir(&fastas_dir).map_err(add_path!(fastas_dir))?;
    let mut amp_stats = Vec::new();
    for batch in &batches {
        let seqs = extract::extract_batch(&registry, batch, inputs, k)?;
        for (&i, amp_seqs) in batch.iter().zip(&seqs) {
            let amplicon = &registry.amplicons()[i];
            extract::write_amplicon(&fastas_dir, amplicon, amp_seqs, k)?;
            amp_stats.extend(stats::amplicon_stats(amplicon, amp_seqs, params.counter.k));
        }
    }
    stats::sort_stats(&mut amp_stats);
    let genome_names: Vec<String> = inputs.iter().map(|path| ext::sys::file_stem(path)).collect();
    stats::write_stats(out_dir, &amp_stats, &genome_names)?;
    summary.reported = amp_stats.len();
    log::info!("    {} amplicons in at least two genomes, {} in every genome ({})",
        summary.reported, amp_stats.iter().filter(|s| s.num_genomes == inputs.len()).count(),
        ext::fmt::Duration(timer.elapsed()));

    if !params.keep_index {
        log::debug!("Removing partition index {}", ext::fmt::path(&partitions_dir));
        fs::remove_dir_all(&partitions_dir).map_err(add_path!(partitions_dir))?;
    }
    Ok(summary)
}

struct Args {
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    params: FindParams,

    threads: u16,
    jellyfish: PathBuf,
    counts_dir: PathBuf,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output: None,
            params: FindParams::default(),
            threads: 4,
            jellyfish: PathBuf::from("jellyfish"),
            counts_dir: PathBuf::from(COUNTS_DIR),
        }
    }
}

impl Args {
    fn validate(mut self) -> Result<Self, Error> {
        self.threads = self.threads.max(1);
        validate_param!(!self.inputs.is_empty(), "Input genomes are not provided (see -i/--input)");
        validate_param!(self.output.is_some(), "Output directory is not provided (see -o/--output)");
        for path in &self.inputs {
            validate_param!(path.exists(), "Input file {} does not exist", ext::fmt::path(path));
        }
        self.params.validate()?;
        if self.params.max_copies.is_some() {
            self.jellyfish = ext::sys::find_exe(&self.jellyfish)?;
        }
        Ok(self)
    }
}

fn print_help() {
    const KEY: usize = 18;
    const VAL: usize = 5;
    const EMPTY: &'static str = str_repeat!(" ", KEY + VAL + 5);

    let defaults = Args::default();
    let counter = &defaults.params.counter;
    println!("{}", "Find conserved fuzzy k-mer pairs that flank candidate amplicons.".yellow());

    println!("\n{} {} find -i genome1.fa genome2.fa [...] -o out [arguments]",
        "Usage:".bold(), env!("CARGO_PKG_NAME"));

    println!("\n{}", "Input/output arguments:".bold());
    println!("    {:KEY$} {:VAL$}  Input genomes (FASTA, can be gzipped).",
        "-i, --input".green(), "FILE+".yellow());
    println!("    {:KEY$} {:VAL$}  Output directory (must not exist).",
        "-o, --output".green(), "DIR".yellow());

    println!("\n{}", "K-mer parameters:".bold());
    println!("    {:KEY$} {:VAL$}  k-mer size {}.",
        "-k, --kmer".green(), "INT".yellow(), fmt_def(counter.k));
    println!("    {:KEY$} {:VAL$}  Number of allowed mismatches in a conserved k-mer {}.",
        "-m, --mismatches".green(), "INT".yellow(), fmt_def(counter.mismatches));
    println!("    {:KEY$} {:VAL$}  Number of first k-mer positions without mismatches {}.\n\
        {EMPTY}  Also defines the number of partitions (4^INT).",
        "    --stable-start".green(), "INT".yellow(), fmt_def(counter.stable_start));
    println!("    {:KEY$} {:VAL$}  Number of last k-mer positions without mismatches {}.",
        "    --stable-end".green(), "INT".yellow(), fmt_def(counter.stable_end));
    println!("    {:KEY$} {:VAL$}  Skip k-mers that appear more than INT times in a genome.\n\
        {EMPTY}  Requires Jellyfish.",
        "    --max-copies".green(), "INT".yellow());

    println!("\n{}", "Amplicon parameters:".bold());
    println!("    {:KEY$} {:VAL$}  Minimal distance between paired k-mers {}.",
        "    --min-dist".green(), "INT".yellow(), fmt_def(defaults.params.pairs.min_dist));
    println!("    {:KEY$} {:VAL$}  Maximal distance between paired k-mers {}.",
        "    --max-dist".green(), "INT".yellow(), fmt_def(defaults.params.pairs.max_dist));

    println!("\n{}", "Execution parameters:".bold());
    println!("    {:KEY$} {:VAL$}  Memory limit {}. Partitions are flushed to disk\n\
        {EMPTY}  when memory usage reaches {}% of the limit.",
        "-M, --max-memory".green(), "SIZE".yellow(), fmt_def(ext::fmt::Bytes(counter.max_memory)),
        (100.0 * counter.flush_fraction).round());
    println!("    {:KEY$} {:VAL$}  Extract amplicon sequences in batches of this size {}.",
        "    --extract-mem".green(), "SIZE".yellow(), fmt_def(ext::fmt::Bytes(defaults.params.extract_memory)));
    println!("    {:KEY$} {:VAL$}  Number of Jellyfish threads {}.",
        "-@, --threads".green(), "INT".yellow(), fmt_def(defaults.threads));
    println!("    {:KEY$} {:VAL$}  Keep partition index files.",
        "    --keep-index".green(), "");
    println!("    {:KEY$} {:VAL$}  Jellyfish executable {}.",
        "    --jellyfish".green(), "EXE".yellow(), fmt_def(defaults.jellyfish.display()));
    println!("    {:KEY$} {:VAL$}  Directory with cached k-mer counts, reused across runs {}.",
        "    --counts-dir".green(), "DIR".yellow(), fmt_def(defaults.counts_dir.display()));

    println!("\n{}", "Other parameters:".bold());
    println!("    {:KEY$} {:VAL$}  Show this help message.", "-h, --help".green(), "");
    println!("    {:KEY$} {:VAL$}  Show version.", "-V, --version".green(), "");
}

fn parse_args(argv: &[String]) -> Result<Args, lexopt::Error> {
    if argv.is_empty() {
        print_help();
        std::process::exit(1);
    }
    use lexopt::prelude::*;
    let mut args = Args::default();
    let mut parser = lexopt::Parser::from_args(argv);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('i') | Long("input") => {
                for val in parser.values()? {
                    args.inputs.push(val.parse()?);
                }
            }
            Short('o') | Long("output") => args.output = Some(parser.value()?.parse()?),

            Short('k') | Long("kmer") => args.params.counter.k = parser.value()?.parse()?,
            Short('m') | Long("mismatches") => args.params.counter.mismatches = parser.value()?.parse()?,
            Long("stable-start") => args.params.counter.stable_start = parser.value()?.parse()?,
            Long("stable-end") => args.params.counter.stable_end = parser.value()?.parse()?,
            Long("max-copies") => args.params.max_copies = Some(parser.value()?.parse()?),
            Long("min-dist") => args.params.pairs.min_dist = parser.value()?.parse()?,
            Long("max-dist") => args.params.pairs.max_dist = parser.value()?.parse()?,

            Short('M') | Long("max-memory") =>
                args.params.counter.max_memory = parse_int(&parser.value()?.string()?)?,
            Short('@') | Long("threads") => args.threads = parser.value()?.parse()?,
            Long("keep-index") => args.params.keep_index = true,
            Long("jellyfish") => args.jellyfish = parser.value()?.parse()?,
            Long("counts-dir") => args.counts_dir = parser.value()?.parse()?,
            Long("extract-mem") => args.params.extract_memory = parse_int(&parser.value()?.string()?)?,

            Short('V') | Long("version") => {
                super::print_version();
                std::process::exit(0);
            }
            Short('h') | Long("help") => {
                print_help();
                std::process::exit(0);
            }
            _ => Err(arg.unexpected())?,
        }
    }
    Ok(args)
}

pub(super) fn run(argv: &[String]) -> Result<(), Error> {
    let args = parse_args(argv)?.validate()?;
    let timer = Instant::now();
    let out_dir = args.output.as_ref().ok_or_else(|| error!(InvalidInput, "Output directory is not provided"))?;
    let jf_counter = args.params.max_copies.map(|_|
        JfCounter::new(args.jellyfish.clone(), args.counts_dir.clone(), args.threads, JF_HASH_SIZE));
    let summary = find_amplicons(&args.inputs, out_dir, &args.params,
        jf_counter.as_ref().map(|c| c as &dyn KmerCountSource), Box::new(ProcessMemory::new()))?;
    log::info!("Success: {} amplicons written to {}. Total time: {}",
        summary.reported, ext::fmt::path(out_dir), ext::fmt::Duration(timer.elapsed()));
    Ok(())
}
