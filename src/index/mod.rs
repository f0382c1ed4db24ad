//! Partitioned fuzzy k-mer index: expansion, on-disk partitions, workers and the coordinator.

pub mod fuzzy;
pub mod partition;
pub mod worker;
pub mod counter;

use std::fmt;
use crate::{
    Error,
    err::validate_param,
    seq::Strand,
};
pub use fuzzy::FuzzyExpander;
pub use partition::PartitionIndex;
pub use counter::{KmerCounter, ConservedStream};

/// Symbol that replaces mismatched positions in fuzzy group keys.
pub const WILDCARD: u8 = b'N';

/// Position of a k-mer occurrence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    /// 1-based genome index (order of the input files).
    pub genome: u32,
    /// 1-based contig index within the genome.
    pub contig: u32,
    /// 0-based start on the forward strand.
    pub start: u32,
    pub strand: Strand,
}

impl Location {
    pub fn new(genome: u32, contig: u32, start: u32, strand: Strand) -> Self {
        Self { genome, contig, start, strand }
    }

    /// Parses `genome;contig;start;strand`.
    pub fn parse(s: &[u8]) -> Result<Self, String> {
        let s = std::str::from_utf8(s).map_err(|_| "location is not a valid UTF-8 string".to_owned())?;
        let mut split = s.split(';');
        let (Some(genome), Some(contig), Some(start), Some(strand), None) =
            (split.next(), split.next(), split.next(), split.next(), split.next())
        else {
            return Err(format!("location '{}' must contain exactly 4 fields", s));
        };
        let genome = genome.parse().map_err(|_| format!("cannot parse genome id in location '{}'", s))?;
        let contig = contig.parse().map_err(|_| format!("cannot parse contig id in location '{}'", s))?;
        let start = start.parse().map_err(|_| format!("cannot parse start in location '{}'", s))?;
        let strand = Strand::parse(strand).ok_or_else(|| format!("cannot parse strand in location '{}'", s))?;
        Ok(Self { genome, contig, start, strand })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{};{};{};{}", self.genome, self.contig, self.start, self.strand)
    }
}

/// Fuzzy group key that was observed in every genome, together with all its locations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConservedGroup {
    pub key: Vec<u8>,
    pub locations: Vec<Location>,
}

/// Parameters of k-mer indexing.
#[derive(Clone, Debug)]
pub struct CounterParams {
    /// k-mer size.
    pub k: usize,
    /// Maximal number of wildcards in a fuzzy group key.
    pub mismatches: usize,
    /// Number of leading positions that are never wildcarded. Also defines partitions (4^stable_start).
    pub stable_start: usize,
    /// Number of trailing positions that are never wildcarded.
    pub stable_end: usize,

    /// Hard memory ceiling (bytes).
    pub max_memory: u64,
    /// Emergency flush is started when memory usage exceeds `flush_fraction * max_memory`.
    pub flush_fraction: f64,
    /// Memory is checked every `check_every` routed k-mers.
    pub check_every: u64,
    /// Capacity of each worker mailbox (messages).
    pub mailbox: usize,
    /// Number of k-mers, sent to a worker in a single message.
    pub batch_size: usize,
}

impl Default for CounterParams {
    fn default() -> Self {
        Self {
            k: 20,
            mismatches: 1,
            stable_start: 2,
            stable_end: 2,
            max_memory: 60_000_000_000,
            flush_fraction: 0.6,
            check_every: 10_000,
            mailbox: 1000,
            batch_size: 1024,
        }
    }
}

impl CounterParams {
    pub fn validate(&self) -> Result<(), Error> {
        validate_param!(self.k > 0 && self.k <= 255, "k-mer size ({}) must be within [1, 255]", self.k);
        validate_param!(self.stable_start <= 4,
            "Stable start ({}) must be at most 4 (number of partitions = 4^stable start)", self.stable_start);
        validate_param!(self.stable_start <= self.k && self.stable_end <= self.k,
            "Stable flanks ({} and {}) cannot exceed k-mer size ({})", self.stable_start, self.stable_end, self.k);
        validate_param!(0.0 < self.flush_fraction && self.flush_fraction <= 1.0,
            "Flush fraction ({}) must be within (0, 1]", self.flush_fraction);
        validate_param!(self.max_memory > 0, "Memory ceiling must be positive");
        validate_param!(self.check_every > 0, "Memory check interval must be positive");
        validate_param!(self.mailbox > 0, "Mailbox capacity must be positive");
        validate_param!(self.batch_size > 0, "Batch size must be positive");
        if self.mismatches > 0 && self.stable_start + self.stable_end >= self.k {
            log::warn!("Stable flanks ({} + {}) cover the whole {}-mer, mismatches will not be allowed",
                self.stable_start, self.stable_end, self.k);
        }
        if self.mismatches > 1 {
            log::info!("Up to {} mismatches are allowed only as a single run of consecutive positions, \
                k-mers with scattered mismatches do not share fuzzy groups", self.mismatches);
        }
        Ok(())
    }

    /// Number of partitions (and partition workers).
    pub fn partitions(&self) -> usize {
        1 << (2 * self.stable_start)
    }

    pub fn to_json(&self) -> json::JsonValue {
        json::object!{
            k: self.k,
            mismatches: self.mismatches,
            stable_start: self.stable_start,
            stable_end: self.stable_end,
            max_memory: self.max_memory,
            flush_fraction: self.flush_fraction,
            check_every: self.check_every,
            mailbox: self.mailbox,
            batch_size: self.batch_size,
        }
    }
}
