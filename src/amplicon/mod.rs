//! Candidate amplicons: pairs of conserved groups, their sequences and statistics.

pub mod pairs;
pub mod extract;
pub mod stats;

use std::collections::HashMap;
use crate::{
    index::Location,
    seq::Strand,
};
pub use pairs::{PairParams, SpacedPairFinder};

/// Pair of conserved fuzzy groups, with all location pairs where they flank the same region.
#[derive(Clone, Debug)]
pub struct Amplicon {
    /// 1-based index, in the order of registration.
    index: usize,
    fwd_key: Vec<u8>,
    rev_key: Vec<u8>,
    /// Location pairs, in positional order (first location precedes the second).
    pairs: Vec<(Location, Location)>,
}

impl Amplicon {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn fwd_key(&self) -> &[u8] {
        &self.fwd_key
    }

    pub fn rev_key(&self) -> &[u8] {
        &self.rev_key
    }

    pub fn pairs(&self) -> &[(Location, Location)] {
        &self.pairs
    }

    /// Amplicon name: `fwd-rev`.
    pub fn name(&self) -> String {
        format!("{}-{}", String::from_utf8_lossy(&self.fwd_key), String::from_utf8_lossy(&self.rev_key))
    }

    /// Full name `index_fwd-rev`, used for output files and statistics.
    pub fn full_name(&self) -> String {
        format!("{}_{}", self.index, self.name())
    }

    /// Number of distinct genomes, where the amplicon appears.
    pub fn num_genomes(&self) -> usize {
        let mut genomes: Vec<u32> = self.pairs.iter().map(|(loc, _)| loc.genome).collect();
        genomes.sort_unstable();
        genomes.dedup();
        genomes.len()
    }
}

/// Deduplicates group pairs into amplicons.
#[derive(Default)]
pub struct AmpliconRegistry {
    amplicons: Vec<Amplicon>,
    ids: HashMap<(Vec<u8>, Vec<u8>), usize>,
}

impl AmpliconRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers location pair `loc1 < loc2` with keys `key1` and `key2`, returns amplicon index.
    /// Pair on the reverse strand describes the reverse-complemented amplicon, so keys are swapped.
    pub fn register(&mut self, key1: &[u8], loc1: Location, key2: &[u8], loc2: Location) -> usize {
        let (fwd_key, rev_key) = match loc1.strand {
            Strand::Forward => (key1, key2),
            Strand::Reverse => (key2, key1),
        };
        let ix = match self.ids.get(&(fwd_key.to_vec(), rev_key.to_vec())) {
            Some(&ix) => ix,
            None => {
                let ix = self.amplicons.len();
                self.amplicons.push(Amplicon {
                    index: ix + 1,
                    fwd_key: fwd_key.to_vec(),
                    rev_key: rev_key.to_vec(),
                    pairs: Vec::new(),
                });
                self.ids.insert((fwd_key.to_vec(), rev_key.to_vec()), ix);
                ix
            }
        };
        self.amplicons[ix].pairs.push((loc1, loc2));
        ix + 1
    }

    pub fn len(&self) -> usize {
        self.amplicons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplicons.is_empty()
    }

    /// Amplicons in the order of their indices.
    pub fn amplicons(&self) -> &[Amplicon] {
        &self.amplicons
    }
}
