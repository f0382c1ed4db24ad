use std::{
    mem,
    io::Write,
    path::{Path, PathBuf},
};
use nohash::IntMap;
use crate::{
    ext,
    err::{error, add_path},
    index::Location,
    seq::{self, Strand, fastx::FastaSource},
};
use super::{Amplicon, AmpliconRegistry};

/// Regions, needed from each contig: `genome -> contig -> [(position in the batch, pair position)]`.
#[derive(Default)]
pub struct ShoppingList {
    genomes: IntMap<u32, IntMap<u32, Vec<(usize, usize)>>>,
}

impl ShoppingList {
    /// Collects regions of the amplicons from the batch (indices in the registry).
    /// Amplicons, present in a single genome, are skipped.
    pub fn new(registry: &AmpliconRegistry, batch: &[usize]) -> Self {
        let mut list = Self::default();
        for (b, &i) in batch.iter().enumerate() {
            let amplicon = &registry.amplicons()[i];
            if amplicon.num_genomes() < 2 {
                continue;
            }
            for (j, (loc1, _)) in amplicon.pairs().iter().enumerate() {
                list.insert(loc1.genome, loc1.contig, (b, j));
            }
        }
        list
    }

    /// Adds a region, creating intermediate maps when needed.
    pub fn insert(&mut self, genome: u32, contig: u32, item: (usize, usize)) {
        self.genomes.entry(genome).or_default().entry(contig).or_default().push(item);
    }

    pub fn has_genome(&self, genome: u32) -> bool {
        self.genomes.contains_key(&genome)
    }

    pub fn get(&self, genome: u32, contig: u32) -> &[(usize, usize)] {
        self.genomes.get(&genome).and_then(|contigs| contigs.get(&contig)).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Extracts region between the start of `first` and the end of `second` k-mer.
/// Region is reverse-complemented if the pair lies on the reverse strand.
pub fn extract_region(contig_seq: &[u8], first: Location, second: Location, k: u32) -> crate::Result<Vec<u8>> {
    if first.start >= second.start {
        return Err(error!(IntegrityAssertion, "Pair locations are out of order: {} and {}", first, second));
    }
    let start = first.start as usize;
    let end = second.start as usize + k as usize;
    if end > contig_seq.len() {
        return Err(error!(IntegrityAssertion, "Pair {} - {} ends after the contig end ({})",
            first, second, contig_seq.len()));
    }
    let region = &contig_seq[start..end];
    Ok(match first.strand {
        Strand::Forward => region.to_vec(),
        Strand::Reverse => seq::reverse_complement(region),
    })
}

/// Total length of the amplicon sequences.
fn amplicon_bytes(amplicon: &Amplicon, k: u32) -> u64 {
    amplicon.pairs().iter()
        .map(|(first, second)| u64::from((second.start + k).saturating_sub(first.start)))
        .sum()
}

/// Splits amplicons, present in at least two genomes, into batches (indices in the registry).
/// Total sequence length of a batch does not exceed `max_bytes`, unless the batch consists of a single amplicon.
pub fn extraction_batches(registry: &AmpliconRegistry, k: u32, max_bytes: u64) -> Vec<Vec<usize>> {
    let mut batches = Vec::new();
    let mut curr = Vec::new();
    let mut curr_bytes = 0;
    for (i, amplicon) in registry.amplicons().iter().enumerate() {
        if amplicon.num_genomes() < 2 {
            continue;
        }
        let bytes = amplicon_bytes(amplicon, k);
        if !curr.is_empty() && curr_bytes + bytes > max_bytes {
            batches.push(mem::take(&mut curr));
            curr_bytes = 0;
        }
        curr.push(i);
        curr_bytes += bytes;
    }
    if !curr.is_empty() {
        batches.push(curr);
    }
    batches
}

/// Reads input genomes again, and extracts sequences of all pairs of the amplicons from the batch.
/// Output: for each amplicon in the batch, sequences in the order of its pairs.
pub fn extract_batch(
    registry: &AmpliconRegistry,
    batch: &[usize],
    inputs: &[PathBuf],
    k: u32,
) -> crate::Result<Vec<Vec<Vec<u8>>>> {
    let list = ShoppingList::new(registry, batch);
    let mut seqs: Vec<Vec<Vec<u8>>> = batch.iter()
        .map(|&i| vec![Vec::new(); registry.amplicons()[i].pairs().len()])
        .collect();
    for (genome, path) in (1..).zip(inputs) {
        if !list.has_genome(genome) {
            continue;
        }
        log::debug!("    Extracting amplicons from {}", ext::fmt::path(path));
        for (contig, record) in (1..).zip(FastaSource::open(path)?) {
            let record = record?;
            for &(b, j) in list.get(genome, contig) {
                let (first, second) = registry.amplicons()[batch[b]].pairs()[j];
                seqs[b][j] = extract_region(record.seq(), first, second, k)?;
            }
        }
    }
    for (&i, amp_seqs) in batch.iter().zip(&seqs) {
        let amplicon = &registry.amplicons()[i];
        if let Some(j) = amp_seqs.iter().position(Vec::is_empty) {
            let (first, _) = amplicon.pairs()[j];
            return Err(error!(IntegrityAssertion, "Contig for location {} of amplicon {} not found",
                first, amplicon.full_name()));
        }
    }
    Ok(seqs)
}

/// FASTA record name for the location pair.
pub fn record_name(first: Location, second: Location, k: u32) -> String {
    format!("genome={};contig={};location=[{}:{}];strand={}",
        first.genome, first.contig, first.start, second.start + k, first.strand)
}

/// Writes `{dir}/{index}_{name}.fasta` with all sequences of the amplicon.
pub fn write_amplicon(dir: &Path, amplicon: &Amplicon, seqs: &[Vec<u8>], k: u32) -> crate::Result<PathBuf> {
    let path = dir.join(format!("{}.fasta", amplicon.full_name()));
    let mut out = ext::sys::create_uncompressed(&path).map_err(add_path!(path))?;
    for (&(first, second), seq) in amplicon.pairs().iter().zip(seqs) {
        seq::write_fasta(&mut out, &record_name(first, second, k), None, seq).map_err(add_path!(path))?;
    }
    out.flush().map_err(add_path!(path))?;
    Ok(path)
}
