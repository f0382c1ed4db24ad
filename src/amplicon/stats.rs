use std::{
    io::Write,
    path::Path,
    collections::HashMap,
};
use nohash::{IntMap, IntSet};
use crate::{
    ext,
    err::add_path,
    index::WILDCARD,
};
use super::Amplicon;

/// How well an amplicon separates genomes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmpliconStats {
    pub index: usize,
    pub name: String,
    pub num_genomes: usize,
    /// Number of genomes with at least one sequence, unique among all genomes.
    pub num_unique: usize,
    /// Number of additional copies (locations beyond the first in each genome).
    pub num_duplicates: usize,
    pub fwd_n: usize,
    pub rev_n: usize,
    /// Genome -> cluster ids of its sequences.
    pub clusters: IntMap<u32, Vec<u32>>,
}

/// Clusters identical inner sequences (without the primers) of an amplicon.
/// Returns None if the amplicon is present in less than two genomes.
///
/// `seqs` follow the order of amplicon pairs.
pub fn amplicon_stats(amplicon: &Amplicon, seqs: &[Vec<u8>], k: usize) -> Option<AmpliconStats> {
    let num_genomes = amplicon.num_genomes();
    if num_genomes < 2 {
        return None;
    }
    // Cluster ids are assigned in the order of genomes and locations.
    let mut order: Vec<usize> = (0..seqs.len()).collect();
    order.sort_by_key(|&i| amplicon.pairs()[i].0);

    let mut cluster_ids: HashMap<&[u8], u32> = HashMap::new();
    let mut cluster_sizes: Vec<u32> = Vec::new();
    let mut assigned = Vec::with_capacity(order.len());
    for &i in &order {
        let seq = &seqs[i];
        let inner = if seq.len() >= 2 * k { &seq[k..seq.len() - k] } else { &[][..] };
        let next_id = cluster_sizes.len() as u32 + 1;
        let id = *cluster_ids.entry(inner).or_insert(next_id);
        if id == next_id {
            cluster_sizes.push(0);
        }
        cluster_sizes[id as usize - 1] += 1;
        assigned.push((amplicon.pairs()[i].0.genome, id));
    }

    let mut clusters: IntMap<u32, Vec<u32>> = IntMap::default();
    let mut unique: IntSet<u32> = IntSet::default();
    for &(genome, id) in &assigned {
        clusters.entry(genome).or_default().push(id);
        if cluster_sizes[id as usize - 1] == 1 {
            unique.insert(genome);
        }
    }
    Some(AmpliconStats {
        index: amplicon.index(),
        name: amplicon.full_name(),
        num_genomes,
        num_unique: unique.len(),
        num_duplicates: assigned.len() - clusters.len(),
        fwd_n: amplicon.fwd_key().iter().filter(|&&c| c == WILDCARD).count(),
        rev_n: amplicon.rev_key().iter().filter(|&&c| c == WILDCARD).count(),
        clusters,
    })
}

/// Sorts by the number of unique genomes (descending), number of wildcards, number of duplicates and index.
pub fn sort_stats(stats: &mut [AmpliconStats]) {
    stats.sort_by_key(|s| (std::cmp::Reverse(s.num_unique), s.fwd_n + s.rev_n, s.num_duplicates, s.index));
}

/// Writes `amplicon_stats.txt` and `amplicon_matrix.txt` into the directory.
/// Matrix columns correspond to genome names (in the order of genome ids).
pub fn write_stats(dir: &Path, stats: &[AmpliconStats], genome_names: &[String]) -> crate::Result<()> {
    let stats_path = dir.join("amplicon_stats.txt");
    let mut out = ext::sys::create_uncompressed(&stats_path).map_err(add_path!(stats_path))?;
    writeln!(out, "amplicon\tnum_genomes\tnum_unique\tnum_duplicates\tfwd_N\trev_N").map_err(add_path!(stats_path))?;
    for s in stats {
        writeln!(out, "{}\t{}\t{}\t{}\t{}\t{}", s.name, s.num_genomes, s.num_unique, s.num_duplicates, s.fwd_n, s.rev_n)
            .map_err(add_path!(stats_path))?;
    }
    out.flush().map_err(add_path!(stats_path))?;

    let matrix_path = dir.join("amplicon_matrix.txt");
    let mut out = ext::sys::create_uncompressed(&matrix_path).map_err(add_path!(matrix_path))?;
    writeln!(out, "amplicon\t{}", genome_names.join("\t")).map_err(add_path!(matrix_path))?;
    for s in stats {
        write!(out, "{}", s.name).map_err(add_path!(matrix_path))?;
        for genome in (1..).take(genome_names.len()) {
            let cell = match s.clusters.get(&genome) {
                Some(ids) => ids.iter().map(u32::to_string).collect::<Vec<_>>().join(";"),
                None => "0".to_owned(),
            };
            write!(out, "\t{}", cell).map_err(add_path!(matrix_path))?;
        }
        writeln!(out).map_err(add_path!(matrix_path))?;
    }
    out.flush().map_err(add_path!(matrix_path))
}
