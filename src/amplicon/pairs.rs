use std::collections::BTreeMap;
use crate::{
    Error,
    err::validate_param,
    index::{Location, ConservedGroup},
};

/// Allowed distance between two k-mers (between the end of the first and the start of the second).
#[derive(Clone, Debug)]
pub struct PairParams {
    pub min_dist: u32,
    pub max_dist: u32,
}

impl Default for PairParams {
    fn default() -> Self {
        Self {
            min_dist: 100,
            max_dist: 400,
        }
    }
}

impl PairParams {
    pub fn validate(&self) -> Result<(), Error> {
        validate_param!(self.min_dist <= self.max_dist,
            "Minimal distance ({}) cannot be greater than the maximal distance ({})", self.min_dist, self.max_dist);
        Ok(())
    }
}

/// Conserved groups with their locations, split by (genome, contig).
#[derive(Default)]
pub struct Bins {
    keys: Vec<Vec<u8>>,
    /// Values: (key index, location).
    bins: BTreeMap<(u32, u32), Vec<(u32, Location)>>,
}

impl Bins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, group: ConservedGroup) {
        let key_ix = self.keys.len() as u32;
        for loc in group.locations {
            self.bins.entry((loc.genome, loc.contig)).or_default().push((key_ix, loc));
        }
        self.keys.push(group.key);
    }

    /// Number of groups.
    pub fn num_groups(&self) -> usize {
        self.keys.len()
    }
}

/// Finds properly spaced pairs of conserved k-mers.
pub struct SpacedPairFinder {
    k: u32,
    params: PairParams,
}

impl SpacedPairFinder {
    pub fn new(k: u32, params: PairParams) -> Self {
        Self { k, params }
    }

    /// Finds pairs within one (genome, contig) bin, entries are sorted by start.
    /// Each pair `(key index, location)` is passed to `emit` in positional order.
    pub fn find_in_bin(
        &self,
        entries: &mut [(u32, Location)],
        mut emit: impl FnMut(&(u32, Location), &(u32, Location)),
    ) {
        entries.sort_by_key(|(key_ix, loc)| (loc.start, *key_ix));
        let min_dist = i64::from(self.params.min_dist);
        let max_dist = i64::from(self.params.max_dist);
        for (i, entry1) in entries.iter().enumerate() {
            let end1 = i64::from(entry1.1.start) + i64::from(self.k);
            for entry2 in &entries[i + 1..] {
                let dist = i64::from(entry2.1.start) - end1;
                if dist > max_dist {
                    break;
                } else if dist >= min_dist && entry1.1.strand == entry2.1.strand {
                    emit(entry1, entry2);
                }
            }
        }
    }

    /// Processes all bins independently, and calls `emit(key1, loc1, key2, loc2)` for each spaced pair.
    pub fn find_pairs(&self, mut bins: Bins, mut emit: impl FnMut(&[u8], Location, &[u8], Location)) -> usize {
        let mut count = 0;
        let keys = &bins.keys;
        for entries in bins.bins.values_mut() {
            self.find_in_bin(entries, |&(key_ix1, loc1), &(key_ix2, loc2)| {
                emit(&keys[key_ix1 as usize], loc1, &keys[key_ix2 as usize], loc2);
                count += 1;
            });
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::Strand;

    fn entries(starts: &[(u32, Strand)]) -> Vec<(u32, Location)> {
        starts.iter().enumerate()
            .map(|(i, &(start, strand))| (i as u32, Location::new(1, 1, start, strand)))
            .collect()
    }

    fn pairs(finder: &SpacedPairFinder, entries: &mut [(u32, Location)]) -> Vec<(u32, u32)> {
        let mut res = Vec::new();
        finder.find_in_bin(entries, |(_, loc1), (_, loc2)| res.push((loc1.start, loc2.start)));
        res
    }

    #[test]
    fn distance_window() {
        let finder = SpacedPairFinder::new(20, PairParams::default());
        let mut e = entries(&[(500, Strand::Forward), (130, Strand::Forward), (0, Strand::Forward), (50, Strand::Forward)]);
        // 0-50: 30 < 100; 0-130: 110; 0-500: 480 > 400; 50-130: 60; 50-500: 430; 130-500: 350.
        assert_eq!(pairs(&finder, &mut e), vec![(0, 130), (130, 500)]);

        let mut e = entries(&[(0, Strand::Forward), (130, Strand::Reverse), (500, Strand::Forward)]);
        assert!(pairs(&finder, &mut e).is_empty());
        let mut e = entries(&[(0, Strand::Reverse), (130, Strand::Reverse)]);
        assert_eq!(pairs(&finder, &mut e), vec![(0, 130)]);
    }

    #[test]
    fn window_bounds_inclusive() {
        let finder = SpacedPairFinder::new(10, PairParams { min_dist: 5, max_dist: 7 });
        let mut e = entries(&[(0, Strand::Forward), (14, Strand::Forward), (15, Strand::Forward),
            (17, Strand::Forward), (18, Strand::Forward)]);
        assert_eq!(pairs(&finder, &mut e), vec![(0, 15), (0, 17)]);
    }

    #[test]
    fn bins_are_independent() {
        let mut bins = Bins::new();
        bins.add(ConservedGroup { key: b"AAA".to_vec(), locations: vec![
            Location::new(1, 1, 0, Strand::Forward), Location::new(1, 2, 0, Strand::Forward),
            Location::new(2, 1, 0, Strand::Forward)] });
        bins.add(ConservedGroup { key: b"CCC".to_vec(), locations: vec![
            Location::new(1, 1, 150, Strand::Forward), Location::new(2, 2, 150, Strand::Forward),
            Location::new(2, 1, 160, Strand::Forward)] });
        assert_eq!(bins.num_groups(), 2);
        assert_eq!(bins.keys[1], b"CCC");

        let finder = SpacedPairFinder::new(20, PairParams::default());
        let mut found = Vec::new();
        let count = finder.find_pairs(bins, |k1, l1, k2, l2| found.push((k1.to_vec(), l1, k2.to_vec(), l2)));
        assert_eq!(count, 2);
        assert_eq!(found[0].1, Location::new(1, 1, 0, Strand::Forward));
        assert_eq!(found[0].3, Location::new(1, 1, 150, Strand::Forward));
        assert_eq!(found[1].1.genome, 2);
        assert_eq!(found[1].3.start, 160);
        assert!(found.iter().all(|(k1, _, k2, _)| k1 == b"AAA" && k2 == b"CCC"));
    }
}
