use smallvec::SmallVec;
use super::WILDCARD;

/// Expands a k-mer into the fuzzy group keys it belongs to.
///
/// Walking from left to right over the mutable region `[stable_start, k - stable_end)`,
/// each position may start a run of wildcards. The run consumes the whole mismatch budget
/// greedily (or stops at the end of the mutable region).
/// Together with the k-mer itself, this produces at most `k - stable_start - stable_end + 1` keys.
#[derive(Clone, Debug)]
pub struct FuzzyExpander {
    mismatches: usize,
    stable_start: usize,
    stable_end: usize,
}

/// Expanded keys, most k-mers produce a small number of them.
pub type Keys = SmallVec<[Vec<u8>; 24]>;

impl FuzzyExpander {
    pub fn new(mismatches: usize, stable_start: usize, stable_end: usize) -> Self {
        Self { mismatches, stable_start, stable_end }
    }

    /// Returns all fuzzy group keys of the k-mer, starting with the k-mer itself.
    /// Keys are distinct, and their order is deterministic.
    pub fn expand(&self, kmer: &[u8]) -> Keys {
        let mut keys = Keys::new();
        self.expand_into(kmer, &mut keys);
        keys
    }

    /// Same as `expand`, but reuses the output vector (which is cleared first).
    pub fn expand_into(&self, kmer: &[u8], keys: &mut Keys) {
        keys.clear();
        keys.push(kmer.to_vec());
        let k = kmer.len();
        if self.mismatches == 0 || self.stable_start + self.stable_end >= k {
            return;
        }
        let end = k - self.stable_end;
        for i in self.stable_start..end {
            let mut key = kmer.to_vec();
            key[i..end.min(i + self.mismatches)].fill(WILDCARD);
            keys.push(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use rand::{Rng, SeedableRng};

    fn random_kmer(rng: &mut impl Rng, k: usize) -> Vec<u8> {
        (0..k).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
    }

    #[test]
    fn no_mismatches() {
        let kmer = b"ACGTACGTAC";
        assert_eq!(FuzzyExpander::new(0, 2, 2).expand(kmer).into_vec(), vec![kmer.to_vec()]);
        // Flanks cover everything.
        assert_eq!(FuzzyExpander::new(3, 5, 5).expand(kmer).into_vec(), vec![kmer.to_vec()]);
        assert_eq!(FuzzyExpander::new(3, 6, 7).expand(kmer).into_vec(), vec![kmer.to_vec()]);
    }

    #[test]
    fn single_mismatch() {
        let keys = FuzzyExpander::new(1, 2, 2).expand(b"AACCGGTT");
        let expected: Vec<&[u8]> = vec![b"AACCGGTT", b"AANCGGTT", b"AACNGGTT", b"AACCNGTT", b"AACCGNTT"];
        assert_eq!(keys.iter().map(Vec::as_slice).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn double_mismatch() {
        let keys = FuzzyExpander::new(2, 1, 1).expand(b"ACGTA");
        let expected: Vec<&[u8]> = vec![b"ACGTA", b"ANNTA", b"ACNNA", b"ACGNA"];
        assert_eq!(keys.iter().map(Vec::as_slice).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn random_properties() {
        let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(17);
        for _ in 0..500 {
            let k = rng.gen_range(1..=32);
            let m = rng.gen_range(0..=4);
            let ss = rng.gen_range(0..=4);
            let se = rng.gen_range(0..=4);
            let kmer = random_kmer(&mut rng, k);
            let keys = FuzzyExpander::new(m, ss, se).expand(&kmer);

            assert!(keys.contains(&kmer));
            assert!(keys.len() <= (k.saturating_sub(ss + se)) + 1);
            let uniq: HashSet<_> = keys.iter().collect();
            assert_eq!(uniq.len(), keys.len());
            for key in keys.iter() {
                assert_eq!(key.len(), k);
                let n_wild = key.iter().filter(|&&c| c == WILDCARD).count();
                assert!(n_wild <= m);
                for (i, (&c, &orig)) in key.iter().zip(&kmer).enumerate() {
                    if c == WILDCARD {
                        assert!(i >= ss && i + se < k);
                    } else {
                        assert_eq!(c, orig);
                    }
                }
            }
        }
    }

    #[test]
    fn one_mismatch_shares_group() {
        let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(5);
        let expander = FuzzyExpander::new(1, 2, 2);
        for _ in 0..200 {
            let kmer = random_kmer(&mut rng, 20);
            let mut other = kmer.clone();
            let pos = rng.gen_range(2..18);
            other[pos] = if other[pos] == b'A' { b'C' } else { b'A' };
            let keys1: HashSet<_> = expander.expand(&kmer).into_iter().collect();
            let keys2: HashSet<_> = expander.expand(&other).into_iter().collect();
            assert_eq!(keys1.intersection(&keys2).count(), 1);
        }
    }

    #[test]
    fn two_mismatches_must_be_adjacent() {
        let expander = FuzzyExpander::new(2, 2, 2);
        let kmer = b"ACGTACGTACGTACGTACGT".to_vec();
        let change = |positions: &[usize]| {
            let mut other = kmer.clone();
            for &pos in positions {
                other[pos] = if other[pos] == b'A' { b'C' } else { b'A' };
            }
            other
        };
        let keys: HashSet<_> = expander.expand(&kmer).into_iter().collect();
        let shared = |other: &[u8]| expander.expand(other).into_iter().filter(|key| keys.contains(key)).count();

        // Adjacent mismatches: one shared key (`NN` over both positions).
        assert_eq!(shared(&change(&[7, 8])), 1);
        // Scattered mismatches never fall into one run of wildcards.
        assert_eq!(shared(&change(&[5, 10])), 0);
        assert_eq!(shared(&change(&[3, 5])), 0);
    }
}
