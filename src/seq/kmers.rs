use super::{Strand, reverse_complement};

/// Output data structure for k-mers.
pub trait Output {
    fn push(&mut self, pos: u32, kmer: &[u8], strand: Strand);
}

impl Output for Vec<(u32, Vec<u8>, Strand)> {
    #[inline(always)]
    fn push(&mut self, pos: u32, kmer: &[u8], strand: Strand) {
        self.push((pos, kmer.to_vec(), strand));
    }
}

impl<F: FnMut(u32, &[u8], Strand)> Output for F {
    #[inline(always)]
    fn push(&mut self, pos: u32, kmer: &[u8], strand: Strand) {
        self(pos, kmer, strand)
    }
}

/// Selects canonical k-mer: lexicographically smallest between the forward k-mer and its reverse complement.
/// Palindromic k-mers are reported on the forward strand.
#[inline]
pub fn canonical<'a>(fw_kmer: &'a [u8], rv_kmer: &'a [u8]) -> (&'a [u8], Strand) {
    if rv_kmer < fw_kmer {
        (rv_kmer, Strand::Reverse)
    } else {
        (fw_kmer, Strand::Forward)
    }
}

/// Finds all canonical k-mers in the sequence, together with their forward-strand start positions.
/// Sequence must be standardized (see `seq::standardize`); k-mers that contain any base other than A,C,G,T
/// are skipped.
///
/// Returns the number of skipped k-mers.
pub fn canonical_kmers(seq: &[u8], k: usize, output: &mut impl Output) -> u64 {
    assert!(k > 0, "k-mer size must be positive");
    let n = seq.len();
    if n < k {
        return 0;
    }
    let rc_seq = reverse_complement(seq);
    let k_1 = k - 1;
    // First position, at which a k-mer may end.
    let mut reset = k_1;
    let mut skipped = 0;

    for (i, &nt) in seq.iter().enumerate() {
        match nt {
            b'A' | b'C' | b'G' | b'T' => {}
            _ => {
                reset = i + k;
                if i >= k_1 {
                    skipped += 1;
                }
                continue;
            }
        }
        if i >= reset {
            let start = i - k_1;
            let fw_kmer = &seq[start..=i];
            // Reverse complement of `seq[start..start + k]` is `rc_seq[n - start - k..n - start]`.
            let rv_kmer = &rc_seq[n - i - 1..n - start];
            let (kmer, strand) = canonical(fw_kmer, rv_kmer);
            output.push(start as u32, kmer, strand);
        } else if i >= k_1 {
            skipped += 1;
        }
    }
    skipped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(seq: &[u8], k: usize) -> Vec<(u32, Vec<u8>, Strand)> {
        let mut out = Vec::new();
        canonical_kmers(seq, k, &mut out);
        out
    }

    #[test]
    fn canonical_selection() {
        let kmers = collect(b"AAAC", 4);
        // GTTT > AAAC
        assert_eq!(kmers, vec![(0, b"AAAC".to_vec(), Strand::Forward)]);
        let kmers = collect(b"TTTG", 4);
        assert_eq!(kmers, vec![(0, b"CAAA".to_vec(), Strand::Reverse)]);
        let kmers = collect(b"ACGT", 4);
        assert_eq!(kmers, vec![(0, b"ACGT".to_vec(), Strand::Forward)]);
    }

    #[test]
    fn skips_ambiguous_windows() {
        let seq = b"ACGTNACGTA";
        let mut skipped = 0;
        let mut starts = Vec::new();
        skipped += canonical_kmers(seq, 3, &mut |pos: u32, _: &[u8], _: Strand| starts.push(pos));
        assert_eq!(starts, vec![0, 1, 5, 6, 7]);
        assert_eq!(skipped, 3);
    }

    #[test]
    fn positions_follow_forward_strand() {
        let seq = b"GGGTTTAAACCC";
        let kmers = collect(seq, 5);
        assert_eq!(kmers.len(), seq.len() - 4);
        for (pos, kmer, strand) in kmers {
            let fw = &seq[pos as usize..pos as usize + 5];
            match strand {
                Strand::Forward => assert_eq!(&kmer[..], fw),
                Strand::Reverse => assert_eq!(kmer, reverse_complement(fw)),
            }
        }
    }

    #[test]
    fn short_sequence() {
        assert!(collect(b"ACG", 4).is_empty());
    }
}
