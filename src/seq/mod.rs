pub mod kmers;
pub mod fastx;
pub mod counts;

use std::fmt;
pub use fastx::write_fasta;

/// Make nucleotide sequence standard: only letters A,C,G,T,N.
/// Lower-case letters are converted to upper case, and all ambiguity codes to N.
pub fn standardize(seq: &mut [u8]) -> crate::Result<()> {
    for nt in seq.iter_mut() {
        *nt = match *nt {
            b'A' | b'a' => b'A',
            b'C' | b'c' => b'C',
            b'G' | b'g' => b'G',
            b'T' | b't' => b'T',
            b'N' | b'R' | b'Y' | b'K' | b'M' | b'S' | b'W' | b'B' | b'D' | b'H' | b'V'
                | b'n' | b'r' | b'y' | b'k' | b'm' | b's' | b'w' | b'b' | b'd' | b'h' | b'v' => b'N',
            _ => return Err(crate::err::error!(InvalidData, "Unknown nucleotide '{}'", char::from(*nt))),
        };
    }
    Ok(())
}

/// Returns complementary nucleotide (N for anything except A,C,G,T).
#[inline]
pub fn complement(nt: u8) -> u8 {
    match nt {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        _ => b'N',
    }
}

/// Returns reverse complement of the sequence.
pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().copied().map(complement).collect()
}

/// Strand of the k-mer occurrence: forward if the k-mer is canonical as it is,
/// reverse if its reverse complement is canonical.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    /// Parses `1`/`+1` or `-1`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1" | "+1" => Some(Self::Forward),
            "-1" => Some(Self::Reverse),
            _ => None,
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Forward => "1",
            Self::Reverse => "-1",
        })
    }
}

/// Sequence with its name.
#[derive(Clone)]
pub struct NamedSeq {
    name: String,
    seq: Vec<u8>,
}

impl NamedSeq {
    /// Constructs new named sequence.
    pub fn new(name: String, seq: Vec<u8>) -> Self {
        Self { name, seq }
    }

    /// Returns reference to the name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns reference to the sequence.
    pub fn seq(&self) -> &[u8] {
        &self.seq
    }
}
