use std::{
    io::{self, BufRead},
    cmp::min,
    path::{Path, PathBuf},
};
use bio::io::fasta;
use crate::{
    err::{Error, add_path},
    ext,
};
use super::NamedSeq;

/// Reads FASTA records one by one, standardizing their sequences.
/// The file may be gzip-compressed.
pub struct FastaSource {
    filename: PathBuf,
    records: fasta::Records<Box<dyn BufRead + Send>>,
}

impl FastaSource {
    pub fn open(filename: &Path) -> crate::Result<Self> {
        let stream = ext::sys::open(filename).map_err(add_path!(filename))?;
        Ok(Self {
            filename: filename.to_owned(),
            records: fasta::Reader::from_bufread(stream).records(),
        })
    }
}

impl Iterator for FastaSource {
    type Item = crate::Result<NamedSeq>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(Error::Io(e, vec![self.filename.clone()]))),
        };
        let mut seq = record.seq().to_vec();
        if let Err(e) = super::standardize(&mut seq) {
            return Some(Err(match e {
                Error::InvalidData(s) => Error::InvalidData(
                    format!("{} (record {} in {})", s, record.id(), ext::fmt::path(&self.filename))),
                e => e,
            }));
        }
        Some(Ok(NamedSeq::new(record.id().to_owned(), seq)))
    }
}

/// Write a single sequence to the FASTA file.
/// Use this function instead of `bio::fasta::Writer` as the latter
/// writes the sequence into a single line, without splitting.
pub fn write_fasta<W: io::Write>(mut writer: W, name: &str, desc: Option<&str>, seq: &[u8]) -> io::Result<()> {
    write!(writer, ">{}", name)?;
    if let Some(desc) = desc {
        write!(writer, " {}", desc)?;
    }
    writer.write_all(b"\n")?;

    const WIDTH: usize = 120;
    let n = seq.len();
    for i in (0..n).step_by(WIDTH) {
        writer.write_all(&seq[i..min(i + WIDTH, n)])?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_and_standardize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.fa");
        std::fs::write(&path, b">c1 desc\nacgT\nNNAC\n>c2\nGGGG\n").unwrap();
        let recs: Vec<_> = FastaSource::open(&path).unwrap().collect::<crate::Result<_>>().unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].name(), "c1");
        assert_eq!(recs[0].seq(), b"ACGTNNAC");
        assert_eq!(recs[1].seq(), b"GGGG");
    }

    #[test]
    fn invalid_base() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.fa");
        std::fs::write(&path, b">c1\nAC*T\n").unwrap();
        let res: crate::Result<Vec<_>> = FastaSource::open(&path).unwrap().collect();
        assert!(matches!(res, Err(Error::InvalidData(_))));
    }

    #[test]
    fn wrapped_output() {
        let mut out = Vec::new();
        let seq = vec![b'A'; 130];
        write_fasta(&mut out, "amp", None, &seq).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], ">amp");
        assert_eq!(lines[1].len(), 120);
        assert_eq!(lines[2].len(), 10);
    }
}
