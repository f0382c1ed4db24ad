//! External k-mer counting: `kmer<TAB>count` streams and the Jellyfish runner.

use std::{
    io::BufRead,
    fs,
    collections::HashSet,
    path::{Path, PathBuf},
    process::Command,
};
use crate::{
    ext,
    err::{Error, error, add_path},
};

/// Something that produces `(kmer, count)` pairs for a sequence file.
pub trait KmerCountSource {
    /// Returns a stream over k-mer counts for all sequences in the FASTA file. No order is guaranteed.
    fn count_kmers(&self, fasta: &Path, k: usize) -> crate::Result<CountsReader<Box<dyn BufRead + Send>>>;
}

/// Parses line-oriented `kmer<TAB>count` output.
pub struct CountsReader<R> {
    stream: R,
    /// Used for error messages.
    filename: PathBuf,
    line: Vec<u8>,
    line_num: u64,
}

impl<R: BufRead> CountsReader<R> {
    pub fn new(stream: R, filename: PathBuf) -> Self {
        Self {
            stream, filename,
            line: Vec::new(),
            line_num: 0,
        }
    }

    fn read_next(&mut self) -> crate::Result<Option<(Vec<u8>, u64)>> {
        loop {
            self.line.clear();
            if self.stream.read_until(b'\n', &mut self.line).map_err(add_path!(self.filename))? == 0 {
                return Ok(None);
            }
            self.line_num += 1;
            while matches!(self.line.last(), Some(b'\n' | b'\r')) {
                self.line.pop();
            }
            if !self.line.is_empty() {
                break;
            }
        }

        let mut split = self.line.split(|&c| c == b'\t' || c == b' ');
        let kmer = split.next().filter(|s| !s.is_empty());
        let count = split.next()
            .and_then(|s| std::str::from_utf8(s).ok())
            .and_then(|s| s.parse::<u64>().ok());
        match (kmer, count, split.next()) {
            (Some(kmer), Some(count), None) => Ok(Some((kmer.to_vec(), count))),
            _ => Err(error!(ParsingError, "Cannot parse k-mer count in {}, line {}: '{}'",
                ext::fmt::path(&self.filename), self.line_num, String::from_utf8_lossy(&self.line))),
        }
    }
}

impl<R: BufRead> Iterator for CountsReader<R> {
    type Item = crate::Result<(Vec<u8>, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

/// Collects k-mers that appear more than `max_count` times.
pub fn overrepresented(counts: impl Iterator<Item = crate::Result<(Vec<u8>, u64)>>, max_count: u64)
    -> crate::Result<HashSet<Vec<u8>>>
{
    let mut res = HashSet::new();
    for entry in counts {
        let (kmer, count) = entry?;
        if count > max_count {
            res.insert(kmer);
        }
    }
    Ok(res)
}

const PATH_HASH_SEED: u64 = 0x1b873593;

/// Runs `jellyfish count` and `jellyfish dump` to obtain canonical k-mer counts.
/// Dumped counts are cached as `<cache_dir>/<name>.<path hash>.<k>.counts.txt` and reused on subsequent calls.
/// The hash of the absolute input path separates different files with the same name.
pub struct JfCounter {
    jf_exe: PathBuf,
    cache_dir: PathBuf,
    threads: u16,
    /// Initial hash size (`jellyfish count --size`).
    hash_size: u64,
}

impl JfCounter {
    pub fn new(jf_exe: PathBuf, cache_dir: PathBuf, threads: u16, hash_size: u64) -> Self {
        Self { jf_exe, cache_dir, threads, hash_size }
    }

    fn counts_path(&self, fasta: &Path, k: usize) -> PathBuf {
        let full_path = fasta.canonicalize().unwrap_or_else(|_| fasta.to_owned());
        let hash = wyhash::wyhash(full_path.to_string_lossy().as_bytes(), PATH_HASH_SEED);
        self.cache_dir.join(format!("{}.{:016x}.{}.counts.txt", ext::sys::file_stem(fasta), hash, k))
    }

    fn run(&self, command: &mut Command) -> crate::Result<()> {
        log::trace!("    {:?}", command);
        let output = command.output().map_err(add_path!(self.jf_exe))?;
        if !output.status.success() {
            return Err(Error::Subprocess(format!("Jellyfish finished with {}: {}",
                output.status, String::from_utf8_lossy(&output.stderr))));
        }
        Ok(())
    }
}

impl KmerCountSource for JfCounter {
    fn count_kmers(&self, fasta: &Path, k: usize) -> crate::Result<CountsReader<Box<dyn BufRead + Send>>> {
        let counts_path = self.counts_path(fasta, k);
        if counts_path.exists() {
            log::info!("    Found existing k-mer counts {}", ext::fmt::path(&counts_path));
        } else {
            ext::sys::mkdir(&self.cache_dir).map_err(add_path!(self.cache_dir))?;
            let jf_path = ext::sys::append_path(&counts_path, ".jf");
            log::info!("    Counting {}-mers in {}", k, ext::fmt::path(fasta));
            self.run(Command::new(&self.jf_exe)
                .args(&["count", "--canonical",
                    &format!("--mer-len={}", k),
                    &format!("--threads={}", self.threads),
                    &format!("--size={}", self.hash_size)])
                .arg("--output").arg(&jf_path)
                .arg(fasta))?;
            // Dump into a temporary file first, so that an interrupted run does not leave partial counts.
            let tmp_path = ext::sys::append_path(&counts_path, ".tmp");
            self.run(Command::new(&self.jf_exe)
                .args(&["dump", "--column", "--tab"])
                .arg("--output").arg(&tmp_path)
                .arg(&jf_path))?;
            fs::rename(&tmp_path, &counts_path).map_err(add_path!(tmp_path, counts_path))?;
            if let Err(e) = fs::remove_file(&jf_path) {
                log::warn!("Could not remove {}: {}", ext::fmt::path(&jf_path), e);
            }
        }
        let stream = ext::sys::open(&counts_path).map_err(add_path!(counts_path))?;
        Ok(CountsReader::new(stream, counts_path))
    }
}
