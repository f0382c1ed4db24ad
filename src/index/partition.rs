//! Sorted on-disk store of one partition: `key<TAB>loc<TAB>loc...`, one key per line.

use std::{
    io::{self, BufRead, BufReader, BufWriter, Write},
    fs::{self, File},
    path::{Path, PathBuf},
};
use crate::{
    Error,
    err::{error, add_path},
    ext,
};
use super::{Location, ConservedGroup};

/// Splits the line into the key and the remaining (tab-separated) locations.
fn split_key(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let i = line.iter().position(|&c| c == b'\t')?;
    Some((&line[..i], &line[i + 1..]))
}

/// Removes trailing new line symbols.
fn trim_end(line: &mut Vec<u8>) {
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
}

/// Reads lines from a partition file, and checks that keys are strictly increasing.
struct LineReader {
    reader: BufReader<File>,
    path: PathBuf,
    line: Vec<u8>,
    line_num: u64,
    prev_key: Vec<u8>,
}

impl LineReader {
    fn open(path: &Path) -> crate::Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path).map_err(add_path!(path))?),
            path: path.to_owned(),
            line: Vec::new(),
            line_num: 0,
            prev_key: Vec::new(),
        })
    }

    fn malformed(&self, msg: impl Into<String>) -> Error {
        Error::MalformedRecord(self.path.clone(), self.line_num, msg.into())
    }

    /// Reads the next line, and returns false at the end of file.
    fn advance(&mut self) -> crate::Result<bool> {
        self.line.clear();
        if self.reader.read_until(b'\n', &mut self.line).map_err(add_path!(self.path))? == 0 {
            return Ok(false);
        }
        self.line_num += 1;
        trim_end(&mut self.line);
        let Some((key, _)) = split_key(&self.line) else {
            return Err(self.malformed("line has no locations"));
        };
        if key.is_empty() {
            return Err(self.malformed("empty key"));
        }
        if self.line_num > 1 && key <= &self.prev_key[..] {
            return Err(self.malformed(format!("key {} is not greater than the previous key {}",
                String::from_utf8_lossy(key), String::from_utf8_lossy(&self.prev_key))));
        }
        self.prev_key.clear();
        self.prev_key.extend_from_slice(key);
        Ok(true)
    }

    /// Key of the current line (only valid after a successful `advance`).
    fn key(&self) -> &[u8] {
        &self.prev_key
    }
}

fn write_locations(writer: &mut impl Write, locations: &[Location]) -> io::Result<()> {
    for loc in locations {
        write!(writer, "\t{}", loc)?;
    }
    Ok(())
}

/// Sorted mapping `fuzzy group key -> locations`, stored in a single file.
pub struct PartitionIndex {
    path: PathBuf,
}

impl PartitionIndex {
    /// Opens partition index at the given path, creating an empty file if absent.
    pub fn create(path: PathBuf) -> crate::Result<Self> {
        if !path.exists() {
            File::create(&path).map_err(add_path!(path))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merges sorted batch into the file. Keys in the batch must be strictly increasing.
    /// Locations of a key, already present in the file, are appended after the old locations.
    ///
    /// The new file is written to a temporary path and then renamed, so the canonical file
    /// is never left incomplete.
    pub fn merge_insert(&self, batch: &[(Vec<u8>, Vec<Location>)]) -> crate::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        for (i, w) in batch.windows(2).enumerate() {
            if w[0].0 >= w[1].0 {
                return Err(error!(IntegrityAssertion, "Batch for {} is not sorted: key #{} ({}) >= key #{} ({})",
                    ext::fmt::path(&self.path), i, String::from_utf8_lossy(&w[0].0),
                    i + 1, String::from_utf8_lossy(&w[1].0)));
            }
        }

        let tmp_path = ext::sys::append_path(&self.path, ".tmp");
        match self.merge_into(batch, &tmp_path) {
            Ok(()) => fs::rename(&tmp_path, &self.path).map_err(add_path!(tmp_path, self.path)),
            Err(e) => {
                if let Err(e2) = fs::remove_file(&tmp_path) {
                    log::warn!("Could not remove {}: {}", ext::fmt::path(&tmp_path), e2);
                }
                Err(e)
            }
        }
    }

    fn merge_into(&self, batch: &[(Vec<u8>, Vec<Location>)], tmp_path: &Path) -> crate::Result<()> {
        let mut reader = LineReader::open(&self.path)?;
        let mut writer = BufWriter::new(File::create(tmp_path).map_err(add_path!(tmp_path))?);
        let mut has_line = reader.advance()?;

        for (key, locations) in batch {
            // Copy all file lines with smaller keys.
            while has_line && reader.key() < &key[..] {
                writer.write_all(&reader.line).map_err(add_path!(tmp_path))?;
                writer.write_all(b"\n").map_err(add_path!(tmp_path))?;
                has_line = reader.advance()?;
            }
            if has_line && reader.key() == &key[..] {
                writer.write_all(&reader.line).map_err(add_path!(tmp_path))?;
                has_line = reader.advance()?;
            } else {
                writer.write_all(key).map_err(add_path!(tmp_path))?;
            }
            write_locations(&mut writer, locations).map_err(add_path!(tmp_path))?;
            writer.write_all(b"\n").map_err(add_path!(tmp_path))?;
        }
        while has_line {
            writer.write_all(&reader.line).map_err(add_path!(tmp_path))?;
            writer.write_all(b"\n").map_err(add_path!(tmp_path))?;
            has_line = reader.advance()?;
        }
        writer.flush().map_err(add_path!(tmp_path))
    }

    /// Lazily iterates over keys that have at least one location in every genome `1..=num_genomes`.
    pub fn scan_conserved(&self, num_genomes: u32) -> crate::Result<ConservedScan> {
        Ok(ConservedScan {
            reader: BufReader::new(File::open(&self.path).map_err(add_path!(self.path))?),
            path: self.path.clone(),
            line: Vec::new(),
            line_num: 0,
            seen: vec![false; num_genomes as usize],
        })
    }
}

/// Iterator over conserved groups of one partition file.
pub struct ConservedScan {
    reader: BufReader<File>,
    path: PathBuf,
    line: Vec<u8>,
    line_num: u64,
    /// Genomes, observed for the current key.
    seen: Vec<bool>,
}

impl ConservedScan {
    fn malformed(&self, msg: impl Into<String>) -> Error {
        Error::MalformedRecord(self.path.clone(), self.line_num, msg.into())
    }

    fn next_group(&mut self) -> crate::Result<Option<ConservedGroup>> {
        let n = self.seen.len();
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line).map_err(add_path!(self.path))? == 0 {
                return Ok(None);
            }
            self.line_num += 1;
            trim_end(&mut self.line);
            let Some((key, rest)) = split_key(&self.line) else {
                return Err(self.malformed("line has no locations"));
            };
            // Number of locations = number of tabs + 1.
            let count = rest.iter().filter(|&&c| c == b'\t').count() + 1;
            if count < n {
                continue;
            }

            let key = key.to_vec();
            let mut locations = Vec::with_capacity(count);
            self.seen.fill(false);
            let mut remaining = n;
            for field in rest.split(|&c| c == b'\t') {
                let loc = Location::parse(field).map_err(|e| self.malformed(e))?;
                if loc.genome == 0 || loc.genome as usize > n {
                    return Err(self.malformed(format!("genome id {} out of range [1, {}]", loc.genome, n)));
                }
                let seen = &mut self.seen[loc.genome as usize - 1];
                if !*seen {
                    *seen = true;
                    remaining -= 1;
                }
                locations.push(loc);
            }
            if remaining == 0 {
                return Ok(Some(ConservedGroup { key, locations }));
            }
        }
    }
}

impl Iterator for ConservedScan {
    type Item = crate::Result<ConservedGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_group().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, BTreeMap};
    use rand::{Rng, SeedableRng};
    use crate::seq::Strand;

    fn loc(genome: u32, start: u32) -> Location {
        Location::new(genome, 1, start, Strand::Forward)
    }

    fn entry(key: &str, locs: &[Location]) -> (Vec<u8>, Vec<Location>) {
        (key.as_bytes().to_vec(), locs.to_vec())
    }

    fn read(index: &PartitionIndex) -> String {
        fs::read_to_string(index.path()).unwrap()
    }

    fn new_index(dir: &tempfile::TempDir, name: &str) -> PartitionIndex {
        PartitionIndex::create(dir.path().join(name)).unwrap()
    }

    #[test]
    fn merge_cases() {
        let dir = tempfile::tempdir().unwrap();
        let index = new_index(&dir, "p.txt");
        assert_eq!(read(&index), "");

        index.merge_insert(&[entry("AC", &[loc(1, 0)]), entry("GT", &[loc(1, 5)])]).unwrap();
        assert_eq!(read(&index), "AC\t1;1;0;1\nGT\t1;1;5;1\n");

        // Key before all, between, in both, after all.
        index.merge_insert(&[
            entry("AA", &[loc(2, 1)]),
            entry("AG", &[loc(2, 2)]),
            entry("GT", &[loc(2, 3), loc(2, 4)]),
            entry("TT", &[loc(2, 5)]),
        ]).unwrap();
        assert_eq!(read(&index), "AA\t2;1;1;1\nAC\t1;1;0;1\nAG\t2;1;2;1\nGT\t1;1;5;1\t2;1;3;1\t2;1;4;1\nTT\t2;1;5;1\n");
        assert!(!ext::sys::append_path(index.path(), ".tmp").exists());
    }

    #[test]
    fn empty_batch_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let index = new_index(&dir, "p.txt");
        index.merge_insert(&[entry("CA", &[loc(1, 0)]), entry("CG", &[loc(2, 7)])]).unwrap();
        let before = read(&index);
        index.merge_insert(&[]).unwrap();
        assert_eq!(read(&index), before);
    }

    #[test]
    fn disjoint_batches() {
        let dir = tempfile::tempdir().unwrap();
        let a = vec![entry("AAA", &[loc(1, 0)]), entry("CCC", &[loc(1, 1)]), entry("TTT", &[loc(1, 2)])];
        let b = vec![entry("AAC", &[loc(2, 0)]), entry("GGG", &[loc(2, 1)]), entry("TTA", &[loc(2, 2)])];
        let index1 = new_index(&dir, "p1.txt");
        index1.merge_insert(&a).unwrap();
        index1.merge_insert(&b).unwrap();

        let mut union: Vec<_> = a.iter().chain(&b).cloned().collect();
        union.sort();
        let index2 = new_index(&dir, "p2.txt");
        index2.merge_insert(&union).unwrap();
        assert_eq!(read(&index1), read(&index2));
    }

    #[test]
    fn random_merges_stay_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let index = new_index(&dir, "p.txt");
        let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(8);
        let mut reference: BTreeMap<Vec<u8>, Vec<Location>> = BTreeMap::new();
        for round in 0..20 {
            let mut batch: BTreeMap<Vec<u8>, Vec<Location>> = BTreeMap::new();
            for i in 0..rng.gen_range(0..30) {
                let key: Vec<u8> = (0..3).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect();
                batch.entry(key).or_default().push(loc(round + 1, i));
            }
            for (key, locs) in batch.iter() {
                reference.entry(key.clone()).or_default().extend_from_slice(locs);
            }
            let batch: Vec<_> = batch.into_iter().collect();
            index.merge_insert(&batch).unwrap();

            let text = read(&index);
            let keys: Vec<&str> = text.lines().map(|line| line.split('\t').next().unwrap()).collect();
            assert!(keys.windows(2).all(|w| w[0] < w[1]));
        }
        let expected: String = reference.iter()
            .map(|(key, locs)| format!("{}{}\n", String::from_utf8_lossy(key),
                locs.iter().map(|l| format!("\t{}", l)).collect::<String>()))
            .collect();
        assert_eq!(read(&index), expected);

        // Unsorted or repeated keys are rejected, file stays the same.
        let bad = vec![entry("CCC", &[loc(1, 0)]), entry("AAA", &[loc(1, 1)])];
        assert!(matches!(index.merge_insert(&bad), Err(Error::IntegrityAssertion(_))));
        let bad = vec![entry("AAA", &[loc(1, 0)]), entry("AAA", &[loc(1, 1)])];
        assert!(matches!(index.merge_insert(&bad), Err(Error::IntegrityAssertion(_))));
        assert_eq!(read(&index), expected);
    }

    #[test]
    fn failed_merge_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let index = new_index(&dir, "p.txt");
        let contents = "AA\t1;1;0;1\nCC\nGG\t1;1;4;1\n";
        fs::write(index.path(), contents).unwrap();
        match index.merge_insert(&[entry("TT", &[loc(1, 9)])]) {
            Err(Error::MalformedRecord(_, 2, _)) => {}
            _ => panic!("Expected malformed record at line 2"),
        }
        assert_eq!(read(&index), contents);
        assert!(!ext::sys::append_path(index.path(), ".tmp").exists());

        fs::write(index.path(), "GG\t1;1;0;1\nAA\t1;1;4;1\n").unwrap();
        assert!(matches!(index.merge_insert(&[entry("TT", &[loc(1, 9)])]), Err(Error::MalformedRecord(_, 2, _))));
    }

    #[test]
    fn conserved_scan() {
        let dir = tempfile::tempdir().unwrap();
        let index = new_index(&dir, "p.txt");
        index.merge_insert(&[
            entry("AAA", &[loc(1, 0), loc(2, 0), loc(3, 0)]),
            entry("CCC", &[loc(3, 1), loc(1, 1), loc(2, 1)]),
        ]).unwrap();
        let all: Vec<_> = index.scan_conserved(3).unwrap().collect::<crate::Result<_>>().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].key, b"CCC");
        assert_eq!(all[1].locations, vec![loc(3, 1), loc(1, 1), loc(2, 1)]);
        assert_eq!(index.scan_conserved(4).unwrap().count(), 0);

        // Enough locations, but a genome is missing.
        index.merge_insert(&[entry("GGG", &[loc(1, 2), loc(1, 3), loc(2, 2)])]).unwrap();
        let keys: Vec<_> = index.scan_conserved(3).unwrap().map(|g| g.unwrap().key).collect();
        assert_eq!(keys, vec![b"AAA".to_vec(), b"CCC".to_vec()]);
    }

    #[test]
    fn scan_errors() {
        let dir = tempfile::tempdir().unwrap();
        let index = new_index(&dir, "p.txt");
        // Short line is skipped without parsing.
        fs::write(index.path(), "AAA\tgarbage\nCCC\t1;1;0;1\t2;1;x;1\n").unwrap();
        let res: crate::Result<Vec<_>> = index.scan_conserved(2).unwrap().collect();
        assert!(matches!(res, Err(Error::MalformedRecord(_, 2, _))));

        fs::write(index.path(), "AAA\t1;1;0;1\t5;1;0;1\n").unwrap();
        let res: crate::Result<Vec<_>> = index.scan_conserved(2).unwrap().collect();
        assert!(matches!(res, Err(Error::MalformedRecord(_, 1, _))));

        fs::write(index.path(), "AAA\n").unwrap();
        let res: crate::Result<Vec<_>> = index.scan_conserved(1).unwrap().collect();
        assert!(matches!(res, Err(Error::MalformedRecord(_, 1, _))));
    }

    #[test]
    fn matches_in_memory_reference() {
        let dir = tempfile::tempdir().unwrap();
        let index = new_index(&dir, "p.txt");
        let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(3);
        let n = 3;
        let mut reference: HashMap<Vec<u8>, Vec<Location>> = HashMap::new();
        for genome in 1..=n {
            for _ in 0..3 {
                let mut batch: HashMap<Vec<u8>, Vec<Location>> = HashMap::new();
                for _ in 0..40 {
                    let key: Vec<u8> = (0..2).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect();
                    let l = Location::new(genome, rng.gen_range(1..3), rng.gen_range(0..1000), Strand::Reverse);
                    batch.entry(key.clone()).or_default().push(l);
                    reference.entry(key).or_default().push(l);
                }
                let mut batch: Vec<_> = batch.into_iter().collect();
                batch.sort_unstable_by(|a, b| a.0.cmp(&b.0));
                index.merge_insert(&batch).unwrap();
            }
        }
        let mut expected: Vec<_> = reference.into_iter()
            .filter(|(_, locs)| (1..=n).all(|g| locs.iter().any(|l| l.genome == g)))
            .map(|(key, locations)| ConservedGroup { key, locations })
            .collect();
        expected.sort_by(|a, b| a.key.cmp(&b.key));
        let observed: Vec<_> = index.scan_conserved(n).unwrap().collect::<crate::Result<_>>().unwrap();
        assert!(!observed.is_empty());
        assert_eq!(observed, expected);
    }
}
