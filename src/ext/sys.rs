use std::{
    io::{self, Read, BufRead, BufReader, Write, BufWriter, stdin, stdout},
    fs::{self, File},
    path::{Path, PathBuf},
    ffi::OsStr,
};
use flate2::bufread::MultiGzDecoder;
use crate::Error;

/// Finds an executable, and returns Error, if executable is not available.
pub fn find_exe(p: impl AsRef<Path>) -> Result<PathBuf, Error> {
    which::which(p.as_ref()).map_err(|_| Error::NoExec(p.as_ref().to_owned()))
}

/// Returns
/// - stdin if filename is `-`,
/// - gzip reader if the file starts with the gzip magic number,
/// - regular text file otherwise.
pub fn open(filename: &Path) -> io::Result<Box<dyn BufRead + Send>> {
    if filename == OsStr::new("-") || filename == OsStr::new("/dev/stdin") {
        Ok(Box::new(BufReader::new(stdin())))
    } else {
        let mut stream = BufReader::new(File::open(filename)?);
        let mut two_bytes = [0_u8; 2];
        let bytes_read = stream.read(&mut two_bytes)?;
        stream.seek_relative(-(bytes_read as i64))?;
        // Check gzip magic number.
        if bytes_read == 2 && two_bytes[0] == 0x1f && two_bytes[1] == 0x8b {
            Ok(Box::new(BufReader::new(MultiGzDecoder::new(stream))))
        } else {
            Ok(Box::new(stream))
        }
    }
}

/// Creates a buffered file OR stdout if filename is `-`.
pub fn create_uncompressed(filename: &Path) -> io::Result<Box<dyn Write>> {
    if filename == OsStr::new("-") {
        Ok(Box::new(BufWriter::new(stdout())))
    } else {
        Ok(Box::new(BufWriter::new(File::create(filename)?)))
    }
}

/// Returns a path with a new suffix appended to the end.
pub fn append_path(path: &Path, suffix: impl AsRef<OsStr>) -> PathBuf {
    let mut os_string = path.as_os_str().to_owned();
    os_string.push(suffix.as_ref());
    os_string.into()
}

/// Create directory, if it does not exist yet.
pub fn mkdir(path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        fs::create_dir(path)
    } else {
        Ok(())
    }
}

/// Returns file name without directories and without the last extension
/// (as well as `.gz`, if present).
pub fn file_stem(path: &Path) -> String {
    let path = if path.extension() == Some(OsStr::new("gz")) {
        Path::new(path.file_stem().unwrap_or_default())
    } else {
        path
    };
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Source of the resident memory, used by the memory watchdog.
pub trait MemoryMeter: Send {
    /// Returns resident memory in bytes.
    fn resident_bytes(&mut self) -> io::Result<u64>;
}

/// Resident memory of the current process, as reported by `sysinfo`.
/// All partition workers are threads of this process, so they are accounted as well.
pub struct ProcessMemory {
    system: sysinfo::System,
}

impl ProcessMemory {
    pub fn new() -> Self {
        Self { system: sysinfo::System::new() }
    }
}

impl MemoryMeter for ProcessMemory {
    fn resident_bytes(&mut self) -> io::Result<u64> {
        let pid = sysinfo::get_current_pid().map_err(|e| io::Error::new(io::ErrorKind::Unsupported, e))?;
        if !self.system.refresh_process(pid) {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("Cannot refresh process {}", pid)));
        }
        self.system.process(pid).map(|process| process.memory())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("Process {} not found", pid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems() {
        assert_eq!(file_stem(Path::new("dir/genome_a.fasta")), "genome_a");
        assert_eq!(file_stem(Path::new("genome_b.fa.gz")), "genome_b");
        assert_eq!(file_stem(Path::new("/x/y/plain")), "plain");
    }

    #[test]
    fn open_gzip_and_plain() {
        use flate2::{write::GzEncoder, Compression};
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("a.fa");
        fs::write(&plain, b">a\nACGT\n").unwrap();
        let gz = dir.path().join("b.fa.gz");
        let mut enc = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        enc.write_all(b">b\nTTTT\n").unwrap();
        enc.finish().unwrap();

        let mut s = String::new();
        open(&plain).unwrap().read_to_string(&mut s).unwrap();
        assert_eq!(s, ">a\nACGT\n");
        s.clear();
        open(&gz).unwrap().read_to_string(&mut s).unwrap();
        assert_eq!(s, ">b\nTTTT\n");
    }

    #[test]
    fn process_memory() {
        let mut meter = ProcessMemory::new();
        let first = meter.resident_bytes().unwrap();
        assert!(first > 0);
        // Allocate and touch 64 MB, the meter must see the growth.
        let block = vec![1_u8; 64_000_000];
        let second = meter.resident_bytes().unwrap();
        assert!(second >= first + 32_000_000, "{} -> {}", first, second);
        assert_eq!(block.iter().map(|&x| u64::from(x)).sum::<u64>(), 64_000_000);
    }
}
