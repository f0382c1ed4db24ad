use std::{
    thread, mem,
    collections::HashSet,
    path::{Path, PathBuf},
    sync::mpsc::{self, SyncSender, Receiver, TrySendError},
    time::Duration,
};
use crate::{
    Error,
    err::error,
    ext::{self, sys::MemoryMeter},
    seq::{NamedSeq, kmers},
};
use super::{
    Location, ConservedGroup, CounterParams,
    fuzzy::FuzzyExpander,
    worker::{PartitionWorker, Message},
};

/// Sleep duration when a worker mailbox is full.
const BACKPRESSURE_SLEEP: Duration = Duration::from_millis(2);

/// Returns partition of the k-mer: its first `stable_start` nucleotides, encoded in base 4 (A=0, C=1, G=2, T=3).
/// Returns None if the prefix contains anything except A, C, G, T.
pub fn partition_of(kmer: &[u8], stable_start: usize) -> Option<usize> {
    let mut res = 0;
    for &nt in kmer.get(..stable_start)? {
        res = 4 * res + match nt {
            b'A' => 0,
            b'C' => 1,
            b'G' => 2,
            b'T' => 3,
            _ => return None,
        };
    }
    Some(res)
}

/// Name of the partition: its prefix (`all` if there is only one partition).
pub fn partition_name(partition: usize, stable_start: usize) -> String {
    if stable_start == 0 {
        return "all".to_owned();
    }
    (0..stable_start).rev()
        .map(|i| char::from(b"ACGT"[(partition >> (2 * i)) & 3]))
        .collect()
}

/// Number of k-mers, processed for one genome.
#[derive(Default, Clone, Copy, Debug)]
pub struct GenomeSummary {
    pub contigs: u32,
    pub routed: u64,
    /// k-mers with ambiguous nucleotides.
    pub ambiguous: u64,
    /// k-mers, discarded due to high copy number.
    pub repetitive: u64,
}

/// Routes k-mers to partition workers, watches memory usage, and collects conserved groups.
pub struct KmerCounter {
    params: CounterParams,
    senders: Vec<SyncSender<Message>>,
    handles: Vec<thread::JoinHandle<crate::Result<()>>>,
    results: Option<Receiver<ConservedGroup>>,
    /// Batches that are not yet sent to the workers.
    pending: Vec<Vec<(Vec<u8>, Location)>>,

    meter: Option<Box<dyn MemoryMeter>>,
    since_check: u64,
    genomes: u32,
}

impl KmerCounter {
    /// Starts one worker per partition, workers create their index files in `dir` (which must exist).
    pub fn new(params: CounterParams, dir: &Path, meter: Box<dyn MemoryMeter>) -> crate::Result<Self> {
        params.validate()?;
        let n = params.partitions();
        let mut senders = Vec::with_capacity(n);
        let mut handles = Vec::with_capacity(n);
        let (res_sender, res_receiver) = mpsc::sync_channel(params.mailbox);
        for (partition, path) in partition_paths(dir, params.stable_start).into_iter().enumerate() {
            let expander = FuzzyExpander::new(params.mismatches, params.stable_start, params.stable_end);
            let (sender, receiver) = mpsc::sync_channel(params.mailbox);
            let worker = PartitionWorker::new(partition, path, expander, receiver, res_sender.clone());
            senders.push(sender);
            handles.push(thread::spawn(|| worker.run()));
        }
        log::debug!("    Started {} partition workers in {}", n, ext::fmt::path(dir));
        Ok(Self {
            pending: vec![Vec::with_capacity(params.batch_size); n],
            params, senders, handles,
            results: Some(res_receiver),
            meter: Some(meter),
            since_check: 0,
            genomes: 0,
        })
    }

    /// Number of genomes, counted so far.
    pub fn genomes(&self) -> u32 {
        self.genomes
    }

    /// Stops all workers and returns the first worker error.
    fn fail(&mut self, partition: usize) -> Error {
        self.senders.clear();
        self.results = None;
        let mut res = None;
        for (i, handle) in mem::take(&mut self.handles).into_iter().enumerate() {
            let err = match handle.join() {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(_) => error!(RuntimeError, "Partition worker {} panicked",
                    partition_name(i, self.params.stable_start)),
            };
            if res.is_none() {
                res = Some(err);
            }
        }
        res.unwrap_or_else(|| error!(RuntimeError, "Partition worker {} stopped unexpectedly",
            partition_name(partition, self.params.stable_start)))
    }

    /// Sends message to the worker, sleeping while its mailbox is full.
    fn send(&mut self, partition: usize, mut msg: Message) -> crate::Result<()> {
        loop {
            match self.senders.get(partition).map(|sender| sender.try_send(msg)) {
                Some(Ok(())) => return Ok(()),
                Some(Err(TrySendError::Full(returned))) => {
                    log::trace!("    Mailbox of partition {} is full", partition);
                    msg = returned;
                    thread::sleep(BACKPRESSURE_SLEEP);
                }
                Some(Err(TrySendError::Disconnected(_))) | None => return Err(self.fail(partition)),
            }
        }
    }

    fn send_pending(&mut self, partition: usize) -> crate::Result<()> {
        if self.pending[partition].is_empty() {
            return Ok(());
        }
        let batch = mem::replace(&mut self.pending[partition], Vec::with_capacity(self.params.batch_size));
        self.send(partition, Message::Kmers(batch))
    }

    /// Sends k-mer to its partition.
    pub fn route(&mut self, kmer: &[u8], loc: Location) -> crate::Result<()> {
        let partition = partition_of(kmer, self.params.stable_start).ok_or_else(||
            error!(IntegrityAssertion, "Cannot route k-mer {}", String::from_utf8_lossy(kmer)))?;
        self.pending[partition].push((kmer.to_vec(), loc));
        if self.pending[partition].len() >= self.params.batch_size {
            self.send_pending(partition)?;
        }
        self.since_check += 1;
        if self.since_check >= self.params.check_every {
            self.check_memory()?;
        }
        Ok(())
    }

    /// Sends pending k-mers and broadcasts flush.
    /// If `wait`, waits until all workers finish flushing, and returns buffered bytes per partition.
    pub fn flush(&mut self, wait: bool) -> crate::Result<Vec<u64>> {
        let n = self.senders.len();
        for partition in 0..n {
            self.send_pending(partition)?;
        }
        if !wait {
            for partition in 0..n {
                self.send(partition, Message::Flush(None))?;
            }
            return Ok(Vec::new());
        }

        let (ack_sender, ack_receiver) = mpsc::sync_channel(n);
        for partition in 0..n {
            self.send(partition, Message::Flush(Some(ack_sender.clone())))?;
        }
        mem::drop(ack_sender);
        let mut buffered = vec![0; n];
        for _ in 0..n {
            match ack_receiver.recv() {
                Ok((partition, bytes)) => buffered[partition] = bytes,
                Err(_) => return Err(self.fail(0)),
            }
        }
        Ok(buffered)
    }

    fn resident_memory(&mut self) -> Option<u64> {
        match self.meter.as_mut()?.resident_bytes() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!("Cannot measure memory usage ({}), memory watchdog is disabled", e);
                self.meter = None;
                None
            }
        }
    }

    /// Flushes all partitions if memory usage is high,
    /// fails if the memory usage remains above the ceiling after the flush.
    fn check_memory(&mut self) -> crate::Result<()> {
        self.since_check = 0;
        let Some(usage) = self.resident_memory() else { return Ok(()) };
        let ceiling = self.params.max_memory;
        if usage >= ceiling {
            log::warn!("Memory usage ({}) exceeds the limit ({}), flushing all partitions",
                ext::fmt::Bytes(usage), ext::fmt::Bytes(ceiling));
            let buffered = self.flush(true)?;
            let Some(usage) = self.resident_memory() else { return Ok(()) };
            if usage >= ceiling {
                let desc = buffered.iter().enumerate()
                    .map(|(i, &bytes)| format!("{}={}", partition_name(i, self.params.stable_start),
                        ext::fmt::Bytes(bytes)))
                    .collect::<Vec<_>>().join(", ");
                return Err(error!(ResourceExhaustion,
                    "memory usage ({}) exceeds the limit ({}) after flushing. Buffered per partition: {}",
                    ext::fmt::Bytes(usage), ext::fmt::Bytes(ceiling), desc));
            }
        } else if usage as f64 >= self.params.flush_fraction * ceiling as f64 {
            log::debug!("    Memory usage {}, flushing all partitions", ext::fmt::Bytes(usage));
            self.flush(false)?;
        }
        Ok(())
    }

    /// Routes canonical k-mers of all contigs as a new genome, and flushes all partitions afterwards.
    /// Contigs are numbered from 1 in their order. k-mers from `skip` are ignored.
    pub fn count_genome(
        &mut self,
        contigs: impl Iterator<Item = crate::Result<NamedSeq>>,
        skip: Option<&HashSet<Vec<u8>>>,
    ) -> crate::Result<GenomeSummary> {
        self.genomes += 1;
        let genome = self.genomes;
        let k = self.params.k;
        let mut summary = GenomeSummary::default();
        for (contig, record) in (1..).zip(contigs) {
            let record = record?;
            summary.contigs = contig;
            let mut res = Ok(());
            let ambiguous = kmers::canonical_kmers(record.seq(), k, &mut |start, kmer: &[u8], strand| {
                if res.is_err() {
                    return;
                }
                if skip.map_or(false, |set| set.contains(kmer)) {
                    summary.repetitive += 1;
                } else {
                    summary.routed += 1;
                    res = self.route(kmer, Location::new(genome, contig, start, strand));
                }
            });
            res?;
            summary.ambiguous += ambiguous;
        }
        self.flush(false)?;
        Ok(summary)
    }

    /// Asks every worker to find groups, present in genomes `1..=num_genomes`.
    /// Returned stream finishes when all workers are done.
    pub fn collect_conserved(mut self, num_genomes: u32) -> crate::Result<ConservedStream> {
        if num_genomes == 0 {
            return Err(error!(InvalidInput, "Cannot search for conserved k-mers across zero genomes"));
        }
        for partition in 0..self.senders.len() {
            self.send_pending(partition)?;
            self.send(partition, Message::FindConserved(num_genomes))?;
        }
        self.senders.clear();
        let receiver = self.results.take()
            .ok_or_else(|| error!(RuntimeError, "Conserved groups are already collected"))?;
        Ok(ConservedStream {
            receiver: Some(receiver),
            handles: mem::take(&mut self.handles),
            stable_start: self.params.stable_start,
        })
    }
}

impl Drop for KmerCounter {
    fn drop(&mut self) {
        self.senders.clear();
        self.results = None;
        for handle in self.handles.drain(..) {
            if let Ok(Err(e)) = handle.join() {
                log::error!("Partition worker failed: {}", e.display());
            }
        }
    }
}

/// Stream of conserved groups from all partitions, in no particular order.
/// After all groups are received, yields the first worker error, if any.
pub struct ConservedStream {
    receiver: Option<Receiver<ConservedGroup>>,
    handles: Vec<thread::JoinHandle<crate::Result<()>>>,
    stable_start: usize,
}

impl ConservedStream {
    fn join(&mut self) -> crate::Result<()> {
        self.receiver = None;
        let mut res = Ok(());
        for (i, handle) in self.handles.drain(..).enumerate() {
            let curr = match handle.join() {
                Ok(curr) => curr,
                Err(_) => Err(error!(RuntimeError, "Partition worker {} panicked",
                    partition_name(i, self.stable_start))),
            };
            if res.is_ok() {
                res = curr;
            }
        }
        res
    }
}

impl Iterator for ConservedStream {
    type Item = crate::Result<ConservedGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        // All workers have dropped their senders once they are done.
        match self.receiver.as_ref()?.recv() {
            Ok(group) => Some(Ok(group)),
            Err(_) => self.join().err().map(Err),
        }
    }
}

impl Drop for ConservedStream {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            log::error!("Partition worker failed: {}", e.display());
        }
    }
}

/// Paths of all partition files in the directory.
pub fn partition_paths(dir: &Path, stable_start: usize) -> Vec<PathBuf> {
    (0..1 << (2 * stable_start))
        .map(|i| dir.join(format!("{}.txt", partition_name(i, stable_start))))
        .collect()
}
