use std::{
    mem,
    path::PathBuf,
    collections::HashMap,
    sync::mpsc::{Receiver, SyncSender},
};
use super::{
    Location, ConservedGroup,
    fuzzy::{FuzzyExpander, Keys},
    partition::PartitionIndex,
};

/// Message, sent from the coordinator to a partition worker.
pub enum Message {
    /// Canonical k-mers with their locations.
    Kmers(Vec<(Vec<u8>, Location)>),
    /// Merge buffered groups into the partition index.
    /// If the acknowledgement channel is present, the worker replies `(partition, buffered bytes before flush)`
    /// after the flush is complete.
    Flush(Option<SyncSender<(usize, u64)>>),
    /// Flush, send all groups that appear in every genome `1..=n`, and stop.
    FindConserved(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Accumulating,
    Flushing,
    Scanning,
    Done,
}

/// Approximate number of bytes, occupied by one buffered location.
const LOCATION_BYTES: u64 = mem::size_of::<Location>() as u64;
/// Approximate overhead of a new buffered key (hash table entry and vector headers).
const ENTRY_BYTES: u64 = 2 * mem::size_of::<Vec<u8>>() as u64 + 8;

/// Owns one partition index: expands received k-mers, buffers them and merges them into the index.
pub struct PartitionWorker {
    partition: usize,
    /// Partition index file, created on start if absent.
    path: PathBuf,
    expander: FuzzyExpander,
    receiver: Receiver<Message>,
    results: SyncSender<ConservedGroup>,

    buffer: HashMap<Vec<u8>, Vec<Location>>,
    buffered_bytes: u64,
    keys: Keys,
    state: WorkerState,
}

impl PartitionWorker {
    pub fn new(
        partition: usize,
        path: PathBuf,
        expander: FuzzyExpander,
        receiver: Receiver<Message>,
        results: SyncSender<ConservedGroup>,
    ) -> Self {
        Self {
            partition, path, expander, receiver, results,
            buffer: HashMap::new(),
            buffered_bytes: 0,
            keys: Keys::new(),
            state: WorkerState::Idle,
        }
    }

    fn set_state(&mut self, state: WorkerState) {
        log::trace!("    Partition {}: {:?} -> {:?}", self.partition, self.state, state);
        self.state = state;
    }

    /// Processes messages until the conserved groups are sent, or until the coordinator disconnects.
    /// Results channel is closed when the worker returns.
    pub fn run(mut self) -> crate::Result<()> {
        let index = PartitionIndex::create(self.path.clone())?;
        self.set_state(WorkerState::Accumulating);
        while let Ok(msg) = self.receiver.recv() {
            match msg {
                Message::Kmers(kmers) => self.accumulate(kmers),
                Message::Flush(ack) => {
                    let bytes = self.flush(&index)?;
                    if let Some(ack) = ack {
                        // Coordinator may have already stopped waiting.
                        let _ = ack.send((self.partition, bytes));
                    }
                }
                Message::FindConserved(n) => {
                    self.flush(&index)?;
                    self.scan(&index, n)?;
                    break;
                }
            }
        }
        if self.state != WorkerState::Done && !self.buffer.is_empty() {
            log::debug!("    Partition {}: coordinator disconnected, discarding {} buffered groups",
                self.partition, self.buffer.len());
        }
        self.set_state(WorkerState::Done);
        Ok(())
    }

    fn accumulate(&mut self, kmers: Vec<(Vec<u8>, Location)>) {
        for (kmer, loc) in kmers {
            self.expander.expand_into(&kmer, &mut self.keys);
            for key in self.keys.drain(..) {
                let key_len = key.len() as u64;
                let locations = self.buffer.entry(key).or_insert_with(|| {
                    self.buffered_bytes += ENTRY_BYTES + key_len;
                    Vec::new()
                });
                locations.push(loc);
                self.buffered_bytes += LOCATION_BYTES;
            }
        }
    }

    /// Merges buffer into the index, returns the number of buffered bytes before the flush.
    fn flush(&mut self, index: &PartitionIndex) -> crate::Result<u64> {
        let bytes = self.buffered_bytes;
        if self.buffer.is_empty() {
            return Ok(bytes);
        }
        self.set_state(WorkerState::Flushing);
        let mut batch: Vec<_> = self.buffer.drain().collect();
        batch.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        log::trace!("    Partition {}: merging {} groups", self.partition, batch.len());
        index.merge_insert(&batch)?;
        self.buffered_bytes = 0;
        self.set_state(WorkerState::Accumulating);
        Ok(bytes)
    }

    fn scan(&mut self, index: &PartitionIndex, num_genomes: u32) -> crate::Result<()> {
        self.set_state(WorkerState::Scanning);
        let mut count = 0;
        for group in index.scan_conserved(num_genomes)? {
            if self.results.send(group?).is_err() {
                log::debug!("    Partition {}: results are no longer needed", self.partition);
                break;
            }
            count += 1;
        }
        log::debug!("    Partition {}: {} conserved groups", self.partition, count);
        Ok(())
    }
}
