//! External merge sort
//!
//! Splits an unsorted spool into sorted runs no larger than the sort buffer,
//! then k-way merges the runs into the final index with a min-heap. Equal
//! keys come out in run order, and within a run in spool order, so the
//! overall result is a stable sort of the spool.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

use crate::error::Result;
use crate::key::SortKey;
use crate::pool::PooledFile;

use super::cursor::{EntryCursor, EntrySink};
use super::IndexEntry;

/// A sorted region of the runs file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SortedRun {
    /// Index of the run's first entry
    pub start: u64,
    pub count: u64,
}

/// Sort `count` spool entries in runs of `run_entries`, writing each sorted
/// run back-to-back into `runs_file`
pub(crate) fn write_sorted_runs<K: SortKey>(
    spool: &PooledFile,
    spool_path: &Path,
    count: u64,
    run_entries: usize,
    runs_file: &PooledFile,
) -> Result<Vec<SortedRun>> {
    let run_entries = run_entries.max(1);
    let mut reader = EntryCursor::<K>::new(0, count, run_entries);
    let mut sink = EntrySink::<K>::new(0);
    let mut runs = Vec::with_capacity((count as usize).div_ceil(run_entries));
    let mut batch = Vec::with_capacity(run_entries.min(count as usize));

    while reader.remaining() > 0 {
        let start = sink.written();
        batch.clear();
        while batch.len() < run_entries {
            match reader.next(spool, spool_path)? {
                Some(entry) => batch.push(entry),
                None => break,
            }
        }

        // sort_by is stable: equal keys keep spool order
        batch.sort_by(|a, b| a.key.cmp(&b.key));
        for entry in &batch {
            sink.push(runs_file, entry)?;
        }
        runs.push(SortedRun {
            start,
            count: batch.len() as u64,
        });
    }

    sink.flush(runs_file)?;
    Ok(runs)
}

/// Heap item: the current head of one run
struct Head<K> {
    entry: IndexEntry<K>,
    run: usize,
}

impl<K: SortKey> Ord for Head<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap (a max-heap) pops the smallest (key, run)
        other
            .entry
            .key
            .cmp(&self.entry.key)
            .then_with(|| other.run.cmp(&self.run))
    }
}

impl<K: SortKey> PartialOrd for Head<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: SortKey> PartialEq for Head<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: SortKey> Eq for Head<K> {}

/// Merge sorted `runs` from `runs_file` into `sink`
///
/// Each run reads `block_entries` entries at a time, so memory stays at
/// `runs.len() * block_entries` entries regardless of total size.
pub(crate) fn merge_runs<K: SortKey>(
    runs_file: &PooledFile,
    runs_path: &Path,
    runs: &[SortedRun],
    block_entries: usize,
    out: &PooledFile,
    sink: &mut EntrySink<K>,
) -> Result<()> {
    let mut cursors: Vec<EntryCursor<K>> = runs
        .iter()
        .map(|run| EntryCursor::new(run.start, run.count, block_entries))
        .collect();

    let mut heap = BinaryHeap::with_capacity(cursors.len());
    for (run, cursor) in cursors.iter_mut().enumerate() {
        if let Some(entry) = cursor.next(runs_file, runs_path)? {
            heap.push(Head { entry, run });
        }
    }

    while let Some(Head { entry, run }) = heap.pop() {
        sink.push(out, &entry)?;
        if let Some(next) = cursors[run].next(runs_file, runs_path)? {
            heap.push(Head { entry: next, run });
        }
    }
    Ok(())
}
