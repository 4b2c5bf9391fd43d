//! Per-chunk client state and its snapshot view.

use serde::Serialize;

use crate::splitter::ChunkRange;

/// Status of one chunk on the client.
///
/// Transitions: `Pending → Uploading → {Uploaded | Failed}` and
/// `Failed → Uploading` on retry. The server may force `Uploaded` at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

/// Point-in-time view of a transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSnapshot {
    pub statuses: Vec<ChunkStatus>,
    pub pending: usize,
    pub uploading: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
    pub bytes_per_second: f64,
}

impl TransferSnapshot {
    pub fn failed_indices(&self) -> Vec<u32> {
        indices_with(&self.statuses, ChunkStatus::Failed)
    }

    pub fn is_done(&self) -> bool {
        self.uploaded == self.statuses.len()
    }

    /// Completed fraction in `[0.0, 1.0]`.
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        self.bytes_uploaded as f64 / self.total_bytes as f64
    }
}

/// Chunk table guarded by the scheduler's mutex.
#[derive(Debug)]
pub(crate) struct ChunkTable {
    ranges: Vec<ChunkRange>,
    statuses: Vec<ChunkStatus>,
}

impl ChunkTable {
    pub(crate) fn new(ranges: Vec<ChunkRange>) -> Self {
        let statuses = vec![ChunkStatus::Pending; ranges.len()];
        Self { ranges, statuses }
    }

    pub(crate) fn len(&self) -> usize {
        self.ranges.len()
    }

    pub(crate) fn range(&self, index: u32) -> Option<ChunkRange> {
        self.ranges.get(index as usize).copied()
    }

    pub(crate) fn status(&self, index: u32) -> Option<ChunkStatus> {
        self.statuses.get(index as usize).copied()
    }

    /// `Pending | Failed → Uploading`. Returns `false` for any other state.
    pub(crate) fn begin(&mut self, index: u32) -> bool {
        match self.statuses.get_mut(index as usize) {
            Some(s @ (ChunkStatus::Pending | ChunkStatus::Failed)) => {
                *s = ChunkStatus::Uploading;
                true
            }
            _ => false,
        }
    }

    /// `Uploading → Uploaded | Failed`. A chunk forced to `Uploaded`
    /// meanwhile is left alone.
    pub(crate) fn finish(&mut self, index: u32, ok: bool) {
        if let Some(s) = self.statuses.get_mut(index as usize)
            && *s == ChunkStatus::Uploading
        {
            *s = if ok {
                ChunkStatus::Uploaded
            } else {
                ChunkStatus::Failed
            };
        }
    }

    /// Forces every server-known index to `Uploaded`; ignores indices
    /// outside the plan.
    pub(crate) fn reconcile(&mut self, server_received: &[u32]) -> usize {
        let mut changed = 0;
        for &index in server_received {
            if let Some(s) = self.statuses.get_mut(index as usize)
                && *s != ChunkStatus::Uploaded
            {
                *s = ChunkStatus::Uploaded;
                changed += 1;
            }
        }
        changed
    }

    /// `Failed → Pending` for every failed index; returns those indices.
    pub(crate) fn requeue_failed(&mut self) -> Vec<u32> {
        let failed = indices_with(&self.statuses, ChunkStatus::Failed);
        for &i in &failed {
            self.statuses[i as usize] = ChunkStatus::Pending;
        }
        failed
    }

    /// Marks interrupted uploads failed, e.g. after cancellation.
    pub(crate) fn abandon_in_flight(&mut self) {
        for s in &mut self.statuses {
            if *s == ChunkStatus::Uploading {
                *s = ChunkStatus::Failed;
            }
        }
    }

    pub(crate) fn pending(&self) -> Vec<u32> {
        indices_with(&self.statuses, ChunkStatus::Pending)
    }

    pub(crate) fn snapshot(&self, bytes_per_second: f64) -> TransferSnapshot {
        let count = |want| self.statuses.iter().filter(|&&s| s == want).count();
        let bytes_uploaded = self
            .ranges
            .iter()
            .zip(&self.statuses)
            .filter(|(_, s)| **s == ChunkStatus::Uploaded)
            .map(|(r, _)| r.len)
            .sum();
        TransferSnapshot {
            statuses: self.statuses.clone(),
            pending: count(ChunkStatus::Pending),
            uploading: count(ChunkStatus::Uploading),
            uploaded: count(ChunkStatus::Uploaded),
            failed: count(ChunkStatus::Failed),
            bytes_uploaded,
            total_bytes: self.ranges.iter().map(|r| r.len).sum(),
            bytes_per_second,
        }
    }
}

fn indices_with(statuses: &[ChunkStatus], want: ChunkStatus) -> Vec<u32> {
    statuses
        .iter()
        .enumerate()
        .filter(|(_, s)| **s == want)
        .map(|(i, _)| i as u32)
        .collect()
}
