//! Bounded-concurrency chunk upload with per-chunk retry.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::api::{ApiError, UploadApi};
use crate::progress::SpeedCalculator;
use crate::retry::RetryPolicy;
use crate::splitter::{ChunkRange, ChunkSource};
use crate::state::{ChunkTable, TransferSnapshot};

/// Default number of concurrent chunk uploads.
pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Worker pool size.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

struct Inner {
    api: Arc<dyn UploadApi>,
    source: Arc<dyn ChunkSource>,
    upload_id: String,
    total_chunks: u32,
    config: SchedulerConfig,
    table: Mutex<ChunkTable>,
    speed: SpeedCalculator,
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, ChunkTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drives the chunks of one upload session to the server.
///
/// The chunk table is only locked for state transitions; network calls and
/// backoff sleeps happen without it.
pub struct ChunkScheduler {
    inner: Arc<Inner>,
}

impl ChunkScheduler {
    pub fn new(
        api: Arc<dyn UploadApi>,
        source: Arc<dyn ChunkSource>,
        upload_id: impl Into<String>,
        plan: Vec<ChunkRange>,
        config: SchedulerConfig,
    ) -> Self {
        let total_chunks = plan.len() as u32;
        Self {
            inner: Arc::new(Inner {
                api,
                source,
                upload_id: upload_id.into(),
                total_chunks,
                config,
                table: Mutex::new(ChunkTable::new(plan)),
                speed: SpeedCalculator::default(),
            }),
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.inner.upload_id
    }

    pub fn total_chunks(&self) -> u32 {
        self.inner.total_chunks
    }

    /// Marks every index the server already holds as uploaded.
    ///
    /// Indices the server does not report keep their local status.
    pub fn reconcile_with_server(&self, server_received: &[u32]) {
        let changed = self.inner.table().reconcile(server_received);
        debug!(
            upload_id = %self.inner.upload_id,
            reported = server_received.len(),
            changed,
            "Reconciled chunk table with server"
        );
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        let bps = self.inner.speed.bytes_per_second();
        self.inner.table().snapshot(bps)
    }

    /// Estimated time until every remaining chunk is uploaded.
    pub fn eta(&self) -> Option<Duration> {
        let snap = self.snapshot();
        self.inner
            .speed
            .eta(snap.total_bytes.saturating_sub(snap.bytes_uploaded))
    }

    /// Uploads every pending chunk.
    ///
    /// Returns [`TransferError::ChunksFailed`] once all dispatched chunks
    /// have settled and at least one of them is failed.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), TransferError> {
        let pending = self.inner.table().pending();
        self.run_indices(pending, cancel).await
    }

    /// Re-queues exactly the failed chunks and uploads that subset.
    pub async fn retry_failed_chunks(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let failed = self.inner.table().requeue_failed();
        info!(
            upload_id = %self.inner.upload_id,
            count = failed.len(),
            "Retrying failed chunks"
        );
        self.run_indices(failed, cancel).await
    }

    async fn run_indices(
        &self,
        indices: Vec<u32>,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let workers = self.inner.config.concurrency.max(1).min(indices.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(indices)));
        let mut pool = JoinSet::new();
        for _ in 0..workers {
            pool.spawn(worker(Arc::clone(&self.inner), Arc::clone(&queue)));
        }

        let cancelled = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    pool.abort_all();
                    break true;
                }
                joined = pool.join_next() => match joined {
                    None => break false,
                    Some(Err(e)) if e.is_panic() => {
                        warn!(upload_id = %self.inner.upload_id, "Chunk worker panicked");
                    }
                    Some(_) => {}
                },
            }
        };
        while pool.join_next().await.is_some() {}
        self.inner.table().abandon_in_flight();

        if cancelled {
            info!(upload_id = %self.inner.upload_id, "Chunk upload cancelled");
            return Err(TransferError::Cancelled);
        }

        let snapshot = self.snapshot();
        let failed = snapshot.failed_indices();
        if failed.is_empty() {
            Ok(())
        } else {
            warn!(
                upload_id = %self.inner.upload_id,
                failed = ?failed,
                "Some chunks failed"
            );
            Err(TransferError::ChunksFailed { indices: failed })
        }
    }
}

async fn worker(inner: Arc<Inner>, queue: Arc<Mutex<VecDeque<u32>>>) {
    loop {
        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some(index) = next else {
            break;
        };
        upload_with_retry(&inner, index).await;
    }
}

async fn upload_with_retry(inner: &Inner, index: u32) {
    let Some(range) = inner.table().range(index) else {
        return;
    };
    let policy = &inner.config.retry;

    for attempt in 0..policy.max_attempts() {
        // Someone else settled it (reconcile or a duplicate queue entry).
        if !inner.table().begin(index) {
            return;
        }

        match send_chunk(inner, range).await {
            Ok(()) => {
                inner.table().finish(index, true);
                inner.speed.record(range.len);
                debug!(upload_id = %inner.upload_id, index, attempt, "Chunk uploaded");
                return;
            }
            Err(e) => {
                inner.table().finish(index, false);
                let last = attempt + 1 >= policy.max_attempts();
                if !e.is_retryable() || last {
                    warn!(
                        upload_id = %inner.upload_id,
                        index,
                        attempt,
                        error = %e,
                        "Chunk failed"
                    );
                    return;
                }
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    upload_id = %inner.upload_id,
                    index,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Chunk attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn send_chunk(inner: &Inner, range: ChunkRange) -> Result<(), TransferError> {
    let data = inner.source.read(range).await?;
    let resp = inner
        .api
        .upload_chunk(&inner.upload_id, range.index, inner.total_chunks, &data)
        .await?;
    if !resp.success {
        return Err(ApiError::Protocol(format!("chunk {} not accepted", range.index)).into());
    }
    Ok(())
}
