//! In-memory [`UploadApi`] with failure injection, for scheduler tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chunkup_protocol::messages::{
    CompleteUploadResponse, FileMetadata, HookReport, InitUploadRequest, InitUploadResponse,
    UploadChunkResponse, UploadStatusResponse,
};
use chunkup_protocol::types::FileType;

use crate::api::{ApiError, UploadApi};
use crate::checksum::checksum_bytes;
use crate::splitter::BoxFuture;

pub(crate) const UPLOAD_ID: &str = "mock-upload";

#[derive(Default)]
struct Server {
    filename: String,
    total_chunks: u32,
    chunks: BTreeMap<u32, Vec<u8>>,
    completed: Option<CompleteUploadResponse>,
}

pub(crate) struct MockApi {
    chunk_size: u64,
    server: Mutex<Server>,
    failures: Mutex<HashMap<u32, (u32, ApiError)>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockApi {
    pub(crate) fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            server: Mutex::new(Server::default()),
            failures: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Prepares server state as if `init_upload` had been called.
    pub(crate) fn with_session(self, filename: &str, total_size: u64) -> Self {
        {
            let mut s = self.server.lock().unwrap();
            s.filename = filename.to_string();
            s.total_chunks = total_size.div_ceil(self.chunk_size) as u32;
        }
        self
    }

    /// Makes the next `times` uploads of `index` fail with `error`.
    pub(crate) fn fail(&self, index: u32, times: u32, error: ApiError) {
        self.failures.lock().unwrap().insert(index, (times, error));
    }

    pub(crate) fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Marks chunks as already held by the server.
    pub(crate) fn preload(&self, index: u32, data: Vec<u8>) {
        self.server.lock().unwrap().chunks.insert(index, data);
    }

    pub(crate) fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_for(&self, index: u32) -> usize {
        self.calls().iter().filter(|&&i| i == index).count()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn received(&self) -> Vec<u32> {
        self.server.lock().unwrap().chunks.keys().copied().collect()
    }

    pub(crate) fn artifact(&self) -> Vec<u8> {
        let s = self.server.lock().unwrap();
        s.chunks.values().flatten().copied().collect()
    }

    async fn upload(&self, index: u32, data: &[u8]) -> Result<UploadChunkResponse, ApiError> {
        self.calls.lock().unwrap().push(index);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.apply(index, data);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn apply(&self, index: u32, data: &[u8]) -> Result<UploadChunkResponse, ApiError> {
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some((left, err)) = failures.get_mut(&index)
                && *left > 0
            {
                *left -= 1;
                return Err(err.clone());
            }
        }
        let mut s = self.server.lock().unwrap();
        if index >= s.total_chunks {
            return Err(ApiError::Remote {
                code: 416,
                message: format!("index {index} out of range"),
            });
        }
        s.chunks.insert(index, data.to_vec());
        Ok(UploadChunkResponse {
            success: true,
            received_chunk_count: s.chunks.len() as u32,
        })
    }
}

impl UploadApi for MockApi {
    fn init_upload(
        &self,
        req: InitUploadRequest,
    ) -> BoxFuture<'_, Result<InitUploadResponse, ApiError>> {
        Box::pin(async move {
            let mut s = self.server.lock().unwrap();
            s.filename = req.filename;
            s.total_chunks = req.total_size.div_ceil(self.chunk_size) as u32;
            Ok(InitUploadResponse {
                upload_id: UPLOAD_ID.to_string(),
                chunk_size: self.chunk_size,
                total_chunks: s.total_chunks,
            })
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        _upload_id: &'a str,
        chunk_index: u32,
        _total_chunks: u32,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<UploadChunkResponse, ApiError>> {
        Box::pin(self.upload(chunk_index, data))
    }

    fn upload_status<'a>(
        &'a self,
        upload_id: &'a str,
    ) -> BoxFuture<'a, Result<UploadStatusResponse, ApiError>> {
        Box::pin(async move {
            let s = self.server.lock().unwrap();
            let received: Vec<u32> = s.chunks.keys().copied().collect();
            Ok(UploadStatusResponse {
                upload_id: upload_id.to_string(),
                chunk_size: self.chunk_size,
                total_chunks: s.total_chunks,
                is_complete: received.len() == s.total_chunks as usize,
                received_chunks: received,
            })
        })
    }

    fn complete_upload<'a>(
        &'a self,
        upload_id: &'a str,
    ) -> BoxFuture<'a, Result<CompleteUploadResponse, ApiError>> {
        Box::pin(async move {
            let mut s = self.server.lock().unwrap();
            if let Some(done) = &s.completed {
                return Ok(done.clone());
            }
            let missing: Vec<u32> = (0..s.total_chunks)
                .filter(|i| !s.chunks.contains_key(i))
                .collect();
            if !missing.is_empty() {
                return Err(ApiError::Remote {
                    code: 422,
                    message: format!("missing chunks {missing:?}"),
                });
            }
            let bytes: Vec<u8> = s.chunks.values().flatten().copied().collect();
            let done = CompleteUploadResponse {
                success: true,
                artifact_path: format!("/completed/{}", s.filename),
                metadata: FileMetadata {
                    upload_id: upload_id.to_string(),
                    filename: s.filename.clone(),
                    size: bytes.len() as u64,
                    checksum: checksum_bytes(&bytes),
                    file_type: FileType::from_filename(&s.filename),
                    timestamp: "2024-01-01T00:00:00+00:00".to_string(),
                },
                downstream_job_id: None,
                hooks: HookReport::default(),
            };
            s.completed = Some(done.clone());
            Ok(done)
        })
    }
}
