//! WebSocket client for the upload API.
//!
//! Implements the request-response pattern with UUID correlation, per
//! request timeouts and ping/pong keepalive. Chunk payloads travel in binary
//! frames whose header carries the correlation id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use chunkup_protocol::binary::encode_chunk_frame;
use chunkup_protocol::constants::{
    MessageType, WS_BINARY_REQUEST_TIMEOUT, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_REQUEST_TIMEOUT,
};
use chunkup_protocol::envelope::Message;
use chunkup_protocol::messages::{
    CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest, InitUploadResponse,
    UploadChunkHeader, UploadChunkResponse, UploadStatusRequest, UploadStatusResponse,
};
use chunkup_transfer::{ApiError, BoxFuture, UploadApi};

/// Requests awaiting their response, keyed by message id.
pub(crate) type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;

/// Errors from the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("server error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl From<WsError> for ApiError {
    fn from(e: WsError) -> Self {
        match e {
            WsError::Remote { code, message } => ApiError::Remote { code, message },
            WsError::Timeout => ApiError::Timeout,
            other @ (WsError::Ws(_) | WsError::Closed) => ApiError::Transport(other.to_string()),
            other => ApiError::Protocol(other.to_string()),
        }
    }
}

/// Client-side timeouts.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for JSON requests. `complete_upload` reassembles the whole
    /// artifact before replying, so this is generous.
    pub request_timeout: Duration,
    /// Timeout for one binary chunk upload.
    pub chunk_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: WS_REQUEST_TIMEOUT,
            chunk_timeout: WS_BINARY_REQUEST_TIMEOUT,
        }
    }
}

/// WebSocket client connected to one upload server.
///
/// Safe to share between the scheduler's workers: requests are multiplexed
/// over the single connection and matched to responses by id.
pub struct WsUploadClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: PendingMap,
    config: ClientConfig,
    read_task: tokio::task::JoinHandle<()>,
    write_task: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl WsUploadClient {
    /// Connects with default timeouts.
    pub async fn connect(url: &str) -> Result<Self, WsError> {
        Self::connect_with_config(url, ClientConfig::default()).await
    }

    pub async fn connect_with_config(url: &str, config: ClientConfig) -> Result<Self, WsError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();
        tracing::info!(%url, "connected to upload server");

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let write_task = tokio::spawn(crate::pumps::write::write_pump(
            write,
            write_rx,
            WS_PING_PERIOD,
            cancel.clone(),
        ));
        let read_task = tokio::spawn(crate::pumps::read::read_pump(
            read,
            pending.clone(),
            write_tx.clone(),
            cancel.clone(),
        ));

        Ok(Self {
            write_tx,
            pending,
            config,
            read_task,
            write_task,
            cancel,
        })
    }

    /// Returns `false` once the connection has dropped or been closed.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Sends a request and waits for the response.
    pub async fn send_request<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Message, WsError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, msg_type, payload)?;
        let json = serde_json::to_string(&msg)?;
        self.round_trip(
            id,
            tungstenite::Message::Text(json.into()),
            self.config.request_timeout,
        )
        .await
    }

    /// Sends one chunk as a binary frame and waits for its acknowledgement.
    pub async fn send_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        total_chunks: u32,
        data: &[u8],
    ) -> Result<UploadChunkResponse, WsError> {
        let id = uuid::Uuid::new_v4().to_string();
        let header = UploadChunkHeader {
            id: id.clone(),
            upload_id: upload_id.to_string(),
            chunk_index,
            total_chunks,
        };
        let frame = encode_chunk_frame(&header, data)?;
        let resp = self
            .round_trip(
                id,
                tungstenite::Message::Binary(frame.into()),
                self.config.chunk_timeout,
            )
            .await?;
        expect_payload(resp, MessageType::UploadChunkResponse)
    }

    /// Sends a typed request and decodes the typed response.
    async fn call<Req, Resp>(
        &self,
        msg_type: MessageType,
        expected: MessageType,
        req: &Req,
    ) -> Result<Resp, WsError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let resp = self.send_request(msg_type, Some(req)).await?;
        expect_payload(resp, expected)
    }

    async fn round_trip(
        &self,
        id: String,
        frame: tungstenite::Message,
        timeout: Duration,
    ) -> Result<Message, WsError> {
        if !self.is_connected() {
            return Err(WsError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if self.write_tx.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(WsError::Closed);
        }

        let result = tokio::time::timeout(timeout, rx).await;

        // Clean up pending entry on any exit path.
        self.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(resp)) => resp.into_result().map_err(|err| WsError::Remote {
                code: err.code,
                message: err.message,
            }),
            Ok(Err(_)) => Err(WsError::Closed),
            Err(_) => Err(WsError::Timeout),
        }
    }

    /// Gracefully closes the connection.
    pub async fn close(&self) {
        let _ = self.write_tx.send(tungstenite::Message::Close(None)).await;
        self.cancel.cancel();
    }
}

impl Drop for WsUploadClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.read_task.abort();
        self.write_task.abort();
    }
}

fn expect_payload<T: DeserializeOwned>(resp: Message, expected: MessageType) -> Result<T, WsError> {
    if resp.msg_type != expected {
        return Err(WsError::UnexpectedResponse(format!(
            "expected {expected:?}, got {:?}",
            resp.msg_type
        )));
    }
    resp.parse_payload()?
        .ok_or_else(|| WsError::UnexpectedResponse(format!("{expected:?} without payload")))
}

impl UploadApi for WsUploadClient {
    fn init_upload(
        &self,
        req: InitUploadRequest,
    ) -> BoxFuture<'_, Result<InitUploadResponse, ApiError>> {
        Box::pin(async move {
            Ok(self
                .call(MessageType::InitUpload, MessageType::InitUploadResponse, &req)
                .await?)
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        chunk_index: u32,
        total_chunks: u32,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<UploadChunkResponse, ApiError>> {
        Box::pin(async move {
            Ok(self
                .send_chunk(upload_id, chunk_index, total_chunks, data)
                .await?)
        })
    }

    fn upload_status<'a>(
        &'a self,
        upload_id: &'a str,
    ) -> BoxFuture<'a, Result<UploadStatusResponse, ApiError>> {
        Box::pin(async move {
            let req = UploadStatusRequest {
                upload_id: upload_id.to_string(),
            };
            Ok(self
                .call(MessageType::UploadStatus, MessageType::UploadStatusResponse, &req)
                .await?)
        })
    }

    fn complete_upload<'a>(
        &'a self,
        upload_id: &'a str,
    ) -> BoxFuture<'a, Result<CompleteUploadResponse, ApiError>> {
        Box::pin(async move {
            let req = CompleteUploadRequest {
                upload_id: upload_id.to_string(),
            };
            Ok(self
                .call(
                    MessageType::CompleteUpload,
                    MessageType::CompleteUploadResponse,
                    &req,
                )
                .await?)
        })
    }
}
