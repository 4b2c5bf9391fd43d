//! Handler trait for processing WebSocket requests, and the handler that
//! backs it with an [`UploadService`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chunkup_protocol::binary::ChunkFrame;
use chunkup_protocol::constants::{ERR_INVALID_ARGUMENT, ERR_NOT_IMPLEMENTED, MessageType};
use chunkup_protocol::envelope::Message;
use chunkup_upload_service::{UploadError, UploadService};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::connection::{ConnectionMeta, Sender};

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling requests from upload clients.
///
/// The server dispatches parsed messages to the matching method, each on
/// its own task. Default implementations reply with "not implemented" so
/// handlers only override what they support.
pub trait Handler: Send + Sync + 'static {
    /// Called for `ping` messages.
    fn on_ping(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Ok(reply) = msg.reply(MessageType::Pong, Option::<&()>::None) {
                let _ = sender.send_msg(reply);
            }
        })
    }

    fn on_init_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    fn on_upload_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    fn on_complete_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for a binary chunk frame. The reply carries the frame
    /// header's `id`.
    fn on_upload_chunk(&self, sender: Sender, frame: ChunkFrame) -> HandlerFuture<'_> {
        Box::pin(async move {
            let msg = Message::error(&frame.header.id, ERR_NOT_IMPLEMENTED, "not implemented");
            let _ = sender.send_msg(msg);
        })
    }

    /// Called once the connection's pumps have stopped.
    fn on_disconnected(&self, meta: &ConnectionMeta) -> HandlerFuture<'_> {
        let _ = meta;
        Box::pin(async {})
    }
}

/// Serves every upload request from an [`UploadService`].
pub struct UploadHandler {
    service: Arc<UploadService>,
}

impl UploadHandler {
    pub fn new(service: Arc<UploadService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<UploadService> {
        &self.service
    }
}

impl Handler for UploadHandler {
    fn on_init_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            handle_request(&sender, &msg, MessageType::InitUploadResponse, |req| {
                self.service.init_upload(req)
            })
            .await;
        })
    }

    fn on_upload_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            handle_request(&sender, &msg, MessageType::UploadStatusResponse, |req| {
                self.service.upload_status(req)
            })
            .await;
        })
    }

    fn on_complete_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            handle_request(&sender, &msg, MessageType::CompleteUploadResponse, |req| {
                self.service.complete_upload(req)
            })
            .await;
        })
    }

    fn on_upload_chunk(&self, sender: Sender, frame: ChunkFrame) -> HandlerFuture<'_> {
        Box::pin(async move {
            let h = &frame.header;
            let result = self
                .service
                .upload_chunk(&h.upload_id, h.chunk_index, h.total_chunks, &frame.data)
                .await;
            let reply = match result {
                Ok(resp) => {
                    match Message::new(&h.id, MessageType::UploadChunkResponse, Some(&resp)) {
                        Ok(m) => m,
                        Err(e) => {
                            tracing::error!(id = %h.id, "failed to encode chunk response: {e}");
                            return;
                        }
                    }
                }
                Err(e) => {
                    log_failure(&h.id, "upload_chunk", &e);
                    Message::error(&h.id, e.code(), e.to_string())
                }
            };
            let _ = sender.send_msg(reply);
        })
    }
}

/// Decodes the request payload, runs `op` and sends the typed reply or an
/// error envelope carrying the error's wire code.
async fn handle_request<Req, Resp, Fut>(
    sender: &Sender,
    msg: &Message,
    resp_type: MessageType,
    op: impl FnOnce(Req) -> Fut,
) where
    Req: DeserializeOwned,
    Resp: Serialize,
    Fut: Future<Output = Result<Resp, UploadError>>,
{
    let req = match msg.parse_payload::<Req>() {
        Ok(Some(req)) => req,
        Ok(None) => {
            let _ = sender.send_error(msg, ERR_INVALID_ARGUMENT, "missing payload");
            return;
        }
        Err(e) => {
            let _ = sender.send_error(msg, ERR_INVALID_ARGUMENT, &format!("invalid payload: {e}"));
            return;
        }
    };

    match op(req).await {
        Ok(resp) => match msg.reply(resp_type, Some(&resp)) {
            Ok(reply) => {
                let _ = sender.send_msg(reply);
            }
            Err(e) => {
                tracing::error!(id = %msg.id, "failed to encode response: {e}");
            }
        },
        Err(e) => {
            log_failure(&msg.id, &format!("{:?}", msg.msg_type), &e);
            let _ = sender.send_error(msg, e.code(), &e.to_string());
        }
    }
}

fn log_failure(id: &str, op: &str, err: &UploadError) {
    if err.is_retryable() {
        tracing::warn!(id, op, code = err.code(), "request failed: {err}");
    } else {
        tracing::debug!(id, op, code = err.code(), "request rejected: {err}");
    }
}
