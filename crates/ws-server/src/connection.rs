//! One client connection: inbound dispatch, outbound queue, keepalive.

use std::sync::Arc;

use chunkup_protocol::binary::parse_chunk_frame;
use chunkup_protocol::constants::{ERR_NOT_IMPLEMENTED, MessageType, WS_PING_PERIOD, WS_PONG_WAIT};
use chunkup_protocol::envelope::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;
use crate::handler::Handler;

/// Metadata about a connected client.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    pub connection_id: u64,
    pub remote_addr: String,
}

/// Handle for sending messages to one client.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    pub(crate) fn new(tx: mpsc::Sender<WsMessage>) -> Self {
        Self { tx }
    }

    /// Sends a protocol [`Message`] as JSON text.
    ///
    /// Returns `Err` only if the buffer is full or the client is gone.
    pub fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!(id = %msg.id, "send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Sends an error response for the given request message.
    pub fn send_error(&self, req: &Message, code: i32, message: &str) -> Result<(), SendError> {
        self.send_msg(req.reply_error(code, message))
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

type WsResult<T> = Result<T, tungstenite::Error>;

/// Runs one WebSocket connection until the client goes away or `cancel`
/// fires, then notifies the handler.
///
/// Every request is handled on its own task so that chunk uploads sharing a
/// connection are processed concurrently.
pub(crate) async fn run_connection<S, H>(
    ws: S,
    meta: ConnectionMeta,
    handler: Arc<H>,
    cancel: CancellationToken,
) where
    S: Stream<Item = WsResult<WsMessage>>
        + Sink<WsMessage, Error = tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, outbox) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let sender = Sender::new(tx);
    let (sink, inbound) = ws.split();

    let writer = tokio::spawn(write_pump(sink, outbox, cancel.clone()));
    read_pump(inbound, &sender, &handler, &cancel).await;

    cancel.cancel();
    let _ = writer.await;

    handler.on_disconnected(&meta).await;
    tracing::info!(
        connection_id = meta.connection_id,
        remote = %meta.remote_addr,
        "client disconnected"
    );
}

/// Writes queued replies and a ping every [`WS_PING_PERIOD`]. Stops on
/// cancellation or the first failed write, closing the sink either way.
async fn write_pump<S>(
    mut sink: S,
    mut outbox: mpsc::Receiver<WsMessage>,
    cancel: CancellationToken,
) where
    S: Sink<WsMessage, Error = tungstenite::Error> + Send + Unpin,
{
    let mut keepalive = tokio::time::interval(WS_PING_PERIOD);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = keepalive.tick() => WsMessage::Ping(Vec::new().into()),
            next = outbox.recv() => match next {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = sink.send(frame).await {
            tracing::warn!("connection write failed: {e}");
            cancel.cancel();
            break;
        }
    }

    let _ = sink.close().await;
}

/// Reads frames until the peer closes, errors, or stays silent for
/// [`WS_PONG_WAIT`]. Frame size limits are enforced by the WebSocket config.
async fn read_pump<S, H>(
    mut inbound: S,
    sender: &Sender,
    handler: &Arc<H>,
    cancel: &CancellationToken,
) where
    S: Stream<Item = WsResult<WsMessage>> + Unpin,
    H: Handler,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            () = &mut deadline => {
                tracing::warn!("read deadline expired, closing connection");
                break;
            }
            next = inbound.next() => match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    tracing::warn!("connection read failed: {e}");
                    break;
                }
                None => break,
            },
        };
        deadline.as_mut().reset(Instant::now() + WS_PONG_WAIT);

        match frame {
            WsMessage::Text(text) => match serde_json::from_str::<Message>(&text) {
                Ok(msg) => spawn_request(handler, sender, msg),
                Err(e) => tracing::warn!("dropping malformed message: {e}"),
            },
            // Without a parsed header there is no request id to answer; the
            // client times out and retries.
            WsMessage::Binary(data) => match parse_chunk_frame(&data) {
                Ok(frame) => {
                    let h = Arc::clone(handler);
                    let s = sender.clone();
                    tokio::spawn(async move { h.on_upload_chunk(s, frame).await });
                }
                Err(e) => tracing::warn!("dropping malformed chunk frame: {e}"),
            },
            WsMessage::Ping(payload) => {
                let _ = sender.tx.try_send(WsMessage::Pong(payload));
            }
            WsMessage::Close(_) => {
                tracing::debug!("client sent close");
                break;
            }
            WsMessage::Pong(_) | WsMessage::Frame(_) => {}
        }
    }
}

/// Hands a request to the matching handler method on a fresh task.
fn spawn_request<H: Handler>(handler: &Arc<H>, sender: &Sender, msg: Message) {
    let h = Arc::clone(handler);
    let s = sender.clone();
    tokio::spawn(async move {
        match msg.msg_type {
            MessageType::Ping => h.on_ping(s, msg).await,
            MessageType::InitUpload => h.on_init_upload(s, msg).await,
            MessageType::UploadStatus => h.on_upload_status(s, msg).await,
            MessageType::CompleteUpload => h.on_complete_upload(s, msg).await,
            ref other => {
                tracing::warn!(msg_type = ?other, "unsupported request type");
                let _ = s.send_error(&msg, ERR_NOT_IMPLEMENTED, "unknown message type");
            }
        }
    });
}
