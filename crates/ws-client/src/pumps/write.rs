//! Outbound half of the connection: queued frames plus keepalive pings.

use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Owns the sink. Frames from `outbox` are written in order, and a ping goes
/// out every `ping_period` so the server's read deadline never expires on an
/// idle client. A failed write cancels `cancel`; cancellation sends a close
/// frame on the way out.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut outbox: mpsc::Receiver<tungstenite::Message>,
    ping_period: Duration,
    cancel: CancellationToken,
) where
    S: Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let start = tokio::time::Instant::now() + ping_period;
    let mut keepalive = tokio::time::interval_at(start, ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = keepalive.tick() => tungstenite::Message::Ping(Vec::new().into()),
            next = outbox.recv() => match next {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = sink.send(frame).await {
            warn!("websocket write failed: {e}");
            cancel.cancel();
            return;
        }
    }

    debug!("write pump stopping, sending close");
    let _ = sink.send(tungstenite::Message::Close(None)).await;
}
