//! WebSocket server for the chunkup upload service.
//!
//! Accepts any number of client connections, dispatches JSON requests and
//! binary chunk frames to a [`Handler`], and manages each connection's
//! lifecycle (ping/pong, graceful shutdown).

mod connection;
mod handler;
mod server;

pub use connection::{ConnectionMeta, SendError, Sender};
pub use handler::{Handler, HandlerFuture, UploadHandler};
pub use server::{ServerConfig, UploadServer};

/// Send buffer capacity per connection.
///
/// Every chunk gets a response, and a client may have many chunks in flight
/// across its workers.
pub const SEND_BUFFER_SIZE: usize = 2048;

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
