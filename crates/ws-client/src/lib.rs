//! Clients for the chunkup upload API.
//!
//! [`WsUploadClient`] talks to a `chunkup-ws-server` over WebSocket;
//! [`LocalUploadClient`] calls an in-process service. Both implement
//! [`chunkup_transfer::UploadApi`], so the transfer scheduler drives either.

pub mod local;
mod pumps;
pub mod ws_client;

pub use local::LocalUploadClient;
pub use ws_client::{ClientConfig, WsError, WsUploadClient};
