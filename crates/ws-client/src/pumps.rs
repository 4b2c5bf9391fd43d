//! Background tasks owned by a [`WsUploadClient`](crate::WsUploadClient).

pub(crate) mod read;
pub(crate) mod write;
