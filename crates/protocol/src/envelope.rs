use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::MessageType;

/// Body of an `error` message: a numeric code plus a human-readable reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("error {code}: {message}")]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

/// Envelope for every text frame: `{id, type, payload?, error?}`.
///
/// Responses reuse the request's `id`. The payload stays raw until the
/// receiver knows which type to decode it as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Message {
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.into(),
            msg_type,
            payload: payload.map(serde_json::value::to_raw_value).transpose()?,
            error: None,
        })
    }

    pub fn error(id: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            msg_type: MessageType::Error,
            payload: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }

    /// Decodes the payload as `T`; `Ok(None)` if there is none.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.payload
            .as_deref()
            .map(|raw| serde_json::from_str(raw.get()))
            .transpose()
    }

    /// A response to this message, carrying the same id.
    pub fn reply<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Message::new(self.id.clone(), msg_type, payload)
    }

    /// An error response to this message, carrying the same id.
    pub fn reply_error(&self, code: i32, message: impl Into<String>) -> Self {
        Message::error(self.id.clone(), code, message)
    }

    /// Splits a response into success or the error it carries.
    pub fn into_result(self) -> Result<Self, ErrorBody> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{InitUploadRequest, UploadStatusRequest};

    #[test]
    fn payload_is_embedded_verbatim() {
        let req = UploadStatusRequest {
            upload_id: "u-42".into(),
        };
        let msg = Message::new("m-1", MessageType::UploadStatus, Some(&req)).unwrap();
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"id":"m-1","type":"upload_status","payload":{"uploadId":"u-42"}}"#
        );

        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.parse_payload::<UploadStatusRequest>().unwrap(), Some(req));
    }

    #[test]
    fn absent_payload_parses_as_none() {
        let msg: Message = serde_json::from_str(r#"{"id":"p","type":"ping"}"#).unwrap();
        assert!(msg.payload.is_none());
        assert_eq!(msg.parse_payload::<InitUploadRequest>().unwrap(), None);
    }

    #[test]
    fn payload_of_wrong_shape_is_an_error() {
        let msg: Message =
            serde_json::from_str(r#"{"id":"x","type":"init_upload","payload":{"filename":7}}"#)
                .unwrap();
        assert!(msg.parse_payload::<InitUploadRequest>().is_err());
    }

    #[test]
    fn replies_keep_the_request_id() {
        let req = Message::new::<()>("req-42", MessageType::Ping, None).unwrap();

        let ok = req.reply::<()>(MessageType::Pong, None).unwrap();
        assert_eq!((ok.id.as_str(), &ok.msg_type), ("req-42", &MessageType::Pong));

        let err = req.reply_error(422, "missing chunks [3]");
        assert_eq!(err.id, "req-42");
        assert_eq!(err.msg_type, MessageType::Error);
        assert!(serde_json::to_string(&err).unwrap().contains(r#""code":422"#));
    }

    #[test]
    fn into_result_surfaces_the_error_body() {
        let err = Message::error("e-1", 404, "upload session not found")
            .into_result()
            .unwrap_err();
        assert_eq!(err.code, 404);
        assert_eq!(err.to_string(), "error 404: upload session not found");

        let ok = Message::new::<()>("e-2", MessageType::Pong, None).unwrap();
        assert!(ok.into_result().is_ok());
    }
}
