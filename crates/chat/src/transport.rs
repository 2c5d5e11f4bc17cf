use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use tokio_util::sync::CancellationToken;

use super::session::SessionId;
use super::status::StatusPayload;

/// Body of one chat exchange with the form backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub chat_id: SessionId,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, chat_id: SessionId) -> Self {
        Self {
            message: message.into(),
            chat_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

impl ChatReply {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            done: None,
        }
    }

    pub fn with_done(mut self, done: bool) -> Self {
        self.done = Some(done);
        self
    }

    pub fn is_done(&self) -> bool {
        self.done.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRequest {
    pub chat_id: SessionId,
}

impl StatusRequest {
    pub fn new(chat_id: SessionId) -> Self {
        Self { chat_id }
    }
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("transport observed cancellation on `{stage}`"))]
    Cancelled { stage: &'static str },
    #[snafu(display("request to {endpoint} failed on `{stage}`, {source}"))]
    Network {
        stage: &'static str,
        endpoint: String,
        source: BoxError,
    },
    #[snafu(display("backend {endpoint} returned status {status}: {body}"))]
    BackendStatus {
        stage: &'static str,
        endpoint: String,
        status: u16,
        body: String,
    },
    #[snafu(display("backend {endpoint} sent an unusable reply: {details}"))]
    InvalidReply {
        stage: &'static str,
        endpoint: String,
        details: String,
    },
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Request/response capability the core talks through.
///
/// `post_chat` should watch `cancel` and resolve with [`TransportError::Cancelled`] once it
/// fires. `post_status` never fails; problems come back as [`StatusPayload::Failed`].
pub trait ChatTransport: Send + Sync {
    fn post_chat<'a>(
        &'a self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, TransportResult<ChatReply>>;

    fn post_status<'a>(&'a self, request: StatusRequest) -> BoxFuture<'a, StatusPayload>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_uses_backend_field_names() {
        let request = ChatRequest::new("Hello", SessionId::parse("S1").unwrap());
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, serde_json::json!({ "message": "Hello", "chat_id": "S1" }));
    }

    #[test]
    fn reply_without_done_flag_is_not_done() {
        let reply: ChatReply = serde_json::from_str(r#"{"reply":"Hi there"}"#).unwrap();
        assert_eq!(reply, ChatReply::new("Hi there"));
        assert!(!reply.is_done());

        let reply: ChatReply = serde_json::from_str(r#"{"reply":"Thanks","done":true}"#).unwrap();
        assert!(reply.is_done());
    }
}
