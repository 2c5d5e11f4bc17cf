use snafu::Snafu;

use super::request::RequestId;
use super::session::SessionId;
use super::transport::TransportError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    /// The request was superseded by a newer send or cancelled explicitly.
    #[snafu(display("chat request {request_id} was cancelled on `{stage}`"))]
    Cancelled {
        stage: &'static str,
        request_id: RequestId,
    },
    #[snafu(display("chat request {request_id} failed on `{stage}`, {source}"))]
    Transport {
        stage: &'static str,
        request_id: RequestId,
        source: TransportError,
    },
    #[snafu(display("session id '{raw}' is blank"))]
    InvalidSessionId { stage: &'static str, raw: String },
    #[snafu(display("session {current} is still active; clear it before adopting another"))]
    SessionActive {
        stage: &'static str,
        current: SessionId,
    },
}

impl ChatError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Cancelled { request_id, .. } | Self::Transport { request_id, .. } => {
                Some(*request_id)
            }
            Self::InvalidSessionId { .. } | Self::SessionActive { .. } => None,
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
