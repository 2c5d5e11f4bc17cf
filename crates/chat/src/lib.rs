//! Client-side core of a form-filling chat.
//!
//! [`ChatCore`] ties together:
//! - the session id sent with every request
//! - the ordered transcript
//! - the last backend status snapshot
//! - a single-flight chat request that newer sends preempt
//!
//! The network side is abstracted behind [`ChatTransport`]; see the `formchat-client` crate for
//! the HTTP implementation.
#![deny(unsafe_code)]

pub mod error;
pub mod events;
pub mod interaction;
pub mod message;
pub mod request;
pub mod session;
pub mod status;
pub mod transport;

#[cfg(test)]
mod testing;

pub use error::{ChatError, ChatResult};
pub use events::{ChatEvent, RequestOutcome};
pub use interaction::{
    ChatCore, ChatCoreConfig, DEFAULT_CANCELLED_NOTE, DEFAULT_WELCOME_MESSAGE, FAILURE_NOTE_PREFIX,
};
pub use message::{ChatMessage, MessageHistory, Role};
pub use request::{
    Completion, RequestController, RequestId, RequestState, RequestTransition,
    RequestTransitionRejection,
};
pub use session::{SESSION_ID_PREFIX, SessionId};
pub use status::{
    ChatStatus, INVALID_STATUS_PAYLOAD_MESSAGE, STATUS_FETCH_FAILED_MESSAGE, StatusFetchError,
    StatusPayload, StatusTracker,
};
pub use transport::{
    BoxError, ChatReply, ChatRequest, ChatTransport, StatusRequest, TransportError,
    TransportResult,
};
