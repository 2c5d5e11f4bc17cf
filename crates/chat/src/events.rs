use tokio::sync::broadcast;

use crate::message::ChatMessage;
use crate::request::RequestId;
use crate::session::SessionId;
use crate::status::ChatStatus;

pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// How a chat request ended, as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// State change notifications emitted by [`crate::ChatCore`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    SessionChanged(Option<SessionId>),
    MessageAppended(ChatMessage),
    HistoryReplaced { len: usize },
    HistoryCleared,
    StatusChanged(Option<ChatStatus>),
    LoadingChanged(bool),
    RequestSettled {
        request_id: RequestId,
        outcome: RequestOutcome,
    },
}

/// Fan-out side of the observer interface.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<ChatEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}
