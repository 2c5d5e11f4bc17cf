use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use snafu::ensure;
use tokio::sync::broadcast;

use crate::error::{ChatError, ChatResult, SessionActiveSnafu};
use crate::events::{ChatEvent, DEFAULT_EVENT_CAPACITY, EventBus, RequestOutcome};
use crate::message::{ChatMessage, MessageHistory};
use crate::request::{Completion, RequestController, RequestId, RequestState};
use crate::session::SessionId;
use crate::status::{ChatStatus, StatusPayload, StatusTracker};
use crate::transport::{ChatReply, ChatRequest, ChatTransport, StatusRequest};

pub const DEFAULT_WELCOME_MESSAGE: &str = "Welcome to the chat! How can I assist you today?";
pub const DEFAULT_CANCELLED_NOTE: &str = "Request cancelled.";
pub const FAILURE_NOTE_PREFIX: &str = "Chat backend error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCoreConfig {
    /// Seeded as a `system` entry whenever a session starts on an empty transcript.
    pub welcome_message: Option<String>,
    pub cancelled_note: String,
    pub event_capacity: usize,
}

impl Default for ChatCoreConfig {
    fn default() -> Self {
        Self {
            welcome_message: Some(DEFAULT_WELCOME_MESSAGE.to_string()),
            cancelled_note: DEFAULT_CANCELLED_NOTE.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ChatCoreConfig {
    pub fn with_welcome_message(mut self, welcome_message: impl Into<String>) -> Self {
        let welcome_message = welcome_message.into();
        self.welcome_message = if welcome_message.trim().is_empty() {
            None
        } else {
            Some(welcome_message)
        };
        self
    }

    pub fn without_welcome_message(mut self) -> Self {
        self.welcome_message = None;
        self
    }

    pub fn with_cancelled_note(mut self, cancelled_note: impl Into<String>) -> Self {
        self.cancelled_note = cancelled_note.into();
        self
    }

    pub fn with_event_capacity(mut self, event_capacity: usize) -> Self {
        self.event_capacity = event_capacity;
        self
    }
}

struct CoreInner {
    transport: Arc<dyn ChatTransport>,
    config: ChatCoreConfig,
    session: RefCell<Option<SessionId>>,
    history: RefCell<MessageHistory>,
    status: RefCell<StatusTracker>,
    requests: RequestController,
    loading: Cell<bool>,
    done: Cell<bool>,
    // Bumped by `clear`; settlements from an older epoch no longer touch state.
    epoch: Cell<u64>,
    events: EventBus,
}

/// Orchestrates one conversation: session id, transcript, backend status and the
/// single-flight chat request.
///
/// Cloning yields another handle to the same conversation. The handle is `!Send`; drive it from
/// one thread (a current-thread runtime or a `LocalSet`). Shared state is only borrowed between
/// awaits, so overlapping `send_message`/`poll_status` calls interleave safely.
#[derive(Clone)]
pub struct ChatCore {
    inner: Rc<CoreInner>,
}

impl ChatCore {
    /// Creates the core and starts a fresh session.
    pub fn new(transport: Arc<dyn ChatTransport>, config: ChatCoreConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let core = Self {
            inner: Rc::new(CoreInner {
                transport,
                config,
                session: RefCell::new(None),
                history: RefCell::new(MessageHistory::new()),
                status: RefCell::new(StatusTracker::new()),
                requests: RequestController::new(),
                loading: Cell::new(false),
                done: Cell::new(false),
                epoch: Cell::new(0),
                events,
            }),
        };
        core.ensure_session();
        core
    }

    pub fn config(&self) -> &ChatCoreConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.session.borrow().clone()
    }

    /// Returns the active session id, generating one if the previous session was cleared.
    pub fn ensure_session(&self) -> SessionId {
        if let Some(session_id) = self.session_id() {
            return session_id;
        }

        let session_id = SessionId::generate();
        self.install_session(session_id.clone());
        session_id
    }

    /// Uses an externally supplied session id. Only valid while no session is active.
    pub fn adopt_session(&self, session_id: SessionId) -> ChatResult<()> {
        if let Some(current) = self.session_id() {
            ensure!(
                current == session_id,
                SessionActiveSnafu {
                    stage: "adopt-session",
                    current,
                }
            );
            return Ok(());
        }

        self.install_session(session_id);
        Ok(())
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.inner.history.borrow().messages().to_vec()
    }

    pub fn with_history<R>(&self, read: impl FnOnce(&MessageHistory) -> R) -> R {
        read(&self.inner.history.borrow())
    }

    pub fn last_message(&self) -> Option<ChatMessage> {
        self.inner.history.borrow().last().cloned()
    }

    pub fn status(&self) -> Option<ChatStatus> {
        self.inner.status.borrow().get().cloned()
    }

    /// `None` while the backend phase is unknown.
    pub fn phase(&self) -> Option<String> {
        self.inner.status.borrow().phase().map(str::to_string)
    }

    pub fn is_loading(&self) -> bool {
        self.inner.loading.get()
    }

    /// True once the backend reported the form as finished.
    pub fn is_done(&self) -> bool {
        self.inner.done.get()
    }

    pub fn request_state(&self) -> RequestState {
        self.inner.requests.state()
    }

    pub fn replace_history(&self, messages: Vec<ChatMessage>) {
        let len = messages.len();
        self.inner.history.borrow_mut().replace(messages);
        tracing::debug!(len, "history replaced");
        self.inner.events.emit(ChatEvent::HistoryReplaced { len });
    }

    /// Sends `text` to the backend, preempting any request still in flight.
    ///
    /// The user entry is recorded before the request leaves. On settlement the transcript gains
    /// the assistant reply, or a `system` note for cancellation and failure, and the outcome is
    /// returned to the caller as well.
    pub async fn send_message(&self, text: impl Into<String>) -> ChatResult<ChatReply> {
        let text = text.into();
        let chat_id = self.ensure_session();
        let epoch = self.inner.epoch.get();

        tracing::info!(session_id = %chat_id, chars = text.chars().count(), "sending chat message");
        self.append(ChatMessage::user(text.clone()));
        self.set_loading(true);
        let _loading = LoadingGuard { core: self };

        let outcome = self
            .inner
            .requests
            .issue(ChatRequest::new(text, chat_id), self.inner.transport.as_ref())
            .await;

        if self.inner.epoch.get() != epoch {
            // The conversation was cleared while this request was in flight.
            tracing::debug!(
                request_id = ?outcome.as_ref().map_or_else(
                    ChatError::request_id,
                    |completion| Some(completion.request_id)
                ),
                "dropping settlement of a cleared conversation"
            );
            return outcome.map(|completion| completion.reply);
        }

        let result = match outcome {
            Ok(Completion { request_id, reply }) => {
                let mut message = ChatMessage::assistant(reply.reply.clone());
                if let Some(phase) = self.phase() {
                    message = message.with_phase(phase);
                }
                self.append(message);
                if reply.is_done() {
                    self.inner.done.set(true);
                }
                self.settled(request_id, RequestOutcome::Succeeded);
                Ok(reply)
            }
            Err(error) => {
                let outcome = RequestOutcome::from(&error);
                let note = match outcome {
                    RequestOutcome::Cancelled => self.inner.config.cancelled_note.clone(),
                    _ => format!("{FAILURE_NOTE_PREFIX}: {error}"),
                };
                self.append(ChatMessage::system(note));
                if let Some(request_id) = error.request_id() {
                    self.settled(request_id, outcome);
                }
                Err(error)
            }
        };

        result
    }

    /// Cancels the in-flight chat request, if any. Returns whether something was cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self.inner.requests.cancel().is_some();
        self.sync_loading();
        cancelled
    }

    /// Drops the transcript, status, pending request and session id.
    pub fn clear(&self) {
        self.inner.epoch.set(self.inner.epoch.get().wrapping_add(1));
        self.inner.requests.cancel();

        self.inner.history.borrow_mut().clear();
        self.inner.events.emit(ChatEvent::HistoryCleared);
        self.set_status(None);

        let previous = self.inner.session.borrow_mut().take();
        if previous.is_some() {
            self.inner.events.emit(ChatEvent::SessionChanged(None));
        }

        self.inner.done.set(false);
        self.sync_loading();
        tracing::info!(session_id = ?previous.map(String::from), "conversation cleared");
    }

    /// Fetches the backend status for `chat_id` and stores it when it is usable.
    ///
    /// Never raises: failures come back as [`StatusPayload::Failed`] and leave the last known
    /// status in place. Runs independently of any pending chat request.
    pub async fn poll_status(&self, chat_id: &SessionId) -> StatusPayload {
        let epoch = self.inner.epoch.get();
        tracing::debug!(session_id = %chat_id, "polling form status");

        let payload = self
            .inner
            .transport
            .post_status(StatusRequest::new(chat_id.clone()))
            .await;

        match &payload {
            StatusPayload::Status(status) if self.inner.epoch.get() == epoch => {
                self.set_status(Some(status.clone()));
            }
            StatusPayload::Status(_) => {
                tracing::debug!(session_id = %chat_id, "ignoring status for a cleared conversation");
            }
            StatusPayload::Failed(failure) => {
                tracing::warn!(
                    session_id = %chat_id,
                    message = %failure.message,
                    details = ?failure.details,
                    "status poll failed"
                );
            }
        }

        payload
    }

    /// Polls the status of the active session. `None` when no session is active.
    pub async fn refresh_status(&self) -> Option<StatusPayload> {
        let session_id = self.session_id()?;
        Some(self.poll_status(&session_id).await)
    }

    fn install_session(&self, session_id: SessionId) {
        tracing::info!(session_id = %session_id, "session started");
        *self.inner.session.borrow_mut() = Some(session_id.clone());
        self.inner
            .events
            .emit(ChatEvent::SessionChanged(Some(session_id)));

        let seed_welcome = self.inner.history.borrow().is_empty();
        if let Some(welcome) = self.inner.config.welcome_message.clone().filter(|_| seed_welcome) {
            self.append(ChatMessage::system(welcome));
        }
    }

    fn append(&self, message: ChatMessage) {
        tracing::debug!(role = message.role.as_str(), "message added");
        self.inner.history.borrow_mut().append(message.clone());
        self.inner.events.emit(ChatEvent::MessageAppended(message));
    }

    fn set_status(&self, status: Option<ChatStatus>) {
        tracing::debug!(phase = ?status.as_ref().map(|status| status.phase.as_str()), "status set");
        self.inner.status.borrow_mut().set(status.clone());
        self.inner.events.emit(ChatEvent::StatusChanged(status));
    }

    fn set_loading(&self, loading: bool) {
        if self.inner.loading.replace(loading) != loading {
            self.inner.events.emit(ChatEvent::LoadingChanged(loading));
        }
    }

    fn sync_loading(&self) {
        self.set_loading(self.inner.requests.is_pending());
    }

    fn settled(&self, request_id: RequestId, outcome: RequestOutcome) {
        self.inner.events.emit(ChatEvent::RequestSettled {
            request_id,
            outcome,
        });
    }
}

/// Resyncs the loading flag when `send_message` exits, including when its future is dropped.
struct LoadingGuard<'a> {
    core: &'a ChatCore,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.core.sync_loading();
    }
}

impl std::fmt::Debug for ChatCore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ChatCore")
            .field("session", &self.inner.session.borrow())
            .field("messages", &self.inner.history.borrow().len())
            .field("status", &self.inner.status.borrow().get())
            .field("request_state", &self.inner.requests.state())
            .finish()
    }
}

impl From<&ChatError> for RequestOutcome {
    fn from(error: &ChatError) -> Self {
        if error.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Failed
        }
    }
}
