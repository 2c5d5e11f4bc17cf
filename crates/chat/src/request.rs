use std::cell::{Cell, RefCell};
use std::fmt;

use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use super::error::{CancelledSnafu, ChatResult, TransportSnafu};
use super::transport::{ChatReply, ChatRequest, ChatTransport};

/// Identifier of one logical chat exchange, unique per controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// Reply of a request that settled successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub request_id: RequestId,
    pub reply: ChatReply,
}

/// Lifecycle of the most recent chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Idle,
    Pending(RequestId),
    Succeeded(RequestId),
    Failed(RequestId),
    Cancelled(RequestId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTransition {
    Start(RequestId),
    Complete(RequestId),
    Fail(RequestId),
    Cancel(RequestId),
    ResetToIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTransitionRejection {
    AlreadyPending {
        active: RequestId,
        attempted: RequestId,
    },
    NotIdle {
        state: RequestState,
    },
    NoActiveRequest,
    RequestMismatch {
        active: RequestId,
        attempted: RequestId,
    },
}

pub type RequestTransitionResult = Result<RequestState, RequestTransitionRejection>;

impl RequestState {
    pub fn pending_request(&self) -> Option<RequestId> {
        match self {
            Self::Pending(request_id) => Some(*request_id),
            Self::Idle | Self::Succeeded(_) | Self::Failed(_) | Self::Cancelled(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded(_) | Self::Failed(_) | Self::Cancelled(_)
        )
    }

    /// Applies one transition deterministically.
    ///
    /// Only `Idle` may start a request. Terminal transitions must name the pending request
    /// exactly, so a superseded request settling late is rejected instead of clobbering the
    /// state of its successor.
    pub fn apply(&self, transition: RequestTransition) -> RequestTransitionResult {
        match transition {
            RequestTransition::Start(request_id) => self.apply_start(request_id),
            RequestTransition::Complete(request_id) => {
                self.apply_terminal(request_id, RequestState::Succeeded(request_id))
            }
            RequestTransition::Fail(request_id) => {
                self.apply_terminal(request_id, RequestState::Failed(request_id))
            }
            RequestTransition::Cancel(request_id) => {
                self.apply_terminal(request_id, RequestState::Cancelled(request_id))
            }
            RequestTransition::ResetToIdle => match self {
                Self::Pending(active) => Err(RequestTransitionRejection::AlreadyPending {
                    active: *active,
                    attempted: *active,
                }),
                _ => Ok(Self::Idle),
            },
        }
    }

    fn apply_start(&self, request_id: RequestId) -> RequestTransitionResult {
        match self {
            Self::Idle => Ok(Self::Pending(request_id)),
            Self::Pending(active) => Err(RequestTransitionRejection::AlreadyPending {
                active: *active,
                attempted: request_id,
            }),
            Self::Succeeded(_) | Self::Failed(_) | Self::Cancelled(_) => {
                Err(RequestTransitionRejection::NotIdle { state: *self })
            }
        }
    }

    fn apply_terminal(&self, request_id: RequestId, next: RequestState) -> RequestTransitionResult {
        match self {
            Self::Pending(active) if *active == request_id => Ok(next),
            Self::Pending(active) => Err(RequestTransitionRejection::RequestMismatch {
                active: *active,
                attempted: request_id,
            }),
            Self::Idle | Self::Succeeded(_) | Self::Failed(_) | Self::Cancelled(_) => {
                Err(RequestTransitionRejection::NoActiveRequest)
            }
        }
    }
}

#[derive(Debug)]
struct LiveRequest {
    id: RequestId,
    token: CancellationToken,
}

/// Single-flight owner of outbound chat requests.
///
/// At most one request is live. Issuing a new one signals the previous token and forgets it
/// without waiting for it to settle. Meant for a single-threaded executor: state sits in
/// `Cell`/`RefCell` and is never borrowed across an await.
#[derive(Debug, Default)]
pub struct RequestController {
    live: RefCell<Option<LiveRequest>>,
    state: Cell<RequestState>,
    next_id: Cell<u64>,
}

impl RequestController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RequestState {
        self.state.get()
    }

    pub fn is_pending(&self) -> bool {
        self.live.borrow().is_some()
    }

    pub fn live_request(&self) -> Option<RequestId> {
        self.live.borrow().as_ref().map(|live| live.id)
    }

    /// Sends `request` through `transport`, preempting whatever request is still pending.
    pub async fn issue(
        &self,
        request: ChatRequest,
        transport: &dyn ChatTransport,
    ) -> ChatResult<Completion> {
        let (request_id, token) = self.begin();
        let mut guard = LiveGuard {
            controller: self,
            request_id,
            token: token.clone(),
            settled: false,
        };

        tracing::debug!(
            request_id = %request_id,
            chat_id = %request.chat_id,
            "chat request pending"
        );

        let outcome = transport.post_chat(request, token.clone()).await;
        guard.settled = true;

        if token.is_cancelled() {
            // The transport may ignore the signal and still produce a result; drop it.
            if outcome.is_ok() {
                tracing::debug!(
                    request_id = %request_id,
                    "discarding reply that settled after cancellation"
                );
            }
            self.transition(RequestTransition::Cancel(request_id));
            return CancelledSnafu {
                stage: "issue-cancelled",
                request_id,
            }
            .fail();
        }

        match outcome {
            Ok(reply) => {
                self.transition(RequestTransition::Complete(request_id));
                tracing::debug!(request_id = %request_id, "chat request succeeded");
                Ok(Completion { request_id, reply })
            }
            Err(source) if source.is_cancelled() => {
                self.transition(RequestTransition::Cancel(request_id));
                CancelledSnafu {
                    stage: "issue-transport-cancelled",
                    request_id,
                }
                .fail()
            }
            Err(source) => {
                self.transition(RequestTransition::Fail(request_id));
                tracing::warn!(request_id = %request_id, error = %source, "chat request failed");
                Err(source).context(TransportSnafu {
                    stage: "issue-transport",
                    request_id,
                })
            }
        }
    }

    /// Signals and forgets the pending request. No-op when idle.
    pub fn cancel(&self) -> Option<RequestId> {
        let live = self.live.borrow_mut().take()?;
        live.token.cancel();
        self.transition(RequestTransition::Cancel(live.id));
        tracing::debug!(request_id = %live.id, "chat request cancelled");
        Some(live.id)
    }

    fn begin(&self) -> (RequestId, CancellationToken) {
        if let Some(previous) = self.live.borrow_mut().take() {
            previous.token.cancel();
            self.transition(RequestTransition::Cancel(previous.id));
            tracing::debug!(request_id = %previous.id, "preempted by a newer chat request");
        }

        let request_id = RequestId::new(self.next_id.get().saturating_add(1));
        self.next_id.set(request_id.0);

        self.transition(RequestTransition::ResetToIdle);
        self.transition(RequestTransition::Start(request_id));

        let token = CancellationToken::new();
        *self.live.borrow_mut() = Some(LiveRequest {
            id: request_id,
            token: token.clone(),
        });
        (request_id, token)
    }

    fn transition(&self, transition: RequestTransition) {
        match self.state.get().apply(transition) {
            Ok(next) => self.state.set(next),
            Err(rejection) => {
                // Late settlements of superseded requests land here.
                tracing::debug!(?transition, ?rejection, "request transition ignored");
            }
        }
    }

    fn release(&self, request_id: RequestId) {
        let mut live = self.live.borrow_mut();
        if live.as_ref().is_some_and(|live| live.id == request_id) {
            *live = None;
        }
    }
}

/// Clears the live slot on every exit path of `issue`, including a dropped caller.
struct LiveGuard<'a> {
    controller: &'a RequestController,
    request_id: RequestId,
    token: CancellationToken,
    settled: bool,
}

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.token.cancel();
            self.controller
                .transition(RequestTransition::Cancel(self.request_id));
        }
        self.controller.release(self.request_id);
    }
}
