use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::status::{StatusFetchError, StatusPayload};
use crate::transport::{
    ChatReply, ChatRequest, ChatTransport, StatusRequest, TransportError, TransportResult,
};

pub(crate) enum Script {
    Reply(ChatReply),
    Fail(String),
    /// Stays pending until the cancellation token fires.
    AwaitCancel,
    /// Waits for the gate, watching the token meanwhile.
    Gate(oneshot::Receiver<ChatReply>),
    /// Waits for the gate and never looks at the token.
    IgnoreCancel(oneshot::Receiver<ChatReply>),
}

impl Script {
    pub(crate) fn reply(reply: &str) -> Self {
        Self::Reply(ChatReply::new(reply))
    }

    pub(crate) fn fail(body: &str) -> Self {
        Self::Fail(body.to_string())
    }
}

/// In-memory transport keyed by message text. Unscripted messages are echoed back.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    chat: Mutex<HashMap<String, Script>>,
    statuses: Mutex<VecDeque<StatusPayload>>,
    chat_requests: Mutex<Vec<ChatRequest>>,
    status_requests: Mutex<Vec<StatusRequest>>,
    status_gate: Mutex<Option<oneshot::Receiver<StatusPayload>>>,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(&self, message: &str, script: Script) {
        self.chat.lock().unwrap().insert(message.to_string(), script);
    }

    pub(crate) fn script_gated(&self, message: &str) -> oneshot::Sender<ChatReply> {
        let (tx, rx) = oneshot::channel();
        self.script(message, Script::Gate(rx));
        tx
    }

    pub(crate) fn script_ignoring_cancel(&self, message: &str) -> oneshot::Sender<ChatReply> {
        let (tx, rx) = oneshot::channel();
        self.script(message, Script::IgnoreCancel(rx));
        tx
    }

    /// The next status request waits for the returned sender instead of the queue.
    pub(crate) fn script_status_gated(&self) -> oneshot::Sender<StatusPayload> {
        let (tx, rx) = oneshot::channel();
        *self.status_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub(crate) fn push_status(&self, payload: StatusPayload) {
        self.statuses.lock().unwrap().push_back(payload);
    }

    pub(crate) fn chat_requests(&self) -> Vec<ChatRequest> {
        self.chat_requests.lock().unwrap().clone()
    }

    pub(crate) fn status_requests(&self) -> Vec<StatusRequest> {
        self.status_requests.lock().unwrap().clone()
    }

    pub(crate) fn tokens(&self) -> Vec<CancellationToken> {
        self.tokens.lock().unwrap().clone()
    }
}

fn cancelled() -> TransportError {
    TransportError::Cancelled {
        stage: "scripted-transport",
    }
}

impl ChatTransport for ScriptedTransport {
    fn post_chat<'a>(
        &'a self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, TransportResult<ChatReply>> {
        let script = self.chat.lock().unwrap().remove(&request.message);
        self.tokens.lock().unwrap().push(cancel.clone());
        let echo = format!("echo: {}", request.message);
        self.chat_requests.lock().unwrap().push(request);

        async move {
            match script {
                None => Ok(ChatReply::new(echo)),
                Some(Script::Reply(reply)) => Ok(reply),
                Some(Script::Fail(body)) => Err(TransportError::BackendStatus {
                    stage: "scripted-transport",
                    endpoint: "scripted://chat".to_string(),
                    status: 500,
                    body,
                }),
                Some(Script::AwaitCancel) => {
                    cancel.cancelled().await;
                    Err(cancelled())
                }
                Some(Script::Gate(gate)) => tokio::select! {
                    _ = cancel.cancelled() => Err(cancelled()),
                    reply = gate => reply.map_err(|_| cancelled()),
                },
                Some(Script::IgnoreCancel(gate)) => gate.await.map_err(|_| cancelled()),
            }
        }
        .boxed()
    }

    fn post_status<'a>(&'a self, request: StatusRequest) -> BoxFuture<'a, StatusPayload> {
        self.status_requests.lock().unwrap().push(request);
        if let Some(gate) = self.status_gate.lock().unwrap().take() {
            return async move {
                gate.await
                    .unwrap_or_else(|_| StatusPayload::Failed(StatusFetchError::new("status gate dropped")))
            }
            .boxed();
        }
        let payload = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| StatusPayload::Failed(StatusFetchError::new("no scripted status")));
        futures::future::ready(payload).boxed()
    }
}
