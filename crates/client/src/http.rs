use formchat::status::{STATUS_FETCH_FAILED_MESSAGE, StatusFetchError, StatusPayload};
use formchat::transport::{
    BackendStatusSnafu, CancelledSnafu, ChatReply, ChatRequest, ChatTransport, InvalidReplySnafu,
    NetworkSnafu, StatusRequest, TransportResult,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::{Client, Url};
use snafu::{IntoError, ResultExt};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::{BuildClientSnafu, ClientResult};

/// JSON-over-HTTP transport for the form chat backend.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    chat_endpoint: Url,
    status_endpoint: Url,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let chat_endpoint = config.chat_url()?;
        let status_endpoint = config.status_endpoint()?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "build-http-client",
            })?;

        tracing::debug!(
            chat_endpoint = %chat_endpoint,
            status_endpoint = %status_endpoint,
            "http transport ready"
        );
        Ok(Self {
            client,
            chat_endpoint,
            status_endpoint,
        })
    }

    pub fn chat_endpoint(&self) -> &Url {
        &self.chat_endpoint
    }

    pub fn status_endpoint(&self) -> &Url {
        &self.status_endpoint
    }

    async fn exchange_chat(&self, request: &ChatRequest) -> TransportResult<ChatReply> {
        let body = self
            .post_json(&self.chat_endpoint, request, "chat")
            .await?;

        serde_json::from_slice::<ChatReply>(&body).map_err(|source| {
            InvalidReplySnafu {
                stage: "decode-chat-reply",
                endpoint: self.chat_endpoint.as_str(),
                details: source.to_string(),
            }
            .build()
        })
    }

    async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        endpoint: &Url,
        payload: &T,
        kind: &'static str,
    ) -> TransportResult<Vec<u8>> {
        let response = self
            .client
            .post(endpoint.clone())
            .json(payload)
            .send()
            .await
            .map_err(|source| {
                NetworkSnafu {
                    stage: "send-request",
                    endpoint: endpoint.as_str(),
                }
                .into_error(Box::new(source))
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|source| {
            NetworkSnafu {
                stage: "read-response",
                endpoint: endpoint.as_str(),
            }
            .into_error(Box::new(source))
        })?;

        if !status.is_success() {
            tracing::warn!(endpoint = %endpoint, status = status.as_u16(), kind, "backend rejected request");
            return BackendStatusSnafu {
                stage: "check-http-status",
                endpoint: endpoint.as_str(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }
            .fail();
        }

        Ok(body.to_vec())
    }
}

impl ChatTransport for HttpTransport {
    fn post_chat<'a>(
        &'a self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, TransportResult<ChatReply>> {
        async move {
            tracing::debug!(chat_id = %request.chat_id, endpoint = %self.chat_endpoint, "posting chat message");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => CancelledSnafu { stage: "post-chat" }.fail(),
                outcome = self.exchange_chat(&request) => outcome,
            }
        }
        .boxed()
    }

    fn post_status<'a>(&'a self, request: StatusRequest) -> BoxFuture<'a, StatusPayload> {
        async move {
            match self.post_json(&self.status_endpoint, &request, "status").await {
                Ok(body) => StatusPayload::from_slice(&body),
                Err(error) => {
                    tracing::warn!(chat_id = %request.chat_id, error = %error, "status request failed");
                    StatusPayload::Failed(
                        StatusFetchError::new(STATUS_FETCH_FAILED_MESSAGE)
                            .with_details(error.to_string()),
                    )
                }
            }
        }
        .boxed()
    }
}
