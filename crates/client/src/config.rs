use std::time::Duration;

use reqwest::Url;
use snafu::ensure;

use crate::error::{ClientResult, InvalidEndpointSnafu, UnsupportedSchemeSnafu};

pub const DEFAULT_CHAT_ENDPOINT: &str = "http://localhost:8000/chat";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const STATUS_SEGMENT: &str = "status";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub chat_endpoint: String,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chat_endpoint: DEFAULT_CHAT_ENDPOINT.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn new(chat_endpoint: impl Into<String>) -> Self {
        Self {
            chat_endpoint: chat_endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn chat_url(&self) -> ClientResult<Url> {
        let endpoint = self.chat_endpoint.trim();
        let url = Url::parse(endpoint).map_err(|source| {
            InvalidEndpointSnafu {
                stage: "parse-chat-endpoint",
                endpoint,
                details: source.to_string(),
            }
            .build()
        })?;

        ensure!(
            matches!(url.scheme(), "http" | "https"),
            UnsupportedSchemeSnafu {
                stage: "check-chat-scheme",
                endpoint,
                scheme: url.scheme(),
            }
        );
        Ok(url)
    }

    /// The status URL: the chat URL with its final path segment replaced by `status`.
    ///
    /// A trailing slash counts as an empty final segment, so `/api/chat/` maps to
    /// `/api/chat/status`. Query and fragment are dropped.
    pub fn status_endpoint(&self) -> ClientResult<Url> {
        let mut url = self.chat_url()?;
        url.set_query(None);
        url.set_fragment(None);

        let endpoint = self.chat_endpoint.trim();
        url.path_segments_mut()
            .map_err(|()| {
                InvalidEndpointSnafu {
                    stage: "derive-status-endpoint",
                    endpoint,
                    details: "URL has no path segments".to_string(),
                }
                .build()
            })?
            .pop()
            .push(STATUS_SEGMENT);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;

    fn status_of(chat: &str) -> String {
        ClientConfig::new(chat).status_endpoint().unwrap().to_string()
    }

    #[test]
    fn status_endpoint_replaces_last_segment() {
        assert_eq!(
            status_of("https://forms.example.com/api/chat"),
            "https://forms.example.com/api/status"
        );
        assert_eq!(
            status_of("http://localhost:8000/chat?debug=1"),
            "http://localhost:8000/status"
        );
    }

    #[test]
    fn trailing_slash_is_an_empty_final_segment() {
        assert_eq!(
            status_of("http://localhost:8000/api/chat/"),
            "http://localhost:8000/api/chat/status"
        );
        assert_eq!(status_of("http://localhost:8000"), "http://localhost:8000/status");
    }

    #[test]
    fn rejects_unusable_endpoints() {
        assert!(matches!(
            ClientConfig::new("not a url").chat_url(),
            Err(ClientError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            ClientConfig::new("ftp://example.com/chat").status_endpoint(),
            Err(ClientError::UnsupportedScheme { .. })
        ));
    }
}
