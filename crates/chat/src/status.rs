use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Latest backend-reported state of the form-filling process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatStatus {
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
}

impl ChatStatus {
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            form_id: None,
            answers: None,
            receiver: None,
        }
    }

    pub fn with_form_id(mut self, form_id: impl Into<String>) -> Self {
        self.form_id = Some(form_id.into());
        self
    }

    pub fn with_answer(
        mut self,
        field: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.answers
            .get_or_insert_with(BTreeMap::new)
            .insert(field.into(), value.into());
        self
    }

    pub fn with_receiver(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }
}

pub const STATUS_FETCH_FAILED_MESSAGE: &str = "Could not fetch status";
pub const INVALID_STATUS_PAYLOAD_MESSAGE: &str = "invalid status payload";

/// Soft failure of a status poll, handed back as data rather than raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFetchError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl StatusFetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusPayload {
    Status(ChatStatus),
    Failed(StatusFetchError),
}

/// Body of the `{error: true, ...}` shape the status proxy answers with on failure.
#[derive(Default, Deserialize)]
struct FailureWire {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

impl StatusPayload {
    /// Decodes a status endpoint body. Only `error: true` marks the failure shape; anything that is
    /// neither that nor a status object becomes a [`StatusPayload::Failed`].
    pub fn from_json(value: serde_json::Value) -> Self {
        if value.get("error") == Some(&serde_json::Value::Bool(true)) {
            let wire = serde_json::from_value::<FailureWire>(value).unwrap_or_default();
            let mut failure = StatusFetchError::new(
                wire.message
                    .unwrap_or_else(|| STATUS_FETCH_FAILED_MESSAGE.to_string()),
            );
            failure.details = wire.details.map(|details| match details {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            });
            return Self::Failed(failure);
        }

        match serde_json::from_value::<ChatStatus>(value) {
            Ok(status) => Self::Status(status),
            Err(error) => Self::Failed(
                StatusFetchError::new(INVALID_STATUS_PAYLOAD_MESSAGE).with_details(error.to_string()),
            ),
        }
    }

    pub fn from_slice(body: &[u8]) -> Self {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Self::Failed(
                StatusFetchError::new(INVALID_STATUS_PAYLOAD_MESSAGE).with_details("empty body"),
            );
        }

        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(value) => Self::from_json(value),
            Err(error) => Self::Failed(
                StatusFetchError::new(INVALID_STATUS_PAYLOAD_MESSAGE).with_details(error.to_string()),
            ),
        }
    }

    pub fn status(&self) -> Option<&ChatStatus> {
        match self {
            Self::Status(status) => Some(status),
            Self::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Holds at most one live status. A new status replaces the old one outright.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusTracker {
    current: Option<ChatStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the status that was replaced.
    pub fn set(&mut self, status: Option<ChatStatus>) -> Option<ChatStatus> {
        std::mem::replace(&mut self.current, status)
    }

    pub fn get(&self) -> Option<&ChatStatus> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) -> Option<ChatStatus> {
        self.set(None)
    }

    /// `None` means the phase is unknown.
    pub fn phase(&self) -> Option<&str> {
        self.current
            .as_ref()
            .map(|status| status.phase.as_str())
            .filter(|phase| !phase.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_instead_of_merging() {
        let mut tracker = StatusTracker::new();
        tracker.set(Some(ChatStatus::new("collecting").with_form_id("f1")));
        tracker.set(Some(ChatStatus::new("done")));

        assert_eq!(tracker.get(), Some(&ChatStatus::new("done")));
        assert_eq!(tracker.get().and_then(|status| status.form_id.clone()), None);
    }

    #[test]
    fn phase_is_unknown_without_status() {
        let mut tracker = StatusTracker::new();
        assert_eq!(tracker.phase(), None);

        tracker.set(Some(ChatStatus::new("collecting")));
        assert_eq!(tracker.phase(), Some("collecting"));

        let previous = tracker.clear();
        assert_eq!(previous.map(|status| status.phase), Some("collecting".to_string()));
        assert_eq!(tracker.phase(), None);
    }

    #[test]
    fn decodes_full_status_object() {
        let payload = StatusPayload::from_slice(
            br#"{"phase":"collecting","form_id":"f1","answers":{"name":"Ada","age":36},"receiver":"hr@example.com"}"#,
        );

        let expected = ChatStatus::new("collecting")
            .with_form_id("f1")
            .with_answer("name", "Ada")
            .with_answer("age", 36)
            .with_receiver("hr@example.com");
        assert_eq!(payload, StatusPayload::Status(expected));
    }

    #[test]
    fn status_object_with_error_false_is_still_a_status() {
        let payload =
            StatusPayload::from_slice(br#"{"phase":"collecting","form_id":"f1","error":false}"#);

        assert_eq!(
            payload,
            StatusPayload::Status(ChatStatus::new("collecting").with_form_id("f1"))
        );
    }

    #[test]
    fn error_object_becomes_soft_failure() {
        let payload = StatusPayload::from_slice(
            br#"{"error":true,"message":"Could not fetch status","details":"connection refused"}"#,
        );

        assert_eq!(
            payload,
            StatusPayload::Failed(
                StatusFetchError::new(STATUS_FETCH_FAILED_MESSAGE).with_details("connection refused")
            )
        );
    }

    #[test]
    fn missing_or_malformed_bodies_become_soft_failures() {
        let bodies: [&[u8]; 5] = [
            b"",
            b"null",
            br#"{"reply":"hi"}"#,
            b"not json",
            br#"{"error":false}"#,
        ];

        for body in bodies {
            let payload = StatusPayload::from_slice(body);
            match payload {
                StatusPayload::Failed(failure) => {
                    assert_eq!(failure.message, INVALID_STATUS_PAYLOAD_MESSAGE)
                }
                StatusPayload::Status(status) => panic!("unexpected status {status:?}"),
            }
        }
    }
}
