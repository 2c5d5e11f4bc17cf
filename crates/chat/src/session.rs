use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::ensure;
use uuid::Uuid;

use super::error::{ChatError, ChatResult, InvalidSessionIdSnafu};

/// Literal prefix carried by every generated token so ids stand out in logs.
pub const SESSION_ID_PREFIX: &str = "SESSION-";

/// Correlation token for one conversation with the form backend.
///
/// The token is opaque to the core. Generated ids are `SESSION-<uuid v4>`; ids adopted from
/// elsewhere only need to be non-blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Draws a fresh token from the OS random source.
    ///
    /// A missing random source is an environment failure and panics inside `uuid`.
    pub fn generate() -> Self {
        Self(format!("{SESSION_ID_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn parse(raw: &str) -> ChatResult<Self> {
        let trimmed = raw.trim();
        ensure!(
            !trimmed.is_empty(),
            InvalidSessionIdSnafu {
                stage: "parse-session-id",
                raw: raw.to_string(),
            }
        );
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_generated(&self) -> bool {
        self.0.starts_with(SESSION_ID_PREFIX)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

impl FromStr for SessionId {
    type Err = ChatError;

    fn from_str(raw: &str) -> ChatResult<Self> {
        Self::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn generated_ids_are_prefixed() {
        let id = SessionId::generate();
        assert!(id.as_str().starts_with(SESSION_ID_PREFIX));
        assert!(id.is_generated());
        assert!(Uuid::parse_str(&id.as_str()[SESSION_ID_PREFIX.len()..]).is_ok());
    }

    #[test]
    fn ten_thousand_generated_ids_are_distinct() {
        let ids = (0..10_000)
            .map(|_| SessionId::generate())
            .collect::<HashSet<_>>();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn parse_trims_and_rejects_blank_tokens() {
        assert_eq!(SessionId::parse("  S1 ").unwrap().as_str(), "S1");
        assert!(!SessionId::parse("S1").unwrap().is_generated());

        let error = "   ".parse::<SessionId>().unwrap_err();
        assert!(matches!(error, ChatError::InvalidSessionId { .. }));
    }

    #[test]
    fn serializes_as_plain_token() {
        let id = SessionId::parse("SESSION-abc").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"SESSION-abc\"");
    }
}
