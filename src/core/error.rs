use serde::{Deserialize, Serialize};

/// Classified failure of a call to the Smol API.
///
/// The set is closed: every expected failure of the remote service maps to
/// exactly one of these kinds. Anything else surfaces as a fatal
/// [`crate::api::ApiError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// 5xx from either the token or the GraphQL endpoint
    #[error("Error on Smol servers. Please try again later.")]
    Server,

    /// No response within the configured deadline
    #[error("Smol servers did not respond in a timely manner")]
    Timeout,

    /// 4xx other than auth, or GraphQL errors without an ignorable code
    #[error("Smol server returned one or more errors - {}", .messages.join(", "))]
    Request { messages: Vec<String> },

    /// 401/403, or a GraphQL error flagged as an authentication failure
    #[error("Authentication failed - {}", describe_messages(.messages))]
    Authentication { messages: Vec<String> },
}

impl ErrorKind {
    pub fn request(messages: Vec<String>) -> Self {
        Self::Request { messages }
    }

    pub fn authentication(messages: Vec<String>) -> Self {
        Self::Authentication { messages }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

fn describe_messages(messages: &[String]) -> String {
    if messages.is_empty() {
        "credentials were rejected".to_string()
    } else {
        messages.join(", ")
    }
}
