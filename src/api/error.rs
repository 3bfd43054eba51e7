use crate::api::executor::ExecutorError;
use crate::core::ErrorKind;

/// Outcome of a failed API call.
///
/// `Classified` is an expected failure the coordinator schedules around.
/// The other variants are fatal: the response could not be understood, so
/// no retry policy applies to it.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Classified(#[from] ErrorKind),

    #[error("Failed to extract response json from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
}

impl ApiError {
    /// The classified kind, or `None` for fatal errors.
    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            Self::Classified(kind) => Some(kind),
            Self::MalformedResponse { .. } | Self::Transport { .. } => None,
        }
    }

    pub fn is_authentication(&self) -> bool {
        self.kind().is_some_and(ErrorKind::is_authentication)
    }

    pub fn malformed(url: &str, reason: impl ToString) -> Self {
        Self::MalformedResponse {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Maps a failure where no response arrived. Not hearing back at all is
    /// treated the same as hearing back too late.
    pub fn from_executor(err: ExecutorError, url: &str, request_context: &str) -> Self {
        match err {
            ExecutorError::Timeout(timeout) => {
                tracing::warn!(url, request_context, ?timeout, "Timeout on request");
                Self::Classified(ErrorKind::Timeout)
            }
            ExecutorError::Connect(reason) => {
                tracing::warn!(url, request_context, %reason, "Could not reach Smol servers");
                Self::Classified(ErrorKind::Timeout)
            }
            ExecutorError::Other(reason) => Self::Transport {
                url: url.to_string(),
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_is_none_for_fatal_errors() {
        assert_eq!(
            ApiError::from(ErrorKind::Server).kind(),
            Some(&ErrorKind::Server)
        );
        assert!(ApiError::malformed("http://x", "eof").kind().is_none());
        assert!(ApiError::from_executor(ExecutorError::Other("tls".into()), "http://x", "c")
            .kind()
            .is_none());
    }

    #[test]
    fn test_no_response_is_timeout() {
        let err = ApiError::from_executor(
            ExecutorError::Timeout(Duration::from_secs(20)),
            "http://x",
            "ctx",
        );
        assert_eq!(err.kind(), Some(&ErrorKind::Timeout));

        let err = ApiError::from_executor(ExecutorError::Connect("refused".into()), "http://x", "ctx");
        assert_eq!(err.kind(), Some(&ErrorKind::Timeout));
    }

    #[test]
    fn test_classified_display_is_transparent() {
        let err = ApiError::from(ErrorKind::Timeout);
        assert_eq!(err.to_string(), ErrorKind::Timeout.to_string());
        assert!(ApiError::from(ErrorKind::authentication(Vec::new())).is_authentication());
    }
}
