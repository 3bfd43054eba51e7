use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::OnceCell;

pub const REQUEST_CONTEXT_HEADER: &str = "Smol-Monitor-Context";
pub const USER_AGENT: &str = concat!("smol-monitor/", env!("CARGO_PKG_VERSION"));
const UNKNOWN_CONTEXT: &str = "Unknown";

/// A JSON POST, as handed to the executor.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl HttpRequest {
    /// New POST carrying a fresh correlation id in the context header.
    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body,
        }
        .header(REQUEST_CONTEXT_HEADER, uuid::Uuid::new_v4().to_string())
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Correlation id for logs and error messages.
    pub fn context(&self) -> &str {
        self.header_value(REQUEST_CONTEXT_HEADER)
            .unwrap_or(UNKNOWN_CONTEXT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Failures where no HTTP response was received at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Other(String),
}

/// The request-executing dependency below the transport.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn post(&self, request: &HttpRequest) -> Result<HttpResponse, ExecutorError>;
}

/// reqwest-backed executor. The underlying client (and its connection pool)
/// is built once, on first use, no matter how many requests race for it.
pub struct ReqwestExecutor {
    timeout: Duration,
    client: OnceCell<reqwest::Client>,
}

impl ReqwestExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&reqwest::Client, ExecutorError> {
        self.client
            .get_or_try_init(|| async {
                tracing::debug!(timeout = ?self.timeout, "Creating HTTP client");
                reqwest::Client::builder()
                    .user_agent(USER_AGENT)
                    .connect_timeout(self.timeout)
                    .timeout(self.timeout)
                    .build()
                    .map_err(|e| ExecutorError::Other(e.to_string()))
            })
            .await
    }

    fn map_error(&self, err: reqwest::Error) -> ExecutorError {
        if err.is_timeout() {
            ExecutorError::Timeout(self.timeout)
        } else if err.is_connect() {
            ExecutorError::Connect(err.to_string())
        } else {
            ExecutorError::Other(err.to_string())
        }
    }
}

#[async_trait]
impl RequestExecutor for ReqwestExecutor {
    async fn post(&self, request: &HttpRequest) -> Result<HttpResponse, ExecutorError> {
        let client = self.client().await?;

        let mut builder = client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_error(e))?;

        Ok(HttpResponse::new(status, body))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_context_defaults_to_unknown() {
        let mut request = HttpRequest::post_json("http://localhost/graphql", Value::Null);
        assert_ne!(request.context(), "Unknown");
        assert_eq!(request.context().len(), 36);

        request.headers.clear();
        assert_eq!(request.context(), "Unknown");
    }

    #[test]
    fn test_bearer_header() {
        let request = HttpRequest::post_json("http://localhost", Value::Null).bearer("abc");
        assert_eq!(request.header_value("authorization"), Some("Bearer abc"));
    }

    #[tokio::test]
    async fn test_posts_json_with_headers() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/graphql"))
            .and(header("Authorization", "Bearer test-token"))
            .and(header_exists(REQUEST_CONTEXT_HEADER))
            .and(header("user-agent", USER_AGENT))
            .and(body_json(serde_json::json!({ "query": "{ ping }" })))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":{}}"#))
            .expect(1)
            .mount(&mock_server)
            .await;

        let executor = ReqwestExecutor::new(Duration::from_secs(5));
        let request = HttpRequest::post_json(
            format!("{}/v2/graphql", mock_server.uri()),
            serde_json::json!({ "query": "{ ping }" }),
        )
        .bearer("test-token");

        let response = executor.post(&request).await.unwrap();
        assert_eq!(response, HttpResponse::new(200, r#"{"data":{}}"#));
    }

    #[tokio::test]
    async fn test_error_status_is_returned_not_raised() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&mock_server)
            .await;

        let executor = ReqwestExecutor::new(Duration::from_secs(5));
        let request = HttpRequest::post_json(mock_server.uri(), Value::Null);

        let response = executor.post(&request).await.unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.body, "maintenance");
    }

    #[tokio::test]
    async fn test_slow_response_is_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let executor = ReqwestExecutor::new(Duration::from_millis(100));
        let request = HttpRequest::post_json(mock_server.uri(), Value::Null);

        let err = executor.post(&request).await.unwrap_err();
        assert_eq!(err, ExecutorError::Timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_client_is_built_once() {
        let executor = ReqwestExecutor::new(Duration::from_secs(1));
        let first = executor.client().await.unwrap() as *const reqwest::Client;
        let second = executor.client().await.unwrap() as *const reqwest::Client;
        assert_eq!(first, second);
    }
}
