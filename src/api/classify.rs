use crate::api::error::ApiError;
use crate::api::executor::HttpResponse;
use crate::core::ErrorKind;
use serde::Deserialize;
use serde_json::Value;

/// GraphQL error codes that mean the caller's credentials were rejected.
pub const AUTHENTICATION_ERROR_CODES: &[&str] = &["UNAUTHENTICATED"];

/// A successfully classified response.
///
/// `Absent` covers a 404 and GraphQL errors the caller listed as acceptable:
/// neither is a failure, but there is no payload either.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified<T> {
    Data(T),
    Absent,
}

impl<T> Classified<T> {
    #[cfg(test)]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Data(data) => Some(data),
            Self::Absent => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphQLError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    extensions: Option<GraphQLErrorExtensions>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQLErrorExtensions {
    error_code: Option<String>,
}

impl GraphQLError {
    fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.error_code.as_deref()
    }

    fn trimmed_message(&self) -> String {
        self.message
            .trim_matches(|c| matches!(c, '.' | ',' | '!'))
            .to_string()
    }
}

/// Classifies a plain JSON response by status, then parses the body.
pub fn classify_json(
    response: &HttpResponse,
    url: &str,
    request_context: &str,
) -> Result<Classified<Value>, ApiError> {
    let status = response.status;
    let body = response.body.as_str();

    if status >= 500 {
        tracing::warn!(
            url,
            request_context,
            status,
            body,
            "Response received - DO NOT REPORT - Smol server error"
        );
        return Err(ErrorKind::Server.into());
    }
    if status == 401 || status == 403 {
        tracing::warn!(url, request_context, status, body, "Unauthenticated request");
        return Err(ErrorKind::authentication(Vec::new()).into());
    }
    if status == 404 {
        tracing::info!(url, request_context, status, body, "Unexpected response received");
        return Ok(Classified::Absent);
    }
    if status >= 400 {
        tracing::warn!(url, request_context, status, body, "Failed to send request");
        return Err(ErrorKind::request(Vec::new()).into());
    }

    tracing::debug!(url, request_context, status, "Successful response");

    serde_json::from_str(body)
        .map(Classified::Data)
        .map_err(|e| ApiError::malformed(url, format!("{e}; {body}")))
}

/// Classifies a GraphQL response: status first, then the `errors` array.
///
/// Errors carrying one of `accepted_error_codes` make the whole response
/// `Absent`. Otherwise an authentication code wins, and anything else is a
/// request error carrying every message.
pub fn classify_graphql(
    response: &HttpResponse,
    url: &str,
    request_context: &str,
    accepted_error_codes: &[&str],
) -> Result<Classified<Value>, ApiError> {
    let data = match classify_json(response, url, request_context)? {
        Classified::Data(data) => data,
        Classified::Absent => return Ok(Classified::Absent),
    };

    let errors = match data.get("errors") {
        Some(Value::Array(errors)) if !errors.is_empty() => errors.clone(),
        Some(Value::Array(_)) | Some(Value::Null) | None => return Ok(Classified::Data(data)),
        Some(other) => {
            return Err(ApiError::malformed(url, format!("unexpected errors field: {other}")))
        }
    };

    let errors: Vec<GraphQLError> = serde_json::from_value(Value::Array(errors))
        .map_err(|e| ApiError::malformed(url, format!("invalid errors entry: {e}")))?;
    let messages: Vec<String> = errors.iter().map(GraphQLError::trimmed_message).collect();

    if errors
        .iter()
        .filter_map(GraphQLError::code)
        .any(|code| accepted_error_codes.contains(&code))
    {
        tracing::info!(
            url,
            request_context,
            errors = %messages.join(", "),
            "Accepted errors in request"
        );
        return Ok(Classified::Absent);
    }

    tracing::warn!(url, request_context, errors = %messages.join(", "), "Errors in request");

    if errors
        .iter()
        .filter_map(GraphQLError::code)
        .any(|code| AUTHENTICATION_ERROR_CODES.contains(&code))
    {
        return Err(ErrorKind::authentication(messages).into());
    }

    Err(ErrorKind::request(messages).into())
}
