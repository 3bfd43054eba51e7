//! Bearer token lifecycle for one account.
//!
//! A credential is considered usable until five minutes before it expires.
//! Only one fetch runs at a time: callers that find the credential stale
//! queue on the refresh lock and re-check once they hold it, so a burst of
//! concurrent callers costs a single token request.

use crate::api::classify::{classify_json, Classified};
use crate::api::error::ApiError;
use crate::api::executor::{HttpRequest, RequestExecutor};
use crate::core::ErrorKind;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

pub const TOKEN_EXPIRY_MARGIN_MINUTES: i64 = 5;

pub const CLIENT_ID: &str = "sp7P3EXkSoOFxZFjvncSLPduD4Kr5kFv";
pub const PASSWORD_REALM_GRANT: &str = "http://auth0.com/oauth/grant-type/password-realm";
pub const REFRESH_TOKEN_GRANT: &str = "refresh_token";
pub const REALM: &str = "Username-Password-Authentication";
pub const AUDIENCE: &str = "https://customer-api.smolproducts.com";
pub const SCOPE: &str = "openid profile email offline_access";

/// A bearer token and the instant it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - Duration::minutes(TOKEN_EXPIRY_MARGIN_MINUTES)
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub token_url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

enum Grant<'a> {
    Password,
    RefreshToken(&'a str),
}

pub struct TokenManager {
    executor: Arc<dyn RequestExecutor>,
    config: AuthConfig,
    credential: RwLock<Option<Credential>>,
    refresh_token: Mutex<Option<String>>,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(executor: Arc<dyn RequestExecutor>, config: AuthConfig) -> Self {
        Self {
            executor,
            config,
            credential: RwLock::new(None),
            refresh_token: Mutex::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns a credential valid for at least the expiry margin, fetching
    /// one if needed.
    pub async fn ensure_valid_token(&self) -> Result<Credential, ApiError> {
        if let Some(credential) = self.valid_credential().await {
            return Ok(credential);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(credential) = self.valid_credential().await {
            return Ok(credential);
        }

        self.refresh_locked().await
    }

    /// Forgets the credential and any refresh token.
    pub async fn clear(&self) {
        let _guard = self.refresh_lock.lock().await;
        *self.credential.write().await = None;
        *self.refresh_token.lock().await = None;
    }

    async fn valid_credential(&self) -> Option<Credential> {
        let now = Utc::now();
        self.credential
            .read()
            .await
            .as_ref()
            .filter(|c| c.is_valid_at(now))
            .cloned()
    }

    /// Caller must hold `refresh_lock`.
    async fn refresh_locked(&self) -> Result<Credential, ApiError> {
        let refresh_token = self.refresh_token.lock().await.clone();

        let issued = match refresh_token {
            Some(token) => match self.fetch_token(Grant::RefreshToken(&token)).await {
                Err(err) if err.is_authentication() => {
                    debug!(
                        username = %self.config.username,
                        "Failed to refresh auth token using refresh token, falling back to password"
                    );
                    *self.refresh_token.lock().await = None;
                    *self.credential.write().await = None;
                    self.fetch_token(Grant::Password).await?
                }
                other => other?,
            },
            None => self.fetch_token(Grant::Password).await?,
        };

        let (credential, new_refresh_token) = issued;
        if let Some(token) = new_refresh_token {
            *self.refresh_token.lock().await = Some(token);
        }
        *self.credential.write().await = Some(credential.clone());

        info!(
            username = %self.config.username,
            expires_at = %credential.expires_at(),
            "Auth token refreshed"
        );
        Ok(credential)
    }

    async fn fetch_token(&self, grant: Grant<'_>) -> Result<(Credential, Option<String>), ApiError> {
        let url = self.config.token_url.as_str();
        let request = HttpRequest::post_json(url, self.grant_body(&grant));

        let response = self
            .executor
            .post(&request)
            .await
            .map_err(|e| ApiError::from_executor(e, url, request.context()))?;

        let body = match classify_json(&response, url, request.context())? {
            Classified::Data(body) => body,
            Classified::Absent => Value::Null,
        };

        let parsed: TokenResponse = match body {
            Value::Null => TokenResponse {
                access_token: None,
                expires_in: None,
                refresh_token: None,
            },
            body => serde_json::from_value(body).map_err(|e| ApiError::malformed(url, e))?,
        };

        match (parsed.access_token, parsed.expires_in) {
            (Some(token), Some(expires_in)) => {
                let expires_at = Duration::try_seconds(expires_in)
                    .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
                    .ok_or_else(|| {
                        ApiError::malformed(url, format!("expires_in out of range: {expires_in}"))
                    })?;
                Ok((Credential::new(token, expires_at), parsed.refresh_token))
            }
            _ => Err(ErrorKind::authentication(vec![
                "Failed to retrieve auth token".to_string(),
            ])
            .into()),
        }
    }

    fn grant_body(&self, grant: &Grant<'_>) -> Value {
        match grant {
            Grant::Password => json!({
                "grant_type": PASSWORD_REALM_GRANT,
                "client_id": CLIENT_ID,
                "username": self.config.username,
                "password": self.config.password,
                "realm": REALM,
                "audience": AUDIENCE,
                "scope": SCOPE,
            }),
            Grant::RefreshToken(token) => json!({
                "grant_type": REFRESH_TOKEN_GRANT,
                "client_id": CLIENT_ID,
                "refresh_token": token,
            }),
        }
    }
}
