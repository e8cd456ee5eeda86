//! Access-token provider shared by every transport.
//!
//! The token is process-wide state with a defined lifecycle: seeded from
//! configuration at startup, refreshed lazily on first use or after an HTTP
//! 401, and never refreshed by two callers at once.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::api::types::{LoginRequest, TokenResponse};
use crate::error::AuthError;

/// Exchanges the long-lived refresh credential for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<SecretString, AuthError>;
}

/// Calls `POST /auth/refresh`, presenting the refresh token as the
/// `refresh_token` cookie the way the browser does.
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    endpoint: Url,
    refresh_token: Option<SecretString>,
}

impl HttpTokenRefresher {
    pub fn new(
        client: reqwest::Client,
        api_url: &Url,
        refresh_token: Option<SecretString>,
    ) -> Result<Self, AuthError> {
        let endpoint = api_url
            .join("auth/refresh")
            .map_err(|e| AuthError::InvalidResponse(format!("bad refresh url: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            refresh_token,
        })
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self) -> Result<SecretString, AuthError> {
        let refresh_token = self
            .refresh_token
            .as_ref()
            .ok_or(AuthError::MissingRefreshToken)?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(
                reqwest::header::COOKIE,
                format!("refresh_token={}", refresh_token.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected { status });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        Ok(SecretString::from(body.access_token))
    }
}

/// Tokens returned by an interactive login.
pub struct LoginTokens {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
}

/// `POST /auth/login`; the refresh token comes back as an http-only cookie.
pub async fn login(
    client: &reqwest::Client,
    api_url: &Url,
    username: &str,
    password: &str,
) -> Result<LoginTokens, AuthError> {
    let endpoint = api_url
        .join("auth/login")
        .map_err(|e| AuthError::InvalidResponse(format!("bad login url: {e}")))?;
    let response = client
        .post(endpoint)
        .json(&LoginRequest { username, password })
        .send()
        .await
        .map_err(|e| AuthError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::Rejected { status });
    }

    let refresh_token = response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(refresh_cookie_value)
        .map(SecretString::from);

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
    Ok(LoginTokens {
        access_token: SecretString::from(body.access_token),
        refresh_token,
    })
}

fn refresh_cookie_value(set_cookie: &str) -> Option<String> {
    let pair = set_cookie.split(';').next()?.trim();
    let value = pair.strip_prefix("refresh_token=")?;
    let value = value.trim_matches('"');
    (!value.is_empty()).then(|| value.to_string())
}

pub struct TokenProvider {
    cached: RwLock<Option<SecretString>>,
    refresh_lock: Mutex<()>,
    refresher: Arc<dyn TokenRefresher>,
}

impl TokenProvider {
    pub fn new(refresher: Arc<dyn TokenRefresher>, initial: Option<SecretString>) -> Self {
        Self {
            cached: RwLock::new(initial),
            refresh_lock: Mutex::new(()),
            refresher,
        }
    }

    /// Cached token, or the result of a single (deduplicated) refresh.
    pub async fn access_token(&self) -> Result<SecretString, AuthError> {
        if let Some(token) = self.cached.read().await.clone() {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have completed the refresh while we waited.
        if let Some(token) = self.cached.read().await.clone() {
            return Ok(token);
        }

        tracing::debug!("Refreshing access token");
        let token = self.refresher.refresh().await?;
        *self.cached.write().await = Some(token.clone());
        Ok(token)
    }

    pub async fn has_cached_token(&self) -> bool {
        self.cached.read().await.is_some()
    }

    /// Drop the cached token so the next caller refreshes (e.g. after a 401).
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    pub async fn set(&self, token: SecretString) {
        *self.cached.write().await = Some(token);
    }
}
