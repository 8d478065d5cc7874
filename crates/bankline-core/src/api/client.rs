//! API client for the banking backend.
//!
//! `BankClient` performs the calls that establish a session: password
//! login, the exchange of a Google authorization code for an access token
//! plus user profile, and the verification of a Facebook access token. Both return a `SessionRecord` ready to be
//! handed to `SessionRecovery::store_session`.

use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::{Provider, SessionRecord};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Total attempts for a call that keeps failing transiently.
const MAX_ATTEMPTS: u32 = 3;

/// Initial backoff delay in milliseconds, doubled after every failed attempt.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Upper bound of the random jitter added to each backoff.
const MAX_JITTER_MS: u64 = 1000;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct CodeExchangeRequest<'a> {
    code: &'a str,
    redirect_uri: &'a str,
}

#[derive(Debug, Serialize)]
struct FacebookTokenRequest<'a> {
    access_token: &'a str,
}

/// Response of both OAuth endpoints. The Facebook endpoint echoes no token;
/// the client-side token the user signed in with is the session token.
#[derive(Debug, Deserialize)]
struct OAuthExchangeResponse {
    #[serde(default)]
    access_token: Option<String>,
    user_profile: Option<Value>,
}

impl OAuthExchangeResponse {
    fn into_record(
        self,
        provider: Provider,
        client_token: Option<&str>,
    ) -> Result<SessionRecord, ApiError> {
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .or_else(|| client_token.filter(|t| !t.is_empty()).map(str::to_string))
            .ok_or_else(|| ApiError::InvalidResponse("missing access_token".to_string()))?;
        let profile = self
            .user_profile
            .ok_or_else(|| ApiError::InvalidResponse("missing user_profile".to_string()))?;
        SessionRecord::from_oauth(provider, &access_token, profile)
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

/// Client for the banking API.
/// Clone is cheap - reqwest::Client shares its connection pool.
#[derive(Clone)]
pub struct BankClient {
    client: Client,
    base_url: String,
}

impl BankClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Authenticate with email and password.
    /// The credentials themselves become the session, so the record keeps
    /// the plain password for later API calls.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionRecord> {
        let url = self.url("login");
        let response: LoginResponse = self
            .post_json(
                &url,
                &LoginRequest {
                    username: email,
                    password,
                },
            )
            .await
            .context("Login failed")?;

        info!(
            email = email,
            message = response.message.as_deref().unwrap_or(""),
            "Password login accepted"
        );
        Ok(SessionRecord::from_password(email, password))
    }

    /// Exchange a Google authorization code for an OAuth session.
    pub async fn exchange_google_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<SessionRecord> {
        let url = self.url("api/auth/google");
        let response: OAuthExchangeResponse = self
            .post_json(&url, &CodeExchangeRequest { code, redirect_uri })
            .await
            .context("Google code exchange failed")?;

        let record = response
            .into_record(Provider::Google, None)
            .context("Google code exchange returned an unusable session")?;
        info!(email = %record.email, "Google sign-in accepted");
        Ok(record)
    }

    /// Have the backend verify a Facebook access token obtained client-side
    /// and return the matching profile.
    pub async fn exchange_facebook_token(&self, access_token: &str) -> Result<SessionRecord> {
        let url = self.url("api/auth/facebook");
        let response: OAuthExchangeResponse = self
            .post_json(&url, &FacebookTokenRequest { access_token })
            .await
            .context("Facebook sign-in failed")?;

        let record = response
            .into_record(Provider::Facebook, Some(access_token))
            .context("Facebook sign-in returned an unusable session")?;
        info!(email = %record.email, "Facebook sign-in accepted");
        Ok(record)
    }

    /// POST a JSON body, retrying transient failures with exponential backoff.
    async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_post_json(url, body).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let backoff = backoff_delay(attempt);
                    warn!(
                        url = url,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Request failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    debug!(url = url, attempt = attempt, error = %e, "Request failed");
                    return Err(e);
                }
            }
        }
    }

    async fn try_post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.client.post(url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

/// Backoff before the attempt following `attempt` (1-based).
fn backoff_delay(attempt: u32) -> Duration {
    let base = INITIAL_BACKOFF_MS.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
    Duration::from_millis(base + jitter)
}
