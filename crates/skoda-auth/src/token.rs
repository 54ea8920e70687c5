//! Token exchange and refresh
//!
//! Two exchanges follow the browser login:
//! 1. code + id_token -> brand tokens (`TOKEN_EXCHANGE_URL`)
//! 2. id_token -> vehicle-data API tokens (`VW_TOKEN_URL`)
//!
//! Refresh goes back to whichever endpoint issued the current tokens. Token
//! endpoints never engage the vehicle-API throttle.

use std::time::{Duration, Instant};

use common::Secret;
use serde::{Deserialize, Serialize};
use skoda_http::{Executor, Request};
use tracing::debug;

use crate::constants::{API_USER_AGENT, ClientProfile, VW_SCOPE};
use crate::error::{Error, Result};

/// Token endpoint response (all three endpoints share this shape).
///
/// `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Endpoint that issued a token pair, and so the one that refreshes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenIssuer {
    /// Vehicle-data API token endpoint (`vw_token_url`).
    Vehicle,
    /// Brand token service; only used when the vehicle exchange was rejected.
    Brand,
}

/// Tokens held by an authenticated session.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub obtained_at: Instant,
    /// `None` when the endpoint did not report a lifetime.
    pub lifetime: Option<Duration>,
    pub issuer: TokenIssuer,
}

impl SessionTokens {
    /// Build session tokens from a response. `fallback_refresh` is used when
    /// the response carries no refresh token of its own.
    pub fn from_response(
        response: TokenResponse,
        issuer: TokenIssuer,
        fallback_refresh: Option<&str>,
    ) -> Result<Self> {
        let refresh = response
            .refresh_token
            .or_else(|| fallback_refresh.map(str::to_owned))
            .ok_or_else(|| Error::Protocol("token response missing refresh_token".into()))?;
        Ok(Self {
            access_token: Secret::new(response.access_token),
            refresh_token: Secret::new(refresh),
            obtained_at: Instant::now(),
            lifetime: response.expires_in.map(Duration::from_secs),
            issuer,
        })
    }

    /// Instant after which a refresh is due, `fraction` of the lifetime in.
    pub fn refresh_due_at(&self, fraction: f64) -> Option<Instant> {
        self.lifetime
            .map(|l| self.obtained_at + l.mul_f64(fraction.clamp(0.0, 1.0)))
    }

    pub fn needs_refresh_at(&self, now: Instant, fraction: f64) -> bool {
        self.refresh_due_at(fraction).is_some_and(|due| now >= due)
    }
}

/// Exchange the login redirect's code and id_token for brand tokens.
pub async fn exchange_auth_code(
    executor: &Executor,
    profile: &ClientProfile,
    code: &str,
    id_token: &str,
) -> Result<TokenResponse> {
    let request = Request::post(&profile.token_exchange_url)?
        .header("x-app-version", &profile.app_version)
        .header("x-app-name", &profile.app_name)
        .header("accept", "application/json")
        .exempt_from_throttle()
        .param("auth_code", code)
        .param("id_token", id_token)
        .param("brand", &profile.brand);

    let response = decode(executor, request, "auth code exchange").await?;
    if response.refresh_token.is_none() {
        return Err(Error::Protocol(
            "auth code exchange returned no refresh_token".into(),
        ));
    }
    Ok(response)
}

fn vehicle_token_request(profile: &ClientProfile) -> Result<Request> {
    Ok(Request::post(&profile.vw_token_url)?
        .header("user-agent", API_USER_AGENT)
        .header("x-app-version", &profile.app_version)
        .header("x-app-name", &profile.app_name)
        .header("x-client-id", &profile.x_client_id)
        .header("accept", "application/json")
        .exempt_from_throttle())
}

/// Exchange the id_token for vehicle-data API tokens.
pub async fn exchange_id_token(
    executor: &Executor,
    profile: &ClientProfile,
    id_token: &str,
) -> Result<TokenResponse> {
    let request = vehicle_token_request(profile)?
        .param("grant_type", "id_token")
        .param("token", id_token)
        .param("scope", VW_SCOPE);

    decode(executor, request, "vehicle token exchange").await
}

/// Refresh at the endpoint that issued `refresh_token`.
pub async fn refresh_tokens(
    executor: &Executor,
    profile: &ClientProfile,
    issuer: TokenIssuer,
    refresh_token: &str,
) -> Result<TokenResponse> {
    let request = match issuer {
        TokenIssuer::Vehicle => vehicle_token_request(profile)?
            .param("grant_type", "refresh_token")
            .param("refresh_token", refresh_token)
            .param("scope", VW_SCOPE),
        TokenIssuer::Brand => Request::post(&profile.token_refresh_url)?
            .headers(profile.api_headers())
            .header("x-client-id", &profile.x_client_id)
            .exempt_from_throttle()
            .param("refresh_token", refresh_token)
            .param("brand", &profile.brand),
    };

    decode(executor, request, "token refresh").await
}

async fn decode(executor: &Executor, request: Request, what: &str) -> Result<TokenResponse> {
    let page = executor.page(request).await?;
    debug!(status = page.status, step = what, "token endpoint answered");
    serde_json::from_str(&page.body)
        .map_err(|e| Error::Protocol(format!("invalid {what} response: {e}")))
}
