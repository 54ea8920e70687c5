//! Shared session context and token lifecycle
//!
//! Tokens are held in memory only. `ensure_authenticated` runs the handshake
//! when none are present; `with_reauth` re-runs it once on a 401 and retries
//! the failed operation exactly once.

use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;

use skoda_auth::{AuthenticationFlow, ClientProfile, Credentials, SessionTokens};
use skoda_http::{Executor, Request};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::template::Templater;
use crate::vehicle::Endpoints;

pub struct Session {
    executor: Executor,
    profile: ClientProfile,
    credentials: Credentials,
    endpoints: Endpoints,
    templater: Templater,
    tokens: RwLock<Option<SessionTokens>>,
    /// Serializes handshakes and refreshes.
    auth_lock: Mutex<()>,
    pub(crate) home_regions: RwLock<HashMap<String, String>>,
    /// Earliest next status-update request, per VIN.
    pub(crate) update_windows: Mutex<HashMap<String, Instant>>,
}

impl Session {
    /// `vars` are the configuration values available to URL templates.
    pub fn new(
        executor: Executor,
        profile: ClientProfile,
        credentials: Credentials,
        endpoints: Endpoints,
        vars: Templater,
    ) -> Self {
        let mut templater = vars;
        templater.set("msgbase", endpoints.msg_base.clone());
        templater.set("malbase", endpoints.mal_base.clone());
        Self {
            executor,
            profile,
            credentials,
            endpoints,
            templater,
            tokens: RwLock::new(None),
            auth_lock: Mutex::new(()),
            home_regions: RwLock::new(HashMap::new()),
            update_windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn profile(&self) -> &ClientProfile {
        &self.profile
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn templater(&self) -> &Templater {
        &self.templater
    }

    pub async fn tokens(&self) -> Option<SessionTokens> {
        self.tokens.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.tokens.read().await.is_some()
    }

    pub async fn replace_tokens(&self, tokens: SessionTokens) {
        *self.tokens.write().await = Some(tokens);
    }

    /// Drop the current tokens; the next `ensure_authenticated` logs in again.
    pub async fn clear_tokens(&self) {
        *self.tokens.write().await = None;
    }

    pub(crate) async fn auth_guard(&self) -> MutexGuard<'_, ()> {
        self.auth_lock.lock().await
    }

    /// Run the handshake unless tokens are already present.
    pub async fn ensure_authenticated(&self) -> Result<()> {
        if self.is_authenticated().await {
            return Ok(());
        }
        let _guard = self.auth_guard().await;
        // Another caller may have finished a handshake while we waited.
        if self.is_authenticated().await {
            return Ok(());
        }
        self.authenticate_locked().await
    }

    /// Discard the current tokens and run the handshake again.
    pub async fn reauthenticate(&self) -> Result<()> {
        let _guard = self.auth_guard().await;
        self.clear_tokens().await;
        self.authenticate_locked().await
    }

    async fn authenticate_locked(&self) -> Result<()> {
        let mut flow = AuthenticationFlow::new(&self.executor, &self.profile, &self.credentials);
        match flow.run().await {
            Ok(tokens) => {
                metrics::counter!("skoda_auth_attempts_total", "result" => "success").increment(1);
                info!(
                    expires_in_secs = tokens.lifetime.map(|l| l.as_secs()),
                    "session authenticated"
                );
                self.replace_tokens(tokens).await;
                Ok(())
            }
            Err(e) => {
                metrics::counter!("skoda_auth_attempts_total", "result" => "failure").increment(1);
                warn!(state = %flow.state(), error = %e, "authentication failed");
                Err(e.into())
            }
        }
    }

    pub async fn access_token(&self) -> Result<String> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.expose().clone())
            .ok_or(Error::NotAuthenticated)
    }

    /// Decorate a vehicle-API request with app headers and the bearer token.
    pub async fn api_request(&self, request: Request) -> Result<Request> {
        let token = self.access_token().await?;
        Ok(request
            .headers(self.profile.api_headers())
            .header("authorization", format!("Bearer {token}")))
    }

    /// Run `op` with a valid session. On a 401, re-authenticate once and
    /// retry once; a second 401 becomes `Error::Unauthorized`.
    pub async fn with_reauth<T, F, Fut>(&self, vin: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_authenticated().await?;
        match op().await {
            Err(e) if e.is_unauthorized() => {
                info!(vin, "vehicle endpoint answered 401, re-authenticating");
                self.reauthenticate().await?;
                match op().await {
                    Err(e) if e.is_unauthorized() => {
                        warn!(vin, "still unauthorized after re-authentication");
                        Err(Error::Unauthorized {
                            vin: vin.to_string(),
                        })
                    }
                    other => other,
                }
            }
            other => other,
        }
    }
}
