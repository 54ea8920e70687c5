//! Login handshake state machine
//!
//! `AuthenticationFlow::run` walks the identity provider's browser login one
//! step at a time. Every transition is logged, and `state()` reports how far
//! a failed attempt got.

use std::fmt;

use serde::Deserialize;
use skoda_http::{Executor, Outcome, Page, Request};
use tracing::{info, warn};
use url::Url;

use crate::constants::{
    ACCEPT_LANGUAGE, BROWSER_USER_AGENT, ClientProfile, Credentials, DISCOVERY_USER_AGENT,
    EMAIL_FORM_ID, HTML_ACCEPT, PASSWORD_FORM_ID, RESPONSE_TYPE, SCOPES,
};
use crate::error::{Error, Result};
use crate::form::{LoginForm, extract_form};
use crate::nonce::generate_nonce;
use crate::redirect::parse_redirect;
use crate::token::{SessionTokens, TokenIssuer, exchange_auth_code, exchange_id_token};

/// Handshake progress. Ordered: a later variant means a later step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthState {
    Init,
    ConfigFetched,
    AuthorizationRequested,
    EmailSubmitted,
    PasswordSubmitted,
    CredentialsRedirected,
    TokensExchanged,
    VendorTokensExchanged,
    Authenticated,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The two fields we need from the OpenID discovery document.
#[derive(Debug, Clone, Deserialize)]
pub struct Discovery {
    pub issuer: String,
    pub authorization_endpoint: String,
}

/// One login attempt. Borrow the shared executor so cookies set during the
/// handshake stay in the session's jar.
pub struct AuthenticationFlow<'a> {
    executor: &'a Executor,
    profile: &'a ClientProfile,
    credentials: &'a Credentials,
    state: AuthState,
}

impl<'a> AuthenticationFlow<'a> {
    pub fn new(
        executor: &'a Executor,
        profile: &'a ClientProfile,
        credentials: &'a Credentials,
    ) -> Self {
        Self {
            executor,
            profile,
            credentials,
            state: AuthState::Init,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    fn advance(&mut self, next: AuthState) {
        info!(from = %self.state, to = %next, "authentication step");
        self.state = next;
    }

    /// Run the full handshake.
    ///
    /// If the vehicle-token exchange is rejected by the server, the brand
    /// tokens from the previous step are returned instead (degraded mode).
    pub async fn run(&mut self) -> Result<SessionTokens> {
        self.state = AuthState::Init;

        let discovery = self.fetch_discovery().await?;
        self.advance(AuthState::ConfigFetched);

        let login_page = self.request_authorization(&discovery).await?;
        let email_form = extract_form(&login_page.body, EMAIL_FORM_ID)?;
        self.advance(AuthState::AuthorizationRequested);

        let password_page = self
            .submit_form(
                &discovery,
                &login_page,
                email_form.with("email", &self.credentials.email),
            )
            .await?
            .into_page()?;
        let password_form = extract_form(&password_page.body, PASSWORD_FORM_ID)?;
        self.advance(AuthState::EmailSubmitted);

        let outcome = self
            .submit_form(
                &discovery,
                &password_page,
                password_form.with("password", self.credentials.password.expose()),
            )
            .await?;
        self.advance(AuthState::PasswordSubmitted);

        let redirect = match outcome {
            Outcome::SchemeRedirect(url) => url,
            Outcome::Page(page) => {
                return Err(Error::Authentication(format!(
                    "login ended on {} instead of the app redirect; \
                     credentials rejected or login flow changed",
                    page.url
                )));
            }
        };
        let redirect = parse_redirect(&redirect)?;
        self.advance(AuthState::CredentialsRedirected);

        let brand = exchange_auth_code(
            self.executor,
            self.profile,
            &redirect.code,
            &redirect.id_token,
        )
        .await?;
        self.advance(AuthState::TokensExchanged);

        let tokens = match exchange_id_token(self.executor, self.profile, &redirect.id_token).await
        {
            Ok(vehicle) => {
                self.advance(AuthState::VendorTokensExchanged);
                SessionTokens::from_response(vehicle, TokenIssuer::Vehicle, None)?
            }
            Err(Error::Http(e)) if e.status().is_some() || e.is_throttled() => {
                warn!(error = %e, "vehicle token exchange rejected, continuing with brand tokens");
                SessionTokens::from_response(brand, TokenIssuer::Brand, None)?
            }
            Err(e) => return Err(e),
        };

        self.advance(AuthState::Authenticated);
        Ok(tokens)
    }

    async fn fetch_discovery(&self) -> Result<Discovery> {
        let request = Request::get(&self.profile.openid_config_url)?
            .header("user-agent", DISCOVERY_USER_AGENT)
            .header("accept", "*/*")
            .header("accept-language", ACCEPT_LANGUAGE);
        let doc: serde_json::Value = self.executor.json(request).await?;
        serde_json::from_value(doc)
            .map_err(|e| Error::Protocol(format!("invalid OpenID discovery document: {e}")))
    }

    async fn request_authorization(&self, discovery: &Discovery) -> Result<Page> {
        let request = Request::get(&discovery.authorization_endpoint)?
            .headers(browser_headers())
            .param("nonce", generate_nonce())
            .param("response_type", RESPONSE_TYPE)
            .param("scope", SCOPES)
            .param("ui_locales", &self.profile.locale)
            .param("redirect_uri", &self.profile.redirect_uri)
            .param("client_id", &self.profile.client_id)
            .param("state", generate_nonce());
        Ok(self.executor.page(request).await?)
    }

    async fn submit_form(
        &self,
        discovery: &Discovery,
        previous: &Page,
        form: LoginForm,
    ) -> Result<Outcome> {
        let action = form.action_url(&discovery.issuer)?;
        let origin = origin_of(&discovery.issuer);
        let request = Request::post(&action)?
            .headers(browser_headers())
            .header("origin", origin)
            .header("referer", previous.url.as_str())
            .params(form.fields);
        Ok(self.executor.execute(request).await?)
    }
}

fn browser_headers() -> [(&'static str, &'static str); 3] {
    [
        ("user-agent", BROWSER_USER_AGENT),
        ("accept", HTML_ACCEPT),
        ("accept-language", ACCEPT_LANGUAGE),
    ]
}

fn origin_of(issuer: &str) -> String {
    Url::parse(issuer)
        .map(|u| u.origin().ascii_serialization())
        .unwrap_or_else(|_| issuer.trim_end_matches('/').to_string())
}
