//! Vendor client identity
//!
//! Public identifiers of the vendor's mobile app. These are not secrets;
//! they identify the app to the identity provider. Every URL is a field so
//! tests can point the handshake at a mock server.

use common::Secret;

/// OpenID discovery document of the identity provider.
pub const OPENID_CONFIG_URL: &str = "https://identity.vwgroup.io/.well-known/openid-configuration";

/// App-scheme redirect the identity provider hands tokens back on.
pub const REDIRECT_URI: &str = "skodaconnect://oidc.login/";

/// OAuth client id of the mobile app.
pub const CLIENT_ID: &str = "7f045eee-7003-4379-9968-9355ed2adb06@apps_vw-dilab_com";

/// `X-Client-Id` header value for the vehicle-data token endpoint.
pub const X_CLIENT_ID: &str = "28cd30c6-dee7-4529-a0e6-b1e07ff90b79";

pub const APP_NAME: &str = "cz.skodaauto.connect";
pub const APP_VERSION: &str = "3.2.6";
pub const BRAND: &str = "skoda";
pub const LOCALE: &str = "de";

pub const SCOPES: &str = "openid mbb";
pub const RESPONSE_TYPE: &str = "code id_token token";

/// Brand-scoped exchange of auth code + id_token.
pub const TOKEN_EXCHANGE_URL: &str =
    "https://tokenrefreshservice.apps.emea.vwapps.io/exchangeAuthCode";
pub const TOKEN_REFRESH_URL: &str =
    "https://tokenrefreshservice.apps.emea.vwapps.io/refreshTokens";

/// Exchange of id_token for vehicle-data API tokens.
pub const VW_TOKEN_URL: &str =
    "https://mbboauth-1d.prd.ece.vwg-connect.com/mbbcoauth/mobile/oauth2/v1/token";
pub const VW_SCOPE: &str = "sc2:fal";

pub const BROWSER_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (iPhone; CPU iPhone OS 13_6 like Mac OS X) ",
    "AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148",
);
pub const DISCOVERY_USER_AGENT: &str = "OneConnect/200605002 CFNetwork/1128 Darwin/19.6.0";
pub const API_USER_AGENT: &str = "okhttp/3.7.0";

pub const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
pub const ACCEPT_LANGUAGE: &str = "de-de";

/// Form ids on the identity provider's login pages.
pub const EMAIL_FORM_ID: &str = "emailPasswordForm";
pub const PASSWORD_FORM_ID: &str = "credentialsForm";

/// Account credentials used for the handshake.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: Secret<String>,
}

/// Identifiers and endpoints the handshake talks to.
#[derive(Debug, Clone)]
pub struct ClientProfile {
    pub openid_config_url: String,
    pub redirect_uri: String,
    pub client_id: String,
    pub x_client_id: String,
    pub app_name: String,
    pub app_version: String,
    pub brand: String,
    pub locale: String,
    pub token_exchange_url: String,
    pub token_refresh_url: String,
    pub vw_token_url: String,
}

impl Default for ClientProfile {
    fn default() -> Self {
        Self {
            openid_config_url: OPENID_CONFIG_URL.into(),
            redirect_uri: REDIRECT_URI.into(),
            client_id: CLIENT_ID.into(),
            x_client_id: X_CLIENT_ID.into(),
            app_name: APP_NAME.into(),
            app_version: APP_VERSION.into(),
            brand: BRAND.into(),
            locale: LOCALE.into(),
            token_exchange_url: TOKEN_EXCHANGE_URL.into(),
            token_refresh_url: TOKEN_REFRESH_URL.into(),
            vw_token_url: VW_TOKEN_URL.into(),
        }
    }
}

impl ClientProfile {
    /// Headers the app sends on vehicle-API JSON calls (without Authorization).
    pub fn api_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("user-agent", API_USER_AGENT.to_string()),
            ("x-app-version", self.app_version.clone()),
            ("x-app-name", self.app_name.clone()),
            ("accept-charset", "UTF-8".to_string()),
            ("accept", "application/json".to_string()),
        ]
    }
}
