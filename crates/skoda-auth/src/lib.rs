//! Vendor identity-provider handshake
//!
//! The vendor exposes no documented API; logging in means walking the same
//! browser flow the mobile app embeds:
//! 1. Fetch the OpenID discovery document (`flow::AuthenticationFlow`)
//! 2. Request authorization with a fresh nonce/state (`nonce`)
//! 3. Scrape and submit the email form, then the password form (`form`)
//! 4. Capture the app-scheme redirect carrying code + id_token (`redirect`)
//! 5. Exchange code/id_token for tokens, then for vehicle-API tokens (`token`)
//!
//! Each vendor-controlled format is parsed by one narrow function so that a
//! change in the login pages breaks exactly one step.

pub mod constants;
pub mod error;
pub mod flow;
pub mod form;
pub mod nonce;
pub mod redirect;
pub mod token;

pub use constants::{ClientProfile, Credentials};
pub use error::{Error, Result};
pub use flow::{AuthState, AuthenticationFlow};
pub use form::{LoginForm, extract_form};
pub use nonce::generate_nonce;
pub use redirect::{RedirectTokens, parse_redirect};
pub use token::{
    SessionTokens, TokenIssuer, TokenResponse, exchange_auth_code, exchange_id_token,
    refresh_tokens,
};
