//! Parsing of the app-scheme redirect that ends the browser login

use url::Url;

use crate::error::{Error, Result};

/// Values handed back on `skodaconnect://oidc.login/...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTokens {
    pub code: String,
    pub id_token: String,
    pub access_token: Option<String>,
    pub state: Option<String>,
}

/// Split the redirect at its last `?` or `#` and read the parameters.
///
/// The identity provider has used both the query and the fragment over
/// time, so both are accepted.
pub fn parse_redirect(url: &Url) -> Result<RedirectTokens> {
    let raw = url.as_str();
    let params = raw
        .rfind(['?', '#'])
        .map(|i| &raw[i + 1..])
        .ok_or_else(|| Error::Protocol(format!("redirect carries no parameters: {raw}")))?;

    let mut code = None;
    let mut id_token = None;
    let mut access_token = None;
    let mut state = None;
    for (key, value) in url::form_urlencoded::parse(params.as_bytes()) {
        match key.trim_start_matches('#') {
            "code" => code = Some(value.into_owned()),
            "id_token" => id_token = Some(value.into_owned()),
            "access_token" => access_token = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    Ok(RedirectTokens {
        code: code.ok_or_else(|| Error::Protocol("redirect missing code".into()))?,
        id_token: id_token.ok_or_else(|| Error::Protocol("redirect missing id_token".into()))?,
        access_token,
        state,
    })
}
