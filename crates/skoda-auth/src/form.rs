//! Login form scraping
//!
//! The identity provider serves server-rendered HTML. We only need two
//! things from it: the `action` of a form with a known id, and the hidden
//! inputs (CSRF token, relayState, hmac...) that must be posted back.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::{Error, Result};

static FORM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<form\b([^>]*)>(.*?)(?:</form\s*>|\z)").expect("static regex")
});

static INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b([^>]*)>").expect("static regex"));

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("static regex")
});

/// A form scraped from a login page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    /// Raw `action` attribute, usually relative to the issuer.
    pub action: String,
    /// Hidden inputs in document order, plus anything added via `with`.
    pub fields: Vec<(String, String)>,
}

impl LoginForm {
    /// Add a user-supplied field (email, password).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Resolve `action` against the issuer URL.
    pub fn action_url(&self, issuer: &str) -> Result<String> {
        if self.action.starts_with("http://") || self.action.starts_with("https://") {
            return Ok(self.action.clone());
        }
        let base = Url::parse(issuer)
            .map_err(|e| Error::Protocol(format!("invalid issuer {issuer:?}: {e}")))?;
        let joined = base
            .join(&self.action)
            .map_err(|e| Error::Parse(format!("invalid form action {:?}: {e}", self.action)))?;
        Ok(joined.into())
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Find the form with `id == form_id` and collect its action and hidden inputs.
pub fn extract_form(html: &str, form_id: &str) -> Result<LoginForm> {
    for form in FORM_RE.captures_iter(html) {
        let attrs = parse_attrs(form.get(1).map_or("", |m| m.as_str()));
        if attrs.get("id").map(String::as_str) != Some(form_id) {
            continue;
        }

        let action = attrs
            .get("action")
            .filter(|a| !a.is_empty())
            .cloned()
            .ok_or_else(|| Error::Parse(format!("form #{form_id} has no action")))?;

        let body = form.get(2).map_or("", |m| m.as_str());
        let fields = INPUT_RE
            .captures_iter(body)
            .filter_map(|input| {
                let attrs = parse_attrs(input.get(1).map_or("", |m| m.as_str()));
                let hidden = attrs
                    .get("type")
                    .is_some_and(|t| t.eq_ignore_ascii_case("hidden"));
                let name = attrs.get("name")?.clone();
                hidden.then(|| (name, attrs.get("value").cloned().unwrap_or_default()))
            })
            .collect();

        return Ok(LoginForm { action, fields });
    }

    Err(Error::Parse(format!("form #{form_id} not found on login page")))
}

fn parse_attrs(tag: &str) -> HashMap<String, String> {
    ATTR_RE
        .captures_iter(tag)
        .filter_map(|c| {
            let name = c.get(1)?.as_str().to_ascii_lowercase();
            let value = c.get(2).or_else(|| c.get(3)).or_else(|| c.get(4))?.as_str();
            Some((name, unescape(value)))
        })
        .collect()
}

fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&#x2F;", "/")
        .replace("&#47;", "/")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
