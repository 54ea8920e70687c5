//! Cookie-persisting HTTP executor
//!
//! Redirects are followed here rather than inside reqwest so that a
//! `Location` pointing at a custom app scheme (the vendor login hands its
//! tokens back that way) becomes an ordinary return value. Cookies set on
//! every hop land in the shared jar before the next hop is sent.

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};
use url::Url;

use crate::classify::{Classification, classify_status};
use crate::error::{Error, Result};
use crate::throttle::Throttle;

/// Maximum number of HTTP(S) redirects followed for one request.
pub const MAX_REDIRECTS: usize = 10;

/// An outbound request: GET parameters become the query string, POST
/// parameters become a form-encoded body.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Vec<(String, String)>,
    params: Vec<(String, String)>,
    engages_throttle: bool,
}

impl Request {
    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str) -> Result<Self> {
        Self::new(Method::POST, url)
    }

    fn new(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self {
            method,
            url,
            headers: Vec::new(),
            params: Vec::new(),
            engages_throttle: true,
        })
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// A 429 on this request is still reported as `Error::Throttled` but
    /// does not start the shared backoff window.
    pub fn exempt_from_throttle(mut self) -> Self {
        self.engages_throttle = false;
        self
    }

    /// The URL actually sent on the first hop (query string included for GET).
    pub fn target_url(&self) -> Url {
        let mut url = self.url.clone();
        if self.method == Method::GET && !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.params);
        }
        url
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidHeader(format!("{name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::InvalidHeader(format!("{name}: {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

/// A final, non-redirect response body.
#[derive(Debug, Clone)]
pub struct Page {
    pub status: u16,
    /// URL of the last hop, used as `referer` for the next browser step.
    pub url: Url,
    pub body: String,
}

impl Page {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| Error::Decode(format!("invalid JSON from {}: {e}", self.url)))
    }
}

/// Result of executing a request.
#[derive(Debug, Clone)]
pub enum Outcome {
    Page(Page),
    /// The server redirected to a non-HTTP scheme. Carries the full target.
    SchemeRedirect(Url),
}

impl Outcome {
    /// Unwrap a page, treating a scheme redirect as unexpected.
    pub fn into_page(self) -> Result<Page> {
        match self {
            Outcome::Page(page) => Ok(page),
            Outcome::SchemeRedirect(url) => Err(Error::UnexpectedRedirect(url.to_string())),
        }
    }
}

/// Shared HTTP executor. Cloning shares the client, jar and throttle.
#[derive(Clone)]
pub struct Executor {
    http: reqwest::Client,
    jar: Arc<Jar>,
    throttle: Arc<Throttle>,
    max_redirects: usize,
}

impl Executor {
    pub fn new() -> Result<Self> {
        Self::with_throttle(Arc::new(Throttle::default()))
    }

    pub fn with_throttle(throttle: Arc<Throttle>) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Client(e.to_string()))?;
        Ok(Self {
            http,
            jar,
            throttle,
            max_redirects: MAX_REDIRECTS,
        })
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    /// `Cookie` header the jar would send to `url`.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        self.jar
            .cookies(url)
            .and_then(|v| v.to_str().ok().map(str::to_owned))
    }

    /// Send a request, following HTTP(S) redirects.
    ///
    /// 301/302/303 continue as a bodiless GET; 307/308 repeat the original
    /// method and form. A redirect to any other scheme ends the request with
    /// `Outcome::SchemeRedirect`.
    pub async fn execute(&self, request: Request) -> Result<Outcome> {
        let headers = request.header_map()?;
        let engages_throttle = request.engages_throttle;
        let mut method = request.method.clone();
        let mut url = request.target_url();
        let mut form = (method != Method::GET).then(|| request.params.clone());

        for hop in 0..=self.max_redirects {
            let mut builder = self
                .http
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            if let Some(form) = &form {
                builder = builder.form(form);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| Error::Network(format!("{method} {url}: {e}")))?;
            let status = response.status();

            if status.is_redirection()
                && let Some(location) = response.headers().get(LOCATION)
            {
                let location = location
                    .to_str()
                    .map_err(|e| Error::InvalidHeader(format!("location: {e}")))?;
                let next = url
                    .join(location)
                    .map_err(|e| Error::InvalidUrl(format!("{location}: {e}")))?;

                if !matches!(next.scheme(), "http" | "https") {
                    debug!(scheme = next.scheme(), hop, "captured redirect to app scheme");
                    return Ok(Outcome::SchemeRedirect(next));
                }

                if matches!(
                    status,
                    StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
                ) {
                    method = Method::GET;
                    form = None;
                }
                trace!(hop, status = status.as_u16(), to = %next, "following redirect");
                url = next;
                continue;
            }

            let final_url = response.url().clone();
            let body = response
                .text()
                .await
                .map_err(|e| Error::Network(format!("reading body from {final_url}: {e}")))?;

            return match classify_status(status.as_u16()) {
                Classification::Pass => Ok(Outcome::Page(Page {
                    status: status.as_u16(),
                    url: final_url,
                    body,
                })),
                Classification::Throttled => {
                    if engages_throttle {
                        self.throttle.engage();
                        warn!(url = %final_url, "vendor backend throttled us, backing off");
                    } else {
                        warn!(url = %final_url, "vendor backend throttled an exempt request");
                    }
                    Err(Error::Throttled(body))
                }
                Classification::Failed => Err(Error::HttpCode {
                    code: status.as_u16(),
                    body,
                }),
            };
        }

        Err(Error::TooManyRedirects(self.max_redirects))
    }

    /// Execute and expect a regular page.
    pub async fn page(&self, request: Request) -> Result<Page> {
        self.execute(request).await?.into_page()
    }

    /// Execute and decode the page body as JSON.
    pub async fn json<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        self.page(request).await?.json()
    }
}
