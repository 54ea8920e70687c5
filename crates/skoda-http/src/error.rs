//! Error types for request execution

/// Errors from a single vendor request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("throttled by vendor backend (HTTP 429): {0}")]
    Throttled(String),

    #[error("HTTP {code}: {body}")]
    HttpCode { code: u16, body: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("response decode failed: {0}")]
    Decode(String),

    #[error("too many redirects (limit {0})")]
    TooManyRedirects(usize),

    #[error("unexpected redirect to {0}")]
    UnexpectedRedirect(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

impl Error {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::HttpCode { code, .. } => Some(*code),
            Error::Throttled(_) => Some(429),
            _ => None,
        }
    }

    /// The backend rejected the access token.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, Error::Throttled(_))
    }
}

/// Result alias for request execution.
pub type Result<T> = std::result::Result<T, Error>;
