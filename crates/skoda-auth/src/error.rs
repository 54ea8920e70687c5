//! Error types for the authentication handshake

/// Errors from the login handshake and token endpoints.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure, throttling or an HTTP error status.
    #[error(transparent)]
    Http(#[from] skoda_http::Error),

    /// A vendor JSON document or redirect lacked a required field.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A login page no longer contains the expected form.
    #[error("login page parse error: {0}")]
    Parse(String),

    /// Credentials rejected, or the login flow changed shape.
    #[error("authentication failed: {0}")]
    Authentication(String),
}

impl Error {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Http(e) if e.is_unauthorized())
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, Error::Http(e) if e.is_throttled())
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_errors_keep_their_message() {
        let err: Error = skoda_http::Error::Network("connection reset".into()).into();
        assert_eq!(err.to_string(), "network error: connection reset");
    }

    #[test]
    fn predicates_see_through_http_wrapper() {
        let unauthorized: Error = skoda_http::Error::HttpCode {
            code: 401,
            body: String::new(),
        }
        .into();
        assert!(unauthorized.is_unauthorized());

        let throttled: Error = skoda_http::Error::Throttled(String::new()).into();
        assert!(throttled.is_throttled());
        assert!(!Error::Parse("x".into()).is_unauthorized());
    }
}
