//! Error types for session operations

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] skoda_auth::Error),

    #[error(transparent)]
    Http(#[from] skoda_http::Error),

    /// Still 401 after one re-authentication; give up until the next cycle.
    #[error("vehicle {vin}: unauthorized after re-authentication")]
    Unauthorized { vin: String },

    #[error("no session tokens, authenticate first")]
    NotAuthenticated,

    /// A vendor JSON document lacked an expected field.
    #[error("unexpected payload: {0}")]
    Payload(String),
}

impl Error {
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Error::Http(e) => e.is_unauthorized(),
            Error::Auth(e) => e.is_unauthorized(),
            _ => false,
        }
    }

    pub fn is_throttled(&self) -> bool {
        match self {
            Error::Http(e) => e.is_throttled(),
            Error::Auth(e) => e.is_throttled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
