//! Service-specific error types

use thiserror::Error;

/// Broker-side errors. Vendor-side failures are `skoda_session::Error`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid broker address: {0}")]
    InvalidBrokerUrl(String),

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
