//! Response status classification
//!
//! The vendor backend signals rate limiting with 429 and everything else
//! that went wrong with a 4xx/5xx code. Redirects and successes pass through
//! untouched so callers can parse JSON or HTML as they see fit.

/// What the executor should do with a final (non-redirect) response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// 1xx/2xx/3xx: hand the body to the caller
    Pass,
    /// 429: engage the throttle window and raise `Error::Throttled`
    Throttled,
    /// Any other status >= 400: raise `Error::HttpCode`
    Failed,
}

/// Classify an HTTP status code.
///
/// 429 is checked before the generic >= 400 rule so it never surfaces as a
/// plain HTTP error.
pub fn classify_status(status: u16) -> Classification {
    match status {
        429 => Classification::Throttled,
        s if s >= 400 => Classification::Failed,
        _ => Classification::Pass,
    }
}
