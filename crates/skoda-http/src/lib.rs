//! Request executor for the vendor telematics backend
//!
//! Wraps `reqwest` with the three things every vendor call needs:
//! 1. A shared cookie jar, merged after every response (including redirects)
//! 2. Redirect following that captures non-HTTP redirect targets
//!    (`Outcome::SchemeRedirect`) instead of failing on them
//! 3. Uniform status classification: 429 → `Error::Throttled` (and the
//!    shared `Throttle` window is engaged), >= 400 → `Error::HttpCode`
//!
//! Callers parse the returned `Page` body as JSON or HTML themselves.

pub mod classify;
pub mod error;
pub mod executor;
pub mod throttle;

pub use classify::{Classification, classify_status};
pub use error::{Error, Result};
pub use executor::{Executor, MAX_REDIRECTS, Outcome, Page, Request};
pub use throttle::{THROTTLE_WINDOW, Throttle};
