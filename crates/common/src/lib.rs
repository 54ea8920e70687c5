//! Shared primitives for the skoda2mqtt workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
