//! Nonce and state generation for the authorization request
//!
//! Both values are opaque to us; the identity provider only needs them to be
//! unguessable and URL-safe.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// SHA-256 of 32 random bytes, URL-safe base64 without padding (43 chars).
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(Sha256::digest(bytes))
}
