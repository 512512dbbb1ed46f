//! Authentication of broker assertions.
//!
//! Derives the verified or placeholder email and the stable signature of an
//! assertion, and binds the external identity to exactly one local account.

pub mod authenticator;

pub use authenticator::{Authenticator, RegistrationParams};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::store::StoreError;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Identity is bound to another user")]
    IdentityBoundToOtherUser,

    #[error("Authorization is bound to another user")]
    AuthorizationBoundToOtherUser,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Stable signature of `(provider, uid)`, the authorization's unique key.
pub fn signature(provider: &str, uid: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{provider}-{uid}-{secret}").as_bytes());
    format!("{:x}", hasher.finalize())
}
