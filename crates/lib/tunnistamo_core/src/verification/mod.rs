//! Email ownership verification.
//!
//! A provisional account proves it owns a candidate email by echoing a
//! six-digit code or by following a link with a durable token. A successful
//! challenge either promotes the account or merges it into the account that
//! already owns the email.

pub mod code;
pub mod email;
pub mod metadata;
pub mod orchestrator;
pub mod resolution;

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Verification errors. Callers outside the operator layer only ever see
/// [`orchestrator::Outcome::Invalid`].
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Disposable email address")]
    DisposableEmail,

    #[error("Account not found")]
    AccountNotFound,

    #[error("No confirmation in progress")]
    NoPendingChallenge,

    #[error("Confirmation code does not match")]
    CodeInvalid,

    #[error("Confirmation code expired")]
    CodeExpired,

    #[error("Unknown confirmation token")]
    TokenInvalid,

    #[error("Confirmation token expired")]
    TokenExpired,

    #[error("Maximum confirmation attempts exceeded")]
    MaxAttemptsExceeded,

    #[error("Email is already bound to another identity")]
    ConflictingIdentityOrAuthorization,

    #[error("Email was taken by another account")]
    EmailTaken,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
