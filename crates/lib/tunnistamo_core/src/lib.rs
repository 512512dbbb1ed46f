//! # tunnistamo_core
//!
//! Core domain logic for Tunnistamo sign-in: turning a broker assertion into
//! bound local accounts, and verifying email ownership before an account is
//! treated as confirmed.

pub mod authentication;
pub mod config;
pub mod hooks;
pub mod mail;
pub mod migrate;
pub mod models;
pub mod signin;
pub mod store;
pub mod verification;

pub use authentication::{AuthError, Authenticator};
pub use config::TunnistamoConfig;
pub use signin::{SignIn, SignInOutcome};
pub use store::{InMemoryStore, PgStore, Store, StoreError};
pub use verification::orchestrator::{Outcome, VerificationOrchestrator};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
