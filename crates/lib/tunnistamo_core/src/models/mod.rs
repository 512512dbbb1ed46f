//! Domain models.
//!
//! Accounts and their broker bindings as persisted by a [`crate::store::Store`],
//! plus the ephemeral [`Assertion`] handed over by the identity broker.

pub mod account;
pub mod assertion;
pub mod binding;

pub use account::{Account, AccountId, Organization};
pub use assertion::{Assertion, AssertionInfo, AttributeValue, RawAttributes};
pub use binding::{Authorization, AuthorizationMetadata, Identity};

/// Workflow name of the authorization granted for every broker sign-in.
pub const AUTHORIZATION_NAME: &str = "tunnistamo_idp";

/// Trim a value and treat empty strings as absent.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
