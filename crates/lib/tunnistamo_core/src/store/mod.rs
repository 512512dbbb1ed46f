//! Persistent store boundary.
//!
//! Every uniqueness invariant is enforced here, not in the callers:
//! one account per `(organization, email)`, one identity per
//! `(organization, provider, uid)`, one authorization per `(name, unique_id)`
//! and per `(name, account)`. Inserts are conditional single writes; a
//! losing concurrent writer gets the existing row back instead of
//! overwriting it.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Account, AccountId, Authorization, Identity};
use crate::verification::resolution::MergePlan;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Email already taken in organization")]
    EmailTaken,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a conditional insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inserted<T> {
    /// The row was written.
    Created(T),
    /// The unique key was already taken; this is the row holding it.
    Existing(T),
}

impl<T> Inserted<T> {
    pub fn into_inner(self) -> T {
        match self {
            Inserted::Created(v) | Inserted::Existing(v) => v,
        }
    }
}

/// Storage for accounts and their broker bindings.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new account. Fails with [`StoreError::EmailTaken`] when the
    /// email already belongs to another account of the organization.
    async fn insert_account(&self, account: &Account) -> StoreResult<()>;

    async fn find_account(&self, id: AccountId) -> StoreResult<Option<Account>>;

    /// Case-insensitive lookup within an organization.
    async fn find_account_by_email(
        &self,
        organization_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<Account>>;

    async fn find_account_by_confirmation_token(
        &self,
        token: &str,
    ) -> StoreResult<Option<Account>>;

    /// Replace the stored account row. Email uniqueness is re-checked.
    async fn update_account(&self, account: &Account) -> StoreResult<()>;

    /// Spend one confirmation attempt out of `max` in a single conditional
    /// write. Returns the new counter, or `None` once the budget is spent.
    async fn consume_attempt(&self, id: AccountId, max: u32) -> StoreResult<Option<u32>>;

    /// Delete an account. Its identities become orphaned and its
    /// authorizations are removed.
    async fn delete_account(&self, id: AccountId) -> StoreResult<()>;

    async fn find_identity(
        &self,
        organization_id: Uuid,
        provider: &str,
        uid: &str,
    ) -> StoreResult<Option<Identity>>;

    async fn find_identity_for_account(
        &self,
        organization_id: Uuid,
        provider: &str,
        account_id: AccountId,
    ) -> StoreResult<Option<Identity>>;

    /// Insert unless the `(organization, provider, uid)` triple is taken.
    async fn insert_identity(&self, identity: &Identity) -> StoreResult<Inserted<Identity>>;

    async fn delete_identity(&self, id: Uuid) -> StoreResult<()>;

    async fn find_authorization(
        &self,
        name: &str,
        unique_id: &str,
    ) -> StoreResult<Option<Authorization>>;

    async fn find_authorization_for_account(
        &self,
        name: &str,
        account_id: AccountId,
    ) -> StoreResult<Option<Authorization>>;

    /// Insert unless `(name, unique_id)` is taken. A clash on
    /// `(name, account)` is reported as [`StoreError::Conflict`].
    async fn insert_authorization(
        &self,
        authorization: &Authorization,
    ) -> StoreResult<Inserted<Authorization>>;

    /// Update signature, metadata and grant timestamp in place.
    async fn update_authorization(&self, authorization: &Authorization) -> StoreResult<()>;

    /// Apply a merge as one unit: re-point the provisional bindings to the
    /// target, save the target and delete the provisional account. Fails with
    /// [`StoreError::Conflict`] if the target gained a binding meanwhile.
    async fn apply_merge(&self, plan: &MergePlan) -> StoreResult<()>;
}
