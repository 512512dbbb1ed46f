//! Broker bindings: identities and authorizations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AccountId;

/// `(organization, provider, uid)` → account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub provider: String,
    pub uid: String,
    /// `None` once the owning account was removed (orphaned binding).
    pub account_id: Option<AccountId>,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(
        organization_id: Uuid,
        provider: impl Into<String>,
        uid: impl Into<String>,
        account_id: AccountId,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            organization_id,
            provider: provider.into(),
            uid: uid.into(),
            account_id: Some(account_id),
            created_at: Utc::now(),
        }
    }
}

/// Flat record stored against an authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationMetadata {
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub birthdate: Option<String>,
    /// Authentication method reference(s), comma separated.
    pub amr: Option<String>,
}

/// `(name, unique_id)` → account, where `unique_id` is the assertion signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub id: Uuid,
    pub name: String,
    pub account_id: AccountId,
    pub unique_id: String,
    pub metadata: AuthorizationMetadata,
    pub granted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Authorization {
    /// Build a granted authorization.
    pub fn new(
        name: impl Into<String>,
        account_id: AccountId,
        unique_id: impl Into<String>,
        metadata: AuthorizationMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            account_id,
            unique_id: unique_id.into(),
            metadata,
            granted_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh the grant timestamp, postponing any expiry.
    pub fn grant(&mut self, now: DateTime<Utc>) {
        self.granted_at = Some(now);
        self.updated_at = now;
    }
}
