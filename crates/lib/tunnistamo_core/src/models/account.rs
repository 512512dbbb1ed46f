//! Local accounts and the organization they belong to.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account identifier (UUIDv7, timestamp-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Tenant that owns accounts and identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    /// Public host name, also the fallback placeholder email domain.
    pub host: String,
}

impl Organization {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            host: host.into(),
        }
    }
}

/// A local user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub organization_id: Uuid,
    /// Primary email. Unique per organization; may be a placeholder.
    pub email: String,
    pub name: String,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    /// Email reported by the broker but not yet proven; used to prefill the
    /// verification form.
    pub unconfirmed_email: Option<String>,
    /// Candidate email of the challenge currently in flight.
    pub pending_email: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Durable single-use token carried by the confirmation link.
    pub confirmation_token: Option<String>,
    /// Six-digit zero-padded confirmation code.
    pub email_code: Option<String>,
    pub email_code_sent_at: Option<DateTime<Utc>>,
    pub failed_confirmation_attempts: u32,
    /// Managed (impersonated) accounts are never sent through verification.
    pub managed: bool,
    /// Marker of a "remember me" session; cleared to forget it.
    pub remember_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Build an unconfirmed account with no challenge state.
    pub fn new(organization_id: Uuid, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(),
            organization_id,
            email: email.into(),
            name: name.into(),
            nickname: None,
            avatar_url: None,
            unconfirmed_email: None,
            pending_email: None,
            confirmed_at: None,
            confirmation_token: None,
            email_code: None,
            email_code_sent_at: None,
            failed_confirmation_attempts: 0,
            managed: false,
            remember_created_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }

    /// Mark confirmed, keeping an earlier confirmation timestamp.
    pub fn confirm(&mut self, now: DateTime<Utc>) {
        if self.confirmed_at.is_none() {
            self.confirmed_at = Some(now);
        }
    }

    /// Drop every piece of challenge state (code, token, pending email).
    pub fn clear_challenge(&mut self) {
        self.pending_email = None;
        self.unconfirmed_email = None;
        self.confirmation_token = None;
        self.email_code = None;
        self.email_code_sent_at = None;
        self.failed_confirmation_attempts = 0;
    }
}
