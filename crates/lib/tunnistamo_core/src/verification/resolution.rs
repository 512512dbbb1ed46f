//! Merge-or-promote resolution.
//!
//! Pure decision over explicit inputs; applying the result is the store's
//! job ([`crate::store::Store::update_account`] for promotion,
//! [`crate::store::Store::apply_merge`] for merges).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Account, AccountId, Authorization, Identity};

/// An account together with its bindings for the configured provider.
#[derive(Debug, Clone)]
pub struct BoundAccount {
    pub account: Account,
    pub identity: Option<Identity>,
    pub authorization: Option<Authorization>,
}

impl BoundAccount {
    pub fn is_bound(&self) -> bool {
        self.identity.is_some() || self.authorization.is_some()
    }
}

/// Everything the store needs to fold a provisional account into the owner
/// of the verified email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub provisional_id: AccountId,
    /// Target account as it must be saved (confirmed).
    pub target: Account,
    pub identity_id: Option<Uuid>,
    pub authorization_id: Option<Uuid>,
    /// Provider and authorization name the target must not already hold.
    pub provider: String,
    pub authorization_name: String,
}

/// Outcome of a successful challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The current account takes the candidate email.
    Promoted(Account),
    /// The current account is folded into the existing owner.
    Merged(MergePlan),
    /// The owner is already bound to this provider; nothing may change.
    Refused,
}

/// Decide what a verified `candidate_email` does to `current`.
///
/// `matched` is the account of the same organization that already owns the
/// candidate email, if any.
pub fn resolve(
    current: &BoundAccount,
    candidate_email: &str,
    matched: Option<&BoundAccount>,
    authorization_name: &str,
    provider: &str,
    now: DateTime<Utc>,
) -> Resolution {
    let target = matched.filter(|m| m.account.id != current.account.id);

    match target {
        None => {
            let mut account = current.account.clone();
            account.email = candidate_email.to_string();
            account.clear_challenge();
            account.confirm(now);
            Resolution::Promoted(account)
        }
        Some(target) if target.is_bound() => Resolution::Refused,
        Some(target) => {
            let mut account = target.account.clone();
            account.confirm(now);
            Resolution::Merged(MergePlan {
                provisional_id: current.account.id,
                target: account,
                identity_id: current.identity.as_ref().map(|i| i.id),
                authorization_id: current.authorization.as_ref().map(|a| a.id),
                provider: provider.to_string(),
                authorization_name: authorization_name.to_string(),
            })
        }
    }
}
