//! Code/token challenge state machine and merge-or-promote.
//!
//! ```text
//! UNVERIFIED --request_code--> CODE_SENT
//! CODE_SENT  --request_code--> CODE_SENT   (new code, attempts = 0, new window)
//! CODE_SENT  --confirm(ok)--> CONFIRMED | MERGED
//! CODE_SENT  --confirm(bad)--> CODE_SENT   (attempts += 1)
//! CODE_SENT  --attempts >= max--> LOCKED
//! LOCKED     --request_code--> CODE_SENT
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::VerificationError;
use super::code::{codes_match, generate_code, generate_confirmation_token};
use super::email::validate_candidate;
use super::resolution::{BoundAccount, Resolution, resolve};
use crate::config::TunnistamoConfig;
use crate::mail::{ConfirmationMessage, Mailer};
use crate::models::{AUTHORIZATION_NAME, Account, AccountId};
use crate::store::{Store, StoreError};

/// Caller-facing result. Every failure collapses into `Invalid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Ok(T),
    Invalid,
}

impl<T> Outcome<T> {
    /// Collapse a detailed result, logging the specific failure.
    pub fn from_result(result: Result<T, VerificationError>) -> Self {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(err) => {
                warn!(error = %err, "verification refused");
                Outcome::Invalid
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(value) => Some(value),
            Outcome::Invalid => None,
        }
    }
}

/// Result of a successful confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The account itself now holds the verified email.
    Promoted(Account),
    /// The account was folded into `account`, the owner of the email.
    Merged { account: Account, removed: AccountId },
}

impl Confirmation {
    /// The surviving account.
    pub fn account(&self) -> &Account {
        match self {
            Confirmation::Promoted(account) | Confirmation::Merged { account, .. } => account,
        }
    }

    pub fn email(&self) -> &str {
        &self.account().email
    }
}

/// Where an account stands in the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeState {
    Unverified,
    CodeSent,
    Locked,
    Expired,
    Confirmed,
}

/// Drives email verification for accounts of any organization.
#[derive(Clone)]
pub struct VerificationOrchestrator {
    config: Arc<TunnistamoConfig>,
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
}

impl VerificationOrchestrator {
    pub fn new(
        config: Arc<TunnistamoConfig>,
        store: Arc<dyn Store>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            store,
            mailer,
        }
    }

    pub fn config(&self) -> &TunnistamoConfig {
        &self.config
    }

    /// State of `account` at `now`.
    pub fn challenge_state(&self, account: &Account, now: DateTime<Utc>) -> ChallengeState {
        let (Some(_), Some(sent_at)) = (&account.email_code, account.email_code_sent_at) else {
            return if account.is_confirmed() {
                ChallengeState::Confirmed
            } else {
                ChallengeState::Unverified
            };
        };
        if account.failed_confirmation_attempts >= self.config.max_confirmation_attempts {
            ChallengeState::Locked
        } else if self.expired(sent_at, now) {
            ChallengeState::Expired
        } else {
            ChallengeState::CodeSent
        }
    }

    fn expired(&self, sent_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - sent_at > self.config.code_ttl()
    }

    async fn load(&self, id: AccountId) -> Result<Account, VerificationError> {
        self.store
            .find_account(id)
            .await?
            .ok_or(VerificationError::AccountNotFound)
    }

    /// The account with its bindings for the configured provider.
    async fn bound(&self, account: Account) -> Result<BoundAccount, VerificationError> {
        let identity = self
            .store
            .find_identity_for_account(account.organization_id, &self.config.provider, account.id)
            .await?;
        let authorization = self
            .store
            .find_authorization_for_account(AUTHORIZATION_NAME, account.id)
            .await?;
        Ok(BoundAccount {
            account,
            identity,
            authorization,
        })
    }

    /// The other account of the organization owning `email`, if any.
    async fn email_owner(
        &self,
        account: &Account,
        email: &str,
    ) -> Result<Option<BoundAccount>, VerificationError> {
        match self
            .store
            .find_account_by_email(account.organization_id, email)
            .await?
        {
            Some(owner) if owner.id != account.id => Ok(Some(self.bound(owner).await?)),
            _ => Ok(None),
        }
    }

    /// Issue a fresh code for `candidate_email` and mail it.
    ///
    /// Resets the attempt counter and the validity window, also from the
    /// locked state.
    pub async fn try_request_code(
        &self,
        account_id: AccountId,
        candidate_email: &str,
    ) -> Result<Account, VerificationError> {
        let mut account = self.load(account_id).await?;
        let email = validate_candidate(candidate_email, &self.config.disposable_domains)?;

        if let Some(owner) = self.email_owner(&account, &email).await?
            && owner.is_bound()
        {
            return Err(VerificationError::ConflictingIdentityOrAuthorization);
        }

        let code = generate_code();
        account.pending_email = Some(email.clone());
        account.email_code = Some(code.clone());
        account.email_code_sent_at = Some(Utc::now());
        account.failed_confirmation_attempts = 0;
        let token = account
            .confirmation_token
            .get_or_insert_with(generate_confirmation_token)
            .clone();
        self.store.update_account(&account).await?;
        info!(account_id = %account.id, "confirmation code issued");

        let message = ConfirmationMessage {
            to: vec![email],
            code,
            confirmation_url: self.config.confirmation_url(&token)?,
        };
        if let Err(err) = self.mailer.send_confirmation(&message).await {
            warn!(account_id = %account.id, error = %err, "confirmation mail not delivered");
        }
        Ok(account)
    }

    /// Check `code` against the pending challenge and resolve on success.
    pub async fn try_confirm_by_code(
        &self,
        account_id: AccountId,
        code: &str,
    ) -> Result<Confirmation, VerificationError> {
        let account = self.load(account_id).await?;
        let (Some(candidate), Some(stored), Some(sent_at)) = (
            account.pending_email.clone(),
            account.email_code.as_deref(),
            account.email_code_sent_at,
        ) else {
            return Err(VerificationError::NoPendingChallenge);
        };

        // Every check spends budget before the code is looked at.
        let Some(attempts) = self
            .store
            .consume_attempt(account.id, self.config.max_confirmation_attempts)
            .await?
        else {
            return Err(VerificationError::MaxAttemptsExceeded);
        };
        if self.expired(sent_at, Utc::now()) {
            return Err(VerificationError::CodeExpired);
        }
        if !codes_match(stored, code) {
            warn!(account_id = %account.id, attempts, "wrong confirmation code");
            return Err(VerificationError::CodeInvalid);
        }

        self.resolve(account, &candidate).await
    }

    /// Confirm through the link token and resolve on success.
    pub async fn try_confirm_by_token(
        &self,
        token: &str,
    ) -> Result<Confirmation, VerificationError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(VerificationError::TokenInvalid);
        }
        let account = self
            .store
            .find_account_by_confirmation_token(token)
            .await?
            .ok_or(VerificationError::TokenInvalid)?;
        let (Some(candidate), Some(sent_at)) =
            (account.pending_email.clone(), account.email_code_sent_at)
        else {
            return Err(VerificationError::NoPendingChallenge);
        };
        if self.expired(sent_at, Utc::now()) {
            return Err(VerificationError::TokenExpired);
        }

        self.resolve(account, &candidate).await
    }

    async fn resolve(
        &self,
        account: Account,
        candidate: &str,
    ) -> Result<Confirmation, VerificationError> {
        let current = self.bound(account).await?;
        let owner = self.email_owner(&current.account, candidate).await?;
        let resolution = resolve(
            &current,
            candidate,
            owner.as_ref(),
            AUTHORIZATION_NAME,
            &self.config.provider,
            Utc::now(),
        );

        match resolution {
            Resolution::Promoted(account) => {
                self.store
                    .update_account(&account)
                    .await
                    .map_err(|err| match err {
                        StoreError::EmailTaken => VerificationError::EmailTaken,
                        other => other.into(),
                    })?;
                info!(account_id = %account.id, "email confirmed");
                Ok(Confirmation::Promoted(account))
            }
            Resolution::Merged(plan) => {
                self.store
                    .apply_merge(&plan)
                    .await
                    .map_err(|err| match err {
                        StoreError::Conflict(_) => {
                            VerificationError::ConflictingIdentityOrAuthorization
                        }
                        other => other.into(),
                    })?;
                info!(
                    account_id = %plan.target.id,
                    removed = %plan.provisional_id,
                    "provisional account merged"
                );
                Ok(Confirmation::Merged {
                    account: plan.target,
                    removed: plan.provisional_id,
                })
            }
            Resolution::Refused => Err(VerificationError::ConflictingIdentityOrAuthorization),
        }
    }

    pub async fn request_code(
        &self,
        account_id: AccountId,
        candidate_email: &str,
    ) -> Outcome<Account> {
        Outcome::from_result(self.try_request_code(account_id, candidate_email).await)
    }

    pub async fn confirm_by_code(&self, account_id: AccountId, code: &str) -> Outcome<Confirmation> {
        Outcome::from_result(self.try_confirm_by_code(account_id, code).await)
    }

    pub async fn confirm_by_token(&self, token: &str) -> Outcome<Confirmation> {
        Outcome::from_result(self.try_confirm_by_token(token).await)
    }
}
