//! Find-or-create sign-in around the [`Authenticator`].
//!
//! validate → find the account (current session, bound identity, verified
//! email) or register one → bind identity and authorization → hooks.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::authentication::{AuthError, Authenticator};
use crate::config::TunnistamoConfig;
use crate::hooks::{HookContext, HookError, HookPipeline, default_pipeline};
use crate::models::{AUTHORIZATION_NAME, Account, AccountId, Assertion, Organization};
use crate::store::{Store, StoreError};

/// Sign-in errors.
#[derive(Debug, Error)]
pub enum SignInError {
    #[error("Registration aborted: assertion cannot back an account")]
    RegistrationAborted,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// What the host should do after a successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInOutcome {
    pub account: Account,
    /// The account was created by this sign-in.
    pub registered: bool,
    /// Redirect into email verification before anything else.
    pub needs_email_confirmation: bool,
    /// Drop any "remember me" cookie of the session.
    pub forget_remembered_session: bool,
}

/// Whether a signed-in account must verify its email first.
///
/// Only accounts that came through the broker (`authorized`), are not
/// managed and are not yet confirmed are gated, and only when broker emails
/// are distrusted.
pub fn requires_email_confirmation(
    config: &TunnistamoConfig,
    account: &Account,
    authorized: bool,
) -> bool {
    config.confirm_emails && authorized && !account.managed && !account.is_confirmed()
}

pub struct SignIn {
    config: Arc<TunnistamoConfig>,
    store: Arc<dyn Store>,
    hooks: HookPipeline,
}

impl SignIn {
    /// Sign-in with the built-in hooks.
    pub fn new(config: Arc<TunnistamoConfig>, store: Arc<dyn Store>) -> Self {
        Self::with_hooks(config, store, default_pipeline())
    }

    pub fn with_hooks(
        config: Arc<TunnistamoConfig>,
        store: Arc<dyn Store>,
        hooks: HookPipeline,
    ) -> Self {
        Self {
            config,
            store,
            hooks,
        }
    }

    /// Gate check for an already signed-in account.
    pub async fn requires_email_confirmation(&self, account: &Account) -> Result<bool, StoreError> {
        if !self.config.confirm_emails || account.managed || account.is_confirmed() {
            return Ok(false);
        }
        let authorized = self
            .store
            .find_authorization_for_account(AUTHORIZATION_NAME, account.id)
            .await?
            .is_some();
        Ok(requires_email_confirmation(&self.config, account, authorized))
    }

    /// Sign in with `assertion`. `current` is the account of an already
    /// authenticated session, which gets the identity attached.
    pub async fn sign_in(
        &self,
        organization: &Organization,
        assertion: &Assertion,
        current: Option<AccountId>,
    ) -> Result<SignInOutcome, SignInError> {
        let auth = Authenticator::new(&self.config, organization, assertion);
        auth.validate()?;

        let ctx = HookContext {
            organization_id: organization.id,
            provider: auth.provider().to_string(),
            confirm_emails: self.config.confirm_emails,
            broker_email: assertion
                .info
                .email
                .as_deref()
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty()),
            strong_identification: auth.is_strong_provider(),
            timestamp: Utc::now(),
        };

        let (mut account, registered) = match self.find_account(&auth, organization, current).await? {
            Some(account) => (account, false),
            None => (self.register(&auth, organization, &ctx).await?, true),
        };

        if let Err(err) = self.bind(&auth, &account).await {
            if registered {
                warn!(account_id = %account.id, "binding failed, discarding new account");
                self.store.delete_account(account.id).await?;
            }
            return Err(err.into());
        }

        let before = account.clone();
        self.hooks.run_sign_in(&ctx, &mut account).await?;
        if account != before {
            self.store.update_account(&account).await?;
        }

        info!(account_id = %account.id, registered, "signed in through broker");
        Ok(SignInOutcome {
            needs_email_confirmation: requires_email_confirmation(&self.config, &account, true),
            forget_remembered_session: ctx.strong_identification,
            account,
            registered,
        })
    }

    async fn find_account(
        &self,
        auth: &Authenticator<'_>,
        organization: &Organization,
        current: Option<AccountId>,
    ) -> Result<Option<Account>, SignInError> {
        if let Some(id) = current {
            let account = self
                .store
                .find_account(id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;
            return Ok(Some(account));
        }

        if let Some(uid) = auth.uid()
            && let Some(identity) = self
                .store
                .find_identity(organization.id, auth.provider(), uid)
                .await?
            && let Some(account_id) = identity.account_id
            && let Some(account) = self.store.find_account(account_id).await?
        {
            return Ok(Some(account));
        }

        match auth.verified_email() {
            Some(email) => Ok(self
                .store
                .find_account_by_email(organization.id, email)
                .await?),
            None => Ok(None),
        }
    }

    async fn register(
        &self,
        auth: &Authenticator<'_>,
        organization: &Organization,
        ctx: &HookContext,
    ) -> Result<Account, SignInError> {
        let params = auth
            .registration_params()
            .ok_or(SignInError::RegistrationAborted)?;

        let mut account = Account::new(organization.id, params.email, params.name);
        account.nickname = params.nickname;
        account.avatar_url = params.avatar_url;
        account.unconfirmed_email = params.unconfirmed_email;
        if params.email_confirmed {
            account.confirm(Utc::now());
        }

        self.hooks.run_registration(ctx, &mut account).await?;
        self.store.insert_account(&account).await?;
        info!(account_id = %account.id, "account registered from broker assertion");
        Ok(account)
    }

    async fn bind(&self, auth: &Authenticator<'_>, account: &Account) -> Result<(), AuthError> {
        auth.identify_user(self.store.as_ref(), account).await?;
        auth.authorize_user(self.store.as_ref(), account).await?;
        Ok(())
    }
}
