//! Sign-in hook pipeline.
//!
//! Hosts customise what happens to an account when it is registered from a
//! broker assertion and when it signs in. Registration hooks run in order;
//! sign-in hooks run in reverse order (onion model). Built-in hooks gate
//! unverified emails and forget remembered sessions after strong
//! identification.

pub mod email_confirmation;
pub mod remembered_session;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::Account;

pub use email_confirmation::EmailConfirmationGate;
pub use remembered_session::ForgetRememberedSession;

/// Context passed to hooks for each sign-in.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub organization_id: Uuid,
    pub provider: String,
    /// Whether the broker email is distrusted and must be verified.
    pub confirm_emails: bool,
    /// Email reported by the broker, if any.
    pub broker_email: Option<String>,
    /// The assertion's authentication method is on the strong allow-list.
    pub strong_identification: bool,
    pub timestamp: DateTime<Utc>,
}

/// Scope at which a hook applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookScope {
    Global,
    Organization(Uuid),
}

/// Errors that can occur in hooks.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Sign-in rejected: {0}")]
    Rejected(String),

    #[error("Hook error: {0}")]
    Internal(String),
}

/// Hook trait. Both phases default to no-ops.
#[async_trait]
pub trait SignInHook: Send + Sync {
    /// Called for a freshly registered account before it is first saved.
    /// Return Err to abort the registration.
    async fn after_registration(
        &self,
        _ctx: &HookContext,
        _account: &mut Account,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Called after the identity and authorization are bound.
    async fn after_sign_in(
        &self,
        _ctx: &HookContext,
        _account: &mut Account,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Hook identifier for debugging/logging.
    fn name(&self) -> &str;
}

/// Ordered pipeline of hooks.
pub struct HookPipeline {
    hooks: Vec<(HookScope, Arc<dyn SignInHook>)>,
}

impl HookPipeline {
    pub fn new(hooks: Vec<(HookScope, Arc<dyn SignInHook>)>) -> Self {
        Self { hooks }
    }

    /// Create an empty pipeline (no-op).
    pub fn empty() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Run all registration hooks in order. Short-circuits on error.
    pub async fn run_registration(
        &self,
        ctx: &HookContext,
        account: &mut Account,
    ) -> Result<(), HookError> {
        for (scope, hook) in &self.hooks {
            if scope_matches(scope, ctx) {
                tracing::debug!(hook = hook.name(), "after_registration");
                hook.after_registration(ctx, account).await?;
            }
        }
        Ok(())
    }

    /// Run all sign-in hooks in reverse order.
    pub async fn run_sign_in(
        &self,
        ctx: &HookContext,
        account: &mut Account,
    ) -> Result<(), HookError> {
        for (scope, hook) in self.hooks.iter().rev() {
            if scope_matches(scope, ctx) {
                tracing::debug!(hook = hook.name(), "after_sign_in");
                hook.after_sign_in(ctx, account).await?;
            }
        }
        Ok(())
    }
}

fn scope_matches(scope: &HookScope, ctx: &HookContext) -> bool {
    match scope {
        HookScope::Global => true,
        HookScope::Organization(id) => ctx.organization_id == *id,
    }
}

/// Build the default hook pipeline with built-in hooks.
///
/// Pipeline order: EmailConfirmationGate → ForgetRememberedSession
pub fn default_pipeline() -> HookPipeline {
    HookPipeline::new(vec![
        (HookScope::Global, Arc::new(EmailConfirmationGate)),
        (HookScope::Global, Arc::new(ForgetRememberedSession)),
    ])
}
