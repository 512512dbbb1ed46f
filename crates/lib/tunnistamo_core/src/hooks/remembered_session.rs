//! Forget "remember me" after strong identification.

use async_trait::async_trait;

use super::{HookContext, HookError, SignInHook};
use crate::models::Account;

pub struct ForgetRememberedSession;

#[async_trait]
impl SignInHook for ForgetRememberedSession {
    async fn after_sign_in(
        &self,
        ctx: &HookContext,
        account: &mut Account,
    ) -> Result<(), HookError> {
        if ctx.strong_identification && account.remember_created_at.take().is_some() {
            tracing::info!(account_id = %account.id, "remembered session forgotten");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "ForgetRememberedSession"
    }
}
