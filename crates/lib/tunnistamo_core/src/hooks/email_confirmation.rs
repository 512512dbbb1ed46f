//! Keep distrusted broker emails unconfirmed.

use async_trait::async_trait;

use super::{HookContext, HookError, SignInHook};
use crate::models::Account;
use crate::verification::code::generate_confirmation_token;

/// When broker emails are distrusted, a new account starts unconfirmed with
/// the broker email as a hint and a confirmation token ready for the link.
pub struct EmailConfirmationGate;

#[async_trait]
impl SignInHook for EmailConfirmationGate {
    async fn after_registration(
        &self,
        ctx: &HookContext,
        account: &mut Account,
    ) -> Result<(), HookError> {
        if !ctx.confirm_emails {
            return Ok(());
        }
        account.confirmed_at = None;
        account.unconfirmed_email = ctx.broker_email.clone();
        account
            .confirmation_token
            .get_or_insert_with(generate_confirmation_token);
        Ok(())
    }

    fn name(&self) -> &str {
        "EmailConfirmationGate"
    }
}
