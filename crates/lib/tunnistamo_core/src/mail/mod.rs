//! Outbound confirmation mail.
//!
//! Delivery is best effort: the orchestrator logs dispatch failures and
//! carries on.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::verification::email::is_generated_address;

/// Mail errors.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("No deliverable recipients")]
    NoRecipients,
}

/// Code and link sent to a candidate address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationMessage {
    pub to: Vec<String>,
    pub code: String,
    pub confirmation_url: Url,
}

impl ConfirmationMessage {
    /// Plain-text body.
    pub fn body(&self) -> String {
        format!(
            "Your confirmation code is {}.\n\nYou can also confirm your email address by opening this link:\n{}\n",
            self.code, self.confirmation_url
        )
    }
}

/// Mail dispatch collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_confirmation(&self, message: &ConfirmationMessage) -> Result<(), MailError>;
}

#[async_trait]
impl<M: Mailer + ?Sized> Mailer for Arc<M> {
    async fn send_confirmation(&self, message: &ConfirmationMessage) -> Result<(), MailError> {
        (**self).send_confirmation(message).await
    }
}

/// Mailer that only logs, for development and the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_confirmation(&self, message: &ConfirmationMessage) -> Result<(), MailError> {
        if message.to.is_empty() {
            return Err(MailError::NoRecipients);
        }
        info!(
            to = %message.to.join(","),
            code = %message.code,
            url = %message.confirmation_url,
            "confirmation mail"
        );
        Ok(())
    }
}

/// Drops generated placeholder recipients before delivery and skips the
/// delivery when none remain.
pub struct GeneratedRecipientFilter<M> {
    inner: M,
}

impl<M: Mailer> GeneratedRecipientFilter<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<M: Mailer> Mailer for GeneratedRecipientFilter<M> {
    async fn send_confirmation(&self, message: &ConfirmationMessage) -> Result<(), MailError> {
        let to: Vec<String> = message
            .to
            .iter()
            .filter(|address| !is_generated_address(address))
            .cloned()
            .collect();
        if to.is_empty() {
            debug!("suppressed mail to generated addresses");
            return Ok(());
        }
        let filtered = ConfirmationMessage {
            to,
            ..message.clone()
        };
        self.inner.send_confirmation(&filtered).await
    }
}
