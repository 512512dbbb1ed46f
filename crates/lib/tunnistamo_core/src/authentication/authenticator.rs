//! Assertion → verified identity, registration parameters and bindings.

use std::sync::OnceLock;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{AuthError, signature};
use crate::config::TunnistamoConfig;
use crate::models::{
    AUTHORIZATION_NAME, Account, Assertion, Authorization, AuthorizationMetadata, Identity,
    Organization, non_blank,
};
use crate::store::{Inserted, Store, StoreError};
use crate::verification::email::{is_generated_address, placeholder_address};
use crate::verification::metadata::MetadataCollector;

/// Attributes a host needs to register a new account from an assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationParams {
    pub provider: String,
    pub uid: String,
    pub email: String,
    /// Whether `email` may be treated as confirmed right away.
    pub email_confirmed: bool,
    /// Broker-reported email kept as a hint for the verification form.
    pub unconfirmed_email: Option<String>,
    pub name: String,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub oauth_signature: String,
}

/// Authenticates one broker assertion for one organization.
///
/// Derived values (digest, signature, email) are computed once per
/// instance.
pub struct Authenticator<'a> {
    config: &'a TunnistamoConfig,
    organization: &'a Organization,
    assertion: &'a Assertion,
    digest: OnceLock<Option<String>>,
    signature: OnceLock<Option<String>>,
    email: OnceLock<Option<String>>,
}

impl<'a> Authenticator<'a> {
    pub fn new(
        config: &'a TunnistamoConfig,
        organization: &'a Organization,
        assertion: &'a Assertion,
    ) -> Self {
        Self {
            config,
            organization,
            assertion,
            digest: OnceLock::new(),
            signature: OnceLock::new(),
            email: OnceLock::new(),
        }
    }

    /// Fails when no person identifier can be extracted, or when the
    /// assertion was issued for another provider.
    pub fn validate(&self) -> Result<(), AuthError> {
        if let Some(provider) = non_blank(Some(self.assertion.provider.as_str()))
            && provider != self.config.provider
        {
            return Err(AuthError::ValidationError(format!(
                "unexpected provider '{provider}'"
            )));
        }
        if self.person_identifier_digest().is_none() {
            return Err(AuthError::ValidationError(
                "missing person identifier".to_string(),
            ));
        }
        Ok(())
    }

    pub fn provider(&self) -> &str {
        &self.config.provider
    }

    pub fn uid(&self) -> Option<&str> {
        self.assertion.uid()
    }

    fn collector(&self) -> MetadataCollector<'_> {
        MetadataCollector::new(&self.assertion.raw_attributes, &self.config.secret_key_base)
    }

    pub fn metadata(&self) -> AuthorizationMetadata {
        self.collector().metadata()
    }

    pub fn person_identifier_digest(&self) -> Option<&str> {
        self.digest
            .get_or_init(|| self.collector().person_identifier_digest())
            .as_deref()
    }

    /// Signature of `(provider, uid)`, `None` without an external uid.
    pub fn signature(&self) -> Option<&str> {
        self.signature
            .get_or_init(|| {
                self.uid()
                    .map(|uid| signature(self.provider(), uid, &self.config.secret_key_base))
            })
            .as_deref()
    }

    /// The broker email when it is trusted and present, otherwise the
    /// placeholder derived from the person identifier digest.
    pub fn verified_email(&self) -> Option<&str> {
        self.email
            .get_or_init(|| {
                if !self.config.confirm_emails
                    && let Some(email) = self.broker_email()
                {
                    return Some(email.to_lowercase());
                }
                self.person_identifier_digest().map(|digest| {
                    placeholder_address(digest, self.placeholder_domain()).to_lowercase()
                })
            })
            .as_deref()
    }

    /// Whether a new account may be treated as confirmed right away.
    pub fn email_confirmed(&self) -> bool {
        !self.config.confirm_emails
    }

    /// True for a placeholder generated under this organization's domain.
    pub fn is_placeholder_email(&self, email: &str) -> bool {
        let suffix = format!("@{}", self.placeholder_domain().to_lowercase());
        is_generated_address(email) && email.to_lowercase().ends_with(&suffix)
    }

    fn placeholder_domain(&self) -> &str {
        self.config.placeholder_domain(&self.organization.host)
    }

    fn broker_email(&self) -> Option<&str> {
        non_blank(self.assertion.info.email.as_deref())
    }

    /// Registration parameters, or `None` when the assertion cannot back an
    /// account. Callers abort registration on `None`.
    pub fn registration_params(&self) -> Option<RegistrationParams> {
        if self.assertion.is_empty() {
            return None;
        }
        let uid = self.uid()?;
        let email = self.verified_email()?;
        let oauth_signature = self.signature()?;
        let raw = &self.assertion.raw_attributes;

        let name = non_blank(self.assertion.info.name.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| {
                let given = raw.first_of(&["given_name", "first_name"]).unwrap_or_default();
                let family = raw.first_of(&["family_name", "last_name"]).unwrap_or_default();
                format!("{given} {family}").trim().to_string()
            });
        let nickname = non_blank(self.assertion.info.nickname.as_deref())
            .map(str::to_string)
            .or_else(|| raw.get("nickname"));
        let unconfirmed_email = self
            .broker_email()
            .map(str::to_lowercase)
            .filter(|broker| broker != email);

        Some(RegistrationParams {
            provider: self.provider().to_string(),
            uid: uid.to_string(),
            email: email.to_string(),
            email_confirmed: self.email_confirmed(),
            unconfirmed_email,
            name,
            nickname,
            avatar_url: non_blank(self.assertion.info.avatar_url.as_deref()).map(str::to_string),
            oauth_signature: oauth_signature.to_string(),
        })
    }

    /// Ensure `Identity(org, provider, uid) → account`.
    ///
    /// Orphaned identities are replaced; an identity held by another account
    /// is never overwritten.
    pub async fn identify_user(
        &self,
        store: &dyn Store,
        account: &Account,
    ) -> Result<Identity, AuthError> {
        let uid = self
            .uid()
            .ok_or_else(|| AuthError::ValidationError("missing external uid".to_string()))?;

        match store
            .find_identity(self.organization.id, self.provider(), uid)
            .await?
        {
            Some(identity) if identity.account_id == Some(account.id) => return Ok(identity),
            Some(identity) if identity.account_id.is_none() => {
                debug!(identity_id = %identity.id, "replacing orphaned identity");
                store.delete_identity(identity.id).await?;
            }
            Some(_) => {
                warn!(account_id = %account.id, "identity already bound to another account");
                return Err(AuthError::IdentityBoundToOtherUser);
            }
            None => {}
        }

        let candidate = Identity::new(self.organization.id, self.provider(), uid, account.id);
        match store.insert_identity(&candidate).await? {
            Inserted::Created(identity) => {
                info!(account_id = %account.id, provider = %identity.provider, "identity bound");
                Ok(identity)
            }
            Inserted::Existing(identity) if identity.account_id == Some(account.id) => Ok(identity),
            Inserted::Existing(_) => {
                warn!(account_id = %account.id, "lost identity race to another account");
                Err(AuthError::IdentityBoundToOtherUser)
            }
        }
    }

    /// Ensure `Authorization(name, signature) → account`, refreshing its
    /// metadata and grant timestamp.
    pub async fn authorize_user(
        &self,
        store: &dyn Store,
        account: &Account,
    ) -> Result<Authorization, AuthError> {
        let signature = self
            .signature()
            .ok_or_else(|| AuthError::ValidationError("missing external uid".to_string()))?;
        let metadata = self.metadata();

        let existing = match store.find_authorization(AUTHORIZATION_NAME, signature).await? {
            Some(authorization) if authorization.account_id != account.id => {
                warn!(account_id = %account.id, "authorization already bound to another account");
                return Err(AuthError::AuthorizationBoundToOtherUser);
            }
            Some(authorization) => Some(authorization),
            None => {
                store
                    .find_authorization_for_account(AUTHORIZATION_NAME, account.id)
                    .await?
            }
        };

        let authorization = match existing {
            Some(authorization) => authorization,
            None => {
                let candidate =
                    Authorization::new(AUTHORIZATION_NAME, account.id, signature, metadata);
                match store.insert_authorization(&candidate).await? {
                    Inserted::Created(authorization) => {
                        info!(account_id = %account.id, "authorization granted");
                        return Ok(authorization);
                    }
                    Inserted::Existing(authorization) if authorization.account_id == account.id => {
                        authorization
                    }
                    Inserted::Existing(_) => {
                        warn!(account_id = %account.id, "lost authorization race to another account");
                        return Err(AuthError::AuthorizationBoundToOtherUser);
                    }
                }
            }
        };

        let mut authorization = authorization;
        authorization.unique_id = signature.to_string();
        authorization.metadata = self.metadata();
        authorization.grant(Utc::now());
        match store.update_authorization(&authorization).await {
            Ok(()) => Ok(authorization),
            Err(StoreError::Conflict(_)) => Err(AuthError::AuthorizationBoundToOtherUser),
            Err(err) => Err(err.into()),
        }
    }

    /// Whether the assertion's authentication method is on the strong
    /// allow-list.
    pub fn is_strong_provider(&self) -> bool {
        let Some(amr) = &self.assertion.raw_attributes.auth_method_ref else {
            return false;
        };
        amr.values().iter().any(|value| {
            self.config
                .strong_identity_providers
                .iter()
                .any(|strong| strong.trim().eq_ignore_ascii_case(value.trim()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawAttributes;
    use crate::store::InMemoryStore;

    fn config() -> TunnistamoConfig {
        let mut config = TunnistamoConfig::new("test-secret");
        config.strong_identity_providers = vec!["suomi_fi".into(), "heltunnistussuomifi".into()];
        config
    }

    fn assertion(uid: &str) -> Assertion {
        let raw = RawAttributes::with_subject(format!("subject-{uid}"))
            .claim("given_name", "Marja")
            .claim("family_name", "Mainio")
            .amr("suomi_fi");
        Assertion::new("tunnistamo", uid, raw)
    }

    #[test]
    fn validate_requires_person_identifier() {
        let config = config();
        let org = Organization::new("org.example");
        let mut assertion = assertion("uid-1");
        assertion.raw_attributes.subject_id = None;
        let auth = Authenticator::new(&config, &org, &assertion);
        assert!(matches!(auth.validate(), Err(AuthError::ValidationError(_))));
    }

    #[test]
    fn validate_rejects_foreign_provider() {
        let config = config();
        let org = Organization::new("org.example");
        let mut assertion = assertion("uid-1");
        assertion.provider = "facebook".into();
        let auth = Authenticator::new(&config, &org, &assertion);
        assert!(matches!(auth.validate(), Err(AuthError::ValidationError(_))));
    }

    #[test]
    fn placeholder_and_signature_are_deterministic() {
        let config = config();
        let org = Organization::new("org.example");
        let a = assertion("uid-1");
        let b = assertion("uid-1");
        let first = Authenticator::new(&config, &org, &a);
        let second = Authenticator::new(&config, &org, &b);

        assert_eq!(first.verified_email(), second.verified_email());
        assert_eq!(first.signature(), second.signature());
        let email = first.verified_email().unwrap();
        assert!(email.starts_with("tunnistamo-"));
        assert!(email.ends_with("@org.example"));
        assert!(first.is_placeholder_email(email));
    }

    #[test]
    fn different_uids_never_share_signature_or_placeholder() {
        let config = config();
        let org = Organization::new("org.example");
        let a = assertion("uid-1");
        let b = assertion("uid-2");
        let first = Authenticator::new(&config, &org, &a);
        let second = Authenticator::new(&config, &org, &b);

        assert_ne!(first.verified_email(), second.verified_email());
        assert_ne!(first.signature(), second.signature());
    }

    #[test]
    fn trusted_broker_email_is_used() {
        let config = config();
        let org = Organization::new("org.example");
        let mut a = assertion("uid-1");
        a.info.email = Some("Marja@Example.org".into());
        let auth = Authenticator::new(&config, &org, &a);
        assert_eq!(auth.verified_email(), Some("marja@example.org"));
        assert!(auth.email_confirmed());
    }

    #[test]
    fn confirm_emails_ignores_broker_email() {
        let mut config = config();
        config.confirm_emails = true;
        config.auto_email_domain = Some("users.example".into());
        let org = Organization::new("org.example");
        let mut a = assertion("uid-1");
        a.info.email = Some("marja@example.org".into());
        let auth = Authenticator::new(&config, &org, &a);

        let params = auth.registration_params().unwrap();
        assert!(params.email.ends_with("@users.example"));
        assert!(!params.email_confirmed);
        assert_eq!(params.unconfirmed_email.as_deref(), Some("marja@example.org"));
        assert_eq!(params.name, "Marja Mainio");
    }

    #[test]
    fn registration_params_need_an_external_uid() {
        let config = config();
        let org = Organization::new("org.example");
        let mut a = assertion("uid-1");
        a.external_uid = Some("  ".into());
        assert_eq!(Authenticator::new(&config, &org, &a).registration_params(), None);
        assert_eq!(
            Authenticator::new(&config, &org, &Assertion::default()).registration_params(),
            None
        );
    }

    #[test]
    fn strong_provider_matches_any_amr_value() {
        let config = config();
        let org = Organization::new("org.example");
        let mut a = assertion("uid-1");
        assert!(Authenticator::new(&config, &org, &a).is_strong_provider());

        a.raw_attributes = a.raw_attributes.amr(vec!["google", "HelTunnistusSuomiFi"]);
        assert!(Authenticator::new(&config, &org, &a).is_strong_provider());

        a.raw_attributes = a.raw_attributes.amr("google");
        assert!(!Authenticator::new(&config, &org, &a).is_strong_provider());
    }

    #[test]
    fn strong_provider_list_is_case_insensitive() {
        let mut config = config();
        config.strong_identity_providers = vec!["HelTunnistusSuomiFi".into()];
        let org = Organization::new("org.example");
        let mut a = assertion("uid-1");
        a.raw_attributes = a.raw_attributes.amr("heltunnistussuomifi");
        assert!(Authenticator::new(&config, &org, &a).is_strong_provider());

        a.raw_attributes = a.raw_attributes.amr("HELTUNNISTUSSUOMIFI");
        assert!(Authenticator::new(&config, &org, &a).is_strong_provider());
    }

    async fn seeded(store: &InMemoryStore, org: &Organization, email: &str) -> Account {
        let account = Account::new(org.id, email, "Someone");
        store.insert_account(&account).await.unwrap();
        account
    }

    #[tokio::test]
    async fn identify_user_is_idempotent() {
        let config = config();
        let org = Organization::new("org.example");
        let store = InMemoryStore::new();
        let account = seeded(&store, &org, "a@example.org").await;
        let a = assertion("uid-1");
        let auth = Authenticator::new(&config, &org, &a);

        let first = auth.identify_user(&store, &account).await.unwrap();
        let second = auth.identify_user(&store, &account).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn identify_user_refuses_other_account_and_replaces_orphans() {
        let config = config();
        let org = Organization::new("org.example");
        let store = InMemoryStore::new();
        let owner = seeded(&store, &org, "a@example.org").await;
        let intruder = seeded(&store, &org, "b@example.org").await;
        let a = assertion("uid-1");
        let auth = Authenticator::new(&config, &org, &a);

        auth.identify_user(&store, &owner).await.unwrap();
        assert!(matches!(
            auth.identify_user(&store, &intruder).await,
            Err(AuthError::IdentityBoundToOtherUser)
        ));

        store.delete_account(owner.id).await.unwrap();
        let identity = auth.identify_user(&store, &intruder).await.unwrap();
        assert_eq!(identity.account_id, Some(intruder.id));
    }

    #[tokio::test]
    async fn authorize_user_refreshes_grant_and_guards_signature() {
        let config = config();
        let org = Organization::new("org.example");
        let store = InMemoryStore::new();
        let owner = seeded(&store, &org, "a@example.org").await;
        let intruder = seeded(&store, &org, "b@example.org").await;
        let a = assertion("uid-1");
        let auth = Authenticator::new(&config, &org, &a);

        let first = auth.authorize_user(&store, &owner).await.unwrap();
        assert_eq!(first.metadata.given_name.as_deref(), Some("Marja"));
        let second = auth.authorize_user(&store, &owner).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.granted_at >= first.granted_at);
        assert_eq!(second.created_at, first.created_at);

        assert!(matches!(
            auth.authorize_user(&store, &intruder).await,
            Err(AuthError::AuthorizationBoundToOtherUser)
        ));
    }
}
