//! In-memory store for tests, the CLI and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Inserted, Store, StoreError, StoreResult};
use crate::models::{Account, AccountId, Authorization, Identity};
use crate::verification::resolution::MergePlan;

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    identities: HashMap<Uuid, Identity>,
    authorizations: HashMap<Uuid, Authorization>,
}

impl Tables {
    fn email_owner(&self, organization_id: Uuid, email: &str) -> Option<&Account> {
        self.accounts
            .values()
            .find(|a| a.organization_id == organization_id && a.email.eq_ignore_ascii_case(email))
    }

    fn check_email_free(&self, account: &Account) -> StoreResult<()> {
        match self.email_owner(account.organization_id, &account.email) {
            Some(owner) if owner.id != account.id => Err(StoreError::EmailTaken),
            _ => Ok(()),
        }
    }

    fn remove_account(&mut self, id: AccountId) {
        self.accounts.remove(&id);
        for identity in self.identities.values_mut() {
            if identity.account_id == Some(id) {
                identity.account_id = None;
            }
        }
        self.authorizations.retain(|_, a| a.account_id != id);
    }
}

/// Store backed by hash maps behind a single lock.
///
/// Every operation takes the lock once, so conditional inserts and merges
/// are atomic with respect to each other.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.accounts.contains_key(&account.id) {
            return Err(StoreError::Conflict(format!("account {} exists", account.id)));
        }
        tables.check_email_free(account)?;
        tables.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn find_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_email(
        &self,
        organization_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables.email_owner(organization_id, email.trim()).cloned())
    }

    async fn find_account_by_confirmation_token(
        &self,
        token: &str,
    ) -> StoreResult<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .find(|a| a.confirmation_token.as_deref() == Some(token))
            .cloned())
    }

    async fn update_account(&self, account: &Account) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.accounts.contains_key(&account.id) {
            return Err(StoreError::NotFound(format!("account {}", account.id)));
        }
        tables.check_email_free(account)?;
        tables.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn consume_attempt(&self, id: AccountId, max: u32) -> StoreResult<Option<u32>> {
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;
        if account.failed_confirmation_attempts >= max {
            return Ok(None);
        }
        account.failed_confirmation_attempts += 1;
        Ok(Some(account.failed_confirmation_attempts))
    }

    async fn delete_account(&self, id: AccountId) -> StoreResult<()> {
        self.tables.write().await.remove_account(id);
        Ok(())
    }

    async fn find_identity(
        &self,
        organization_id: Uuid,
        provider: &str,
        uid: &str,
    ) -> StoreResult<Option<Identity>> {
        let tables = self.tables.read().await;
        Ok(tables
            .identities
            .values()
            .find(|i| i.organization_id == organization_id && i.provider == provider && i.uid == uid)
            .cloned())
    }

    async fn find_identity_for_account(
        &self,
        organization_id: Uuid,
        provider: &str,
        account_id: AccountId,
    ) -> StoreResult<Option<Identity>> {
        let tables = self.tables.read().await;
        Ok(tables
            .identities
            .values()
            .filter(|i| {
                i.organization_id == organization_id
                    && i.provider == provider
                    && i.account_id == Some(account_id)
            })
            .min_by_key(|i| i.created_at)
            .cloned())
    }

    async fn insert_identity(&self, identity: &Identity) -> StoreResult<Inserted<Identity>> {
        let mut tables = self.tables.write().await;
        let existing = tables.identities.values().find(|i| {
            i.organization_id == identity.organization_id
                && i.provider == identity.provider
                && i.uid == identity.uid
        });
        if let Some(existing) = existing {
            return Ok(Inserted::Existing(existing.clone()));
        }
        tables.identities.insert(identity.id, identity.clone());
        Ok(Inserted::Created(identity.clone()))
    }

    async fn delete_identity(&self, id: Uuid) -> StoreResult<()> {
        self.tables.write().await.identities.remove(&id);
        Ok(())
    }

    async fn find_authorization(
        &self,
        name: &str,
        unique_id: &str,
    ) -> StoreResult<Option<Authorization>> {
        let tables = self.tables.read().await;
        Ok(tables
            .authorizations
            .values()
            .find(|a| a.name == name && a.unique_id == unique_id)
            .cloned())
    }

    async fn find_authorization_for_account(
        &self,
        name: &str,
        account_id: AccountId,
    ) -> StoreResult<Option<Authorization>> {
        let tables = self.tables.read().await;
        Ok(tables
            .authorizations
            .values()
            .find(|a| a.name == name && a.account_id == account_id)
            .cloned())
    }

    async fn insert_authorization(
        &self,
        authorization: &Authorization,
    ) -> StoreResult<Inserted<Authorization>> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .authorizations
            .values()
            .find(|a| a.name == authorization.name && a.unique_id == authorization.unique_id)
        {
            return Ok(Inserted::Existing(existing.clone()));
        }
        if tables
            .authorizations
            .values()
            .any(|a| a.name == authorization.name && a.account_id == authorization.account_id)
        {
            return Err(StoreError::Conflict(format!(
                "account {} already holds {}",
                authorization.account_id, authorization.name
            )));
        }
        tables
            .authorizations
            .insert(authorization.id, authorization.clone());
        Ok(Inserted::Created(authorization.clone()))
    }

    async fn update_authorization(&self, authorization: &Authorization) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.authorizations.contains_key(&authorization.id) {
            return Err(StoreError::NotFound(format!(
                "authorization {}",
                authorization.id
            )));
        }
        let clash = tables.authorizations.values().any(|a| {
            a.id != authorization.id
                && a.name == authorization.name
                && a.unique_id == authorization.unique_id
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "{} signature already bound",
                authorization.name
            )));
        }
        tables
            .authorizations
            .insert(authorization.id, authorization.clone());
        Ok(())
    }

    async fn apply_merge(&self, plan: &MergePlan) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let target = &plan.target;

        if !tables.accounts.contains_key(&target.id) {
            return Err(StoreError::NotFound(format!("account {}", target.id)));
        }
        if !tables.accounts.contains_key(&plan.provisional_id) {
            return Err(StoreError::NotFound(format!(
                "account {}",
                plan.provisional_id
            )));
        }
        let target_bound = tables.identities.values().any(|i| {
            i.organization_id == target.organization_id
                && i.provider == plan.provider
                && i.account_id == Some(target.id)
        }) || tables
            .authorizations
            .values()
            .any(|a| a.name == plan.authorization_name && a.account_id == target.id);
        if target_bound {
            return Err(StoreError::Conflict(format!(
                "account {} is already bound to {}",
                target.id, plan.provider
            )));
        }
        tables.check_email_free(target)?;

        if let Some(id) = plan.identity_id
            && let Some(identity) = tables.identities.get_mut(&id)
        {
            identity.account_id = Some(target.id);
        }
        if let Some(id) = plan.authorization_id
            && let Some(authorization) = tables.authorizations.get_mut(&id)
        {
            authorization.account_id = target.id;
            authorization.updated_at = Utc::now();
        }
        tables.accounts.insert(target.id, target.clone());
        tables.remove_account(plan.provisional_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::models::{AUTHORIZATION_NAME, AuthorizationMetadata};

    fn org() -> Uuid {
        Uuid::now_v7()
    }

    #[tokio::test]
    async fn email_is_unique_per_organization_case_insensitively() {
        let store = InMemoryStore::new();
        let org = org();
        store
            .insert_account(&Account::new(org, "Marja@Example.org", "Marja"))
            .await
            .unwrap();

        let clash = store
            .insert_account(&Account::new(org, "marja@example.org", "Other"))
            .await;
        assert!(matches!(clash, Err(StoreError::EmailTaken)));

        store
            .insert_account(&Account::new(Uuid::now_v7(), "marja@example.org", "Elsewhere"))
            .await
            .unwrap();

        let found = store
            .find_account_by_email(org, "MARJA@example.ORG")
            .await
            .unwrap();
        assert_eq!(found.map(|a| a.name), Some("Marja".to_string()));
    }

    #[tokio::test]
    async fn concurrent_identity_inserts_keep_the_first_writer() {
        let store = InMemoryStore::new();
        let org = org();
        let a = Identity::new(org, "tunnistamo", "uid-1", AccountId::new());
        let b = Identity::new(org, "tunnistamo", "uid-1", AccountId::new());

        let (ra, rb) = tokio::join!(store.insert_identity(&a), store.insert_identity(&b));
        let results = [ra.unwrap(), rb.unwrap()];
        let created = results
            .iter()
            .filter(|r| matches!(r, Inserted::Created(_)))
            .count();
        assert_eq!(created, 1);

        let winner = results[0].clone().into_inner();
        assert_eq!(winner, results[1].clone().into_inner());
    }

    #[tokio::test]
    async fn authorization_is_unique_per_account() {
        let store = InMemoryStore::new();
        let account = AccountId::new();
        let first = Authorization::new(AUTHORIZATION_NAME, account, "sig-1", Default::default());
        let second = Authorization::new(AUTHORIZATION_NAME, account, "sig-2", Default::default());

        assert!(matches!(
            store.insert_authorization(&first).await.unwrap(),
            Inserted::Created(_)
        ));
        assert!(matches!(
            store.insert_authorization(&second).await,
            Err(StoreError::Conflict(_))
        ));
        let again = Authorization::new(AUTHORIZATION_NAME, AccountId::new(), "sig-1", Default::default());
        assert_eq!(
            store.insert_authorization(&again).await.unwrap(),
            Inserted::Existing(first)
        );
    }

    #[tokio::test]
    async fn deleting_an_account_orphans_identities() {
        let store = InMemoryStore::new();
        let org = org();
        let account = Account::new(org, "a@example.org", "A");
        store.insert_account(&account).await.unwrap();
        let identity = Identity::new(org, "tunnistamo", "uid", account.id);
        store.insert_identity(&identity).await.unwrap();
        let authorization =
            Authorization::new(AUTHORIZATION_NAME, account.id, "sig", Default::default());
        store.insert_authorization(&authorization).await.unwrap();

        store.delete_account(account.id).await.unwrap();

        let orphan = store
            .find_identity(org, "tunnistamo", "uid")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(orphan.account_id, None);
        assert!(
            store
                .find_authorization(AUTHORIZATION_NAME, "sig")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn attempts_stop_at_budget() {
        let store = InMemoryStore::new();
        let account = Account::new(org(), "a@example.org", "A");
        store.insert_account(&account).await.unwrap();
        assert_eq!(store.consume_attempt(account.id, 2).await.unwrap(), Some(1));
        assert_eq!(store.consume_attempt(account.id, 2).await.unwrap(), Some(2));
        assert_eq!(store.consume_attempt(account.id, 2).await.unwrap(), None);
        assert_eq!(
            store
                .find_account(account.id)
                .await
                .unwrap()
                .unwrap()
                .failed_confirmation_attempts,
            2
        );
        assert!(matches!(
            store.consume_attempt(AccountId::new(), 2).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_attempts_never_exceed_budget() {
        let store = Arc::new(InMemoryStore::new());
        let account = Account::new(org(), "a@example.org", "A");
        store.insert_account(&account).await.unwrap();

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let store = store.clone();
                let id = account.id;
                tokio::spawn(async move { store.consume_attempt(id, 20).await.unwrap() })
            })
            .collect();
        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                granted += 1;
            }
        }
        assert_eq!(granted, 20);
    }

    async fn seeded_merge(store: &InMemoryStore) -> (MergePlan, Uuid) {
        let org = org();
        let provisional = Account::new(org, "tunnistamo-x@org.example", "Marja");
        let target = Account::new(org, "marja@example.org", "Marja M.");
        store.insert_account(&provisional).await.unwrap();
        store.insert_account(&target).await.unwrap();
        let identity = Identity::new(org, "tunnistamo", "uid", provisional.id);
        store.insert_identity(&identity).await.unwrap();
        let authorization = Authorization::new(
            AUTHORIZATION_NAME,
            provisional.id,
            "sig",
            AuthorizationMetadata::default(),
        );
        store.insert_authorization(&authorization).await.unwrap();

        let mut confirmed = target.clone();
        confirmed.confirm(Utc::now());
        let plan = MergePlan {
            provisional_id: provisional.id,
            target: confirmed,
            identity_id: Some(identity.id),
            authorization_id: Some(authorization.id),
            provider: "tunnistamo".into(),
            authorization_name: AUTHORIZATION_NAME.into(),
        };
        (plan, org)
    }

    #[tokio::test]
    async fn merge_repoints_bindings_and_removes_provisional() {
        let store = InMemoryStore::new();
        let (plan, org) = seeded_merge(&store).await;

        store.apply_merge(&plan).await.unwrap();

        assert!(store.find_account(plan.provisional_id).await.unwrap().is_none());
        let target = store.find_account(plan.target.id).await.unwrap().unwrap();
        assert!(target.is_confirmed());
        let identity = store
            .find_identity(org, "tunnistamo", "uid")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.account_id, Some(plan.target.id));
        let authorization = store
            .find_authorization(AUTHORIZATION_NAME, "sig")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(authorization.account_id, plan.target.id);
    }

    #[tokio::test]
    async fn merge_refuses_target_bound_meanwhile() {
        let store = InMemoryStore::new();
        let (plan, org) = seeded_merge(&store).await;
        store
            .insert_identity(&Identity::new(org, "tunnistamo", "uid-other", plan.target.id))
            .await
            .unwrap();

        let result = store.apply_merge(&plan).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert!(store.find_account(plan.provisional_id).await.unwrap().is_some());
        let target = store.find_account(plan.target.id).await.unwrap().unwrap();
        assert!(!target.is_confirmed());
    }
}
