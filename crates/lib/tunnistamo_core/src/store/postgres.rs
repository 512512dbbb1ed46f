//! PostgreSQL store.
//!
//! Uniqueness lives in the schema (see `migrations/`); unique violations are
//! translated back into [`StoreError`] variants by constraint name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;
use uuid::Uuid;

use super::{Inserted, Store, StoreError, StoreResult};
use crate::models::{Account, AccountId, Authorization, AuthorizationMetadata, Identity};
use crate::verification::resolution::MergePlan;

const EMAIL_KEY: &str = "accounts_organization_email_key";

const ACCOUNT_COLUMNS: &str = "id, organization_id, email, name, nickname, avatar_url, \
     unconfirmed_email, pending_email, confirmed_at, confirmation_token, email_code, \
     email_code_sent_at, failed_confirmation_attempts, managed, remember_created_at, created_at";

const IDENTITY_COLUMNS: &str = "id, organization_id, provider, uid, account_id, created_at";

const AUTHORIZATION_COLUMNS: &str =
    "id, name, account_id, unique_id, metadata, granted_at, created_at, updated_at";

#[derive(Debug, Clone, sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    organization_id: Uuid,
    email: String,
    name: String,
    nickname: Option<String>,
    avatar_url: Option<String>,
    unconfirmed_email: Option<String>,
    pending_email: Option<String>,
    confirmed_at: Option<DateTime<Utc>>,
    confirmation_token: Option<String>,
    email_code: Option<String>,
    email_code_sent_at: Option<DateTime<Utc>>,
    failed_confirmation_attempts: i32,
    managed: bool,
    remember_created_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: AccountId(row.id),
            organization_id: row.organization_id,
            email: row.email,
            name: row.name,
            nickname: row.nickname,
            avatar_url: row.avatar_url,
            unconfirmed_email: row.unconfirmed_email,
            pending_email: row.pending_email,
            confirmed_at: row.confirmed_at,
            confirmation_token: row.confirmation_token,
            email_code: row.email_code,
            email_code_sent_at: row.email_code_sent_at,
            failed_confirmation_attempts: u32::try_from(row.failed_confirmation_attempts)
                .unwrap_or_default(),
            managed: row.managed,
            remember_created_at: row.remember_created_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct IdentityRow {
    id: Uuid,
    organization_id: Uuid,
    provider: String,
    uid: String,
    account_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Identity {
            id: row.id,
            organization_id: row.organization_id,
            provider: row.provider,
            uid: row.uid,
            account_id: row.account_id.map(AccountId),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct AuthorizationRow {
    id: Uuid,
    name: String,
    account_id: Uuid,
    unique_id: String,
    metadata: serde_json::Value,
    granted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AuthorizationRow> for Authorization {
    type Error = StoreError;

    fn try_from(row: AuthorizationRow) -> Result<Self, Self::Error> {
        let metadata: AuthorizationMetadata = serde_json::from_value(row.metadata)?;
        Ok(Authorization {
            id: row.id,
            name: row.name,
            account_id: AccountId(row.account_id),
            unique_id: row.unique_id,
            metadata,
            granted_at: row.granted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Translate unique violations into domain errors.
fn map_db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err
        && db.is_unique_violation()
    {
        return match db.constraint() {
            Some(EMAIL_KEY) => StoreError::EmailTaken,
            Some(constraint) => StoreError::Conflict(constraint.to_string()),
            None => StoreError::Conflict(db.message().to_string()),
        };
    }
    StoreError::DbError(err)
}

fn bind_account_fields<'q>(
    query: Query<'q, Postgres, PgArguments>,
    account: &'q Account,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(account.id.0)
        .bind(account.organization_id)
        .bind(&account.email)
        .bind(&account.name)
        .bind(&account.nickname)
        .bind(&account.avatar_url)
        .bind(&account.unconfirmed_email)
        .bind(&account.pending_email)
        .bind(account.confirmed_at)
        .bind(&account.confirmation_token)
        .bind(&account.email_code)
        .bind(account.email_code_sent_at)
        .bind(i32::try_from(account.failed_confirmation_attempts).unwrap_or(i32::MAX))
        .bind(account.managed)
        .bind(account.remember_created_at)
        .bind(account.created_at)
}

const UPDATE_ACCOUNT: &str = "UPDATE accounts SET \
     organization_id = $2, email = $3, name = $4, nickname = $5, avatar_url = $6, \
     unconfirmed_email = $7, pending_email = $8, confirmed_at = $9, confirmation_token = $10, \
     email_code = $11, email_code_sent_at = $12, failed_confirmation_attempts = $13, \
     managed = $14, remember_created_at = $15, created_at = $16 \
     WHERE id = $1";

/// Store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO accounts ({ACCOUNT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        );
        bind_account_fields(sqlx::query(&sql), account)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn find_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    async fn find_account_by_email(
        &self,
        organization_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<Account>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE organization_id = $1 AND lower(email) = lower($2)"
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(organization_id)
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    async fn find_account_by_confirmation_token(
        &self,
        token: &str,
    ) -> StoreResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE confirmation_token = $1");
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    async fn update_account(&self, account: &Account) -> StoreResult<()> {
        let result = bind_account_fields(sqlx::query(UPDATE_ACCOUNT), account)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("account {}", account.id)));
        }
        Ok(())
    }

    async fn consume_attempt(&self, id: AccountId, max: u32) -> StoreResult<Option<u32>> {
        let attempts = sqlx::query_scalar::<_, i32>(
            "UPDATE accounts SET failed_confirmation_attempts = failed_confirmation_attempts + 1 \
             WHERE id = $1 AND failed_confirmation_attempts < $2 \
             RETURNING failed_confirmation_attempts",
        )
        .bind(id.0)
        .bind(i64::from(max))
        .fetch_optional(&self.pool)
        .await?;
        if let Some(attempts) = attempts {
            return Ok(Some(u32::try_from(attempts).unwrap_or_default()));
        }

        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM accounts WHERE id = $1)")
                .bind(id.0)
                .fetch_one(&self.pool)
                .await?;
        if exists {
            Ok(None)
        } else {
            Err(StoreError::NotFound(format!("account {id}")))
        }
    }

    async fn delete_account(&self, id: AccountId) -> StoreResult<()> {
        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_identity(
        &self,
        organization_id: Uuid,
        provider: &str,
        uid: &str,
    ) -> StoreResult<Option<Identity>> {
        let sql = format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities \
             WHERE organization_id = $1 AND provider = $2 AND uid = $3"
        );
        let row = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(organization_id)
            .bind(provider)
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Identity::from))
    }

    async fn find_identity_for_account(
        &self,
        organization_id: Uuid,
        provider: &str,
        account_id: AccountId,
    ) -> StoreResult<Option<Identity>> {
        let sql = format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities \
             WHERE organization_id = $1 AND provider = $2 AND account_id = $3 \
             ORDER BY created_at LIMIT 1"
        );
        let row = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(organization_id)
            .bind(provider)
            .bind(account_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Identity::from))
    }

    async fn insert_identity(&self, identity: &Identity) -> StoreResult<Inserted<Identity>> {
        let mut tx = self.pool.begin().await?;

        // Shares the owner row lock that `apply_merge` takes exclusively.
        if let Some(account_id) = identity.account_id {
            sqlx::query("SELECT id FROM accounts WHERE id = $1 FOR SHARE")
                .bind(account_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        }

        let sql = format!(
            "INSERT INTO identities ({IDENTITY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (organization_id, provider, uid) DO NOTHING \
             RETURNING {IDENTITY_COLUMNS}"
        );
        let created = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(identity.id)
            .bind(identity.organization_id)
            .bind(&identity.provider)
            .bind(&identity.uid)
            .bind(identity.account_id.map(|a| a.0))
            .bind(identity.created_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_error)?;
        tx.commit().await?;

        if let Some(row) = created {
            return Ok(Inserted::Created(row.into()));
        }
        self.find_identity(identity.organization_id, &identity.provider, &identity.uid)
            .await?
            .map(Inserted::Existing)
            .ok_or_else(|| StoreError::Conflict(format!("identity {} vanished", identity.uid)))
    }

    async fn delete_identity(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM identities WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_authorization(
        &self,
        name: &str,
        unique_id: &str,
    ) -> StoreResult<Option<Authorization>> {
        let sql = format!(
            "SELECT {AUTHORIZATION_COLUMNS} FROM authorizations \
             WHERE name = $1 AND unique_id = $2"
        );
        sqlx::query_as::<_, AuthorizationRow>(&sql)
            .bind(name)
            .bind(unique_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Authorization::try_from)
            .transpose()
    }

    async fn find_authorization_for_account(
        &self,
        name: &str,
        account_id: AccountId,
    ) -> StoreResult<Option<Authorization>> {
        let sql = format!(
            "SELECT {AUTHORIZATION_COLUMNS} FROM authorizations \
             WHERE name = $1 AND account_id = $2"
        );
        sqlx::query_as::<_, AuthorizationRow>(&sql)
            .bind(name)
            .bind(account_id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(Authorization::try_from)
            .transpose()
    }

    async fn insert_authorization(
        &self,
        authorization: &Authorization,
    ) -> StoreResult<Inserted<Authorization>> {
        let sql = format!(
            "INSERT INTO authorizations ({AUTHORIZATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (name, unique_id) DO NOTHING \
             RETURNING {AUTHORIZATION_COLUMNS}"
        );
        let created = sqlx::query_as::<_, AuthorizationRow>(&sql)
            .bind(authorization.id)
            .bind(&authorization.name)
            .bind(authorization.account_id.0)
            .bind(&authorization.unique_id)
            .bind(serde_json::to_value(&authorization.metadata)?)
            .bind(authorization.granted_at)
            .bind(authorization.created_at)
            .bind(authorization.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        if let Some(row) = created {
            return Ok(Inserted::Created(row.try_into()?));
        }
        self.find_authorization(&authorization.name, &authorization.unique_id)
            .await?
            .map(Inserted::Existing)
            .ok_or_else(|| {
                StoreError::Conflict(format!("authorization {} vanished", authorization.name))
            })
    }

    async fn update_authorization(&self, authorization: &Authorization) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE authorizations SET unique_id = $2, metadata = $3, granted_at = $4, \
             updated_at = $5 WHERE id = $1",
        )
        .bind(authorization.id)
        .bind(&authorization.unique_id)
        .bind(serde_json::to_value(&authorization.metadata)?)
        .bind(authorization.granted_at)
        .bind(authorization.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "authorization {}",
                authorization.id
            )));
        }
        Ok(())
    }

    async fn apply_merge(&self, plan: &MergePlan) -> StoreResult<()> {
        let target = &plan.target;
        let mut tx = self.pool.begin().await?;

        // Lock both accounts in a stable order. Identity and authorization
        // writes for either account wait on these row locks.
        let locked = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM accounts WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(vec![plan.provisional_id.0, target.id.0])
        .fetch_all(&mut *tx)
        .await?;
        if locked.len() != 2 {
            return Err(StoreError::NotFound(format!(
                "merge of {} into {}",
                plan.provisional_id, target.id
            )));
        }

        let target_bound = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM identities \
                 WHERE organization_id = $1 AND provider = $2 AND account_id = $3) \
             OR EXISTS(SELECT 1 FROM authorizations WHERE name = $4 AND account_id = $3)",
        )
        .bind(target.organization_id)
        .bind(&plan.provider)
        .bind(target.id.0)
        .bind(&plan.authorization_name)
        .fetch_one(&mut *tx)
        .await?;
        if target_bound {
            return Err(StoreError::Conflict(format!(
                "account {} is already bound to {}",
                target.id, plan.provider
            )));
        }

        if let Some(identity_id) = plan.identity_id {
            sqlx::query("UPDATE identities SET account_id = $2 WHERE id = $1")
                .bind(identity_id)
                .bind(target.id.0)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(authorization_id) = plan.authorization_id {
            sqlx::query(
                "UPDATE authorizations SET account_id = $2, updated_at = now() WHERE id = $1",
            )
            .bind(authorization_id)
            .bind(target.id.0)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        }

        bind_account_fields(sqlx::query(UPDATE_ACCOUNT), target)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(plan.provisional_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_row_converts_attempt_counter() {
        let now = Utc::now();
        let row = AccountRow {
            id: Uuid::now_v7(),
            organization_id: Uuid::now_v7(),
            email: "a@example.org".into(),
            name: "A".into(),
            nickname: None,
            avatar_url: None,
            unconfirmed_email: None,
            pending_email: None,
            confirmed_at: None,
            confirmation_token: None,
            email_code: None,
            email_code_sent_at: None,
            failed_confirmation_attempts: 3,
            managed: false,
            remember_created_at: None,
            created_at: now,
        };
        let account = Account::from(row);
        assert_eq!(account.failed_confirmation_attempts, 3);
        assert_eq!(account.created_at, now);
    }

    #[test]
    fn authorization_row_rejects_malformed_metadata() {
        let now = Utc::now();
        let row = AuthorizationRow {
            id: Uuid::now_v7(),
            name: "tunnistamo_idp".into(),
            account_id: Uuid::now_v7(),
            unique_id: "sig".into(),
            metadata: serde_json::json!("not an object"),
            granted_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(
            Authorization::try_from(row),
            Err(StoreError::Serialization(_))
        ));
    }
}
