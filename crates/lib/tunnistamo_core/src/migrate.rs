//! Database migration support.
//!
//! Embeds and runs the SQL migrations from `tunnistamo_core/migrations/`
//! backing [`crate::store::PgStore`].

use sqlx::PgPool;

/// Run all embedded database migrations against the given pool.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
