//! Schema bootstrap and role seeding.

use sqlx::PgPool;
use tracing::info;

use villabook_auth::Role;

use crate::db::map_sqlx_error;
use crate::store::{RoleStore, StoreError};

const INIT: &str = include_str!("../migrations/0001_init.sql");

/// Apply the schema. Safe to run against an already initialised database.
pub async fn apply(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(INIT)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("apply_schema", e))?;
    info!("schema applied");
    Ok(())
}

/// Insert the default roles that are missing. Returns how many were inserted.
pub async fn seed_roles(roles: &dyn RoleStore) -> Result<usize, StoreError> {
    let mut inserted = 0;
    for role in Role::defaults() {
        if roles.ensure(&role).await? {
            info!(role = %role.name, level = %role.level, "seeded role");
            inserted += 1;
        }
    }
    Ok(inserted)
}
