//! Role repository
//!
//! Role rows, the permissions attached to them and user assignments.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Permission, PermissionSet, Role};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlPool, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

const SELECT_ROLE_PERMISSIONS: &str =
    "SELECT permission FROM role_permissions WHERE role_slug = ? ORDER BY permission";

const SELECT_USER_ROLES: &str =
    "SELECT role_slug FROM user_roles WHERE user_id = ? ORDER BY role_slug";

const SELECT_USER_PERMISSIONS: &str = r#"
    SELECT DISTINCT rp.permission
    FROM user_roles ur
    INNER JOIN role_permissions rp ON rp.role_slug = ur.role_slug
    WHERE ur.user_id = ?
"#;

#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Get-or-create the role row and make its permissions exactly
    /// `role.default_permissions()`
    async fn sync_role(&self, role: Role) -> Result<()>;

    /// Permissions currently attached to a role
    async fn role_permissions(&self, role: Role) -> Result<PermissionSet>;

    /// Roles assigned to a user
    async fn roles_for_user(&self, user_id: i64) -> Result<Vec<Role>>;

    /// Union of the permissions of every role assigned to a user
    async fn permissions_for_user(&self, user_id: i64) -> Result<PermissionSet>;

    /// Replace a user's role assignments
    async fn set_user_roles(&self, user_id: i64, roles: &[Role]) -> Result<()>;
}

pub struct SqlxRoleRepository {
    pool: DynDatabasePool,
}

impl SqlxRoleRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn RoleRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl RoleRepository for SqlxRoleRepository {
    async fn sync_role(&self, role: Role) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sync_role_sqlite(self.pool.sqlite_pool()?, role).await,
            DatabaseDriver::Mysql => sync_role_mysql(self.pool.mysql_pool()?, role).await,
        }
    }

    async fn role_permissions(&self, role: Role) -> Result<PermissionSet> {
        let codenames: Vec<String> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(SELECT_ROLE_PERMISSIONS)
                .bind(role.slug())
                .fetch_all(self.pool.sqlite_pool()?)
                .await,
            DatabaseDriver::Mysql => sqlx::query_scalar(SELECT_ROLE_PERMISSIONS)
                .bind(role.slug())
                .fetch_all(self.pool.mysql_pool()?)
                .await,
        }
        .context("Failed to load role permissions")?;

        Ok(parse_permissions(&codenames))
    }

    async fn roles_for_user(&self, user_id: i64) -> Result<Vec<Role>> {
        let slugs: Vec<String> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(SELECT_USER_ROLES)
                .bind(user_id)
                .fetch_all(self.pool.sqlite_pool()?)
                .await,
            DatabaseDriver::Mysql => sqlx::query_scalar(SELECT_USER_ROLES)
                .bind(user_id)
                .fetch_all(self.pool.mysql_pool()?)
                .await,
        }
        .context("Failed to load user roles")?;

        let mut roles: Vec<Role> = slugs
            .iter()
            .filter_map(|slug| match Role::from_str(slug) {
                Ok(role) => Some(role),
                Err(_) => {
                    tracing::warn!("Ignoring unknown role '{}' of user {}", slug, user_id);
                    None
                }
            })
            .collect();
        roles.sort();
        Ok(roles)
    }

    async fn permissions_for_user(&self, user_id: i64) -> Result<PermissionSet> {
        let codenames: Vec<String> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(SELECT_USER_PERMISSIONS)
                .bind(user_id)
                .fetch_all(self.pool.sqlite_pool()?)
                .await,
            DatabaseDriver::Mysql => sqlx::query_scalar(SELECT_USER_PERMISSIONS)
                .bind(user_id)
                .fetch_all(self.pool.mysql_pool()?)
                .await,
        }
        .context("Failed to load user permissions")?;

        Ok(parse_permissions(&codenames))
    }

    async fn set_user_roles(&self, user_id: i64, roles: &[Role]) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                set_user_roles_sqlite(self.pool.sqlite_pool()?, user_id, roles).await
            }
            DatabaseDriver::Mysql => {
                set_user_roles_mysql(self.pool.mysql_pool()?, user_id, roles).await
            }
        }
    }
}

fn parse_permissions(codenames: &[String]) -> PermissionSet {
    codenames
        .iter()
        .filter_map(|c| Permission::from_str(c).ok())
        .collect()
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn sync_role_sqlite(pool: &SqlitePool, role: Role) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query(
        "INSERT INTO roles (slug, name) VALUES (?, ?) ON CONFLICT(slug) DO UPDATE SET name = excluded.name",
    )
    .bind(role.slug())
    .bind(role.display_name())
    .execute(&mut *tx)
    .await
    .context("Failed to upsert role")?;

    sqlx::query("DELETE FROM role_permissions WHERE role_slug = ?")
        .bind(role.slug())
        .execute(&mut *tx)
        .await
        .context("Failed to clear role permissions")?;

    for permission in role.default_permissions() {
        sqlx::query("INSERT INTO role_permissions (role_slug, permission) VALUES (?, ?)")
            .bind(role.slug())
            .bind(permission.codename())
            .execute(&mut *tx)
            .await
            .context("Failed to attach permission")?;
    }

    tx.commit().await.context("Failed to commit role sync")?;
    Ok(())
}

async fn set_user_roles_sqlite(pool: &SqlitePool, user_id: i64, roles: &[Role]) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to clear user roles")?;

    for role in roles {
        sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_slug) VALUES (?, ?)")
            .bind(user_id)
            .bind(role.slug())
            .execute(&mut *tx)
            .await
            .context("Failed to assign role")?;
    }

    tx.commit().await.context("Failed to commit role assignment")?;
    Ok(())
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn sync_role_mysql(pool: &MySqlPool, role: Role) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("INSERT INTO roles (slug, name) VALUES (?, ?) ON DUPLICATE KEY UPDATE name = VALUES(name)")
        .bind(role.slug())
        .bind(role.display_name())
        .execute(&mut *tx)
        .await
        .context("Failed to upsert role")?;

    sqlx::query("DELETE FROM role_permissions WHERE role_slug = ?")
        .bind(role.slug())
        .execute(&mut *tx)
        .await
        .context("Failed to clear role permissions")?;

    for permission in role.default_permissions() {
        sqlx::query("INSERT INTO role_permissions (role_slug, permission) VALUES (?, ?)")
            .bind(role.slug())
            .bind(permission.codename())
            .execute(&mut *tx)
            .await
            .context("Failed to attach permission")?;
    }

    tx.commit().await.context("Failed to commit role sync")?;
    Ok(())
}

async fn set_user_roles_mysql(pool: &MySqlPool, user_id: i64, roles: &[Role]) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to clear user roles")?;

    for role in roles {
        sqlx::query("INSERT IGNORE INTO user_roles (user_id, role_slug) VALUES (?, ?)")
            .bind(user_id)
            .bind(role.slug())
            .execute(&mut *tx)
            .await
            .context("Failed to assign role")?;
    }

    tx.commit().await.context("Failed to commit role assignment")?;
    Ok(())
}
