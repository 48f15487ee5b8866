//! User repository
//!
//! Account rows. Creating a user also creates its profile row and initial
//! role assignments in the same transaction.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Role, User, UserStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user together with an empty profile and the given roles
    async fn create(&self, user: &User, roles: &[Role]) -> Result<User>;

    /// Get user by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Get user by username
    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Get user by email
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Update a user's account fields
    async fn update(&self, user: &User) -> Result<User>;

    /// Delete a user
    async fn delete(&self, id: i64) -> Result<()>;

    /// Count total users
    async fn count(&self) -> Result<i64>;
}

/// SQLx-based user repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User, roles: &[Role]) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_user_sqlite(self.pool.sqlite_pool()?, user, roles).await,
            DatabaseDriver::Mysql => create_user_mysql(self.pool.mysql_pool()?, user, roles).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_user_by_id_sqlite(self.pool.sqlite_pool()?, id).await,
            DatabaseDriver::Mysql => get_user_by_id_mysql(self.pool.mysql_pool()?, id).await,
        }
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_user_by_username_sqlite(self.pool.sqlite_pool()?, username).await
            }
            DatabaseDriver::Mysql => {
                get_user_by_username_mysql(self.pool.mysql_pool()?, username).await
            }
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_user_by_email_sqlite(self.pool.sqlite_pool()?, email).await,
            DatabaseDriver::Mysql => get_user_by_email_mysql(self.pool.mysql_pool()?, email).await,
        }
    }

    async fn update(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_user_sqlite(self.pool.sqlite_pool()?, user).await,
            DatabaseDriver::Mysql => update_user_mysql(self.pool.mysql_pool()?, user).await,
        }
    }

    async fn delete(&self, id: i64) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_user_sqlite(self.pool.sqlite_pool()?, id).await,
            DatabaseDriver::Mysql => delete_user_mysql(self.pool.mysql_pool()?, id).await,
        }
    }

    async fn count(&self) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => count_users_sqlite(self.pool.sqlite_pool()?).await,
            DatabaseDriver::Mysql => count_users_mysql(self.pool.mysql_pool()?).await,
        }
    }
}

fn parse_status(raw: &str) -> UserStatus {
    UserStatus::from_str(raw).unwrap_or_default()
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_user_sqlite(pool: &SqlitePool, user: &User, roles: &[Role]) -> Result<User> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, first_name, last_name, date_of_birth,
                           is_staff, is_superuser, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(user.date_of_birth)
    .bind(user.is_staff)
    .bind(user.is_superuser)
    .bind(user.status.to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to create user")?;

    let id = result.last_insert_rowid();

    sqlx::query("INSERT INTO profiles (user_id, bio, profile_picture, updated_at) VALUES (?, '', NULL, ?)")
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to create profile")?;

    for role in roles {
        sqlx::query("INSERT INTO user_roles (user_id, role_slug) VALUES (?, ?)")
            .bind(id)
            .bind(role.slug())
            .execute(&mut *tx)
            .await
            .context("Failed to assign role")?;
    }

    tx.commit().await.context("Failed to commit user creation")?;

    Ok(User {
        id,
        created_at: now,
        updated_at: now,
        ..user.clone()
    })
}

async fn get_user_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query(
        r#"
        SELECT id, username, email, password_hash, first_name, last_name, date_of_birth,
               is_staff, is_superuser, status, created_at, updated_at
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get user by ID")?;

    row.as_ref().map(row_to_user_sqlite).transpose()
}

async fn get_user_by_username_sqlite(pool: &SqlitePool, username: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        r#"
        SELECT id, username, email, password_hash, first_name, last_name, date_of_birth,
               is_staff, is_superuser, status, created_at, updated_at
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(username)
    .fetch_optional(pool)
    .await
    .context("Failed to get user by username")?;

    row.as_ref().map(row_to_user_sqlite).transpose()
}

async fn get_user_by_email_sqlite(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        r#"
        SELECT id, username, email, password_hash, first_name, last_name, date_of_birth,
               is_staff, is_superuser, status, created_at, updated_at
        FROM users
        WHERE LOWER(email) = LOWER(?)
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await
    .context("Failed to get user by email")?;

    row.as_ref().map(row_to_user_sqlite).transpose()
}

async fn update_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    sqlx::query(
        r#"
        UPDATE users
        SET email = ?, password_hash = ?, first_name = ?, last_name = ?, date_of_birth = ?,
            is_staff = ?, is_superuser = ?, status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(user.date_of_birth)
    .bind(user.is_staff)
    .bind(user.is_superuser)
    .bind(user.status.to_string())
    .bind(Utc::now())
    .bind(user.id)
    .execute(pool)
    .await
    .context("Failed to update user")?;

    get_user_by_id_sqlite(pool, user.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found after update"))
}

async fn delete_user_sqlite(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete user")?;

    Ok(())
}

async fn count_users_sqlite(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as count FROM users")
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;

    Ok(row.get("count"))
}

fn row_to_user_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    let status: String = row.try_get("status")?;

    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        date_of_birth: row.try_get("date_of_birth")?,
        is_staff: row.try_get("is_staff")?,
        is_superuser: row.try_get("is_superuser")?,
        status: parse_status(&status),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_user_mysql(pool: &MySqlPool, user: &User, roles: &[Role]) -> Result<User> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, first_name, last_name, date_of_birth,
                           is_staff, is_superuser, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(user.date_of_birth)
    .bind(user.is_staff)
    .bind(user.is_superuser)
    .bind(user.status.to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to create user")?;

    let id = result.last_insert_id() as i64;

    sqlx::query("INSERT INTO profiles (user_id, bio, profile_picture, updated_at) VALUES (?, '', NULL, ?)")
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to create profile")?;

    for role in roles {
        sqlx::query("INSERT INTO user_roles (user_id, role_slug) VALUES (?, ?)")
            .bind(id)
            .bind(role.slug())
            .execute(&mut *tx)
            .await
            .context("Failed to assign role")?;
    }

    tx.commit().await.context("Failed to commit user creation")?;

    Ok(User {
        id,
        created_at: now,
        updated_at: now,
        ..user.clone()
    })
}

async fn get_user_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query(
        r#"
        SELECT id, username, email, password_hash, first_name, last_name, date_of_birth,
               is_staff, is_superuser, status, created_at, updated_at
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get user by ID")?;

    row.as_ref().map(row_to_user_mysql).transpose()
}

async fn get_user_by_username_mysql(pool: &MySqlPool, username: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        r#"
        SELECT id, username, email, password_hash, first_name, last_name, date_of_birth,
               is_staff, is_superuser, status, created_at, updated_at
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(username)
    .fetch_optional(pool)
    .await
    .context("Failed to get user by username")?;

    row.as_ref().map(row_to_user_mysql).transpose()
}

async fn get_user_by_email_mysql(pool: &MySqlPool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        r#"
        SELECT id, username, email, password_hash, first_name, last_name, date_of_birth,
               is_staff, is_superuser, status, created_at, updated_at
        FROM users
        WHERE LOWER(email) = LOWER(?)
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await
    .context("Failed to get user by email")?;

    row.as_ref().map(row_to_user_mysql).transpose()
}

async fn update_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    sqlx::query(
        r#"
        UPDATE users
        SET email = ?, password_hash = ?, first_name = ?, last_name = ?, date_of_birth = ?,
            is_staff = ?, is_superuser = ?, status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(user.date_of_birth)
    .bind(user.is_staff)
    .bind(user.is_superuser)
    .bind(user.status.to_string())
    .bind(Utc::now())
    .bind(user.id)
    .execute(pool)
    .await
    .context("Failed to update user")?;

    get_user_by_id_mysql(pool, user.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found after update"))
}

async fn delete_user_mysql(pool: &MySqlPool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete user")?;

    Ok(())
}

async fn count_users_mysql(pool: &MySqlPool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as count FROM users")
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;

    Ok(row.get("count"))
}

fn row_to_user_mysql(row: &sqlx::mysql::MySqlRow) -> Result<User> {
    let status: String = row.try_get("status")?;

    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        date_of_birth: row.try_get("date_of_birth")?,
        is_staff: row.try_get("is_staff")?,
        is_superuser: row.try_get("is_superuser")?,
        status: parse_status(&status),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
