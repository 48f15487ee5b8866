//! Session repository
//!
//! Opaque login tokens. Expired rows are ignored on lookup and purged by a
//! background task.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Store a freshly issued session
    async fn create(&self, session: &Session) -> Result<Session>;

    /// Look up an unexpired session by token
    async fn get_valid(&self, id: &str) -> Result<Option<Session>>;

    /// Delete a session; returns whether a row was removed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Delete all sessions for a user
    async fn delete_by_user(&self, user_id: i64) -> Result<u64>;

    /// Delete expired sessions
    async fn delete_expired(&self) -> Result<u64>;
}

/// SQLx-based session repository implementation
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<Session> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_session_sqlite(self.pool.sqlite_pool()?, session).await,
            DatabaseDriver::Mysql => create_session_mysql(self.pool.mysql_pool()?, session).await,
        }
    }

    async fn get_valid(&self, id: &str) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_valid_session_sqlite(self.pool.sqlite_pool()?, id).await,
            DatabaseDriver::Mysql => get_valid_session_mysql(self.pool.mysql_pool()?, id).await,
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(id)
                .execute(self.pool.sqlite_pool()?)
                .await
                .context("Failed to delete session")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(id)
                .execute(self.pool.mysql_pool()?)
                .await
                .context("Failed to delete session")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn delete_by_user(&self, user_id: i64) -> Result<u64> {
        let result = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query("DELETE FROM sessions WHERE user_id = ?")
                .bind(user_id)
                .execute(self.pool.sqlite_pool()?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query("DELETE FROM sessions WHERE user_id = ?")
                .bind(user_id)
                .execute(self.pool.mysql_pool()?)
                .await
                .map(|r| r.rows_affected()),
        };
        result.context("Failed to delete sessions by user")
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let result = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
                .bind(now)
                .execute(self.pool.sqlite_pool()?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
                .bind(now)
                .execute(self.pool.mysql_pool()?)
                .await
                .map(|r| r.rows_affected()),
        };
        result.context("Failed to delete expired sessions")
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_session_sqlite(pool: &SqlitePool, session: &Session) -> Result<Session> {
    sqlx::query("INSERT INTO sessions (id, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)")
        .bind(&session.id)
        .bind(session.user_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(pool)
        .await
        .context("Failed to create session")?;

    Ok(session.clone())
}

async fn get_valid_session_sqlite(pool: &SqlitePool, id: &str) -> Result<Option<Session>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, expires_at, created_at
        FROM sessions
        WHERE id = ? AND expires_at > ?
        "#,
    )
    .bind(id)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await
    .context("Failed to get session by ID")?;

    row.map(|row| -> Result<Session> {
        Ok(Session {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
        })
    })
    .transpose()
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_session_mysql(pool: &MySqlPool, session: &Session) -> Result<Session> {
    sqlx::query("INSERT INTO sessions (id, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)")
        .bind(&session.id)
        .bind(session.user_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(pool)
        .await
        .context("Failed to create session")?;

    Ok(session.clone())
}

async fn get_valid_session_mysql(pool: &MySqlPool, id: &str) -> Result<Option<Session>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, expires_at, created_at
        FROM sessions
        WHERE id = ? AND expires_at > ?
        "#,
    )
    .bind(id)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await
    .context("Failed to get session by ID")?;

    row.map(|row| -> Result<Session> {
        Ok(Session {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
        })
    })
    .transpose()
}
