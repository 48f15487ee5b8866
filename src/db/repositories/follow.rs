//! Follow repository
//!
//! The graph is stored from both sides: `user_following` holds who a user
//! follows and `user_followers` who follows them. Every write touches both
//! tables in one transaction so the two views never disagree.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{FollowCounts, FollowOutcome, ListParams, PagedResult, UserSummary};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

const IS_FOLLOWING: &str =
    "SELECT COUNT(*) FROM user_following WHERE user_id = ? AND target_id = ?";

const SELECT_FOLLOWERS: &str = r#"
    SELECT u.id, u.username
    FROM user_followers f
    INNER JOIN users u ON u.id = f.follower_id
    WHERE f.user_id = ?
    ORDER BY u.username ASC
    LIMIT ? OFFSET ?
"#;

const SELECT_FOLLOWING: &str = r#"
    SELECT u.id, u.username
    FROM user_following f
    INNER JOIN users u ON u.id = f.target_id
    WHERE f.user_id = ?
    ORDER BY u.username ASC
    LIMIT ? OFFSET ?
"#;

const COUNT_FOLLOWERS: &str = "SELECT COUNT(*) FROM user_followers WHERE user_id = ?";

const COUNT_FOLLOWING: &str = "SELECT COUNT(*) FROM user_following WHERE user_id = ?";

const UNFOLLOW_FOLLOWING: &str = "DELETE FROM user_following WHERE user_id = ? AND target_id = ?";

const UNFOLLOW_FOLLOWERS: &str = "DELETE FROM user_followers WHERE user_id = ? AND follower_id = ?";

#[async_trait]
pub trait FollowRepository: Send + Sync {
    /// Make `user_id` follow `target_id`
    async fn follow(&self, user_id: i64, target_id: i64) -> Result<FollowOutcome>;

    async fn unfollow(&self, user_id: i64, target_id: i64) -> Result<FollowOutcome>;

    async fn is_following(&self, user_id: i64, target_id: i64) -> Result<bool>;

    /// Users following `user_id`, by username
    async fn followers(&self, user_id: i64, params: &ListParams)
        -> Result<PagedResult<UserSummary>>;

    /// Users `user_id` follows, by username
    async fn following(&self, user_id: i64, params: &ListParams)
        -> Result<PagedResult<UserSummary>>;

    async fn counts(&self, user_id: i64) -> Result<FollowCounts>;
}

pub struct SqlxFollowRepository {
    pool: DynDatabasePool,
}

impl SqlxFollowRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn FollowRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl FollowRepository for SqlxFollowRepository {
    async fn follow(&self, user_id: i64, target_id: i64) -> Result<FollowOutcome> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => follow_sqlite(self.pool.sqlite_pool()?, user_id, target_id).await,
            DatabaseDriver::Mysql => follow_mysql(self.pool.mysql_pool()?, user_id, target_id).await,
        }
    }

    async fn unfollow(&self, user_id: i64, target_id: i64) -> Result<FollowOutcome> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                unfollow_sqlite(self.pool.sqlite_pool()?, user_id, target_id).await
            }
            DatabaseDriver::Mysql => {
                unfollow_mysql(self.pool.mysql_pool()?, user_id, target_id).await
            }
        }
    }

    async fn is_following(&self, user_id: i64, target_id: i64) -> Result<bool> {
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(IS_FOLLOWING)
                .bind(user_id)
                .bind(target_id)
                .fetch_one(self.pool.sqlite_pool()?)
                .await,
            DatabaseDriver::Mysql => sqlx::query_scalar(IS_FOLLOWING)
                .bind(user_id)
                .bind(target_id)
                .fetch_one(self.pool.mysql_pool()?)
                .await,
        }
        .context("Failed to check follow")?;
        Ok(count > 0)
    }

    async fn followers(
        &self,
        user_id: i64,
        params: &ListParams,
    ) -> Result<PagedResult<UserSummary>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_users_sqlite(
                    self.pool.sqlite_pool()?,
                    SELECT_FOLLOWERS,
                    COUNT_FOLLOWERS,
                    user_id,
                    params,
                )
                .await
            }
            DatabaseDriver::Mysql => {
                list_users_mysql(
                    self.pool.mysql_pool()?,
                    SELECT_FOLLOWERS,
                    COUNT_FOLLOWERS,
                    user_id,
                    params,
                )
                .await
            }
        }
    }

    async fn following(
        &self,
        user_id: i64,
        params: &ListParams,
    ) -> Result<PagedResult<UserSummary>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_users_sqlite(
                    self.pool.sqlite_pool()?,
                    SELECT_FOLLOWING,
                    COUNT_FOLLOWING,
                    user_id,
                    params,
                )
                .await
            }
            DatabaseDriver::Mysql => {
                list_users_mysql(
                    self.pool.mysql_pool()?,
                    SELECT_FOLLOWING,
                    COUNT_FOLLOWING,
                    user_id,
                    params,
                )
                .await
            }
        }
    }

    async fn counts(&self, user_id: i64) -> Result<FollowCounts> {
        let (followers, following): (i64, i64) = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = self.pool.sqlite_pool()?;
                let followers = sqlx::query_scalar(COUNT_FOLLOWERS)
                    .bind(user_id)
                    .fetch_one(pool)
                    .await
                    .context("Failed to count followers")?;
                let following = sqlx::query_scalar(COUNT_FOLLOWING)
                    .bind(user_id)
                    .fetch_one(pool)
                    .await
                    .context("Failed to count following")?;
                (followers, following)
            }
            DatabaseDriver::Mysql => {
                let pool = self.pool.mysql_pool()?;
                let followers = sqlx::query_scalar(COUNT_FOLLOWERS)
                    .bind(user_id)
                    .fetch_one(pool)
                    .await
                    .context("Failed to count followers")?;
                let following = sqlx::query_scalar(COUNT_FOLLOWING)
                    .bind(user_id)
                    .fetch_one(pool)
                    .await
                    .context("Failed to count following")?;
                (followers, following)
            }
        };

        Ok(FollowCounts {
            followers,
            following,
        })
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn follow_sqlite(pool: &SqlitePool, user_id: i64, target_id: i64) -> Result<FollowOutcome> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let added = sqlx::query(
        "INSERT OR IGNORE INTO user_following (user_id, target_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(user_id)
    .bind(target_id)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to record following")?
    .rows_affected();

    sqlx::query(
        "INSERT OR IGNORE INTO user_followers (user_id, follower_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(target_id)
    .bind(user_id)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to record follower")?;

    tx.commit().await.context("Failed to commit follow")?;
    Ok(outcome(added))
}

async fn unfollow_sqlite(
    pool: &SqlitePool,
    user_id: i64,
    target_id: i64,
) -> Result<FollowOutcome> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let removed = sqlx::query(UNFOLLOW_FOLLOWING)
        .bind(user_id)
        .bind(target_id)
        .execute(&mut *tx)
        .await
        .context("Failed to remove following")?
        .rows_affected();

    sqlx::query(UNFOLLOW_FOLLOWERS)
        .bind(target_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to remove follower")?;

    tx.commit().await.context("Failed to commit unfollow")?;
    Ok(outcome(removed))
}

async fn list_users_sqlite(
    pool: &SqlitePool,
    select: &str,
    count: &str,
    user_id: i64,
    params: &ListParams,
) -> Result<PagedResult<UserSummary>> {
    let rows = sqlx::query(select)
        .bind(user_id)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list users")?;
    let items = rows
        .iter()
        .map(|row| -> Result<UserSummary> {
            Ok(UserSummary {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let total: i64 = sqlx::query_scalar(count)
        .bind(user_id)
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;

    Ok(PagedResult::new(items, total, params))
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn follow_mysql(pool: &MySqlPool, user_id: i64, target_id: i64) -> Result<FollowOutcome> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let added = sqlx::query(
        "INSERT IGNORE INTO user_following (user_id, target_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(user_id)
    .bind(target_id)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to record following")?
    .rows_affected();

    sqlx::query(
        "INSERT IGNORE INTO user_followers (user_id, follower_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(target_id)
    .bind(user_id)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to record follower")?;

    tx.commit().await.context("Failed to commit follow")?;
    Ok(outcome(added))
}

async fn unfollow_mysql(pool: &MySqlPool, user_id: i64, target_id: i64) -> Result<FollowOutcome> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let removed = sqlx::query(UNFOLLOW_FOLLOWING)
        .bind(user_id)
        .bind(target_id)
        .execute(&mut *tx)
        .await
        .context("Failed to remove following")?
        .rows_affected();

    sqlx::query(UNFOLLOW_FOLLOWERS)
        .bind(target_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to remove follower")?;

    tx.commit().await.context("Failed to commit unfollow")?;
    Ok(outcome(removed))
}

async fn list_users_mysql(
    pool: &MySqlPool,
    select: &str,
    count: &str,
    user_id: i64,
    params: &ListParams,
) -> Result<PagedResult<UserSummary>> {
    let rows = sqlx::query(select)
        .bind(user_id)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list users")?;
    let items = rows
        .iter()
        .map(|row| -> Result<UserSummary> {
            Ok(UserSummary {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let total: i64 = sqlx::query_scalar(count)
        .bind(user_id)
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;

    Ok(PagedResult::new(items, total, params))
}

fn outcome(rows_affected: u64) -> FollowOutcome {
    if rows_affected > 0 {
        FollowOutcome::Changed
    } else {
        FollowOutcome::Unchanged
    }
}
