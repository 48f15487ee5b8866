//! Profile repository
//!
//! The profile row is written together with the owning user's account
//! fields so that a profile edit is all-or-nothing.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Profile, User};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Get the profile of a user
    async fn get_by_user(&self, user_id: i64) -> Result<Option<Profile>>;

    /// Persist account fields of `user` and the whole `profile` in one
    /// transaction. Returns the stored profile.
    async fn save(&self, user: &User, profile: &Profile) -> Result<Profile>;
}

pub struct SqlxProfileRepository {
    pool: DynDatabasePool,
}

impl SqlxProfileRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ProfileRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ProfileRepository for SqlxProfileRepository {
    async fn get_by_user(&self, user_id: i64) -> Result<Option<Profile>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_profile_sqlite(self.pool.sqlite_pool()?, user_id).await,
            DatabaseDriver::Mysql => get_profile_mysql(self.pool.mysql_pool()?, user_id).await,
        }
    }

    async fn save(&self, user: &User, profile: &Profile) -> Result<Profile> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => save_profile_sqlite(self.pool.sqlite_pool()?, user, profile).await,
            DatabaseDriver::Mysql => save_profile_mysql(self.pool.mysql_pool()?, user, profile).await,
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn get_profile_sqlite(pool: &SqlitePool, user_id: i64) -> Result<Option<Profile>> {
    let row = sqlx::query("SELECT user_id, bio, profile_picture, updated_at FROM profiles WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get profile")?;

    row.map(|row| -> Result<Profile> {
        Ok(Profile {
            user_id: row.try_get("user_id")?,
            bio: row.try_get("bio")?,
            profile_picture: row.try_get("profile_picture")?,
            updated_at: row.try_get("updated_at")?,
        })
    })
    .transpose()
}

async fn save_profile_sqlite(pool: &SqlitePool, user: &User, profile: &Profile) -> Result<Profile> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("UPDATE users SET email = ?, first_name = ?, last_name = ?, updated_at = ? WHERE id = ?")
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(now)
        .bind(user.id)
        .execute(&mut *tx)
        .await
        .context("Failed to update account fields")?;

    // Accounts created outside the registration flow may lack a profile row.
    sqlx::query(
        r#"
        INSERT INTO profiles (user_id, bio, profile_picture, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            bio = excluded.bio,
            profile_picture = excluded.profile_picture,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(user.id)
    .bind(&profile.bio)
    .bind(&profile.profile_picture)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to update profile")?;

    tx.commit().await.context("Failed to commit profile update")?;

    Ok(Profile {
        user_id: user.id,
        updated_at: now,
        ..profile.clone()
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn get_profile_mysql(pool: &MySqlPool, user_id: i64) -> Result<Option<Profile>> {
    let row = sqlx::query("SELECT user_id, bio, profile_picture, updated_at FROM profiles WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get profile")?;

    row.map(|row| -> Result<Profile> {
        Ok(Profile {
            user_id: row.try_get("user_id")?,
            bio: row.try_get("bio")?,
            profile_picture: row.try_get("profile_picture")?,
            updated_at: row.try_get("updated_at")?,
        })
    })
    .transpose()
}

async fn save_profile_mysql(pool: &MySqlPool, user: &User, profile: &Profile) -> Result<Profile> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("UPDATE users SET email = ?, first_name = ?, last_name = ?, updated_at = ? WHERE id = ?")
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(now)
        .bind(user.id)
        .execute(&mut *tx)
        .await
        .context("Failed to update account fields")?;

    sqlx::query(
        r#"
        INSERT INTO profiles (user_id, bio, profile_picture, updated_at)
        VALUES (?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
            bio = VALUES(bio),
            profile_picture = VALUES(profile_picture),
            updated_at = VALUES(updated_at)
        "#,
    )
    .bind(user.id)
    .bind(&profile.bio)
    .bind(&profile.profile_picture)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to update profile")?;

    tx.commit().await.context("Failed to commit profile update")?;

    Ok(Profile {
        user_id: user.id,
        updated_at: now,
        ..profile.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};

    async fn setup() -> (SqlxUserRepository, SqlxProfileRepository) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        (
            SqlxUserRepository::new(pool.clone()),
            SqlxProfileRepository::new(pool),
        )
    }

    #[tokio::test]
    async fn test_registration_creates_empty_profile() {
        let (users, profiles) = setup().await;
        let user = users
            .create(&User::new("ann".into(), "ann@example.com".into(), "h".into()), &[])
            .await
            .unwrap();

        let profile = profiles.get_by_user(user.id).await.unwrap().unwrap();
        assert_eq!(profile.bio, "");
        assert!(profile.profile_picture.is_none());
    }

    #[tokio::test]
    async fn test_save_updates_user_and_profile() {
        let (users, profiles) = setup().await;
        let mut user = users
            .create(&User::new("ann".into(), "ann@example.com".into(), "h".into()), &[])
            .await
            .unwrap();

        user.first_name = "Ann".into();
        user.email = "ann@new.example.com".into();
        let profile = Profile {
            bio: "Reader of books".into(),
            profile_picture: Some("/media/ann.png".into()),
            ..Profile::empty(user.id)
        };

        let saved = profiles.save(&user, &profile).await.unwrap();
        assert_eq!(saved.bio, "Reader of books");

        let stored_user = users.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored_user.first_name, "Ann");
        assert_eq!(stored_user.email, "ann@new.example.com");

        let stored = profiles.get_by_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.profile_picture.as_deref(), Some("/media/ann.png"));
    }

    #[tokio::test]
    async fn test_missing_profile() {
        let (_users, profiles) = setup().await;
        assert!(profiles.get_by_user(404).await.unwrap().is_none());
    }
}
