//! Tag repository
//!
//! Read side only. Tags are created while saving a post, inside the post's
//! transaction (see `post.rs`).

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Tag, TagWithCount};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use std::sync::Arc;

const LIST_WITH_COUNTS: &str = r#"
    SELECT t.id, t.name, t.slug, COUNT(pt.post_id) AS post_count
    FROM tags t
    LEFT JOIN post_tags pt ON pt.tag_id = t.id
    GROUP BY t.id, t.name, t.slug
    ORDER BY t.name ASC
"#;

const SELECT_BY_SLUG: &str = "SELECT id, name, slug FROM tags WHERE slug = ?";

pub(crate) const SELECT_FOR_POST: &str = r#"
    SELECT t.id, t.name, t.slug
    FROM tags t
    INNER JOIN post_tags pt ON pt.tag_id = t.id
    WHERE pt.post_id = ?
    ORDER BY t.name ASC
"#;

#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Every tag with the number of posts carrying it
    async fn list_with_counts(&self) -> Result<Vec<TagWithCount>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tag>>;

    /// Tags of one post, by name
    async fn tags_for_post(&self, post_id: i64) -> Result<Vec<Tag>>;
}

pub struct SqlxTagRepository {
    pool: DynDatabasePool,
}

impl SqlxTagRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn TagRepository> {
        Arc::new(Self::new(pool))
    }
}

/// Map any row carrying `id`, `name` and `slug` columns
macro_rules! row_to_tag {
    ($row:expr) => {
        Tag {
            id: $row.try_get("id")?,
            name: $row.try_get("name")?,
            slug: $row.try_get("slug")?,
        }
    };
}
pub(crate) use row_to_tag;

#[async_trait]
impl TagRepository for SqlxTagRepository {
    async fn list_with_counts(&self) -> Result<Vec<TagWithCount>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(LIST_WITH_COUNTS)
                    .fetch_all(self.pool.sqlite_pool()?)
                    .await
                    .context("Failed to list tags")?;
                rows.iter()
                    .map(|row| -> Result<TagWithCount> {
                        Ok(TagWithCount {
                            tag: row_to_tag!(row),
                            post_count: row.try_get("post_count")?,
                        })
                    })
                    .collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(LIST_WITH_COUNTS)
                    .fetch_all(self.pool.mysql_pool()?)
                    .await
                    .context("Failed to list tags")?;
                rows.iter()
                    .map(|row| -> Result<TagWithCount> {
                        Ok(TagWithCount {
                            tag: row_to_tag!(row),
                            post_count: row.try_get("post_count")?,
                        })
                    })
                    .collect()
            }
        }
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tag>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(SELECT_BY_SLUG)
                    .bind(slug)
                    .fetch_optional(self.pool.sqlite_pool()?)
                    .await
                    .context("Failed to get tag by slug")?;
                row.map(|row| -> Result<Tag> { Ok(row_to_tag!(row)) })
                    .transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(SELECT_BY_SLUG)
                    .bind(slug)
                    .fetch_optional(self.pool.mysql_pool()?)
                    .await
                    .context("Failed to get tag by slug")?;
                row.map(|row| -> Result<Tag> { Ok(row_to_tag!(row)) })
                    .transpose()
            }
        }
    }

    async fn tags_for_post(&self, post_id: i64) -> Result<Vec<Tag>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(SELECT_FOR_POST)
                    .bind(post_id)
                    .fetch_all(self.pool.sqlite_pool()?)
                    .await
                    .context("Failed to load post tags")?;
                rows.iter()
                    .map(|row| -> Result<Tag> { Ok(row_to_tag!(row)) })
                    .collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(SELECT_FOR_POST)
                    .bind(post_id)
                    .fetch_all(self.pool.mysql_pool()?)
                    .await
                    .context("Failed to load post tags")?;
                rows.iter()
                    .map(|row| -> Result<Tag> { Ok(row_to_tag!(row)) })
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::session::test_support::insert_user;
    use crate::db::repositories::{PostRepository, SqlxPostRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::PostRecord;

    #[tokio::test]
    async fn test_tags_listed_with_counts() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let author = insert_user(&pool, "writer").await;
        let posts = SqlxPostRepository::new(pool.clone());
        let tags = SqlxTagRepository::new(pool);

        for (title, tag_names) in [("One", vec!["Rust", "Web"]), ("Two", vec!["rust"])] {
            posts
                .create(
                    author,
                    &PostRecord {
                        title: title.into(),
                        content: "Body".into(),
                        tags: tag_names.into_iter().map(String::from).collect(),
                    },
                )
                .await
                .unwrap();
        }

        let listed = tags.list_with_counts().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].tag.name, "Rust");
        assert_eq!(listed[0].post_count, 2);
        assert_eq!(listed[1].tag.slug, "web");

        let rust = tags.get_by_slug("rust").await.unwrap().unwrap();
        assert_eq!(rust.name, "Rust");
        assert!(tags.get_by_slug("missing").await.unwrap().is_none());
    }
}
