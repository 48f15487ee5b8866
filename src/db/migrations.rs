//! Database migrations
//!
//! Schema steps are embedded in the binary as SQL strings, one `Migration`
//! per step with a SQLite and a MySQL variant. Applied versions are tracked
//! in the `_migrations` table.
//!
//! ```ignore
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};

use super::DynDatabasePool;
use crate::config::DatabaseDriver;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements for SQLite
    pub up_sqlite: &'static str,
    /// SQL statements for MySQL
    pub up_mysql: &'static str,
}

/// Migration record stored in the database
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// All schema steps, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username VARCHAR(150) NOT NULL UNIQUE,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                first_name VARCHAR(150) NOT NULL DEFAULT '',
                last_name VARCHAR(150) NOT NULL DEFAULT '',
                date_of_birth DATE,
                is_staff BOOLEAN NOT NULL DEFAULT 0,
                is_superuser BOOLEAN NOT NULL DEFAULT 0,
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
            CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                username VARCHAR(150) NOT NULL UNIQUE,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                first_name VARCHAR(150) NOT NULL DEFAULT '',
                last_name VARCHAR(150) NOT NULL DEFAULT '',
                date_of_birth DATE NULL,
                is_staff BOOLEAN NOT NULL DEFAULT FALSE,
                is_superuser BOOLEAN NOT NULL DEFAULT FALSE,
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_users_username ON users(username);
            CREATE INDEX idx_users_email ON users(email);
        "#,
    },
    Migration {
        version: 2,
        name: "create_profiles",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS profiles (
                user_id INTEGER PRIMARY KEY,
                bio TEXT NOT NULL DEFAULT '',
                profile_picture VARCHAR(500),
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS profiles (
                user_id BIGINT PRIMARY KEY,
                bio TEXT NOT NULL,
                profile_picture VARCHAR(500) NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 3,
        name: "create_sessions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                user_id INTEGER NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                user_id BIGINT NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX idx_sessions_expires_at ON sessions(expires_at);
        "#,
    },
    // Seeds the three catalog roles; startup re-syncs them.
    Migration {
        version: 4,
        name: "create_roles",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS roles (
                slug VARCHAR(50) PRIMARY KEY,
                name VARCHAR(100) NOT NULL
            );
            CREATE TABLE IF NOT EXISTS role_permissions (
                role_slug VARCHAR(50) NOT NULL,
                permission VARCHAR(50) NOT NULL,
                PRIMARY KEY (role_slug, permission),
                FOREIGN KEY (role_slug) REFERENCES roles(slug) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS user_roles (
                user_id INTEGER NOT NULL,
                role_slug VARCHAR(50) NOT NULL,
                PRIMARY KEY (user_id, role_slug),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (role_slug) REFERENCES roles(slug) ON DELETE CASCADE
            );
            INSERT OR IGNORE INTO roles (slug, name) VALUES
                ('viewer', 'Viewers'), ('editor', 'Editors'), ('admin', 'Admins');
            INSERT OR IGNORE INTO role_permissions (role_slug, permission) VALUES
                ('viewer', 'can_view'),
                ('editor', 'can_view'), ('editor', 'can_create'), ('editor', 'can_edit'),
                ('admin', 'can_view'), ('admin', 'can_create'), ('admin', 'can_edit'), ('admin', 'can_delete');
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS roles (
                slug VARCHAR(50) PRIMARY KEY,
                name VARCHAR(100) NOT NULL
            );
            CREATE TABLE IF NOT EXISTS role_permissions (
                role_slug VARCHAR(50) NOT NULL,
                permission VARCHAR(50) NOT NULL,
                PRIMARY KEY (role_slug, permission),
                FOREIGN KEY (role_slug) REFERENCES roles(slug) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS user_roles (
                user_id BIGINT NOT NULL,
                role_slug VARCHAR(50) NOT NULL,
                PRIMARY KEY (user_id, role_slug),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (role_slug) REFERENCES roles(slug) ON DELETE CASCADE
            );
            INSERT IGNORE INTO roles (slug, name) VALUES
                ('viewer', 'Viewers'), ('editor', 'Editors'), ('admin', 'Admins');
            INSERT IGNORE INTO role_permissions (role_slug, permission) VALUES
                ('viewer', 'can_view'),
                ('editor', 'can_view'), ('editor', 'can_create'), ('editor', 'can_edit'),
                ('admin', 'can_view'), ('admin', 'can_create'), ('admin', 'can_edit'), ('admin', 'can_delete');
        "#,
    },
    Migration {
        version: 5,
        name: "create_authors",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS authors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(600) NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_authors_name ON authors(name);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS authors (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(600) NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_authors_name ON authors(name);
        "#,
    },
    Migration {
        version: 6,
        name: "create_books",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title VARCHAR(1200) NOT NULL,
                author_id INTEGER NOT NULL,
                publication_year INTEGER NOT NULL,
                isbn VARCHAR(13) UNIQUE,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (author_id) REFERENCES authors(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_books_author_id ON books(author_id);
            CREATE INDEX IF NOT EXISTS idx_books_title ON books(title);
            CREATE INDEX IF NOT EXISTS idx_books_publication_year ON books(publication_year);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS books (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                title VARCHAR(1200) NOT NULL,
                author_id BIGINT NOT NULL,
                publication_year INT NOT NULL,
                isbn VARCHAR(13) NULL UNIQUE,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                FOREIGN KEY (author_id) REFERENCES authors(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_books_author_id ON books(author_id);
            CREATE INDEX idx_books_title ON books(title(191));
            CREATE INDEX idx_books_publication_year ON books(publication_year);
        "#,
    },
    Migration {
        version: 7,
        name: "create_posts",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title VARCHAR(1200) NOT NULL,
                content TEXT NOT NULL,
                author_id INTEGER NOT NULL,
                published_date TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_posts_author_id ON posts(author_id);
            CREATE INDEX IF NOT EXISTS idx_posts_published_date ON posts(published_date);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS posts (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                title VARCHAR(1200) NOT NULL,
                content TEXT NOT NULL,
                author_id BIGINT NOT NULL,
                published_date TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_posts_author_id ON posts(author_id);
            CREATE INDEX idx_posts_published_date ON posts(published_date);
        "#,
    },
    Migration {
        version: 8,
        name: "create_comments",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id INTEGER NOT NULL,
                author_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_comments_post_id ON comments(post_id);
            CREATE INDEX IF NOT EXISTS idx_comments_author_id ON comments(author_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS comments (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                post_id BIGINT NOT NULL,
                author_id BIGINT NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_comments_post_id ON comments(post_id);
            CREATE INDEX idx_comments_author_id ON comments(author_id);
        "#,
    },
    Migration {
        version: 9,
        name: "create_tags",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(100) NOT NULL,
                slug VARCHAR(150) NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS post_tags (
                post_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (post_id, tag_id),
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_post_tags_tag_id ON post_tags(tag_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS tags (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(100) NOT NULL,
                slug VARCHAR(150) NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS post_tags (
                post_id BIGINT NOT NULL,
                tag_id BIGINT NOT NULL,
                PRIMARY KEY (post_id, tag_id),
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_post_tags_tag_id ON post_tags(tag_id);
        "#,
    },
    // Both sides of the social graph; writers keep them in step.
    Migration {
        version: 10,
        name: "create_follows",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS user_following (
                user_id INTEGER NOT NULL,
                target_id INTEGER NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user_id, target_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS user_followers (
                user_id INTEGER NOT NULL,
                follower_id INTEGER NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user_id, follower_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (follower_id) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS user_following (
                user_id BIGINT NOT NULL,
                target_id BIGINT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user_id, target_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS user_followers (
                user_id BIGINT NOT NULL,
                follower_id BIGINT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user_id, follower_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (follower_id) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
    },
    // Books shelved in libraries, and the single librarian of each.
    Migration {
        version: 11,
        name: "create_libraries",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS libraries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(200) NOT NULL UNIQUE,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS library_books (
                library_id INTEGER NOT NULL,
                book_id INTEGER NOT NULL,
                PRIMARY KEY (library_id, book_id),
                FOREIGN KEY (library_id) REFERENCES libraries(id) ON DELETE CASCADE,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_library_books_book_id ON library_books(book_id);
            CREATE TABLE IF NOT EXISTS librarians (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(100) NOT NULL,
                library_id INTEGER NOT NULL UNIQUE,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (library_id) REFERENCES libraries(id) ON DELETE CASCADE
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS libraries (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(200) NOT NULL UNIQUE,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS library_books (
                library_id BIGINT NOT NULL,
                book_id BIGINT NOT NULL,
                PRIMARY KEY (library_id, book_id),
                FOREIGN KEY (library_id) REFERENCES libraries(id) ON DELETE CASCADE,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_library_books_book_id ON library_books(book_id);
            CREATE TABLE IF NOT EXISTS librarians (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(100) NOT NULL,
                library_id BIGINT NOT NULL UNIQUE,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (library_id) REFERENCES libraries(id) ON DELETE CASCADE
            );
        "#,
    },
];

/// Run all pending migrations.
///
/// Creates the tracking table when needed and applies every migration whose
/// version has not been recorded yet. Returns the number applied.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    let applied_versions: Vec<i32> = applied.iter().map(|m| m.version as i32).collect();

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

async fn get_applied_migrations(pool: &DynDatabasePool) -> Result<Vec<MigrationRecord>> {
    match pool.driver() {
        DatabaseDriver::Sqlite => get_applied_migrations_sqlite(pool.sqlite_pool()?).await,
        DatabaseDriver::Mysql => get_applied_migrations_mysql(pool.mysql_pool()?).await,
    }
}

async fn get_applied_migrations_sqlite(pool: &SqlitePool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .context("Failed to read applied migrations")?;

    Ok(rows
        .iter()
        .map(|row| MigrationRecord {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        })
        .collect())
}

async fn get_applied_migrations_mysql(pool: &MySqlPool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .context("Failed to read applied migrations")?;

    Ok(rows
        .iter()
        .map(|row| MigrationRecord {
            version: row.get::<i32, _>("version") as i64,
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        })
        .collect())
}

async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    match pool.driver() {
        DatabaseDriver::Sqlite => apply_migration_sqlite(pool.sqlite_pool()?, migration).await,
        DatabaseDriver::Mysql => apply_migration_mysql(pool.mysql_pool()?, migration).await,
    }
}

async fn apply_migration_sqlite(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    for statement in split_sql_statements(migration.up_sqlite) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(pool)
        .await?;

    Ok(())
}

async fn apply_migration_mysql(pool: &MySqlPool, migration: &Migration) -> Result<()> {
    for statement in split_sql_statements(migration.up_mysql) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(pool)
        .await?;

    Ok(())
}

/// Truncate SQL for error messages
fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, skipping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

/// Check if a string contains only SQL comments
fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Check if migrations are up to date
pub async fn is_up_to_date(pool: &DynDatabasePool) -> Result<bool> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    Ok(applied.len() == MIGRATIONS.len())
}

/// Get pending migrations count
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    Ok(MIGRATIONS.len().saturating_sub(applied.len()))
}

/// Get the total number of migrations defined
pub fn total_migrations() -> usize {
    MIGRATIONS.len()
}

/// Get migration by version
pub fn get_migration(version: i32) -> Option<&'static Migration> {
    MIGRATIONS.iter().find(|m| m.version == version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    async fn migrated_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool
    }

    async fn insert_user(pool: &SqlitePool, username: &str) -> i64 {
        sqlx::query("INSERT INTO users (username, email, password_hash) VALUES (?, ?, ?)")
            .bind(username)
            .bind(format!("{}@example.com", username))
            .bind("hash123")
            .execute(pool)
            .await
            .expect("Failed to create user")
            .last_insert_rowid()
    }

    async fn count(pool: &SqlitePool, sql: &str) -> i64 {
        let row = sqlx::query(sql).fetch_one(pool).await.expect("count query");
        row.get(0)
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, MIGRATIONS.len());

        // Running again applies nothing
        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_is_up_to_date() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        assert!(!is_up_to_date(&pool).await.expect("Failed to check"));

        run_migrations(&pool).await.expect("Failed to run migrations");
        assert!(is_up_to_date(&pool).await.expect("Failed to check"));
    }

    #[tokio::test]
    async fn test_pending_count() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let pending = pending_count(&pool).await.expect("Failed to check");
        assert_eq!(pending, MIGRATIONS.len());

        run_migrations(&pool).await.expect("Failed to run migrations");
        let pending = pending_count(&pool).await.expect("Failed to check");
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn test_users_table_defaults() {
        let pool = migrated_pool().await;
        let sqlite_pool = pool.as_sqlite().unwrap();

        let id = insert_user(sqlite_pool, "testuser").await;

        let row = sqlx::query("SELECT is_staff, is_superuser, status, first_name FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(sqlite_pool)
            .await
            .unwrap();
        assert!(!row.get::<bool, _>("is_staff"));
        assert!(!row.get::<bool, _>("is_superuser"));
        assert_eq!(row.get::<String, _>("status"), "active");
        assert_eq!(row.get::<String, _>("first_name"), "");
    }

    #[tokio::test]
    async fn test_roles_seeded() {
        let pool = migrated_pool().await;
        let sqlite_pool = pool.as_sqlite().unwrap();

        assert_eq!(count(sqlite_pool, "SELECT COUNT(*) FROM roles").await, 3);
        assert_eq!(
            count(sqlite_pool, "SELECT COUNT(*) FROM role_permissions").await,
            8
        );
        assert_eq!(
            count(
                sqlite_pool,
                "SELECT COUNT(*) FROM role_permissions WHERE role_slug = 'viewer'"
            )
            .await,
            1
        );
    }

    #[tokio::test]
    async fn test_foreign_key_constraints() {
        let pool = migrated_pool().await;
        let sqlite_pool = pool.as_sqlite().unwrap();

        let result = sqlx::query(
            "INSERT INTO sessions (id, user_id, expires_at) VALUES (?, ?, datetime('now', '+1 day'))",
        )
        .bind("session123")
        .bind(999i64)
        .execute(sqlite_pool)
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unique_username() {
        let pool = migrated_pool().await;
        let sqlite_pool = pool.as_sqlite().unwrap();

        insert_user(sqlite_pool, "testuser").await;

        let result = sqlx::query("INSERT INTO users (username, email, password_hash) VALUES (?, ?, ?)")
            .bind("testuser")
            .bind("other@example.com")
            .bind("hash456")
            .execute(sqlite_pool)
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_book_isbn_unique_but_nullable() {
        let pool = migrated_pool().await;
        let sqlite_pool = pool.as_sqlite().unwrap();

        let author_id = sqlx::query("INSERT INTO authors (name) VALUES ('Jane Austen')")
            .execute(sqlite_pool)
            .await
            .unwrap()
            .last_insert_rowid();

        let insert = |title: &'static str, isbn: Option<&'static str>| {
            sqlx::query(
                "INSERT INTO books (title, author_id, publication_year, isbn) VALUES (?, ?, 1813, ?)",
            )
            .bind(title)
            .bind(author_id)
            .bind(isbn)
            .execute(sqlite_pool)
        };

        insert("Pride and Prejudice", Some("9780141439518")).await.unwrap();
        assert!(insert("Emma", Some("9780141439518")).await.is_err());

        // Several books may have no ISBN
        insert("Persuasion", None).await.unwrap();
        insert("Mansfield Park", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_author_delete_cascades_to_books() {
        let pool = migrated_pool().await;
        let sqlite_pool = pool.as_sqlite().unwrap();

        let author_id = sqlx::query("INSERT INTO authors (name) VALUES ('Orwell')")
            .execute(sqlite_pool)
            .await
            .unwrap()
            .last_insert_rowid();
        sqlx::query("INSERT INTO books (title, author_id, publication_year) VALUES ('1984', ?, 1949)")
            .bind(author_id)
            .execute(sqlite_pool)
            .await
            .unwrap();

        sqlx::query("DELETE FROM authors WHERE id = ?")
            .bind(author_id)
            .execute(sqlite_pool)
            .await
            .unwrap();

        assert_eq!(count(sqlite_pool, "SELECT COUNT(*) FROM books").await, 0);
    }

    #[tokio::test]
    async fn test_post_delete_cascades_to_comments_and_tags() {
        let pool = migrated_pool().await;
        let sqlite_pool = pool.as_sqlite().unwrap();

        let user_id = insert_user(sqlite_pool, "writer").await;
        let post_id = sqlx::query("INSERT INTO posts (title, content, author_id) VALUES ('Hi', 'Body', ?)")
            .bind(user_id)
            .execute(sqlite_pool)
            .await
            .unwrap()
            .last_insert_rowid();
        let tag_id = sqlx::query("INSERT INTO tags (name, slug) VALUES ('Rust', 'rust')")
            .execute(sqlite_pool)
            .await
            .unwrap()
            .last_insert_rowid();
        sqlx::query("INSERT INTO post_tags (post_id, tag_id) VALUES (?, ?)")
            .bind(post_id)
            .bind(tag_id)
            .execute(sqlite_pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO comments (post_id, author_id, content) VALUES (?, ?, 'Nice')")
            .bind(post_id)
            .bind(user_id)
            .execute(sqlite_pool)
            .await
            .unwrap();

        sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(post_id)
            .execute(sqlite_pool)
            .await
            .unwrap();

        assert_eq!(count(sqlite_pool, "SELECT COUNT(*) FROM comments").await, 0);
        assert_eq!(count(sqlite_pool, "SELECT COUNT(*) FROM post_tags").await, 0);
        // The tag itself survives
        assert_eq!(count(sqlite_pool, "SELECT COUNT(*) FROM tags").await, 1);
    }

    #[tokio::test]
    async fn test_follow_edges_are_unique() {
        let pool = migrated_pool().await;
        let sqlite_pool = pool.as_sqlite().unwrap();

        let a = insert_user(sqlite_pool, "alice").await;
        let b = insert_user(sqlite_pool, "bob").await;

        let follow = || {
            sqlx::query("INSERT INTO user_following (user_id, target_id) VALUES (?, ?)")
                .bind(a)
                .bind(b)
                .execute(sqlite_pool)
        };

        follow().await.unwrap();
        assert!(follow().await.is_err());
    }

    #[tokio::test]
    async fn test_library_has_one_librarian_and_loses_deleted_books() {
        let pool = migrated_pool().await;
        let sqlite_pool = pool.as_sqlite().unwrap();

        let library_id = sqlx::query("INSERT INTO libraries (name) VALUES ('Central')")
            .execute(sqlite_pool)
            .await
            .unwrap()
            .last_insert_rowid();
        let author_id = sqlx::query("INSERT INTO authors (name) VALUES ('Orwell')")
            .execute(sqlite_pool)
            .await
            .unwrap()
            .last_insert_rowid();
        let book_id =
            sqlx::query("INSERT INTO books (title, author_id, publication_year) VALUES ('1984', ?, 1949)")
                .bind(author_id)
                .execute(sqlite_pool)
                .await
                .unwrap()
                .last_insert_rowid();
        sqlx::query("INSERT INTO library_books (library_id, book_id) VALUES (?, ?)")
            .bind(library_id)
            .bind(book_id)
            .execute(sqlite_pool)
            .await
            .unwrap();

        let hire = |name: &'static str| {
            sqlx::query("INSERT INTO librarians (name, library_id) VALUES (?, ?)")
                .bind(name)
                .bind(library_id)
                .execute(sqlite_pool)
        };
        hire("Ada").await.unwrap();
        assert!(hire("Grace").await.is_err());

        sqlx::query("DELETE FROM books WHERE id = ?")
            .bind(book_id)
            .execute(sqlite_pool)
            .await
            .unwrap();
        assert_eq!(count(sqlite_pool, "SELECT COUNT(*) FROM library_books").await, 0);
    }

    #[test]
    fn test_get_migration() {
        let migration = get_migration(1);
        assert!(migration.is_some());
        assert_eq!(migration.unwrap().name, "create_users");

        assert_eq!(get_migration(10).unwrap().name, "create_follows");
        assert_eq!(get_migration(11).unwrap().name, "create_libraries");
        assert!(get_migration(999).is_none());
    }

    #[test]
    fn test_total_migrations() {
        assert_eq!(total_migrations(), 11);
    }

    #[test]
    fn test_migration_versions_are_sequential() {
        for (idx, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, idx + 1);
        }
    }

    #[test]
    fn test_split_sql_statements() {
        let sql = "CREATE TABLE a (id INT); CREATE TABLE b (id INT);";
        let statements = split_sql_statements(sql);
        assert_eq!(statements.len(), 2);

        let sql_with_comments = "-- Comment\nCREATE TABLE a (id INT);\n-- trailing";
        let statements = split_sql_statements(sql_with_comments);
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn test_is_comment_only() {
        assert!(is_comment_only("-- This is a comment"));
        assert!(is_comment_only("-- Line 1\n-- Line 2"));
        assert!(!is_comment_only("CREATE TABLE test"));
        assert!(!is_comment_only("-- Comment\nCREATE TABLE test"));
    }

    #[test]
    fn test_truncate_sql() {
        let long = "x".repeat(150);
        assert_eq!(truncate_sql(&long).len(), 103);
        assert_eq!(truncate_sql("short"), "short");
    }
}
