//! Database layer
//!
//! Supports SQLite (default, single file) and MySQL behind the
//! `DatabasePool` trait. Repositories dispatch on `pool.driver()` and keep a
//! separate query path for each backend.
//!
//! ```ignore
//! use inkwell::config::DatabaseConfig;
//! use inkwell::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
