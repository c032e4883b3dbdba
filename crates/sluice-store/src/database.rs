use std::path::Path;
use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use crate::error::StoreError;

/// Shared SQLite database holding every bucket's records.
#[derive(Debug, Clone)]
pub struct Database {
  pool: SqlitePool,
}

impl Database {
  /// Open (creating if needed) the database file at `path` and make sure
  /// the schema exists.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    let db = Self { pool };
    db.migrate().await?;
    info!(path = %path.display(), "database opened");
    Ok(db)
  }

  /// Open a private in-memory database.
  pub async fn in_memory() -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    // Every connection to :memory: is its own database.
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect_with(options)
      .await?;

    let db = Self { pool };
    db.migrate().await?;
    Ok(db)
  }

  pub fn pool(&self) -> &SqlitePool {
    &self.pool
  }

  /// Close every connection. Later queries fail.
  pub async fn close(&self) {
    self.pool.close().await;
  }

  async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      CREATE TABLE IF NOT EXISTS async_jobs (
        bucket TEXT NOT NULL,
        id TEXT NOT NULL,
        node_id TEXT NOT NULL,
        temp_file TEXT NOT NULL,
        data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (bucket, id)
      )
      "#,
    )
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}
