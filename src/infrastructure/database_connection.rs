// Database connection and pool management
// This module handles SQLite database connections using sqlx

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Create database file directory if it doesn't exist
        let db_path = if database_url.starts_with("sqlite://") {
            database_url.trim_start_matches("sqlite://")
        } else if database_url.starts_with("sqlite:") {
            database_url.trim_start_matches("sqlite:")
        } else {
            database_url
        };

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        // Foreign keys must be on for account deletion to cascade to items
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_accounts_sql = r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                seller_id TEXT NOT NULL UNIQUE,
                nickname TEXT,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                token_expires_at DATETIME NOT NULL,
                sync_state TEXT NOT NULL DEFAULT 'Idle',
                sync_cursor TEXT,
                sync_last_message TEXT,
                sync_last_run_at DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
        "#;

        let create_items_sql = r#"
            CREATE TABLE IF NOT EXISTS items (
                item_id TEXT PRIMARY KEY,
                account_id INTEGER NOT NULL,
                title TEXT,
                price REAL,
                currency TEXT NOT NULL DEFAULT 'BRL',
                original_price REAL,
                status TEXT,
                permalink TEXT,
                thumbnail TEXT,
                secure_thumbnail TEXT,
                sold_quantity INTEGER NOT NULL DEFAULT 0,
                available_quantity INTEGER NOT NULL DEFAULT 0 CHECK (available_quantity >= 0),
                shipping_mode TEXT,
                logistic_type TEXT,
                free_shipping BOOLEAN NOT NULL DEFAULT 0,
                date_created DATETIME,
                last_sale_at DATETIME,
                visits INTEGER NOT NULL DEFAULT 0,
                health REAL,
                catalog_listing BOOLEAN NOT NULL DEFAULT 0,
                category_name TEXT,
                freight_sp REAL,
                freight_ne REAL,
                freight_rs REAL,
                billable_weight REAL,
                weight_status TEXT,
                sync_flag INTEGER NOT NULL DEFAULT 0,
                updated_at DATETIME NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts (id) ON DELETE CASCADE
            )
        "#;

        let create_lock_sql = r#"
            CREATE TABLE IF NOT EXISTS sync_lock (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                holder TEXT NOT NULL,
                expires_at DATETIME NOT NULL
            )
        "#;

        let create_indexes_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_items_account_id ON items (account_id);
            CREATE INDEX IF NOT EXISTS idx_items_sync_flag ON items (account_id, sync_flag);
            CREATE INDEX IF NOT EXISTS idx_items_status ON items (status);
            CREATE INDEX IF NOT EXISTS idx_accounts_sync_state ON accounts (sync_state);
        "#;

        sqlx::query(create_accounts_sql).execute(&self.pool).await?;
        sqlx::query(create_items_sql).execute(&self.pool).await?;
        sqlx::query(create_lock_sql).execute(&self.pool).await?;
        sqlx::query(create_indexes_sql).execute(&self.pool).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_database_connection() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test.db");
        let database_url = format!("sqlite:{}", db_path.to_string_lossy());

        let db = DatabaseConnection::new(&database_url).await?;
        assert!(!db.pool().is_closed());
        Ok(())
    }

    #[tokio::test]
    async fn test_database_migration() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test_migration.db");
        let database_url = format!("sqlite:{}", db_path.display());

        let db = DatabaseConnection::new(&database_url).await?;
        db.migrate().await?;

        for table in ["accounts", "items", "sync_lock"] {
            let result =
                sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
                    .bind(table)
                    .fetch_optional(db.pool())
                    .await?;
            assert!(result.is_some(), "missing table {table}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn migration_is_idempotent() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test_idempotent.db");
        let database_url = format!("sqlite:{}", db_path.display());

        let db = DatabaseConnection::new(&database_url).await?;
        db.migrate().await?;
        db.migrate().await?;
        Ok(())
    }
}
