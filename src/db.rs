//! SQLite persistence for the account ledger

use crate::ledger::{Account, AccountStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{info, warn};

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database at `path` and prepare the schema
    pub async fn new(path: &str) -> Result<Self> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite://{}", path)
        };
        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // The bot writes from a single task; one connection also keeps
        // in-memory databases shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.initialize().await?;

        Ok(db)
    }

    /// Add columns that older databases lack
    async fn run_migrations(&self) -> Result<()> {
        let table_info: Vec<(i64, String, String, i64, Option<String>, i64)> =
            sqlx::query_as("PRAGMA table_info(users)")
                .fetch_all(&self.pool)
                .await
                .unwrap_or_default();

        let has_bankrupts = table_info.iter().any(|(_, name, _, _, _, _)| name == "bankrupts");
        if !table_info.is_empty() && !has_bankrupts {
            info!("Migrating users table: adding bankrupts column");
            sqlx::query("ALTER TABLE users ADD COLUMN bankrupts INTEGER NOT NULL DEFAULT 0")
                .execute(&self.pool)
                .await?;
        }

        let has_last_use = table_info.iter().any(|(_, name, _, _, _, _)| name == "last_use");
        if !table_info.is_empty() && !has_last_use {
            info!("Migrating users table: adding last_use column");
            sqlx::query("ALTER TABLE users ADD COLUMN last_use TEXT")
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    /// Initialize database schema
    async fn initialize(&self) -> Result<()> {
        self.run_migrations().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                name TEXT NOT NULL PRIMARY KEY,
                credits INTEGER NOT NULL DEFAULT 0,
                bankrupts INTEGER NOT NULL DEFAULT 0,
                jointime TEXT NOT NULL,
                last_use TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_credits ON users(credits)")
            .execute(&self.pool)
            .await?;

        info!("Database initialized");
        Ok(())
    }

    /// Highest balances straight from the table
    pub async fn top_accounts(&self, limit: i64) -> Result<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY credits DESC, name ASC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(self.rows_to_accounts(&rows))
    }

    /// Decode rows, logging and skipping any that do not fit the schema
    fn rows_to_accounts(&self, rows: &[sqlx::sqlite::SqliteRow]) -> Vec<Account> {
        rows.iter()
            .filter_map(|row| match self.row_to_account(row) {
                Ok(account) => Some(account),
                Err(e) => {
                    let name: String = row.try_get("name").unwrap_or_default();
                    warn!("Skipping unreadable account row {:?}: {}", name, e);
                    None
                }
            })
            .collect()
    }

    fn row_to_account(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Account> {
        let join_time: String = row.try_get("jointime")?;
        let last_use: Option<String> = row.try_get("last_use")?;

        Ok(Account {
            name: row.try_get("name")?,
            credits: row.try_get("credits")?,
            bankrupts: row.try_get("bankrupts")?,
            join_time: parse_time(&join_time).unwrap_or_else(Utc::now),
            last_use: last_use.as_deref().and_then(parse_time),
        })
    }
}

/// RFC 3339 as written by this crate, or SQLite's CURRENT_TIMESTAMP format
fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|t| t.and_utc())
        })
}

impl AccountStore for Database {
    async fn load_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM users")
            .fetch_all(&self.pool)
            .await?;

        Ok(self.rows_to_accounts(&rows))
    }

    async fn insert_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (name, credits, bankrupts, jointime, last_use)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.name)
        .bind(account.credits)
        .bind(account.bankrupts)
        .bind(account.join_time.to_rfc3339())
        .bind(account.last_use.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (name, credits, bankrupts, jointime, last_use)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                credits = excluded.credits,
                bankrupts = excluded.bankrupts,
                last_use = excluded.last_use
            "#,
        )
        .bind(&account.name)
        .bind(account.credits)
        .bind(account.bankrupts)
        .bind(account.join_time.to_rfc3339())
        .bind(account.last_use.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerStore;

    async fn memory_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let db = memory_db().await;
        db.insert_account(&Account::new("alice", 1500)).await.unwrap();

        let accounts = db.load_accounts().await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name, "alice");
        assert_eq!(accounts[0].credits, 1500);
        assert_eq!(accounts[0].bankrupts, 0);
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let db = memory_db().await;
        db.insert_account(&Account::new("alice", 1500)).await.unwrap();
        assert!(db.insert_account(&Account::new("alice", 1500)).await.is_err());
    }

    #[tokio::test]
    async fn test_update_upserts() {
        let db = memory_db().await;
        let mut account = Account::new("bob", 1500);
        db.update_account(&account).await.unwrap();

        account.credits = 42;
        account.bankrupts = 3;
        account.last_use = Some(Utc::now());
        db.update_account(&account).await.unwrap();

        let stored = db.load_accounts().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].credits, 42);
        assert_eq!(stored[0].bankrupts, 3);
        assert!(stored[0].last_use.is_some());
    }

    #[tokio::test]
    async fn test_ledger_round_trip_through_sqlite() {
        let mut ledger = LedgerStore::new(memory_db().await);
        ledger.load().await;
        ledger.get_or_create("carol", 1500).await;
        ledger.get_or_create("dan", 1500).await;
        ledger.debit("carol", 1000);
        assert_eq!(ledger.flush().await, 2);

        let top = ledger.store().top_accounts(10).await.unwrap();
        let names: Vec<(&str, i64)> = top.iter().map(|a| (a.name.as_str(), a.credits)).collect();
        assert_eq!(names, vec![("dan", 1500), ("carol", 500)]);
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_skipped() {
        let db = memory_db().await;
        db.insert_account(&Account::new("alice", 1500)).await.unwrap();
        sqlx::query("INSERT INTO users (name, credits, bankrupts, jointime) VALUES ('mallory', 'lots', 0, '2024-05-01 12:00:00')")
            .execute(&db.pool)
            .await
            .unwrap();

        let accounts = db.load_accounts().await.unwrap();
        let names: Vec<&str> = accounts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["alice"]);
        assert_eq!(db.top_accounts(10).await.unwrap().len(), 1);
    }

    #[test]
    fn test_parse_time_formats() {
        assert!(parse_time("2024-05-01T12:00:00+00:00").is_some());
        assert!(parse_time("2024-05-01 12:00:00").is_some());
        assert!(parse_time("yesterday").is_none());
    }
}
