//! Balance persistence.
//!
//! `DataStore` is the durable sink for collected balances: opened once per
//! run, written through as each balance arrives, closed once on every exit
//! path. The shipped implementation is SQLite via sqlx.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use tracing::{debug, info};

use crate::types::{AccountBalance, Result, TallyError};

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Durable sink for balance records.
///
/// `add_balance` is only valid between `open` and `close`; calling it
/// outside that window is a programming error and fails with
/// `TallyError::Store`. Store errors are run-fatal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataStore: Send {
    async fn open(&mut self) -> Result<()>;
    async fn add_balance(&mut self, balance: &AccountBalance) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

const CREATE_BALANCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS balances (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    fetched_at      TEXT NOT NULL,
    institution     TEXT NOT NULL,
    account_name    TEXT NOT NULL,
    account_number  TEXT NOT NULL,
    balance         TEXT NOT NULL
)
"#;

/// SQLite-backed balance store. Balances append to a single `balances`
/// table; the decimal amount is stored as text to avoid float drift.
pub struct SqliteStore {
    path: String,
    pool: Option<SqlitePool>,
}

impl SqliteStore {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            pool: None,
        }
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .as_ref()
            .ok_or_else(|| TallyError::Store("store is not open".into()))
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn open(&mut self) -> Result<()> {
        if self.pool.is_some() {
            return Err(TallyError::Store("store is already open".into()));
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| TallyError::Store(format!("failed to open {}: {e}", self.path)))?;

        sqlx::query(CREATE_BALANCES_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| TallyError::Store(format!("failed to prepare schema: {e}")))?;

        info!(path = %self.path, "Balance store open");
        self.pool = Some(pool);
        Ok(())
    }

    async fn add_balance(&mut self, balance: &AccountBalance) -> Result<()> {
        let pool = self.pool()?;

        sqlx::query(
            "INSERT INTO balances (fetched_at, institution, account_name, account_number, balance) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&balance.institution)
        .bind(&balance.account_name)
        .bind(&balance.account_number)
        .bind(balance.balance.to_string())
        .execute(pool)
        .await
        .map_err(|e| TallyError::Store(format!("failed to insert balance: {e}")))?;

        debug!(%balance, "Balance written");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            info!(path = %self.path, "Balance store closed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
