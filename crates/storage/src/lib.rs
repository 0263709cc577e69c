pub mod queue;

use std::{str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use thiserror::Error;
use uuid::Uuid;

use contoso_expenses_core::ports::{BoxError, ExpenseStore};
use contoso_expenses_core::types::{CostCenterRecord, Expense};

pub use queue::{
    ConsumerSettings, Delivery, MessageEncoding, PublishReceipt, QueueConsumer, QueueError,
    QueuePublisher, QueueRepository, QueueSettings,
};

/// Source of the current time, injectable for tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for persisting submitted expenses.
    pub fn expenses(&self) -> ExpenseRepository {
        ExpenseRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for reading the cost-center directory.
    pub fn cost_centers(&self) -> CostCenterRepository {
        CostCenterRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to the durable notification queue tables.
    pub fn queue(&self) -> QueueRepository {
        QueueRepository::new(self.pool.clone())
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository responsible for the `expenses` table.
#[derive(Clone)]
pub struct ExpenseRepository {
    pool: SqlitePool,
}

impl ExpenseRepository {
    /// Inserts a submitted expense.
    pub async fn insert(&self, expense: &Expense) -> Result<(), ExpenseError> {
        sqlx::query(
            "INSERT INTO expenses \
             (id, submitter_email, approver_email, purpose, amount, cost_center, submitted_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(expense.id.to_string())
        .bind(&expense.submitter_email)
        .bind(&expense.approver_email)
        .bind(&expense.purpose)
        .bind(expense.amount.to_string())
        .bind(&expense.cost_center)
        .bind(to_rfc3339(expense.submitted_at))
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ExpenseError::Duplicate(expense.id)
            }
            other => ExpenseError::Database(other),
        })?;

        Ok(())
    }

    /// Loads a single expense by id.
    pub async fn fetch(&self, id: Uuid) -> Result<Option<Expense>, ExpenseError> {
        let row = sqlx::query_as::<_, ExpenseRow>(
            "SELECT id, submitter_email, approver_email, purpose, amount, cost_center, submitted_at \
               FROM expenses WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ExpenseRow::into_domain).transpose()
    }

    /// Lists the most recently submitted expenses, newest first.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<Expense>, ExpenseError> {
        let rows = sqlx::query_as::<_, ExpenseRow>(
            "SELECT id, submitter_email, approver_email, purpose, amount, cost_center, submitted_at \
               FROM expenses ORDER BY submitted_at DESC, id LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ExpenseRow::into_domain).collect()
    }
}

#[async_trait]
impl ExpenseStore for ExpenseRepository {
    async fn insert(&self, expense: &Expense) -> Result<(), BoxError> {
        ExpenseRepository::insert(self, expense)
            .await
            .map_err(BoxError::from)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ExpenseRow {
    id: String,
    submitter_email: String,
    approver_email: String,
    purpose: String,
    amount: String,
    cost_center: String,
    submitted_at: DateTime<Utc>,
}

impl ExpenseRow {
    fn into_domain(self) -> Result<Expense, ExpenseError> {
        let id = Uuid::parse_str(&self.id).map_err(|_| ExpenseError::Corrupt {
            column: "id",
            value: self.id.clone(),
        })?;
        let amount = Decimal::from_str(&self.amount).map_err(|_| ExpenseError::Corrupt {
            column: "amount",
            value: self.amount.clone(),
        })?;
        Ok(Expense {
            id,
            submitter_email: self.submitter_email,
            approver_email: self.approver_email,
            purpose: self.purpose,
            amount,
            cost_center: self.cost_center,
            submitted_at: self.submitted_at,
        })
    }
}

/// Errors that can occur while reading or writing expenses.
#[derive(Debug, Error)]
pub enum ExpenseError {
    #[error("expense {0} already exists")]
    Duplicate(Uuid),
    #[error("stored {column} value is invalid: {value}")]
    Corrupt { column: &'static str, value: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the submitter → approver directory.
#[derive(Clone)]
pub struct CostCenterRepository {
    pool: SqlitePool,
}

impl CostCenterRepository {
    /// Looks up the directory entry for a submitter. Matching ignores case.
    pub async fn fetch(
        &self,
        submitter_email: &str,
    ) -> Result<Option<CostCenterRecord>, CostCenterError> {
        let row = sqlx::query_as::<_, CostCenterRow>(
            "SELECT submitter_email, approver_email, cost_center_name \
               FROM cost_centers WHERE submitter_email = ?",
        )
        .bind(submitter_email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CostCenterRow::into_domain))
    }

    /// Inserts or replaces a directory entry.
    pub async fn upsert(&self, record: &CostCenterRecord) -> Result<(), CostCenterError> {
        sqlx::query(
            "INSERT INTO cost_centers (submitter_email, approver_email, cost_center_name) \
             VALUES (?, ?, ?) \
             ON CONFLICT(submitter_email) DO UPDATE \
             SET approver_email = excluded.approver_email, \
                 cost_center_name = excluded.cost_center_name",
        )
        .bind(&record.submitter_email)
        .bind(&record.approver_email)
        .bind(&record.cost_center_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CostCenterRow {
    submitter_email: String,
    approver_email: String,
    cost_center_name: String,
}

impl CostCenterRow {
    fn into_domain(self) -> CostCenterRecord {
        CostCenterRecord {
            submitter_email: self.submitter_email,
            approver_email: self.approver_email,
            cost_center_name: self.cost_center_name,
        }
    }
}

/// Errors that can occur while reading the cost-center directory.
#[derive(Debug, Error)]
pub enum CostCenterError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub(crate) fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
