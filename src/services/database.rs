use crate::error::AppError;
use crate::models::{is_identifier, Candle, RowUpdate};
use crate::services::storage::{StorageGateway, StorageTransaction};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteConnectOptions, Row, Sqlite, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// SQLite store holding one `candles_{SYMBOL}_{TF}` table per series
#[derive(Debug, Clone)]
pub struct SqliteCandleStore {
    pool: SqlitePool,
    database_path: PathBuf,
}

impl SqliteCandleStore {
    /// Open (or create) the database with WAL and a generous busy timeout
    pub async fn new(database_path: PathBuf) -> Result<Self, AppError> {
        info!("Opening SQLite database at: {:?}", database_path);

        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(&database_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal) // readers don't block the writer
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30)); // workers take turns writing

        let pool = SqlitePool::connect_with(connect_options).await?;

        Ok(Self {
            pool,
            database_path,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("SQLite database connection pool closed");
    }

    /// Create an empty candle table with the ingestion-owned columns
    pub async fn create_candle_table(&self, table: &str) -> Result<(), AppError> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                timestamp INTEGER PRIMARY KEY,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL
            )
            "#,
            quote_ident(table)?
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Append OHLCV rows in one transaction; duplicate timestamps are rejected
    pub async fn append_candles(&self, table: &str, candles: &[Candle]) -> Result<usize, AppError> {
        if candles.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "INSERT INTO {} (timestamp, open, high, low, close, volume) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            quote_ident(table)?
        );

        let mut transaction = self.pool.begin().await?;
        let mut inserted = 0;

        for candle in candles {
            let result = sqlx::query(&sql)
                .bind(candle.timestamp)
                .bind(candle.open)
                .bind(candle.high)
                .bind(candle.low)
                .bind(candle.close)
                .bind(candle.volume)
                .execute(&mut *transaction)
                .await
                .map_err(|e| {
                    let duplicate = e
                        .as_database_error()
                        .is_some_and(|db_err| db_err.is_unique_violation());
                    if duplicate {
                        AppError::InvalidInput(format!(
                            "duplicate timestamp {} in {}",
                            candle.timestamp, table
                        ))
                    } else {
                        AppError::from(e)
                    }
                })?;

            inserted += result.rows_affected() as usize;
        }

        transaction.commit().await?;
        Ok(inserted)
    }

    async fn max_timestamp(&self, table: &str, before: Option<i64>) -> Result<Option<i64>, AppError> {
        let table = quote_ident(table)?;
        let value: Option<i64> = match before {
            Some(before) => {
                sqlx::query_scalar(&format!(
                    "SELECT MAX(timestamp) FROM {} WHERE timestamp < ?1",
                    table
                ))
                .bind(before)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(&format!("SELECT MAX(timestamp) FROM {}", table))
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(value)
    }
}

#[async_trait]
impl StorageGateway for SqliteCandleStore {
    type Tx = SqliteBatch;

    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        Ok(names
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)?))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(AppError::from))
            .collect()
    }

    async fn add_column(&self, table: &str, column: &str, sql_type: &str) -> Result<(), AppError> {
        let existing = self.table_columns(table).await?;
        if existing.iter().any(|c| c == column) {
            return Ok(());
        }

        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table)?,
            quote_ident(column)?,
            sql_type
        );

        if let Err(e) = sqlx::query(&sql).execute(&self.pool).await {
            // another worker may have added it in the meantime
            let existing = self.table_columns(table).await?;
            if existing.iter().any(|c| c == column) {
                return Ok(());
            }
            return Err(AppError::Schema {
                table: table.to_string(),
                message: format!("cannot add column {}: {}", column, e),
            });
        }

        debug!(table = table, column = column, "Added derived column");
        Ok(())
    }

    async fn read_range(
        &self,
        table: &str,
        from: i64,
        to: i64,
        derived: &[String],
    ) -> Result<Vec<Candle>, AppError> {
        let mut select = String::from(
            "SELECT CAST(timestamp AS INTEGER), CAST(open AS REAL), CAST(high AS REAL), \
             CAST(low AS REAL), CAST(close AS REAL), CAST(volume AS REAL)",
        );
        for column in derived {
            select.push_str(&format!(", CAST({} AS REAL)", quote_ident(column)?));
        }
        let sql = format!(
            "{} FROM {} WHERE timestamp >= ?1 AND timestamp <= ?2 ORDER BY timestamp",
            select,
            quote_ident(table)?
        );

        let rows = sqlx::query(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let mut candle = Candle::new(
                row.try_get(0)?,
                row.try_get(1)?,
                row.try_get(2)?,
                row.try_get(3)?,
                row.try_get(4)?,
                row.try_get(5)?,
            );
            for (i, column) in derived.iter().enumerate() {
                let value: Option<f64> = row.try_get(6 + i)?;
                candle.derived.insert(column.clone(), value);
            }
            candles.push(candle);
        }

        Ok(candles)
    }

    async fn min_timestamp(&self, table: &str) -> Result<Option<i64>, AppError> {
        let value: Option<i64> =
            sqlx::query_scalar(&format!("SELECT MIN(timestamp) FROM {}", quote_ident(table)?))
                .fetch_one(&self.pool)
                .await?;
        Ok(value)
    }

    async fn max_enriched_timestamp(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Option<i64>, AppError> {
        match self.unenriched_bounds(table, columns).await? {
            Some((first_null, _)) => self.max_timestamp(table, Some(first_null)).await,
            None => self.max_timestamp(table, None).await,
        }
    }

    async fn unenriched_bounds(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Option<(i64, i64)>, AppError> {
        if columns.is_empty() {
            return Ok(None);
        }

        let sql = format!(
            "SELECT MIN(timestamp), MAX(timestamp) FROM {} WHERE {}",
            quote_ident(table)?,
            any_null_condition(columns)?
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;

        let first: Option<i64> = row.try_get(0)?;
        let last: Option<i64> = row.try_get(1)?;
        Ok(first.zip(last))
    }

    async fn nth_timestamp_after(
        &self,
        table: &str,
        after: Option<i64>,
        n: usize,
    ) -> Result<Option<i64>, AppError> {
        if n == 0 {
            return Ok(after);
        }

        let sql = format!(
            "SELECT timestamp FROM {} WHERE timestamp > ?1 ORDER BY timestamp LIMIT 1 OFFSET ?2",
            quote_ident(table)?
        );
        let value: Option<i64> = sqlx::query_scalar(&sql)
            .bind(after.unwrap_or(i64::MIN))
            .bind((n - 1) as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn nth_timestamp_back(
        &self,
        table: &str,
        anchor: i64,
        n: usize,
    ) -> Result<Option<i64>, AppError> {
        let sql = format!(
            "SELECT timestamp FROM {} WHERE timestamp <= ?1 ORDER BY timestamp DESC LIMIT 1 OFFSET ?2",
            quote_ident(table)?
        );
        let value: Option<i64> = sqlx::query_scalar(&sql)
            .bind(anchor)
            .bind(n as i64)
            .fetch_optional(&self.pool)
            .await?;

        match value {
            Some(ts) => Ok(Some(ts)),
            None => self.min_timestamp(table).await,
        }
    }

    async fn null_timestamps(
        &self,
        table: &str,
        column: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<i64>, AppError> {
        let sql = format!(
            "SELECT timestamp FROM {} WHERE {} IS NULL AND timestamp >= ?1 AND timestamp <= ?2 ORDER BY timestamp",
            quote_ident(table)?,
            quote_ident(column)?
        );
        let values: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        Ok(values)
    }

    async fn begin(&self) -> Result<SqliteBatch, AppError> {
        let transaction = self.pool.begin().await?;
        Ok(SqliteBatch {
            transaction: Some(transaction),
        })
    }
}

/// Open write transaction; rolled back by sqlx if dropped uncommitted
pub struct SqliteBatch {
    transaction: Option<sqlx::Transaction<'static, Sqlite>>,
}

#[async_trait]
impl StorageTransaction for SqliteBatch {
    async fn write_columns(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[RowUpdate],
    ) -> Result<usize, AppError> {
        if columns.is_empty() || rows.is_empty() {
            return Ok(0);
        }

        let transaction = self
            .transaction
            .as_mut()
            .ok_or_else(|| AppError::InvalidInput("transaction already committed".to_string()))?;

        let assignments = columns
            .iter()
            .enumerate()
            .map(|(i, c)| Ok(format!("{} = ?{}", quote_ident(c)?, i + 1)))
            .collect::<Result<Vec<_>, AppError>>()?
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE timestamp = ?{}",
            quote_ident(table)?,
            assignments,
            columns.len() + 1
        );

        let mut updated = 0;
        for row in rows {
            if row.values.len() != columns.len() {
                return Err(AppError::InvalidInput(format!(
                    "row {} has {} values for {} columns",
                    row.timestamp,
                    row.values.len(),
                    columns.len()
                )));
            }

            let mut query = sqlx::query(&sql);
            for value in &row.values {
                query = query.bind(*value);
            }
            let result = query.bind(row.timestamp).execute(&mut **transaction).await?;
            updated += result.rows_affected() as usize;
        }

        Ok(updated)
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        match self.transaction.take() {
            Some(transaction) => {
                transaction.commit().await?;
                Ok(())
            }
            None => Err(AppError::InvalidInput(
                "transaction already committed".to_string(),
            )),
        }
    }
}

/// Validate and double-quote an SQL identifier
fn quote_ident(name: &str) -> Result<String, AppError> {
    if !is_identifier(name) {
        return Err(AppError::InvalidInput(format!(
            "refusing unsafe identifier '{}'",
            name
        )));
    }
    Ok(format!("\"{}\"", name))
}

fn any_null_condition(columns: &[String]) -> Result<String, AppError> {
    let parts = columns
        .iter()
        .map(|c| Ok(format!("{} IS NULL", quote_ident(c)?)))
        .collect::<Result<Vec<_>, AppError>>()?;
    Ok(format!("({})", parts.join(" OR ")))
}

/// Check if database exists
pub fn database_exists(database_path: &Path) -> bool {
    database_path.exists() && database_path.is_file()
}
