//! SQLite Backend Implementation
//!
//! Same shape as the PostgreSQL client. SQLite values are decoded from
//! their runtime storage class since declared column types are advisory.

use std::str::FromStr;
use std::sync::Arc;
use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};
use tokio::sync::Mutex;

use super::core::*;
use crate::config::OrmConfig;
use crate::error::{OrmError, OrmResult};

/// Query client backed by a SQLite pool
#[derive(Clone)]
pub struct SqliteClient {
    pool: SqlitePool,
    config: Arc<OrmConfig>,
    mode: ClientMode,
}

impl SqliteClient {
    pub fn new(pool: SqlitePool, config: OrmConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            mode: ClientMode::Dual,
        }
    }

    /// Connect a pool using the configured limits
    pub async fn connect(database_url: &str, config: OrmConfig) -> OrmResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| OrmError::Configuration(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| OrmError::Database(format!("Failed to create SQLite pool: {}", e)))?;
        Ok(Self::new(pool, config))
    }

    /// A private in-memory database on a single long-lived connection
    pub async fn in_memory(config: OrmConfig) -> OrmResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| OrmError::Database(format!("Failed to open in-memory SQLite: {}", e)))?;
        Ok(Self::new(pool, config))
    }

    /// Restrict the client to reads or writes
    pub fn with_mode(mut self, mode: ClientMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl QueryClient for SqliteClient {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    fn mode(&self) -> ClientMode {
        self.mode
    }

    fn config(&self) -> &OrmConfig {
        &self.config
    }

    async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(SqliteRowView::new(row)) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let result = bind_all(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn transaction(&self) -> OrmResult<Arc<dyn TransactionClient>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to begin transaction: {}", e)))?;
        Ok(Arc::new(SqliteTransaction {
            tx: Mutex::new(Some(tx)),
            config: self.config.clone(),
        }))
    }
}

/// Open SQLite transaction usable as a query client
pub struct SqliteTransaction {
    tx: Mutex<Option<sqlx::Transaction<'static, Sqlite>>>,
    config: Arc<OrmConfig>,
}

fn completed() -> OrmError {
    OrmError::Transaction("Transaction already completed".to_string())
}

#[async_trait]
impl QueryClient for SqliteTransaction {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    fn is_transaction(&self) -> bool {
        true
    }

    fn config(&self) -> &OrmConfig {
        &self.config
    }

    async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(completed)?;
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(SqliteRowView::new(row)) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(completed)?;
        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn transaction(&self) -> OrmResult<Arc<dyn TransactionClient>> {
        Err(OrmError::UnsupportedOperation(
            "nested transactions are not supported; reuse the open transaction".to_string(),
        ))
    }
}

#[async_trait]
impl TransactionClient for SqliteTransaction {
    fn client(self: Arc<Self>) -> Arc<dyn QueryClient> {
        self
    }

    async fn commit(&self) -> OrmResult<()> {
        let tx = self.tx.lock().await.take().ok_or_else(completed)?;
        tx.commit()
            .await
            .map_err(|e| OrmError::Transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(&self) -> OrmResult<()> {
        let tx = self.tx.lock().await.take().ok_or_else(completed)?;
        tx.rollback()
            .await
            .map_err(|e| OrmError::Transaction(format!("Transaction rollback failed: {}", e)))
    }
}

/// SQLite row implementation
pub struct SqliteRowView {
    row: SqliteRow,
}

impl SqliteRowView {
    pub fn new(row: SqliteRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for SqliteRowView {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
        decode_column(&self.row, index)
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|col| col.name().to_string()).collect()
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[DatabaseValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            DatabaseValue::Null => query.bind(Option::<String>::None),
            DatabaseValue::Bool(b) => query.bind(*b),
            DatabaseValue::Int32(i) => query.bind(*i),
            DatabaseValue::Int64(i) => query.bind(*i),
            DatabaseValue::Float64(f) => query.bind(*f),
            DatabaseValue::String(s) => query.bind(s.clone()),
            DatabaseValue::Bytes(b) => query.bind(b.clone()),
            DatabaseValue::Uuid(u) => query.bind(u.to_string()),
            DatabaseValue::DateTime(dt) => query.bind(dt.to_rfc3339()),
            DatabaseValue::Json(j) => query.bind(j.to_string()),
        };
    }
    query
}

fn decode_column(row: &SqliteRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let storage = raw.type_info().name().to_string();

    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" | "INT8" => DatabaseValue::Int64(row.try_get_unchecked(index)?),
        "REAL" => DatabaseValue::Float64(row.try_get_unchecked(index)?),
        "BLOB" => DatabaseValue::Bytes(row.try_get_unchecked(index)?),
        _ => DatabaseValue::String(row.try_get_unchecked(index)?),
    };
    Ok(value)
}
