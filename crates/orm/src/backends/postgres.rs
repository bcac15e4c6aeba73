//! PostgreSQL Backend Implementation
//!
//! `QueryClient` over a sqlx `PgPool`. Transactions hold a
//! `sqlx::Transaction<'static, Postgres>` behind an async mutex so the
//! boundary can be shared by every statement of one persistence operation.

use std::sync::Arc;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo, ValueRef};
use tokio::sync::Mutex;

use super::core::*;
use crate::config::OrmConfig;
use crate::error::{OrmError, OrmResult};

/// Query client backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PostgresClient {
    pool: PgPool,
    config: Arc<OrmConfig>,
    mode: ClientMode,
}

impl PostgresClient {
    pub fn new(pool: PgPool, config: OrmConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            mode: ClientMode::Dual,
        }
    }

    /// Connect a pool using the configured limits
    pub async fn connect(database_url: &str, config: OrmConfig) -> OrmResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| OrmError::Database(format!("Failed to create PostgreSQL pool: {}", e)))?;
        Ok(Self::new(pool, config))
    }

    /// Restrict the client to reads or writes
    pub fn with_mode(mut self, mode: ClientMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueryClient for PostgresClient {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
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
            .map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>)
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
        Ok(Arc::new(PostgresTransaction {
            tx: Mutex::new(Some(tx)),
            config: self.config.clone(),
        }))
    }
}

/// Open PostgreSQL transaction usable as a query client
pub struct PostgresTransaction {
    tx: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
    config: Arc<OrmConfig>,
}

fn completed() -> OrmError {
    OrmError::Transaction("Transaction already completed".to_string())
}

#[async_trait]
impl QueryClient for PostgresTransaction {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
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
            .map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>)
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
impl TransactionClient for PostgresTransaction {
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

/// PostgreSQL row implementation
pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    pub fn new(row: PgRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for PostgresRow {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
        decode_column(&self.row, index)
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|col| col.name().to_string()).collect()
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[DatabaseValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            DatabaseValue::Null => query.bind(Option::<String>::None),
            DatabaseValue::Bool(b) => query.bind(*b),
            DatabaseValue::Int32(i) => query.bind(*i),
            DatabaseValue::Int64(i) => query.bind(*i),
            DatabaseValue::Float64(f) => query.bind(*f),
            DatabaseValue::String(s) => query.bind(s.clone()),
            DatabaseValue::Bytes(b) => query.bind(b.clone()),
            DatabaseValue::Uuid(u) => query.bind(*u),
            DatabaseValue::DateTime(dt) => query.bind(*dt),
            DatabaseValue::Json(j) => query.bind(j.clone()),
        };
    }
    query
}

fn decode_column(row: &PgRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int32(row.try_get::<i16, _>(index)? as i32),
        "INT4" => DatabaseValue::Int32(row.try_get(index)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "FLOAT4" => DatabaseValue::Float64(row.try_get::<f32, _>(index)? as f64),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index)?),
        "UUID" => DatabaseValue::Uuid(row.try_get(index)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get(index)?),
        "TIMESTAMP" => {
            let naive: chrono::NaiveDateTime = row.try_get(index)?;
            DatabaseValue::DateTime(chrono::TimeZone::from_utc_datetime(&chrono::Utc, &naive))
        }
        "JSON" | "JSONB" => DatabaseValue::Json(row.try_get::<JsonValue, _>(index)?),
        _ => DatabaseValue::String(row.try_get_unchecked::<String, _>(index).map_err(|e| {
            OrmError::Database(format!("Failed to decode column of type '{}': {}", type_name, e))
        })?),
    };
    Ok(value)
}
