//! Core Database Backend Traits
//!
//! The relationship engine never talks to a driver directly. It consumes the
//! `QueryClient` collaborator defined here: a statement executor that knows
//! its dialect, its read/write mode, and how to open a transaction boundary.

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::config::OrmConfig;
use crate::error::OrmResult;
use crate::query::QueryBuilder;

/// Whether a client may run reads, writes or both
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    Dual,
    Read,
    Write,
}

impl ClientMode {
    pub fn can_write(&self) -> bool {
        !matches!(self, ClientMode::Read)
    }

    pub fn can_read(&self) -> bool {
        !matches!(self, ClientMode::Write)
    }
}

/// Statement executor consumed by models, relation queries and relation clients
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// SQL dialect used to render placeholders
    fn dialect(&self) -> SqlDialect;

    fn mode(&self) -> ClientMode {
        ClientMode::Dual
    }

    /// True when every statement issued through this client runs inside an open transaction
    fn is_transaction(&self) -> bool {
        false
    }

    fn config(&self) -> &OrmConfig;

    /// Statement builder factory
    fn query(&self) -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Execute a query and return the result rows
    async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query and return affected rows count
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Open a transaction boundary
    async fn transaction(&self) -> OrmResult<Arc<dyn TransactionClient>>;
}

/// An open transaction boundary
#[async_trait]
pub trait TransactionClient: Send + Sync {
    /// The transaction viewed as a query client; statements issued through it join the transaction
    fn client(self: Arc<Self>) -> Arc<dyn QueryClient>;

    async fn commit(&self) -> OrmResult<()>;

    async fn rollback(&self) -> OrmResult<()>;
}

/// Abstract database row trait
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by index
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue>;

    /// Get column names
    fn column_names(&self) -> Vec<String>;

    /// Convert row to HashMap
    fn to_map(&self) -> OrmResult<HashMap<String, DatabaseValue>> {
        let mut map = HashMap::new();
        for (index, name) in self.column_names().into_iter().enumerate() {
            map.insert(name, self.get_by_index(index)?);
        }
        Ok(map)
    }

    /// Convert row to a JSON object keyed by column name
    fn to_json_map(&self) -> OrmResult<serde_json::Map<String, JsonValue>> {
        let mut map = serde_json::Map::new();
        for (index, name) in self.column_names().into_iter().enumerate() {
            map.insert(name, self.get_by_index(index)?.to_json());
        }
        Ok(map)
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::from(*i),
            DatabaseValue::Int64(i) => JsonValue::from(*i),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => {
                JsonValue::Array(b.iter().map(|&x| JsonValue::from(x)).collect())
            }
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }
}

impl From<&JsonValue> for DatabaseValue {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => DatabaseValue::Null,
            JsonValue::Bool(b) => DatabaseValue::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => DatabaseValue::Int64(i),
                None => n.as_f64().map(DatabaseValue::Float64).unwrap_or(DatabaseValue::Null),
            },
            JsonValue::String(s) => DatabaseValue::String(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => DatabaseValue::Json(value.clone()),
        }
    }
}

/// Convert rendered statement parameters into bindable values
pub fn bind_values(params: &[JsonValue]) -> Vec<DatabaseValue> {
    params.iter().map(DatabaseValue::from).collect()
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder style for this dialect
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::SQLite => "?".to_string(),
        }
    }
}

/// Debug-log a statement about to be sent through `client`
pub(crate) fn log_statement(
    client: &dyn QueryClient,
    origin: &str,
    sql: &str,
    params: &[JsonValue],
) {

    if client.config().log_queries {
        debug!(origin, sql, params = params.len(), "executing statement");
    }
}

/// Run a rendered SELECT and return its rows as JSON objects
pub(crate) async fn fetch_json_rows(
    client: &dyn QueryClient,
    origin: &str,
    sql: &str,
    params: &[JsonValue],
) -> OrmResult<Vec<serde_json::Map<String, JsonValue>>> {
    log_statement(client, origin, sql, params);
    let rows = client.fetch_all(sql, &bind_values(params)).await?;
    rows.iter().map(|row| row.to_json_map()).collect()
}

/// Run a rendered write statement and return the affected row count
pub(crate) async fn execute_statement(
    client: &dyn QueryClient,
    origin: &str,
    sql: &str,
    params: &[JsonValue],
) -> OrmResult<u64> {
    require_write(client, origin)?;
    log_statement(client, origin, sql, params);
    client.execute(sql, &bind_values(params)).await
}

/// Fail with `UnsupportedOperation` when `client` cannot write
pub(crate) fn require_write(client: &dyn QueryClient, origin: &str) -> OrmResult<()> {
    if client.mode().can_write() {
        Ok(())
    } else {
        Err(crate::error::ModelError::UnsupportedOperation(format!(
            "{} requires a write-capable client",
            origin
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_numbers_bind_as_wide_integers() {
        assert_eq!(DatabaseValue::from(&json!(7)), DatabaseValue::Int64(7));
        assert_eq!(DatabaseValue::from(&json!(1.5)), DatabaseValue::Float64(1.5));
        assert_eq!(DatabaseValue::from(&json!(null)), DatabaseValue::Null);
    }

    #[test]
    fn test_uuid_like_strings_stay_strings() {
        let raw = "67e55044-10b1-426f-9247-bb680e5fe0c8";
        assert_eq!(
            DatabaseValue::from(&json!(raw)),
            DatabaseValue::String(raw.to_string())
        );
    }

    #[test]
    fn test_placeholders_per_dialect() {
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(0), "$1");
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(4), "$5");
        assert_eq!(SqlDialect::SQLite.parameter_placeholder(4), "?");
    }

    #[test]
    fn test_int_widths_convert_to_equal_json() {
        assert_eq!(DatabaseValue::Int32(3).to_json(), DatabaseValue::Int64(3).to_json());
    }
}
