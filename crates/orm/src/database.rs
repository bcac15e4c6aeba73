//! Database connectivity
//!
//! Builds the query client a model layer hands to the relationship engine.

use std::sync::Arc;
use tracing::info;

use crate::backends::{DatabaseBackendType, PostgresClient, QueryClient, SqliteClient};
use crate::config::OrmConfig;
use crate::error::{ModelError, ModelResult};

/// Detect database backend type from URL
pub fn detect_backend(database_url: &str) -> ModelResult<DatabaseBackendType> {
    let parsed = url::Url::parse(database_url)
        .map_err(|e| ModelError::Configuration(format!("Invalid database URL: {}", e)))?;

    parsed
        .scheme()
        .parse::<DatabaseBackendType>()
        .map_err(ModelError::Configuration)
}

/// Connect the client described by `config.database_url`
pub async fn connect(config: OrmConfig) -> ModelResult<Arc<dyn QueryClient>> {
    config.validate()?;
    let url = config
        .database_url
        .clone()
        .ok_or_else(|| ModelError::Configuration("RELMAP_DATABASE_URL is not set".to_string()))?;

    let backend = detect_backend(&url)?;
    info!(%backend, max_connections = config.max_connections, "connecting database client");

    let client: Arc<dyn QueryClient> = match backend {
        DatabaseBackendType::PostgreSQL => Arc::new(PostgresClient::connect(&url, config).await?),
        DatabaseBackendType::SQLite => Arc::new(SqliteClient::connect(&url, config).await?),
    };
    Ok(client)
}
