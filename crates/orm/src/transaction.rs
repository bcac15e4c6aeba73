//! Transaction boundaries for multi-statement persistence
//!
//! A `TransactionScope` either opens a new transaction on the client or,
//! when the client already is one, joins it. Only a scope that opened the
//! transaction commits or rolls it back.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::backends::{QueryClient, TransactionClient};
use crate::error::ModelResult;

/// Acquired-or-inherited transaction boundary
pub struct TransactionScope {
    client: Arc<dyn QueryClient>,
    owned: Option<Arc<dyn TransactionClient>>,
}

impl TransactionScope {
    /// Open a transaction on `client`, or inherit it when `client` is already transactional
    pub async fn begin(client: &Arc<dyn QueryClient>) -> ModelResult<Self> {
        if client.is_transaction() {
            debug!("joining caller's transaction");
            return Ok(Self {
                client: client.clone(),
                owned: None,
            });
        }

        let tx = client.transaction().await?;
        debug!("transaction opened");
        Ok(Self {
            client: tx.clone().client(),
            owned: Some(tx),
        })
    }

    /// Client whose statements run inside this boundary
    pub fn client(&self) -> &Arc<dyn QueryClient> {
        &self.client
    }

    /// True when this scope opened the transaction itself
    pub fn is_owner(&self) -> bool {
        self.owned.is_some()
    }

    /// Commit on success; on failure roll back and hand back the original error
    pub async fn finish<T>(self, result: ModelResult<T>) -> ModelResult<T> {
        let Some(tx) = self.owned else {
            return result;
        };

        match result {
            Ok(value) => {
                tx.commit().await?;
                debug!("transaction committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed after {}", err);
                } else {
                    debug!("transaction rolled back");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SqliteClient;
    use crate::config::OrmConfig;
    use crate::error::ModelError;

    async fn client_with_table() -> Arc<dyn QueryClient> {
        let client = SqliteClient::in_memory(OrmConfig::default()).await.unwrap();
        client.execute("CREATE TABLE notes (id INTEGER PRIMARY KEY)", &[]).await.unwrap();
        Arc::new(client)
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_returns_original_error() {
        let client = client_with_table().await;
        let scope = TransactionScope::begin(&client).await.unwrap();
        assert!(scope.is_owner());
        scope.client().execute("INSERT INTO notes (id) VALUES (1)", &[]).await.unwrap();

        let original = ModelError::Query("boom".to_string());
        let result: ModelResult<()> = scope.finish(Err(original.clone())).await;
        assert_eq!(result.unwrap_err(), original);

        let rows = client.fetch_all("SELECT id FROM notes", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_success_commits() {
        let client = client_with_table().await;
        let scope = TransactionScope::begin(&client).await.unwrap();
        scope.client().execute("INSERT INTO notes (id) VALUES (7)", &[]).await.unwrap();
        scope.finish(Ok(())).await.unwrap();

        let rows = client.fetch_all("SELECT id FROM notes", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_nested_scope_inherits_outer_transaction() {
        let client = client_with_table().await;
        let outer = TransactionScope::begin(&client).await.unwrap();
        let inner = TransactionScope::begin(outer.client()).await.unwrap();
        assert!(!inner.is_owner());

        inner.client().execute("INSERT INTO notes (id) VALUES (3)", &[]).await.unwrap();
        inner.finish(Ok(())).await.unwrap();
        let failed: ModelResult<()> = outer.finish(Err(ModelError::Query("late".into()))).await;
        assert!(failed.is_err());

        let rows = client.fetch_all("SELECT id FROM notes", &[]).await.unwrap();
        assert!(rows.is_empty());
    }
}
