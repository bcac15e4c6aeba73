//! Record persistence - insert, update, delete and refresh through a query client

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::record::Record;
use crate::backends::{execute_statement, fetch_json_rows, require_write, QueryClient};
use crate::error::{ModelError, ModelResult};
use crate::query::QueryFilters;
use crate::relationships::{Preloader, RelationClient, RelationQueryBuilder};

impl Record {
    /// Insert a new record or update the dirty attributes of a persisted one
    pub async fn save(&mut self, client: &dyn QueryClient) -> ModelResult<()> {
        if self.is_persisted() {
            self.update_dirty(client).await
        } else {
            self.insert(client).await
        }
    }

    async fn insert(&mut self, client: &dyn QueryClient) -> ModelResult<()> {
        let origin = format!("insert {}", self.schema().name());
        require_write(client, &origin)?;

        let schema = self.schema().clone();
        let values: Vec<(String, Value)> = schema
            .columns()
            .iter()
            .filter_map(|column| {
                let value = self.get(&column.attribute)?;
                if column.attribute == schema.primary_key() && value.is_null() {
                    return None;
                }
                Some((column.column.clone(), value.clone()))
            })
            .collect();

        let statement = client
            .query()
            .insert_into(schema.table())
            .set_values(values)
            .returning("*");
        let (sql, params) = statement.to_sql_with_params(client.dialect());
        let mut rows = fetch_json_rows(client, &origin, &sql, &params).await?;
        if rows.is_empty() {
            return Err(ModelError::Database(format!("{} returned no row", origin)));
        }
        self.absorb_row(rows.swap_remove(0));

        self.mark_persisted(true);
        debug!(model = schema.name(), "record inserted");
        Ok(())
    }

    async fn update_dirty(&mut self, client: &dyn QueryClient) -> ModelResult<()> {
        let schema = self.schema().clone();
        let changes: Vec<(String, Value)> = self
            .dirty_attributes()
            .into_iter()
            .filter_map(|(attribute, value)| {
                schema
                    .column_name(attribute)
                    .map(|column| (column.to_string(), value.clone()))
            })
            .collect();

        if changes.is_empty() {
            return Ok(());
        }

        let pk = self.require_primary_key("update")?;
        let origin = format!("update {}", schema.name());
        let (sql, params) = client
            .query()
            .update(schema.table())
            .set_values(changes)
            .where_eq(&schema.primary_key_column(), pk)
            .to_sql_with_params(client.dialect());
        execute_statement(client, &origin, &sql, &params).await?;

        self.sync_original();
        Ok(())
    }

    /// Delete the row backing this record
    pub async fn delete(&mut self, client: &dyn QueryClient) -> ModelResult<()> {
        let schema = self.schema().clone();
        let pk = self.require_primary_key("delete")?;
        let origin = format!("delete {}", schema.name());
        let (sql, params) = client
            .query()
            .delete_from(schema.table())
            .where_eq(&schema.primary_key_column(), pk)
            .to_sql_with_params(client.dialect());
        execute_statement(client, &origin, &sql, &params).await?;

        self.mark_persisted(false);
        Ok(())
    }

    /// Reload attributes from the database
    pub async fn refresh(&mut self, client: &dyn QueryClient) -> ModelResult<()> {
        let schema = self.schema().clone();
        let pk = self.require_primary_key("refresh")?;
        let origin = format!("refresh {}", schema.name());
        let (sql, params) = client
            .query()
            .from(schema.table())
            .where_eq(&schema.primary_key_column(), pk.clone())
            .limit(1)
            .to_sql_with_params(client.dialect());

        let row = fetch_json_rows(client, &origin, &sql, &params)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::RowNotFound(format!("{}({})", schema.name(), pk)))?;
        self.absorb_row(row);
        Ok(())
    }

    fn require_primary_key(&self, action: &str) -> ModelResult<Value> {
        self.primary_key_value().cloned().ok_or_else(|| {
            ModelError::Query(format!(
                "cannot {} {} without a primary key value",
                action,
                self.schema().name()
            ))
        })
    }

    /// Lazy query for one relation of this record
    pub fn related_query(
        &self,
        relation: &str,
        client: Arc<dyn QueryClient>,
    ) -> ModelResult<RelationQueryBuilder> {
        self.relation(relation)?.query(self, client)
    }

    /// Persistence client for one relation of this record
    pub fn related_client(
        &mut self,
        relation: &str,
        client: Arc<dyn QueryClient>,
    ) -> ModelResult<RelationClient<'_>> {
        let definition = self.relation(relation)?;
        definition.client(self, client)
    }

    /// Load relations onto this record, one query per relation name
    pub async fn load(
        &mut self,
        relations: &[&str],
        client: &Arc<dyn QueryClient>,
    ) -> ModelResult<()> {

        let mut preloader = Preloader::new();
        for relation in relations {
            preloader.preload(self.schema(), relation, None)?;
        }
        preloader.process_all_for_one(self, client).await
    }
}
