//! Pivot table persistence for many-to-many and morph-to-many relations
//!
//! `attach`, `detach` and `sync` only touch pivot rows. Related records are
//! written by `save` and `create`, which then attach them.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use super::required_value;
use crate::backends::{execute_statement, QueryClient};
use crate::error::{ModelError, ModelResult};
use crate::model::record::lookup_key;
use crate::model::Record;
use crate::relationships::{KeySlot, RelationDefinition, RelationKind, RelationQueryBuilder};
use crate::transaction::TransactionScope;

/// Pivot rows changed by a sync
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncChanges {
    pub attached: Vec<Value>,
    pub detached: Vec<Value>,
    pub updated: Vec<Value>,
}

pub struct ManyToManyClient<'a> {
    relation: Arc<RelationDefinition>,
    parent: &'a mut Record,
    client: Arc<dyn QueryClient>,
}

impl<'a> ManyToManyClient<'a> {
    pub(crate) fn new(
        relation: Arc<RelationDefinition>,
        parent: &'a mut Record,
        client: Arc<dyn QueryClient>,
    ) -> Self {

        Self {
            relation,
            parent,
            client,
        }
    }

    pub fn relation(&self) -> &Arc<RelationDefinition> {
        &self.relation
    }

    pub fn parent(&self) -> &Record {
        &*self.parent
    }

    /// Lazy query for the related records through the pivot table
    pub fn query(&self) -> ModelResult<RelationQueryBuilder> {
        self.relation.query(&*self.parent, self.client.clone())
    }

    /// Query over the parent's pivot rows; run it with `exec_raw`, `update` or `delete`
    pub fn pivot_query(&self) -> ModelResult<RelationQueryBuilder> {
        self.pivot_query_on(&self.client)
    }

    fn pivot_query_on(&self, client: &Arc<dyn QueryClient>) -> ModelResult<RelationQueryBuilder> {
        RelationQueryBuilder::pivot_only(self.relation.clone(), &*self.parent, client.clone())
    }

    fn describe(&self) -> String {
        format!("{}.{}", self.relation.owner_name(), self.relation.name())
    }

    fn timestamp() -> Value {
        Value::String(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string())
    }

    async fn insert_rows(
        &self,
        client: &Arc<dyn QueryClient>,
        rows: Vec<(Value, Value)>,
    ) -> ModelResult<Vec<Value>> {
        let keys = self.relation.boot()?;
        let table = keys.require_pivot_table()?.to_string();
        let local = keys.require(KeySlot::LocalKey)?;
        let parent_value = required_value(&self.relation, &*self.parent, &local.attribute)?;
        let pivot_foreign = keys.require(KeySlot::PivotForeignKey)?.column.clone();
        let pivot_related = keys.require(KeySlot::PivotRelatedForeignKey)?.column.clone();
        let morph = if self.relation.kind() == RelationKind::MorphToMany {
            let column = keys.require(KeySlot::PivotMorphType)?.column.clone();
            Some((column, self.relation.owner_tag()?))
        } else {
            None
        };

        let origin = format!("attach {}", self.describe());
        let mut attached = Vec::with_capacity(rows.len());
        for (id, attributes) in rows {
            if id.is_null() {
                return Err(ModelError::Query(format!("{}: cannot attach a null id", origin)));
            }
            let mut values = vec![
                (pivot_foreign.clone(), parent_value.clone()),
                (pivot_related.clone(), id.clone()),
            ];
            if let Some((column, tag)) = &morph {
                values.push((column.clone(), Value::String(tag.clone())));
            }
            values.extend(pivot_attributes(attributes)?);
            if self.relation.options().pivot_timestamps {
                values.push(("created_at".to_string(), Self::timestamp()));
                values.push(("updated_at".to_string(), Self::timestamp()));
            }

            let (sql, params) = client
                .query()
                .insert_into(&table)
                .set_values(values)
                .to_sql_with_params(client.dialect());
            execute_statement(client.as_ref(), &origin, &sql, &params).await?;
            attached.push(id);
        }
        Ok(attached)
    }

    async fn delete_rows(
        &self,
        client: &Arc<dyn QueryClient>,
        ids: Option<Vec<Value>>,
    ) -> ModelResult<u64> {
        let keys = self.relation.boot()?;
        let mut query = self.pivot_query_on(client)?;
        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(0);
            }
            let column = &keys.require(KeySlot::PivotRelatedForeignKey)?.column;
            query = query.where_in_pivot(column, ids)?;
        }
        query.delete().await
    }

    /// Insert pivot rows linking the parent to `ids`
    pub async fn attach(&mut self, ids: Vec<Value>) -> ModelResult<()> {
        self.attach_with(ids.into_iter().map(|id| (id, Value::Object(Map::new()))).collect())
            .await
    }

    /// Insert pivot rows, each with its own extra pivot columns
    pub async fn attach_with(&mut self, rows: Vec<(Value, Value)>) -> ModelResult<()> {
        let scope = TransactionScope::begin(&self.client).await?;
        let result = self.insert_rows(scope.client(), rows).await;
        let attached = scope.finish(result).await?;
        debug!(relation = %self.describe(), attached = attached.len(), "attached pivot rows");
        Ok(())
    }

    /// Delete the pivot rows for `ids`, or every pivot row of the parent
    pub async fn detach(&mut self, ids: Option<Vec<Value>>) -> ModelResult<u64> {
        let removed = self.delete_rows(&self.client, ids).await?;
        debug!(relation = %self.describe(), removed, "detached pivot rows");
        Ok(removed)
    }

    async fn sync_within(
        &self,
        client: &Arc<dyn QueryClient>,
        rows: Vec<(Value, Value)>,
        detach: bool,
    ) -> ModelResult<SyncChanges> {
        let keys = self.relation.boot()?;
        let pivot_related = keys.require(KeySlot::PivotRelatedForeignKey)?.column.clone();

        let existing = self.pivot_query_on(client)?.exec_raw().await?;
        let mut changes = SyncChanges::default();
        let mut requested = HashSet::new();
        let mut to_attach = Vec::new();

        for (id, attributes) in rows {
            let Some(key) = lookup_key(&id) else {
                return Err(ModelError::Query(format!(
                    "{}: cannot sync a null id",
                    self.describe()
                )));
            };
            if !requested.insert(key.clone()) {
                continue;
            }

            let current = existing.iter().find(|row| {
                row.get(&pivot_related).and_then(lookup_key).as_deref() == Some(key.as_str())
            });
            let Some(current) = current else {
                to_attach.push((id, attributes));
                continue;
            };

            let mut updates = pivot_attributes(attributes)?;
            updates.retain(|(column, value)| {
                current.get(column).and_then(lookup_key) != lookup_key(value)
            });
            if updates.is_empty() {
                continue;
            }
            if self.relation.options().pivot_timestamps {
                updates.push(("updated_at".to_string(), Self::timestamp()));
            }
            self.pivot_query_on(client)?
                .where_pivot(&pivot_related, id.clone())?
                .update(Value::Object(updates.into_iter().collect()))
                .await?;
            changes.updated.push(id);
        }

        if detach {
            let stale: Vec<Value> = existing
                .iter()
                .filter_map(|row| row.get(&pivot_related))
                .filter(|value| lookup_key(value).map_or(false, |key| !requested.contains(&key)))
                .cloned()
                .collect();
            self.delete_rows(client, Some(stale.clone())).await?;
            changes.detached = stale;
        }

        changes.attached = self.insert_rows(client, to_attach).await?;
        Ok(changes)
    }

    /// Make `ids` the complete set of attached ids
    pub async fn sync(&mut self, ids: Vec<Value>) -> ModelResult<SyncChanges> {
        self.sync_with(ids.into_iter().map(|id| (id, Value::Object(Map::new()))).collect(), true)
            .await
    }

    /// Attach missing ids without detaching the others
    pub async fn sync_without_detaching(&mut self, ids: Vec<Value>) -> ModelResult<SyncChanges> {
        self.sync_with(ids.into_iter().map(|id| (id, Value::Object(Map::new()))).collect(), false)
            .await
    }

    /// Sync with per-id pivot attributes. Attached ids whose attributes differ are updated.
    pub async fn sync_with(
        &mut self,
        rows: Vec<(Value, Value)>,
        detach: bool,
    ) -> ModelResult<SyncChanges> {

        let scope = TransactionScope::begin(&self.client).await?;
        let result = self.sync_within(scope.client(), rows, detach).await;
        let changes = scope.finish(result).await?;
        debug!(
            relation = %self.describe(),
            attached = changes.attached.len(),
            detached = changes.detached.len(),
            updated = changes.updated.len(),
            "synced pivot rows"
        );
        Ok(changes)
    }

    async fn save_within(
        &mut self,
        client: &Arc<dyn QueryClient>,
        related: &mut Record,
        pivot: Value,
    ) -> ModelResult<()> {
        if !self.parent.is_persisted() {
            self.parent.save(client.as_ref()).await?;
        }
        if !related.is_persisted() || related.is_dirty() {
            related.save(client.as_ref()).await?;
        }
        let keys = self.relation.boot()?;
        let related_key = keys.require(KeySlot::RelatedKey)?;
        let id = required_value(&self.relation, related, &related_key.attribute)?;
        self.insert_rows(client, vec![(id, pivot)]).await?;
        Ok(())
    }

    /// Persist `related` and attach it with `pivot` attributes
    pub async fn save(&mut self, related: &mut Record, pivot: Value) -> ModelResult<()> {
        let parent_state = self.parent.snapshot();
        let related_state = related.snapshot();

        let scope = TransactionScope::begin(&self.client).await?;
        let result = self.save_within(scope.client(), related, pivot).await;
        let result = scope.finish(result).await;

        if result.is_err() {
            self.parent.restore(parent_state);
            related.restore(related_state);
        }
        result
    }

    /// Create a related record from `values` and attach it
    pub async fn create(&mut self, values: Value, pivot: Value) -> ModelResult<Record> {
        let mut record = Record::make(self.relation.related_schema()?, values)?;
        self.save(&mut record, pivot).await?;
        Ok(record)
    }
}

fn pivot_attributes(attributes: Value) -> ModelResult<Vec<(String, Value)>> {
    match attributes {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(ModelError::Serialization(format!(
            "pivot attributes must be an object, got {}",
            other
        ))),
    }
}
