//! Persistence for has-one, has-many, morph-one and morph-many relations

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::required_value;
use crate::backends::QueryClient;
use crate::error::ModelResult;
use crate::model::Record;
use crate::relationships::{KeySlot, RelationDefinition, RelationKind, RelationQueryBuilder};
use crate::transaction::TransactionScope;

/// Writes related records that carry the parent's key
pub struct HasOneOrManyClient<'a> {
    relation: Arc<RelationDefinition>,
    parent: &'a mut Record,
    client: Arc<dyn QueryClient>,
}

impl<'a> HasOneOrManyClient<'a> {
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

    /// Lazy query for the related records
    pub fn query(&self) -> ModelResult<RelationQueryBuilder> {
        self.relation.query(&*self.parent, self.client.clone())
    }

    /// Copy the parent key (and morph type) onto `related`
    fn stamp(&self, related: &mut Record) -> ModelResult<()> {
        let keys = self.relation.boot()?;
        let local = keys.require(KeySlot::LocalKey)?;
        let value = required_value(&self.relation, &*self.parent, &local.attribute)?;

        match self.relation.kind() {
            RelationKind::MorphOne | RelationKind::MorphMany => {
                related.set(&keys.require(KeySlot::MorphId)?.attribute, value)?;
                let tag = self.relation.owner_tag()?;
                related.set(&keys.require(KeySlot::MorphType)?.attribute, tag)?;
            }
            _ => related.set(&keys.require(KeySlot::ForeignKey)?.attribute, value)?,
        }
        Ok(())
    }

    async fn save_within(
        &mut self,
        client: &Arc<dyn QueryClient>,
        related: &mut [Record],
    ) -> ModelResult<()> {
        if !self.parent.is_persisted() {
            self.parent.save(client.as_ref()).await?;
        }
        for record in related.iter_mut() {
            self.stamp(record)?;
            record.save(client.as_ref()).await?;
        }
        Ok(())
    }

    /// Persist `related` under the parent, saving a new parent first
    pub async fn save(&mut self, related: &mut Record) -> ModelResult<()> {
        self.save_many(std::slice::from_mut(related)).await
    }

    /// Persist every record in `related` under the parent in one transaction
    pub async fn save_many(&mut self, related: &mut [Record]) -> ModelResult<()> {
        let parent_state = self.parent.snapshot();
        let related_states: Vec<_> = related.iter().map(Record::snapshot).collect();

        let scope = TransactionScope::begin(&self.client).await?;
        let result = self.save_within(scope.client(), related).await;
        let result = scope.finish(result).await;

        if result.is_err() {
            self.parent.restore(parent_state);
            for (record, state) in related.iter_mut().zip(related_states) {
                record.restore(state);
            }
        }
        result
    }

    /// Build a related record from `values` and persist it under the parent
    pub async fn create(&mut self, values: Value) -> ModelResult<Record> {
        let mut created = self.create_many(vec![values]).await?;
        Ok(created.remove(0))
    }

    pub async fn create_many(&mut self, values: Vec<Value>) -> ModelResult<Vec<Record>> {
        let related = self.relation.related_schema()?;
        let mut records = values
            .into_iter()
            .map(|values| Record::make(related.clone(), values))
            .collect::<ModelResult<Vec<_>>>()?;
        self.save_many(&mut records).await?;
        debug!(
            relation = self.relation.name(),
            created = records.len(),
            "created related records"
        );
        Ok(records)
    }

    async fn find_within(
        &self,
        client: &Arc<dyn QueryClient>,
        search: &Value,
    ) -> ModelResult<Option<Record>> {

        self.relation
            .query(&*self.parent, client.clone())?
            .where_attributes(search)?
            .first()
            .await
    }

    async fn first_or_create_within(
        &mut self,
        client: &Arc<dyn QueryClient>,
        search: Value,
        payload: Value,
    ) -> ModelResult<Record> {
        if self.parent.is_persisted() {
            if let Some(existing) = self.find_within(client, &search).await? {
                return Ok(existing);
            }
        }

        let mut record = Record::make(self.relation.related_schema()?, search)?;
        record.fill(payload)?;
        self.save_within(client, std::slice::from_mut(&mut record)).await?;
        Ok(record)
    }

    /// Related record matching `search`, created from `search` and `payload` when absent
    pub async fn first_or_create(&mut self, search: Value, payload: Value) -> ModelResult<Record> {
        let parent_state = self.parent.snapshot();
        let scope = TransactionScope::begin(&self.client).await?;
        let result = self.first_or_create_within(scope.client(), search, payload).await;
        let result = scope.finish(result).await;
        if result.is_err() {
            self.parent.restore(parent_state);
        }
        result
    }

    async fn update_or_create_within(
        &mut self,
        client: &Arc<dyn QueryClient>,
        search: Value,
        payload: Value,
    ) -> ModelResult<Record> {
        let existing = if self.parent.is_persisted() {
            self.find_within(client, &search).await?
        } else {
            None
        };

        let mut record = match existing {
            Some(record) => record,
            None => Record::make(self.relation.related_schema()?, search)?,
        };
        record.fill(payload)?;
        self.save_within(client, std::slice::from_mut(&mut record)).await?;
        Ok(record)
    }

    /// Update the related record matching `search` with `payload`, or create it
    pub async fn update_or_create(&mut self, search: Value, payload: Value) -> ModelResult<Record> {
        let parent_state = self.parent.snapshot();
        let scope = TransactionScope::begin(&self.client).await?;
        let result = self.update_or_create_within(scope.client(), search, payload).await;
        let result = scope.finish(result).await;
        if result.is_err() {
            self.parent.restore(parent_state);
        }
        result
    }

    /// Delete every related row of the parent
    pub async fn delete_all(&self) -> ModelResult<u64> {
        self.query()?.delete().await
    }
}
