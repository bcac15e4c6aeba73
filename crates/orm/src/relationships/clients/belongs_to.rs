//! Persistence for belongs-to and morph-to relations, where the key lives on the parent

use std::sync::Arc;

use serde_json::Value;

use super::required_value;
use crate::backends::QueryClient;
use crate::error::ModelResult;
use crate::model::{MorphMap, Record};
use crate::relationships::{KeySlot, RelationDefinition, RelationKind, RelationQueryBuilder};
use crate::transaction::TransactionScope;

pub struct BelongsToClient<'a> {
    relation: Arc<RelationDefinition>,
    parent: &'a mut Record,
    client: Arc<dyn QueryClient>,
}

impl<'a> BelongsToClient<'a> {
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

    /// Lazy query for the owning record
    pub fn query(&self) -> ModelResult<RelationQueryBuilder> {
        self.relation.query(&*self.parent, self.client.clone())
    }

    /// Point the parent at `related`
    fn stamp(&mut self, related: &Record) -> ModelResult<()> {
        let keys = self.relation.boot()?;
        if self.relation.kind() == RelationKind::MorphTo {
            let target_key = self.relation.morph_target_key(related.schema())?;
            let id = required_value(&self.relation, related, &target_key.attribute)?;
            let tag = MorphMap::global().tag_for(related.schema());
            self.parent.set(&keys.require(KeySlot::MorphId)?.attribute, id)?;
            self.parent.set(&keys.require(KeySlot::MorphType)?.attribute, tag)?;
        } else {
            let local = keys.require(KeySlot::LocalKey)?;
            let value = required_value(&self.relation, related, &local.attribute)?;
            self.parent.set(&keys.require(KeySlot::ForeignKey)?.attribute, value)?;
        }
        Ok(())
    }

    async fn associate_within(
        &mut self,
        client: &Arc<dyn QueryClient>,
        related: &mut Record,
    ) -> ModelResult<()> {

        if !related.is_persisted() {
            related.save(client.as_ref()).await?;
        }
        self.stamp(related)?;
        self.parent.save(client.as_ref()).await
    }

    /// Save `related` if needed, point the parent at it and save the parent
    pub async fn associate(&mut self, related: &mut Record) -> ModelResult<()> {
        let parent_state = self.parent.snapshot();
        let related_state = related.snapshot();

        let scope = TransactionScope::begin(&self.client).await?;
        let result = self.associate_within(scope.client(), related).await;
        let result = scope.finish(result).await;

        match result {
            Ok(()) => self.relation.set_related(self.parent, Some(related.clone())),
            Err(err) => {
                self.parent.restore(parent_state);
                related.restore(related_state);
                Err(err)
            }
        }
    }

    /// Clear the parent's key columns and save it
    pub async fn dissociate(&mut self) -> ModelResult<()> {
        let keys = self.relation.boot()?;
        let parent_state = self.parent.snapshot();

        let slots: &[KeySlot] = if self.relation.kind() == RelationKind::MorphTo {
            &[KeySlot::MorphId, KeySlot::MorphType]
        } else {
            &[KeySlot::ForeignKey]
        };
        for slot in slots {
            self.parent.set(&keys.require(*slot)?.attribute, Value::Null)?;
        }

        if let Err(err) = self.parent.save(self.client.as_ref()).await {
            self.parent.restore(parent_state);
            return Err(err);
        }
        self.relation.set_related(self.parent, None)
    }
}
