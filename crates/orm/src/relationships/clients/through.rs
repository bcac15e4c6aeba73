//! Read access for has-many-through relations

use std::sync::Arc;

use crate::backends::QueryClient;
use crate::error::ModelResult;
use crate::model::Record;
use crate::relationships::{RelationDefinition, RelationQueryBuilder};

/// Through relations are read-only; rows are written through the intermediate schema
pub struct ThroughClient<'a> {
    relation: Arc<RelationDefinition>,
    parent: &'a mut Record,
    client: Arc<dyn QueryClient>,
}

impl<'a> ThroughClient<'a> {
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

    pub fn query(&self) -> ModelResult<RelationQueryBuilder> {
        self.relation.query(&*self.parent, self.client.clone())
    }
}
