//! Relation clients
//!
//! A relation client binds one relation to one parent record and performs
//! the writes that relation shape allows. Writes spanning several
//! statements run inside a single transaction scope; on failure the scope
//! rolls back and the in-memory records are restored.

mod belongs_to;
mod has_one_or_many;
mod many_to_many;
mod through;

pub use belongs_to::BelongsToClient;
pub use has_one_or_many::HasOneOrManyClient;
pub use many_to_many::{ManyToManyClient, SyncChanges};
pub use through::ThroughClient;

use serde_json::Value;

use super::definition::RelationDefinition;
use super::query::RelationQueryBuilder;
use crate::error::{ModelError, ModelResult};
use crate::model::Record;

/// Client for one relation of one parent, by relation shape
pub enum RelationClient<'a> {
    HasOneOrMany(HasOneOrManyClient<'a>),
    BelongsTo(BelongsToClient<'a>),
    ManyToMany(ManyToManyClient<'a>),
    Through(ThroughClient<'a>),
}

impl<'a> RelationClient<'a> {
    fn shape(&self) -> &'static str {
        match self {
            RelationClient::HasOneOrMany(_) => "has-one/has-many",
            RelationClient::BelongsTo(_) => "belongs-to",
            RelationClient::ManyToMany(_) => "many-to-many",
            RelationClient::Through(_) => "has-many-through",
        }
    }

    fn mismatch(&self, wanted: &str) -> ModelError {
        ModelError::UnsupportedOperation(format!(
            "relation has a {} client, not {}",
            self.shape(),
            wanted
        ))
    }

    pub fn into_has_one_or_many(self) -> ModelResult<HasOneOrManyClient<'a>> {
        match self {
            RelationClient::HasOneOrMany(client) => Ok(client),
            other => Err(other.mismatch("has-one/has-many")),
        }
    }

    pub fn into_belongs_to(self) -> ModelResult<BelongsToClient<'a>> {
        match self {
            RelationClient::BelongsTo(client) => Ok(client),
            other => Err(other.mismatch("belongs-to")),
        }
    }

    pub fn into_many_to_many(self) -> ModelResult<ManyToManyClient<'a>> {
        match self {
            RelationClient::ManyToMany(client) => Ok(client),
            other => Err(other.mismatch("many-to-many")),
        }
    }

    pub fn into_through(self) -> ModelResult<ThroughClient<'a>> {
        match self {
            RelationClient::Through(client) => Ok(client),
            other => Err(other.mismatch("has-many-through")),
        }
    }

    /// Lazy query for the related records
    pub fn query(&self) -> ModelResult<RelationQueryBuilder> {
        match self {
            RelationClient::HasOneOrMany(client) => client.query(),
            RelationClient::BelongsTo(client) => client.query(),
            RelationClient::ManyToMany(client) => client.query(),
            RelationClient::Through(client) => client.query(),
        }
    }
}

/// Non-null value of `attribute` on `record`
pub(crate) fn required_value(
    relation: &RelationDefinition,
    record: &Record,
    attribute: &str,
) -> ModelResult<Value> {
    record
        .get(attribute)
        .filter(|value| !value.is_null())
        .cloned()
        .ok_or_else(|| {
            ModelError::missing_value(record.schema().name(), relation.name(), attribute)
        })

}
