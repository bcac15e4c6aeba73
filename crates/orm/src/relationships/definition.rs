//! Relation definitions
//!
//! A `RelationDefinition` is registered on its owning schema with an
//! unresolved key policy. The first `boot()` resolves the keys through
//! `KeyResolver`; every later call returns the same resolved set.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use serde_json::Value;
use tracing::debug;

use super::clients::{
    BelongsToClient, HasOneOrManyClient, ManyToManyClient, RelationClient, ThroughClient,
};
use super::keys::{KeyRequest, KeyResolver, KeySlot, ResolvedKeyPair, ResolvedKeys};
use super::kinds::{RelationKind, RelationOptions};
use super::query::{ParentScope, RelationQueryBuilder, Selection};
use crate::backends::QueryClient;
use crate::error::{ModelError, ModelResult};
use crate::model::{MorphMap, Record, Schema, SchemaFactory};
use crate::query::AliasGenerator;

pub struct RelationDefinition {
    name: String,
    kind: RelationKind,
    owner: Weak<Schema>,
    owner_name: String,
    target: Option<SchemaFactory>,
    through: Option<SchemaFactory>,
    options: RelationOptions,
    serialize_as: Option<String>,
    keys: OnceLock<ModelResult<Arc<ResolvedKeys>>>,
}

impl RelationDefinition {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        owner: Weak<Schema>,
        owner_name: &str,
        name: &str,
        kind: RelationKind,
        target: Option<SchemaFactory>,
        through: Option<SchemaFactory>,
        options: RelationOptions,
        serialize_as: Option<String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            owner,
            owner_name: owner_name.to_string(),
            target,
            through,
            options,
            serialize_as,
            keys: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    pub fn options(&self) -> &RelationOptions {
        &self.options
    }

    /// Key the relation is serialized under; `None` hides it
    pub fn serialize_as(&self) -> Option<&str> {
        self.serialize_as.as_deref()
    }

    pub fn owner(&self) -> ModelResult<Arc<Schema>> {
        self.owner.upgrade().ok_or_else(|| {
            ModelError::Configuration(format!(
                "schema '{}' owning relation '{}' was dropped",
                self.owner_name, self.name
            ))
        })
    }

    /// Target schema. Morph-to relations resolve theirs per record.
    pub fn related_schema(&self) -> ModelResult<Arc<Schema>> {
        match &self.target {
            Some(factory) => Ok(factory()),
            None => Err(ModelError::UnsupportedOperation(format!(
                "{}.{} resolves its target from each record's morph type",
                self.owner_name, self.name
            ))),
        }
    }

    pub fn through_schema(&self) -> ModelResult<Arc<Schema>> {
        match &self.through {
            Some(factory) => Ok(factory()),
            None => Err(ModelError::Configuration(format!(
                "{}.{} has no through schema",
                self.owner_name, self.name
            ))),
        }
    }

    /// Polymorphic name; morph-to relations default to their own name
    pub fn morph_name(&self) -> Option<String> {
        match (&self.options.morph_name, self.kind) {
            (Some(name), _) => Some(name.clone()),
            (None, RelationKind::MorphTo) => Some(self.name.clone()),
            (None, _) => None,
        }
    }

    fn require_morph_name(&self) -> ModelResult<String> {
        self.morph_name().ok_or_else(|| {
            ModelError::Configuration(format!(
                "{} relation {}.{} needs a morph name",
                self.kind, self.owner_name, self.name
            ))
        })
    }

    pub fn is_booted(&self) -> bool {
        self.keys.get().is_some()
    }

    /// Resolve keys once. Later calls return the first outcome.
    pub fn boot(&self) -> ModelResult<Arc<ResolvedKeys>> {
        self.keys
            .get_or_init(|| {
                let keys = self.resolve_keys().map(Arc::new);
                if let Ok(keys) = &keys {
                    let resolved: Vec<String> = keys
                        .iter()
                        .map(|(slot, pair)| format!("{}={}", slot, pair.column))
                        .collect();
                    debug!(
                        model = %self.owner_name,
                        relation = %self.name,
                        kind = %self.kind,
                        keys = ?resolved,
                        "relation booted"
                    );
                }
                keys
            })
            .clone()
    }

    fn resolve_keys(&self) -> ModelResult<ResolvedKeys> {
        let owner = self.owner()?;
        let naming = owner.naming();
        let o = &self.options;

        let keys = match self.kind {
            RelationKind::HasOne | RelationKind::HasMany => {
                let related = self.related_schema()?;
                KeyResolver::resolve(
                    owner.name(),
                    &self.name,
                    vec![
                        KeyRequest::attribute(
                            KeySlot::LocalKey,
                            &owner,
                            o.local_key.as_deref(),
                            || owner.primary_key().to_string(),
                        ),
                        KeyRequest::attribute(
                            KeySlot::ForeignKey,
                            &related,
                            o.foreign_key.as_deref(),
                            || naming.foreign_key(&owner),
                        ),
                    ],
                )?
            }
            RelationKind::MorphOne | RelationKind::MorphMany => {
                let related = self.related_schema()?;
                let morph = self.require_morph_name()?;
                KeyResolver::resolve(
                    owner.name(),
                    &self.name,
                    vec![
                        KeyRequest::attribute(
                            KeySlot::LocalKey,
                            &owner,
                            o.local_key.as_deref(),
                            || owner.primary_key().to_string(),
                        ),
                        KeyRequest::attribute(
                            KeySlot::MorphType,
                            &related,
                            o.morph_type.as_deref(),
                            || naming.morph_type(&morph),
                        ),
                        KeyRequest::attribute(
                            KeySlot::MorphId,
                            &related,
                            o.morph_id.as_deref(),
                            || naming.morph_id(&morph),
                        ),
                    ],
                )?
            }
            RelationKind::BelongsTo => {
                let related = self.related_schema()?;
                KeyResolver::resolve(
                    owner.name(),
                    &self.name,
                    vec![
                        KeyRequest::attribute(
                            KeySlot::ForeignKey,
                            &owner,
                            o.foreign_key.as_deref(),
                            || naming.foreign_key(&related),
                        ),
                        KeyRequest::attribute(
                            KeySlot::LocalKey,
                            &related,
                            o.local_key.as_deref(),
                            || related.primary_key().to_string(),
                        ),
                    ],
                )?
            }
            RelationKind::ManyToMany => {
                let related = self.related_schema()?;
                let pivot_table = o
                    .pivot_table
                    .clone()
                    .unwrap_or_else(|| naming.pivot_table(&owner, &related));
                KeyResolver::resolve(
                    owner.name(),
                    &self.name,
                    vec![
                        KeyRequest::attribute(
                            KeySlot::LocalKey,
                            &owner,
                            o.local_key.as_deref(),
                            || owner.primary_key().to_string(),
                        ),
                        KeyRequest::attribute(
                            KeySlot::RelatedKey,
                            &related,
                            o.related_key.as_deref(),
                            || related.primary_key().to_string(),
                        ),
                        KeyRequest::column(
                            KeySlot::PivotForeignKey,
                            o.pivot_foreign_key
                                .clone()
                                .unwrap_or_else(|| naming.pivot_foreign_key(&owner)),
                        ),
                        KeyRequest::column(
                            KeySlot::PivotRelatedForeignKey,
                            o.pivot_related_foreign_key
                                .clone()
                                .unwrap_or_else(|| naming.pivot_foreign_key(&related)),
                        ),
                    ],
                )?
                .with_pivot_table(pivot_table)
            }
            RelationKind::MorphToMany => {
                let related = self.related_schema()?;
                let morph = self.require_morph_name()?;
                let pivot_table = o.pivot_table.clone().unwrap_or_else(|| format!("{}s", morph));
                KeyResolver::resolve(
                    owner.name(),
                    &self.name,
                    vec![
                        KeyRequest::attribute(
                            KeySlot::LocalKey,
                            &owner,
                            o.local_key.as_deref(),
                            || owner.primary_key().to_string(),
                        ),
                        KeyRequest::attribute(
                            KeySlot::RelatedKey,
                            &related,
                            o.related_key.as_deref(),
                            || related.primary_key().to_string(),
                        ),
                        KeyRequest::column(
                            KeySlot::PivotMorphType,
                            o.morph_type.clone().unwrap_or_else(|| naming.morph_type(&morph)),
                        ),
                        KeyRequest::column(
                            KeySlot::PivotForeignKey,
                            o.pivot_foreign_key.clone().unwrap_or_else(|| naming.morph_id(&morph)),
                        ),
                        KeyRequest::column(
                            KeySlot::PivotRelatedForeignKey,
                            o.pivot_related_foreign_key
                                .clone()
                                .unwrap_or_else(|| naming.pivot_foreign_key(&related)),
                        ),
                    ],
                )?
                .with_pivot_table(pivot_table)
            }
            RelationKind::HasManyThrough => {
                let related = self.related_schema()?;
                let through = self.through_schema()?;
                KeyResolver::resolve(
                    owner.name(),
                    &self.name,
                    vec![
                        KeyRequest::attribute(
                            KeySlot::LocalKey,
                            &owner,
                            o.local_key.as_deref(),
                            || owner.primary_key().to_string(),
                        ),
                        KeyRequest::attribute(
                            KeySlot::ForeignKey,
                            &through,
                            o.foreign_key.as_deref(),
                            || naming.foreign_key(&owner),
                        ),
                        KeyRequest::attribute(
                            KeySlot::ThroughLocalKey,
                            &through,
                            o.through_local_key.as_deref(),
                            || through.primary_key().to_string(),
                        ),
                        KeyRequest::attribute(
                            KeySlot::ThroughForeignKey,
                            &related,
                            o.through_foreign_key.as_deref(),
                            || naming.foreign_key(&through),
                        ),
                    ],
                )?
            }
            RelationKind::MorphTo => {
                let morph = self.require_morph_name()?;
                KeyResolver::resolve(
                    owner.name(),
                    &self.name,
                    vec![
                        KeyRequest::attribute(
                            KeySlot::MorphType,
                            &owner,
                            o.morph_type.as_deref(),
                            || naming.morph_type(&morph),
                        ),
                        KeyRequest::attribute(
                            KeySlot::MorphId,
                            &owner,
                            o.morph_id.as_deref(),
                            || naming.morph_id(&morph),
                        ),
                    ],
                )?
            }
        };

        Ok(keys)
    }

    /// Type tag of the owning schema, as stored in morph type columns
    pub(crate) fn owner_tag(&self) -> ModelResult<String> {
        Ok(MorphMap::global().tag_for(self.owner()?.as_ref()))
    }

    /// Schema a morph-to relation points at for `tag`
    pub fn morph_target(&self, tag: &str) -> ModelResult<Arc<Schema>> {
        if let Some(schema) = MorphMap::global().resolve(tag) {
            return Ok(schema);
        }
        self.options
            .morph_targets
            .iter()
            .map(|factory| factory())
            .find(|schema| schema.name() == tag)
            .ok_or_else(|| {
                ModelError::Configuration(format!(
                    "{}.{}: no schema registered for morph type '{}'",
                    self.owner_name, self.name, tag
                ))
            })
    }

    /// Key on a morph-to target matched against the morph id
    pub(crate) fn morph_target_key(&self, target: &Schema) -> ModelResult<ResolvedKeyPair> {
        let attribute = self
            .options
            .local_key
            .clone()
            .unwrap_or_else(|| target.primary_key().to_string());
        let context = format!("morph target key of {}.{}", self.owner_name, self.name);
        let column = target.require_column(&attribute, &context)?.to_string();
        Ok(ResolvedKeyPair { attribute, column })
    }

    fn new_aliases(client: &dyn QueryClient) -> AliasGenerator {
        AliasGenerator::new(&client.config().self_join_alias_prefix)
    }

    fn morph_tag_of(&self, record: &Record, keys: &ResolvedKeys) -> ModelResult<Option<String>> {
        let morph_type = keys.require(KeySlot::MorphType)?;
        match record.get(&morph_type.attribute) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(tag)) => Ok(Some(tag.clone())),
            Some(other) => Err(ModelError::Query(format!(
                "{}.{}: morph type must be a string, got {}",
                self.owner_name, self.name, other
            ))),
        }
    }

    /// Lazy query for the records related to `parent`
    pub fn query(
        self: &Arc<Self>,
        parent: &Record,
        client: Arc<dyn QueryClient>,
    ) -> ModelResult<RelationQueryBuilder> {
        let keys = self.boot()?;
        let (related, tag) = if self.kind == RelationKind::MorphTo {
            let tag = self.morph_tag_of(parent, &keys)?.ok_or_else(|| {
                let attribute = keys
                    .get(KeySlot::MorphType)
                    .map(|pair| pair.attribute.clone())
                    .unwrap_or_default();
                ModelError::missing_value(&self.owner_name, &self.name, &attribute)
            })?;
            (self.morph_target(&tag)?, Some(tag))
        } else {
            (self.related_schema()?, None)
        };

        let aliases = Self::new_aliases(client.as_ref());
        RelationQueryBuilder::new(
            self.clone(),
            related,
            tag,
            ParentScope::One(Box::new(parent.detached())),
            client,
            aliases,
        )
    }

    /// Batched query for the records related to all of `parents`.
    /// Morph-to relations need one query per type; use `eager_queries`.
    pub fn eager_query(
        self: &Arc<Self>,
        parents: &[Record],
        client: Arc<dyn QueryClient>,
    ) -> ModelResult<RelationQueryBuilder> {
        if self.kind == RelationKind::MorphTo {
            return Err(ModelError::UnsupportedOperation(format!(
                "{}.{} loads one batch per morph type",
                self.owner_name, self.name
            )));
        }
        self.boot()?;
        let aliases = Self::new_aliases(client.as_ref());
        RelationQueryBuilder::new(
            self.clone(),
            self.related_schema()?,
            None,
            ParentScope::Many(parents.iter().map(Record::detached).collect()),
            client,
            aliases,
        )
    }

    /// Batched queries for `parents`: one for most kinds, one per distinct morph type for morph-to
    pub fn eager_queries(
        self: &Arc<Self>,
        parents: &[Record],
        client: Arc<dyn QueryClient>,
    ) -> ModelResult<Vec<RelationQueryBuilder>> {
        if self.kind != RelationKind::MorphTo {
            return Ok(vec![self.eager_query(parents, client)?]);
        }

        let keys = self.boot()?;
        let mut groups: Vec<(String, Vec<Record>)> = Vec::new();
        for parent in parents {
            self.require_parent_keys(parent)?;
            let Some(tag) = self.morph_tag_of(parent, &keys)? else {
                continue;
            };
            match groups.iter_mut().find(|(existing, _)| *existing == tag) {
                Some((_, members)) => members.push(parent.detached()),
                None => groups.push((tag, vec![parent.detached()])),
            }
        }

        groups
            .into_iter()
            .map(|(tag, members)| {
                let aliases = Self::new_aliases(client.as_ref());
                RelationQueryBuilder::new(
                    self.clone(),
                    self.morph_target(&tag)?,
                    Some(tag),
                    ParentScope::Many(members),
                    client.clone(),
                    aliases,
                )
            })
            .collect()
    }

    fn correlated_query(
        self: &Arc<Self>,
        outer_table: &str,
        outer_ref: &str,
        client: Arc<dyn QueryClient>,
        aliases: AliasGenerator,
        selection: Selection,
    ) -> ModelResult<RelationQueryBuilder> {
        if self.kind == RelationKind::MorphTo {
            return Err(ModelError::UnsupportedOperation(format!(
                "existence queries are not available on morph-to relation {}.{}",
                self.owner_name, self.name
            )));
        }
        self.boot()?;
        let query = RelationQueryBuilder::new(
            self.clone(),
            self.related_schema()?,
            None,
            ParentScope::Correlated {
                outer_table: outer_table.to_string(),
                outer_ref: outer_ref.to_string(),
            },
            client,
            aliases,
        )?;
        Ok(query.with_selection(selection))
    }

    /// Correlated subquery for `has`/`where_has`, constrained against `outer_ref`
    pub fn relation_existence_query(
        self: &Arc<Self>,
        outer_table: &str,
        outer_ref: &str,
        client: Arc<dyn QueryClient>,
        aliases: AliasGenerator,
    ) -> ModelResult<RelationQueryBuilder> {
        self.correlated_query(outer_table, outer_ref, client, aliases, Selection::Exists)
    }

    /// Correlated `COUNT(*)` subquery for `with_count` and count comparisons
    pub fn relation_existence_count_query(
        self: &Arc<Self>,
        outer_table: &str,
        outer_ref: &str,
        client: Arc<dyn QueryClient>,
        aliases: AliasGenerator,
    ) -> ModelResult<RelationQueryBuilder> {
        self.correlated_query(outer_table, outer_ref, client, aliases, Selection::Count)
    }

    /// Persistence client bound to `parent`
    pub fn client<'a>(
        self: &Arc<Self>,
        parent: &'a mut Record,
        client: Arc<dyn QueryClient>,
    ) -> ModelResult<RelationClient<'a>> {
        self.boot()?;
        let relation = self.clone();
        Ok(match self.kind {
            RelationKind::HasOne
            | RelationKind::HasMany
            | RelationKind::MorphOne
            | RelationKind::MorphMany => {
                RelationClient::HasOneOrMany(HasOneOrManyClient::new(relation, parent, client))
            }
            RelationKind::BelongsTo | RelationKind::MorphTo => {
                RelationClient::BelongsTo(BelongsToClient::new(relation, parent, client))
            }
            RelationKind::ManyToMany | RelationKind::MorphToMany => {
                RelationClient::ManyToMany(ManyToManyClient::new(relation, parent, client))
            }
            RelationKind::HasManyThrough => {
                RelationClient::Through(ThroughClient::new(relation, parent, client))
            }
        })
    }
}

impl fmt::Debug for RelationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("owner", &self.owner_name)
            .field("serialize_as", &self.serialize_as)
            .field("booted", &self.is_booted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SchemaBuilder;
    use once_cell::sync::Lazy;

    static AUTHOR: Lazy<Arc<Schema>> = Lazy::new(|| {
        SchemaBuilder::new("Author", "authors")
            .column("id")
            .has_many("books", || BOOK.clone(), RelationOptions::new())
            .many_to_many("awards", || AWARD.clone(), RelationOptions::new())
            .build()
    });

    static BOOK: Lazy<Arc<Schema>> = Lazy::new(|| {
        SchemaBuilder::new("Book", "books")
            .columns(&["id", "author_id"])
            .belongs_to("author", || AUTHOR.clone(), RelationOptions::new())
            .build()
    });

    static AWARD: Lazy<Arc<Schema>> =
        Lazy::new(|| SchemaBuilder::new("Award", "awards").column("id").build());


    #[test]
    fn test_boot_is_idempotent() {
        let books = AUTHOR.relation("books").unwrap();
        let first = books.boot().unwrap();
        let second = books.boot().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.get(KeySlot::ForeignKey).unwrap().column, "author_id");
        assert_eq!(first.get(KeySlot::LocalKey).unwrap().column, "id");
    }

    #[test]
    fn test_mutually_referencing_schemas_boot() {
        assert!(AUTHOR.boot().is_ok());
        assert!(BOOK.boot().is_ok());
        let author = BOOK.relation("author").unwrap().boot().unwrap();
        assert_eq!(author.get(KeySlot::ForeignKey).unwrap().attribute, "author_id");
    }

    #[test]
    fn test_pivot_defaults_follow_naming() {
        let keys = AUTHOR.relation("awards").unwrap().boot().unwrap();
        assert_eq!(keys.pivot_table(), Some("author_award"));
        assert_eq!(keys.get(KeySlot::PivotForeignKey).unwrap().column, "author_id");
        assert_eq!(keys.get(KeySlot::PivotRelatedForeignKey).unwrap().column, "award_id");
    }

    #[test]
    fn test_missing_foreign_key_attribute_fails_boot() {
        let broken = SchemaBuilder::new("Shelf", "shelves")
            .column("id")
            .has_many("books", || AWARD.clone(), RelationOptions::new())
            .build();
        let err = broken.relation("books").unwrap().boot().unwrap_err();
        assert!(matches!(err, ModelError::UndefinedAttribute { .. }));
        assert!(broken.boot().is_err());
    }
}
