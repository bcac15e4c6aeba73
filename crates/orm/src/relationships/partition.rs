//! Attaching related records to parents
//!
//! Matching compares normalized key values: the parent-side key of the
//! relation against the related-side key, or the alias a joined key was
//! selected under for pivot and through relations.

use std::collections::HashMap;

use serde_json::Value;

use super::definition::RelationDefinition;
use super::keys::KeySlot;
use super::kinds::RelationKind;
use super::query::RelationQueryBuilder;
use crate::error::{ModelError, ModelResult};
use crate::model::record::lookup_key;
use crate::model::{MorphMap, Record, Related};

impl RelationDefinition {
    fn malformed(&self, reason: impl Into<String>) -> ModelError {
        ModelError::malformed(self.owner_name(), self.name(), reason)
    }

    /// Key of `parent` that related rows are matched against
    pub(crate) fn parent_match_key(&self, parent: &Record) -> ModelResult<Option<String>> {
        let keys = self.boot()?;
        let key = match self.kind() {
            RelationKind::BelongsTo => {
                parent.get(&keys.require(KeySlot::ForeignKey)?.attribute).and_then(lookup_key)
            }
            RelationKind::MorphTo => {
                let tag = parent
                    .get(&keys.require(KeySlot::MorphType)?.attribute)
                    .and_then(Value::as_str);
                let id = parent
                    .get(&keys.require(KeySlot::MorphId)?.attribute)
                    .and_then(lookup_key);
                match (tag, id) {
                    (Some(tag), Some(id)) => Some(format!("{}|{}", tag, id)),
                    _ => None,
                }
            }
            _ => parent.get(&keys.require(KeySlot::LocalKey)?.attribute).and_then(lookup_key),
        };
        Ok(key)
    }

    /// Fail when `parent` lacks an attribute the relation keys on. Null values are allowed.
    pub(crate) fn require_parent_keys(&self, parent: &Record) -> ModelResult<()> {
        let keys = self.boot()?;
        let slots: &[KeySlot] = match self.kind() {
            RelationKind::BelongsTo => &[KeySlot::ForeignKey],
            RelationKind::MorphTo => &[KeySlot::MorphType, KeySlot::MorphId],
            _ => &[KeySlot::LocalKey],
        };
        for slot in slots {
            let attribute = &keys.require(*slot)?.attribute;
            if parent.get(attribute).is_none() {
                return Err(ModelError::missing_value(self.owner_name(), self.name(), attribute));
            }
        }
        Ok(())
    }

    /// Key of a related record matched against `parent_match_key`
    pub(crate) fn related_match_key(&self, related: &Record) -> ModelResult<Option<String>> {
        let keys = self.boot()?;
        let key = match self.kind() {
            RelationKind::HasOne | RelationKind::HasMany => {
                related.get(&keys.require(KeySlot::ForeignKey)?.attribute).and_then(lookup_key)
            }
            RelationKind::MorphOne | RelationKind::MorphMany => {
                related.get(&keys.require(KeySlot::MorphId)?.attribute).and_then(lookup_key)
            }
            RelationKind::BelongsTo => {
                related.get(&keys.require(KeySlot::LocalKey)?.attribute).and_then(lookup_key)
            }
            RelationKind::MorphTo => {
                let tag = MorphMap::global().tag_for(related.schema());
                let target_key = self.morph_target_key(related.schema())?;
                related
                    .get(&target_key.attribute)
                    .and_then(lookup_key)
                    .map(|id| format!("{}|{}", tag, id))
            }
            RelationKind::ManyToMany | RelationKind::MorphToMany => related
                .extra(&RelationQueryBuilder::pivot_foreign_key_alias(&keys)?)
                .and_then(lookup_key),
            RelationKind::HasManyThrough => related
                .extra(&RelationQueryBuilder::through_key_alias(&keys)?)
                .and_then(lookup_key),
        };
        Ok(key)
    }

    fn check_schema(&self, related: &Record) -> ModelResult<()> {
        if self.kind() == RelationKind::MorphTo {
            return Ok(());
        }
        let expected = self.related_schema()?;
        if related.schema().name() != expected.name() {
            return Err(self.malformed(format!(
                "expected a {} record, got {}",
                expected.name(),
                related.schema().name()
            )));
        }
        Ok(())
    }

    /// Verify that `related` satisfies the relation keys of `parent`
    fn check_assignment(&self, parent: &Record, related: &Record) -> ModelResult<()> {
        self.check_schema(related)?;
        if self.kind().uses_pivot() || self.kind() == RelationKind::HasManyThrough {
            return Ok(());
        }

        let parent_key = self.parent_match_key(parent)?;
        let related_key = self.related_match_key(related)?;
        if parent_key.is_none() || parent_key != related_key {
            return Err(self.malformed(format!(
                "related {} key {:?} does not match parent key {:?}",
                related.schema().name(),
                related_key,
                parent_key
            )));
        }

        if matches!(self.kind(), RelationKind::MorphOne | RelationKind::MorphMany) {
            let keys = self.boot()?;
            let stored = related.get(&keys.require(KeySlot::MorphType)?.attribute);
            let tag = self.owner_tag()?;
            if stored.and_then(Value::as_str) != Some(tag.as_str()) {
                return Err(self.malformed(format!(
                    "related morph type {:?} is not '{}'",
                    stored, tag
                )));
            }
        }
        Ok(())
    }

    /// Assign a to-one relation on `parent`
    pub fn set_related(&self, parent: &mut Record, related: Option<Record>) -> ModelResult<()> {
        if !self.kind().is_to_one() {
            return Err(self.malformed(format!(
                "{} relation holds a list, use push_related",
                self.kind()
            )));
        }
        if let Some(related) = &related {
            self.check_assignment(parent, related)?;
        }
        parent.put_related(self.name(), Related::One(related.map(Box::new)));
        Ok(())
    }

    /// Append to a to-many relation on `parent`
    pub fn push_related(&self, parent: &mut Record, related: Vec<Record>) -> ModelResult<()> {
        if self.kind().is_to_one() {
            return Err(self.malformed(format!(
                "{} relation holds one record, use set_related",
                self.kind()
            )));
        }
        for record in &related {
            self.check_assignment(parent, record)?;
        }
        match parent.related_entry(self.name()) {
            Related::Many(existing) => existing.extend(related),
            slot => *slot = Related::Many(related),
        }
        Ok(())
    }

    /// Distribute `related` over `parents` by key. Parents without a match get an empty value.
    pub fn set_related_for_many(
        &self,
        parents: &mut [Record],
        related: Vec<Record>,
    ) -> ModelResult<()> {
        let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
        for record in related {
            let key = self.related_match_key(&record)?.ok_or_else(|| {
                self.malformed(format!(
                    "related {} row is missing the key it is matched on",
                    record.schema().name()
                ))
            })?;
            grouped.entry(key).or_default().push(record);
        }

        for parent in parents.iter_mut() {
            self.require_parent_keys(parent)?;
            let matches = self.parent_match_key(parent)?.and_then(|key| grouped.get(&key));
            let value = if self.kind().is_to_one() {
                Related::One(matches.and_then(|records| records.first()).cloned().map(Box::new))
            } else {
                Related::Many(matches.cloned().unwrap_or_default())
            };
            parent.put_related(self.name(), value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{Schema, SchemaBuilder};
    use crate::relationships::RelationOptions;
    use once_cell::sync::Lazy;
    use serde_json::json;

    static OWNER: Lazy<Arc<Schema>> = Lazy::new(|| {
        SchemaBuilder::new("Owner", "owners")
            .column("id")
            .has_many("pets", || PET.clone(), RelationOptions::new())
            .has_one("favorite", || PET.clone(), RelationOptions::new())
            .build()
    });

    static PET: Lazy<Arc<Schema>> = Lazy::new(|| {
        SchemaBuilder::new("Pet", "pets")
            .columns(&["id", "owner_id"])
            .belongs_to("owner", || OWNER.clone(), RelationOptions::new())
            .build()
    });

    fn record(schema: &Arc<Schema>, values: Value) -> Record {
        let Value::Object(row) = values else { unreachable!() };
        Record::from_row(schema.clone(), row, None)
    }

    #[test]
    fn test_set_related_checks_keys() {
        let mut pet = record(&PET, json!({"id": 1, "owner_id": 5}));
        let relation = PET.relation("owner").unwrap();
        let wrong = record(&OWNER, json!({"id": 6}));
        assert!(matches!(
            relation.set_related(&mut pet, Some(wrong)),
            Err(ModelError::MalformedRelationAssignment { .. })
        ));

        let right = record(&OWNER, json!({"id": 5}));
        relation.set_related(&mut pet, Some(right)).unwrap();
        assert_eq!(pet.related_one("owner").and_then(|o| o.get("id")), Some(&json!(5)));
    }

    #[test]
    fn test_list_and_single_shapes_are_enforced() {
        let mut owner = record(&OWNER, json!({"id": 1}));
        let pets = OWNER.relation("pets").unwrap();
        let favorite = OWNER.relation("favorite").unwrap();

        assert!(pets.set_related(&mut owner, None).is_err());
        assert!(favorite.push_related(&mut owner, vec![]).is_err());

        pets.push_related(&mut owner, vec![record(&PET, json!({"id": 2, "owner_id": 1}))])
            .unwrap();
        pets.push_related(&mut owner, vec![record(&PET, json!({"id": 3, "owner_id": 1}))])
            .unwrap();
        assert_eq!(owner.related_many("pets").len(), 2);
    }

    #[test]
    fn test_partition_fills_unmatched_parents_with_empty_values() {
        let mut owners = vec![record(&OWNER, json!({"id": 1})), record(&OWNER, json!({"id": 2}))];
        let pets = vec![
            record(&PET, json!({"id": 10, "owner_id": 1})),
            record(&PET, json!({"id": 11, "owner_id": 1})),
        ];

        OWNER.relation("pets").unwrap().set_related_for_many(&mut owners, pets.clone()).unwrap();
        OWNER.relation("favorite").unwrap().set_related_for_many(&mut owners, pets).unwrap();

        assert_eq!(owners[0].related_many("pets").len(), 2);
        assert!(owners[1].related_many("pets").is_empty());
        assert!(owners[1].is_loaded("pets"));
        assert_eq!(owners[0].related_one("favorite").and_then(|p| p.get("id")), Some(&json!(10)));
        assert!(owners[1].related_one("favorite").is_none());
    }

    #[test]
    fn test_partition_rejects_parents_without_the_key_attribute() {
        let mut owners = vec![
            record(&OWNER, json!({"id": 1})),
            record(&OWNER, json!({"name": "x"})),
        ];

        let pets = vec![record(&PET, json!({"id": 10, "owner_id": 1}))];

        let result = OWNER.relation("pets").unwrap().set_related_for_many(&mut owners, pets);
        assert!(matches!(
            result,
            Err(ModelError::MissingForeignKeyValue { attribute, .. }) if attribute == "id"
        ));
    }
}
