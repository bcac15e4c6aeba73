//! Schema-backed records
//!
//! A `Record` stores attribute values by attribute name, plus the relations
//! loaded onto it and any extra columns a query returned (pivot columns,
//! relation counts).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::schema::Schema;
use crate::error::{ModelError, ModelResult};
use crate::relationships::RelationDefinition;

/// Relation value loaded onto a record
#[derive(Debug, Clone)]
pub enum Related {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

impl Related {
    pub fn len(&self) -> usize {
        match self {
            Related::One(one) => usize::from(one.is_some()),
            Related::Many(many) => many.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Attribute state captured before a multi-statement write
#[derive(Debug, Clone)]
pub(crate) struct RecordState {
    attributes: BTreeMap<String, Value>,
    original: BTreeMap<String, Value>,
    persisted: bool,
}

#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    attributes: BTreeMap<String, Value>,
    original: BTreeMap<String, Value>,
    extras: BTreeMap<String, Value>,
    relations: BTreeMap<String, Related>,
    persisted: bool,
    sideload: Option<Arc<Value>>,
}

impl Record {
    /// Fresh, unsaved record
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            attributes: BTreeMap::new(),
            original: BTreeMap::new(),
            extras: BTreeMap::new(),
            relations: BTreeMap::new(),
            persisted: false,
            sideload: None,
        }
    }

    /// Unsaved record filled from a JSON object of attributes
    pub fn make(schema: Arc<Schema>, values: Value) -> ModelResult<Self> {
        let mut record = Self::new(schema);
        record.fill(values)?;
        Ok(record)
    }

    /// Hydrate a fetched row. Columns the schema does not declare land in `extras`.
    pub fn from_row(
        schema: Arc<Schema>,
        row: Map<String, Value>,
        sideload: Option<Arc<Value>>,
    ) -> Self {

        let mut record = Self::new(schema);
        record.absorb_row(row);
        record.persisted = true;
        record.sideload = sideload;
        record
    }

    pub(crate) fn absorb_row(&mut self, row: Map<String, Value>) {
        for (column, value) in row {
            match self.schema.attribute_for_column(&column) {
                Some(attribute) => {
                    self.attributes.insert(attribute.to_string(), value);
                }
                None => {
                    self.extras.insert(column, value);
                }
            }
        }
        self.sync_original();
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Relation registered on this record's schema
    pub fn relation(&self, name: &str) -> ModelResult<Arc<RelationDefinition>> {
        self.schema.relation(name)
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    /// Set a declared attribute
    pub fn set(&mut self, attribute: &str, value: impl Into<Value>) -> ModelResult<()> {
        if !self.schema.has_attribute(attribute) {
            return Err(ModelError::UndefinedAttribute {
                model: self.schema.name().to_string(),
                attribute: attribute.to_string(),
                context: "assignment".to_string(),
            });
        }
        self.attributes.insert(attribute.to_string(), value.into());
        Ok(())
    }

    /// Merge a JSON object of attribute values
    pub fn fill(&mut self, values: Value) -> ModelResult<()> {
        match values {
            Value::Object(map) => {
                for (attribute, value) in map {
                    self.set(&attribute, value)?;
                }
                Ok(())
            }
            Value::Null => Ok(()),
            other => Err(ModelError::Serialization(format!(
                "expected an object of attributes, got {}",
                other
            ))),
        }
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub fn primary_key_value(&self) -> Option<&Value> {
        self.get(self.schema.primary_key()).filter(|value| !value.is_null())
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub(crate) fn mark_persisted(&mut self, persisted: bool) {
        self.persisted = persisted;
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_attributes().is_empty()
    }

    /// Attributes changed since the record was last fetched or saved
    pub fn dirty_attributes(&self) -> Vec<(&str, &Value)> {
        self.attributes
            .iter()
            .filter(|(attribute, value)| self.original.get(attribute.as_str()) != Some(*value))
            .map(|(attribute, value)| (attribute.as_str(), value))
            .collect()
    }

    pub(crate) fn sync_original(&mut self) {
        self.original = self.attributes.clone();
    }

    /// Values of columns the schema does not declare
    pub fn extras(&self) -> &BTreeMap<String, Value> {
        &self.extras
    }

    pub fn extra(&self, name: &str) -> Option<&Value> {
        self.extras.get(name)
    }

    pub fn related(&self, relation: &str) -> Option<&Related> {
        self.relations.get(relation)
    }

    pub fn is_loaded(&self, relation: &str) -> bool {
        self.relations.contains_key(relation)
    }

    /// Loaded to-one relation
    pub fn related_one(&self, relation: &str) -> Option<&Record> {
        match self.relations.get(relation) {
            Some(Related::One(one)) => one.as_deref(),
            _ => None,
        }
    }

    /// Loaded to-many relation; empty when not loaded
    pub fn related_many(&self, relation: &str) -> &[Record] {
        match self.relations.get(relation) {
            Some(Related::Many(many)) => many,
            _ => &[],
        }
    }

    pub fn loaded_relations(&self) -> impl Iterator<Item = (&str, &Related)> {
        self.relations.iter().map(|(name, related)| (name.as_str(), related))
    }

    pub(crate) fn put_related(&mut self, relation: &str, related: Related) {
        self.relations.insert(relation.to_string(), related);
    }

    pub(crate) fn related_entry(&mut self, relation: &str) -> &mut Related {
        self.relations
            .entry(relation.to_string())
            .or_insert_with(|| Related::Many(Vec::new()))
    }

    pub fn sideload(&self) -> Option<&Arc<Value>> {
        self.sideload.as_ref()
    }

    pub fn set_sideload(&mut self, sideload: Option<Arc<Value>>) {
        self.sideload = sideload;
    }

    /// Copy without loaded relations
    pub fn detached(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            attributes: self.attributes.clone(),
            original: self.original.clone(),
            extras: self.extras.clone(),
            relations: BTreeMap::new(),
            persisted: self.persisted,
            sideload: self.sideload.clone(),
        }
    }

    pub(crate) fn snapshot(&self) -> RecordState {
        RecordState {
            attributes: self.attributes.clone(),
            original: self.original.clone(),
            persisted: self.persisted,
        }
    }

    pub(crate) fn restore(&mut self, state: RecordState) {
        self.attributes = state.attributes;
        self.original = state.original;
        self.persisted = state.persisted;
    }
}

/// Normalized form of a key value used to match parents with related rows.
/// Null has no key.
pub(crate) fn lookup_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => format!("n:{}", i),
            None => match n.as_u64() {
                Some(u) => format!("n:{}", u),
                None => format!("f:{}", n),
            },
        }),
        Value::String(s) => Some(format!("s:{}", s)),
        Value::Bool(b) => Some(format!("b:{}", b)),
        other => Some(format!("j:{}", other)),
    }
}
