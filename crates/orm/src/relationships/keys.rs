//! Key resolution
//!
//! Every relation names its keys by logical slot. `KeyResolver` turns each
//! slot into a verified attribute/column pair once, at boot.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ModelError, ModelResult};
use crate::model::Schema;

/// Logical key positions a relation may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeySlot {
    LocalKey,
    ForeignKey,
    RelatedKey,
    ThroughLocalKey,
    ThroughForeignKey,
    MorphType,
    MorphId,
    PivotForeignKey,
    PivotRelatedForeignKey,
    PivotMorphType,
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeySlot::LocalKey => "local key",
            KeySlot::ForeignKey => "foreign key",
            KeySlot::RelatedKey => "related key",
            KeySlot::ThroughLocalKey => "through local key",
            KeySlot::ThroughForeignKey => "through foreign key",
            KeySlot::MorphType => "morph type",
            KeySlot::MorphId => "morph id",
            KeySlot::PivotForeignKey => "pivot foreign key",
            KeySlot::PivotRelatedForeignKey => "pivot related foreign key",
            KeySlot::PivotMorphType => "pivot morph type",
        };
        write!(f, "{}", name)
    }
}

/// Attribute and physical column for one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKeyPair {
    pub attribute: String,
    pub column: String,
}

enum KeySource<'a> {
    Attribute { schema: &'a Schema, attribute: String },
    Column(String),
}

/// One slot to resolve
pub struct KeyRequest<'a> {
    slot: KeySlot,
    source: KeySource<'a>,
}

impl<'a> KeyRequest<'a> {
    /// Slot backed by an attribute of `schema`. `default` runs only when no name was given.
    pub fn attribute<F>(
        slot: KeySlot,
        schema: &'a Schema,
        desired: Option<&str>,
        default: F,
    ) -> Self
    where
        F: FnOnce() -> String,
    {
        let attribute = desired.map(str::to_string).unwrap_or_else(default);
        Self {
            slot,
            source: KeySource::Attribute { schema, attribute },
        }
    }

    /// Slot on a table with no schema, such as a pivot table
    pub fn column(slot: KeySlot, column: String) -> Self {
        Self {
            slot,
            source: KeySource::Column(column),
        }
    }
}

/// Resolved keys of one relation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedKeys {
    pairs: BTreeMap<KeySlot, ResolvedKeyPair>,
    pivot_table: Option<String>,
}

impl ResolvedKeys {
    pub fn get(&self, slot: KeySlot) -> Option<&ResolvedKeyPair> {
        self.pairs.get(&slot)
    }

    pub(crate) fn require(&self, slot: KeySlot) -> ModelResult<&ResolvedKeyPair> {
        self.pairs
            .get(&slot)
            .ok_or_else(|| {
                ModelError::Query(format!("{} was not resolved for this relation", slot))
            })
    }

    pub fn pivot_table(&self) -> Option<&str> {
        self.pivot_table.as_deref()
    }

    pub(crate) fn require_pivot_table(&self) -> ModelResult<&str> {
        self.pivot_table()
            .ok_or_else(|| ModelError::Query("relation has no pivot table".to_string()))
    }

    pub(crate) fn with_pivot_table(mut self, table: String) -> Self {
        self.pivot_table = Some(table);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeySlot, &ResolvedKeyPair)> {
        self.pairs.iter()
    }
}

pub struct KeyResolver;

impl KeyResolver {
    /// Resolve every request or fail on the first undeclared attribute
    pub fn resolve(
        owner: &str,
        relation: &str,
        requests: Vec<KeyRequest<'_>>,
    ) -> ModelResult<ResolvedKeys> {
        let mut pairs = BTreeMap::new();
        for request in requests {
            let pair = match request.source {
                KeySource::Attribute { schema, attribute } => {
                    let context = format!("{} of {}.{}", request.slot, owner, relation);
                    let column = schema.require_column(&attribute, &context)?.to_string();
                    ResolvedKeyPair { attribute, column }
                }
                KeySource::Column(column) => ResolvedKeyPair {
                    attribute: column.clone(),
                    column,
                },
            };
            pairs.insert(request.slot, pair);
        }
        Ok(ResolvedKeys {
            pairs,
            pivot_table: None,
        })
    }
}
