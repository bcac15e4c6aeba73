//! Relation shapes and their per-relation options

use std::fmt;
use std::sync::Arc;

use super::scopes::ScopeFn;
use crate::model::SchemaFactory;
use crate::query::QueryBuilder;

/// Supported relationship shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
    ManyToMany,
    HasManyThrough,
    MorphTo,
    MorphOne,
    MorphMany,
    MorphToMany,
}

impl RelationKind {
    /// At most one related record per parent
    pub fn is_to_one(&self) -> bool {
        matches!(
            self,
            RelationKind::HasOne
                | RelationKind::BelongsTo
                | RelationKind::MorphTo
                | RelationKind::MorphOne
        )
    }

    pub fn is_polymorphic(&self) -> bool {
        matches!(
            self,
            RelationKind::MorphTo
                | RelationKind::MorphOne
                | RelationKind::MorphMany
                | RelationKind::MorphToMany
        )
    }

    /// Backed by a pivot table
    pub fn uses_pivot(&self) -> bool {
        matches!(self, RelationKind::ManyToMany | RelationKind::MorphToMany)
    }

    /// Foreign key lives on the related table
    pub fn is_has_one_or_many(&self) -> bool {
        matches!(
            self,
            RelationKind::HasOne
                | RelationKind::HasMany
                | RelationKind::MorphOne
                | RelationKind::MorphMany

        )
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationKind::HasOne => "has_one",
            RelationKind::HasMany => "has_many",
            RelationKind::BelongsTo => "belongs_to",
            RelationKind::ManyToMany => "many_to_many",
            RelationKind::HasManyThrough => "has_many_through",
            RelationKind::MorphTo => "morph_to",
            RelationKind::MorphOne => "morph_one",
            RelationKind::MorphMany => "morph_many",
            RelationKind::MorphToMany => "morph_to_many",
        };
        write!(f, "{}", name)
    }
}

/// Explicit key names and extras for one relation. Unset keys follow the owner's naming strategy.
#[derive(Clone, Default)]
pub struct RelationOptions {
    pub local_key: Option<String>,
    pub foreign_key: Option<String>,
    pub related_key: Option<String>,
    pub through_local_key: Option<String>,
    pub through_foreign_key: Option<String>,
    pub pivot_table: Option<String>,
    pub pivot_foreign_key: Option<String>,
    pub pivot_related_foreign_key: Option<String>,
    pub pivot_columns: Vec<String>,
    pub pivot_timestamps: bool,
    /// Polymorphic name, `commentable` gives `commentable_type` / `commentable_id`
    pub morph_name: Option<String>,
    pub morph_type: Option<String>,
    pub morph_id: Option<String>,
    /// Candidate targets of a morph-to relation not present in the morph map
    pub morph_targets: Vec<SchemaFactory>,
    /// `Some(None)` hides the relation from serialization
    pub serialize_as: Option<Option<String>>,
    pub on_query: Option<ScopeFn>,
}

impl RelationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_key(mut self, attribute: &str) -> Self {
        self.local_key = Some(attribute.to_string());
        self
    }

    pub fn foreign_key(mut self, attribute: &str) -> Self {
        self.foreign_key = Some(attribute.to_string());
        self
    }

    pub fn related_key(mut self, attribute: &str) -> Self {
        self.related_key = Some(attribute.to_string());
        self
    }

    pub fn through_local_key(mut self, attribute: &str) -> Self {
        self.through_local_key = Some(attribute.to_string());
        self
    }

    pub fn through_foreign_key(mut self, attribute: &str) -> Self {
        self.through_foreign_key = Some(attribute.to_string());
        self
    }

    pub fn pivot_table(mut self, table: &str) -> Self {
        self.pivot_table = Some(table.to_string());
        self
    }

    pub fn pivot_foreign_key(mut self, column: &str) -> Self {
        self.pivot_foreign_key = Some(column.to_string());
        self
    }

    pub fn pivot_related_foreign_key(mut self, column: &str) -> Self {
        self.pivot_related_foreign_key = Some(column.to_string());
        self
    }

    /// Extra pivot columns selected as `pivot_<column>`
    pub fn pivot_columns(mut self, columns: &[&str]) -> Self {
        self.pivot_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Maintain `created_at` / `updated_at` on pivot rows
    pub fn pivot_timestamps(mut self) -> Self {
        self.pivot_timestamps = true;
        self
    }

    pub fn morph_name(mut self, name: &str) -> Self {
        self.morph_name = Some(name.to_string());
        self
    }

    pub fn morph_type(mut self, attribute: &str) -> Self {
        self.morph_type = Some(attribute.to_string());
        self
    }

    pub fn morph_id(mut self, attribute: &str) -> Self {
        self.morph_id = Some(attribute.to_string());
        self
    }

    pub fn morph_target<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Arc<crate::model::Schema> + Send + Sync + 'static,
    {
        self.morph_targets.push(Arc::new(factory));
        self
    }

    pub fn serialize_as(mut self, name: Option<&str>) -> Self {
        self.serialize_as = Some(name.map(str::to_string));
        self
    }

    /// Refinement applied to every query generated for the relation
    pub fn on_query<F>(mut self, refine: F) -> Self
    where
        F: Fn(QueryBuilder, &str) -> QueryBuilder + Send + Sync + 'static,
    {
        self.on_query = Some(Arc::new(refine));
        self
    }
}
