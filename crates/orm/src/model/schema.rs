//! Record schemas
//!
//! A `Schema` is the compiled description of one record type: its table,
//! primary key, attribute/column table, relations and scopes. It is built
//! once (usually inside a `once_cell::sync::Lazy`) and never mutated.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use tracing::debug;

use super::naming::{NamingStrategy, SnakeCaseNaming};
use crate::backends::QueryClient;
use crate::error::{ModelError, ModelResult};
use crate::query::{ModelQueryBuilder, QueryBuilder};
use crate::relationships::{
    GlobalScopes, RelationDefinition, RelationKind, RelationOptions, ScopeFn,
};

/// Zero-argument accessor for a schema, resolved only when first needed
pub type SchemaFactory = Arc<dyn Fn() -> Arc<Schema> + Send + Sync>;

/// Attribute to column mapping for one declared column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub attribute: String,
    pub column: Option<String>,
    /// `Some(None)` hides the attribute from serialization
    pub serialize_as: Option<Option<String>>,
}

impl ColumnDefinition {
    pub fn new(attribute: &str) -> Self {
        Self {
            attribute: attribute.to_string(),
            column: None,
            serialize_as: None,
        }
    }

    pub fn column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    pub fn serialize_as(mut self, name: Option<&str>) -> Self {
        self.serialize_as = Some(name.map(str::to_string));
        self
    }
}

/// Column resolved against the naming strategy
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub attribute: String,
    pub column: String,
    pub serialize_as: Option<String>,
}

pub struct Schema {
    name: String,
    table: String,
    primary_key: String,
    columns: Vec<Column>,
    by_attribute: HashMap<String, usize>,
    by_column: HashMap<String, usize>,
    relations: HashMap<String, Arc<RelationDefinition>>,
    relation_order: Vec<String>,
    scopes: HashMap<String, ScopeFn>,
    global_scopes: GlobalScopes,
    naming: Arc<dyn NamingStrategy>,
    booted: OnceLock<ModelResult<()>>,
}

impl Schema {
    /// Model name, also the default polymorphic type tag
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Primary key attribute name
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Primary key column name
    pub fn primary_key_column(&self) -> String {
        self.column_name(&self.primary_key)
            .map(str::to_string)
            .unwrap_or_else(|| self.naming.column_name(&self.primary_key))
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn naming(&self) -> &dyn NamingStrategy {
        self.naming.as_ref()
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.by_attribute.contains_key(attribute)
    }

    pub fn column(&self, attribute: &str) -> Option<&Column> {
        self.by_attribute.get(attribute).map(|&i| &self.columns[i])
    }

    /// Column name of a declared attribute
    pub fn column_name(&self, attribute: &str) -> Option<&str> {
        self.column(attribute).map(|c| c.column.as_str())
    }

    /// Attribute name of a physical column
    pub fn attribute_for_column(&self, column: &str) -> Option<&str> {
        self.by_column.get(column).map(|&i| self.columns[i].attribute.as_str())
    }

    /// Column name of `attribute` or an `UndefinedAttribute` error naming `context`
    pub fn require_column(&self, attribute: &str, context: &str) -> ModelResult<&str> {
        self.column_name(attribute).ok_or_else(|| ModelError::UndefinedAttribute {
            model: self.name.clone(),
            attribute: attribute.to_string(),
            context: context.to_string(),
        })
    }

    /// Registered relation by name
    pub fn relation(&self, name: &str) -> ModelResult<Arc<RelationDefinition>> {
        self.relations
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::undefined_relationship(&self.name, name))
    }

    pub fn has_relation(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    /// Relations in registration order
    pub fn relations(&self) -> impl Iterator<Item = &Arc<RelationDefinition>> {
        self.relation_order.iter().filter_map(|name| self.relations.get(name))
    }

    pub fn scope(&self, name: &str) -> Option<&ScopeFn> {
        self.scopes.get(name)
    }

    pub fn global_scopes(&self) -> &GlobalScopes {
        &self.global_scopes
    }

    /// Boot every relation. Runs once; later calls return the first outcome.
    pub fn boot(&self) -> ModelResult<()> {
        self.booted
            .get_or_init(|| {
                self.require_column(&self.primary_key, "primary key")?;
                for relation in self.relations() {
                    relation.boot()?;
                }
                debug!(model = %self.name, relations = self.relations.len(), "schema booted");
                Ok(())
            })
            .clone()
    }

    pub fn is_booted(&self) -> bool {
        self.booted.get().is_some()
    }

    /// Start a query over this schema's table
    pub fn query(self: &Arc<Self>, client: Arc<dyn QueryClient>) -> ModelQueryBuilder {
        ModelQueryBuilder::new(self.clone(), client)
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("columns", &self.columns)
            .field("relations", &self.relation_order)
            .field("global_scopes", &self.global_scopes)
            .finish()
    }
}

struct PendingRelation {
    name: String,
    kind: RelationKind,
    target: Option<SchemaFactory>,
    through: Option<SchemaFactory>,
    options: RelationOptions,
}

/// Builder for a `Schema`
pub struct SchemaBuilder {
    name: String,
    table: String,
    primary_key: String,
    columns: Vec<ColumnDefinition>,
    relations: Vec<PendingRelation>,
    scopes: HashMap<String, ScopeFn>,
    global_scopes: GlobalScopes,
    naming: Arc<dyn NamingStrategy>,
}

impl SchemaBuilder {
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            primary_key: "id".to_string(),
            columns: Vec::new(),
            relations: Vec::new(),
            scopes: HashMap::new(),
            global_scopes: GlobalScopes::new(),
            naming: Arc::new(SnakeCaseNaming),
        }
    }

    pub fn primary_key(mut self, attribute: &str) -> Self {
        self.primary_key = attribute.to_string();
        self
    }

    pub fn naming(mut self, naming: impl NamingStrategy + 'static) -> Self {
        self.naming = Arc::new(naming);
        self
    }

    /// Declare an attribute whose column follows the naming strategy
    pub fn column(mut self, attribute: &str) -> Self {
        self.columns.push(ColumnDefinition::new(attribute));
        self
    }

    /// Declare several attributes at once
    pub fn columns(mut self, attributes: &[&str]) -> Self {
        self.columns.extend(attributes.iter().map(|a| ColumnDefinition::new(a)));
        self
    }

    /// Declare an attribute stored under an explicit column name
    pub fn column_as(mut self, attribute: &str, column: &str) -> Self {
        self.columns.push(ColumnDefinition::new(attribute).column(column));
        self
    }

    pub fn column_def(mut self, definition: ColumnDefinition) -> Self {
        self.columns.push(definition);
        self
    }

    fn relation(
        mut self,
        name: &str,
        kind: RelationKind,
        target: Option<SchemaFactory>,
        through: Option<SchemaFactory>,
        options: RelationOptions,
    ) -> Self {
        self.relations.retain(|pending| pending.name != name);
        self.relations.push(PendingRelation {
            name: name.to_string(),
            kind,
            target,
            through,
            options,
        });
        self
    }

    pub fn has_one<F>(self, name: &str, related: F, options: RelationOptions) -> Self
    where
        F: Fn() -> Arc<Schema> + Send + Sync + 'static,
    {
        self.relation(name, RelationKind::HasOne, Some(Arc::new(related)), None, options)
    }

    pub fn has_many<F>(self, name: &str, related: F, options: RelationOptions) -> Self
    where
        F: Fn() -> Arc<Schema> + Send + Sync + 'static,
    {
        self.relation(name, RelationKind::HasMany, Some(Arc::new(related)), None, options)
    }

    pub fn belongs_to<F>(self, name: &str, related: F, options: RelationOptions) -> Self
    where
        F: Fn() -> Arc<Schema> + Send + Sync + 'static,
    {
        self.relation(name, RelationKind::BelongsTo, Some(Arc::new(related)), None, options)
    }

    pub fn many_to_many<F>(self, name: &str, related: F, options: RelationOptions) -> Self
    where
        F: Fn() -> Arc<Schema> + Send + Sync + 'static,
    {
        self.relation(name, RelationKind::ManyToMany, Some(Arc::new(related)), None, options)
    }

    /// `related` reached through the `through` table
    pub fn has_many_through<F, T>(
        self,
        name: &str,
        related: F,
        through: T,
        options: RelationOptions,
    ) -> Self

    where
        F: Fn() -> Arc<Schema> + Send + Sync + 'static,
        T: Fn() -> Arc<Schema> + Send + Sync + 'static,
    {
        self.relation(
            name,
            RelationKind::HasManyThrough,
            Some(Arc::new(related)),
            Some(Arc::new(through)),
            options,
        )
    }

    /// Target type is read from the record's morph type attribute
    pub fn morph_to(self, name: &str, options: RelationOptions) -> Self {
        self.relation(name, RelationKind::MorphTo, None, None, options)
    }

    pub fn morph_one<F>(self, name: &str, related: F, options: RelationOptions) -> Self
    where
        F: Fn() -> Arc<Schema> + Send + Sync + 'static,
    {
        self.relation(name, RelationKind::MorphOne, Some(Arc::new(related)), None, options)
    }

    pub fn morph_many<F>(self, name: &str, related: F, options: RelationOptions) -> Self
    where
        F: Fn() -> Arc<Schema> + Send + Sync + 'static,
    {
        self.relation(name, RelationKind::MorphMany, Some(Arc::new(related)), None, options)
    }

    pub fn morph_to_many<F>(self, name: &str, related: F, options: RelationOptions) -> Self
    where
        F: Fn() -> Arc<Schema> + Send + Sync + 'static,
    {
        self.relation(name, RelationKind::MorphToMany, Some(Arc::new(related)), None, options)
    }

    /// Named scope applied on demand with `apply_scope`
    pub fn scope<F>(mut self, name: &str, scope: F) -> Self
    where
        F: Fn(QueryBuilder, &str) -> QueryBuilder + Send + Sync + 'static,
    {
        self.scopes.insert(name.to_string(), Arc::new(scope));
        self
    }

    /// Scope applied to every query over this schema unless removed
    pub fn global_scope<F>(mut self, name: &str, scope: F) -> Self
    where
        F: Fn(QueryBuilder, &str) -> QueryBuilder + Send + Sync + 'static,
    {
        self.global_scopes.add(name, Arc::new(scope));
        self
    }

    pub fn build(self) -> Arc<Schema> {
        let naming = self.naming;
        let columns: Vec<Column> = self
            .columns
            .into_iter()
            .map(|definition| Column {
                column: definition
                    .column
                    .unwrap_or_else(|| naming.column_name(&definition.attribute)),
                serialize_as: definition
                    .serialize_as
                    .unwrap_or_else(|| Some(naming.serialized_name(&definition.attribute))),
                attribute: definition.attribute,
            })
            .collect();

        let by_attribute = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.attribute.clone(), i))
            .collect();
        let by_column = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.column.clone(), i))
            .collect();

        let name = self.name;
        let pending = self.relations;
        let relation_order = pending.iter().map(|p| p.name.clone()).collect();

        Arc::new_cyclic(|owner: &Weak<Schema>| {
            let relations = pending
                .into_iter()
                .map(|p| {
                    let serialize_as = p
                        .options
                        .serialize_as
                        .clone()
                        .unwrap_or_else(|| Some(naming.relation_serialized_name(&p.name)));
                    let definition = RelationDefinition::new(
                        owner.clone(),
                        &name,
                        &p.name,
                        p.kind,
                        p.target,
                        p.through,
                        p.options,
                        serialize_as,
                    );
                    (p.name, Arc::new(definition))
                })
                .collect();

            Schema {
                name: name.clone(),
                table: self.table,
                primary_key: self.primary_key,
                columns,
                by_attribute,
                by_column,
                relations,
                relation_order,
                scopes: self.scopes,
                global_scopes: self.global_scopes,
                naming: naming.clone(),
                booted: OnceLock::new(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Arc<Schema> {
        SchemaBuilder::new("Account", "accounts")
            .column("id")
            .column("ownerId")
            .column_as("displayName", "name")
            .column_def(ColumnDefinition::new("password").serialize_as(None))
            .build()
    }

    #[test]
    fn test_attribute_and_column_lookups() {
        let schema = account();
        assert_eq!(schema.column_name("ownerId"), Some("owner_id"));
        assert_eq!(schema.column_name("displayName"), Some("name"));
        assert_eq!(schema.attribute_for_column("owner_id"), Some("ownerId"));
        assert_eq!(schema.primary_key_column(), "id");
        assert_eq!(schema.column("password").and_then(|c| c.serialize_as.clone()), None);
    }

    #[test]
    fn test_unknown_relation_is_reported() {
        let err = account().relation("owner").unwrap_err();
        assert!(matches!(err, ModelError::UndefinedRelationship { .. }));
    }

    #[test]
    fn test_boot_requires_declared_primary_key() {
        let schema = SchemaBuilder::new("Tag", "tags").primary_key("uuid").column("name").build();
        assert!(matches!(schema.boot(), Err(ModelError::UndefinedAttribute { .. })));
        assert!(schema.is_booted());
        assert!(schema.boot().is_err());
    }
}
