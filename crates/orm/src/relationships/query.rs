//! Relation queries
//!
//! A `RelationQueryBuilder` is a statement bound to one relation and either
//! a single parent (lazy), a batch of parents (eager) or an outer query it
//! is correlated with (existence and count subqueries). Relationship
//! constraints are added once, on first materialization, after any user
//! predicates.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::definition::RelationDefinition;
use super::keys::{KeySlot, ResolvedKeyPair, ResolvedKeys};
use super::kinds::RelationKind;
use super::preloader::Preloader;
use super::scopes::GlobalScopes;
use crate::backends::{execute_statement, fetch_json_rows, QueryClient};
use crate::error::{ModelError, ModelResult};
use crate::model::record::lookup_key;
use crate::model::{Record, Schema};
use crate::query::{
    AliasGenerator, Connector, JoinClause, JoinType, QueryBuilder, QueryFilters, QueryOperator,
    SelectField, TableRef, WhereClause,
};

/// Parent side of a relation query
#[derive(Debug, Clone)]
pub(crate) enum ParentScope {
    One(Box<Record>),
    Many(Vec<Record>),
    Correlated { outer_table: String, outer_ref: String },
}

/// What a materialized statement selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Selection {
    Records,
    Exists,
    Count,
}

#[derive(Clone)]
pub struct RelationQueryBuilder {
    relation: Arc<RelationDefinition>,
    keys: Arc<ResolvedKeys>,
    related: Arc<Schema>,
    morph_tag: Option<String>,
    parent: ParentScope,
    client: Arc<dyn QueryClient>,
    statement: QueryBuilder,
    applied: bool,
    empty_batch: bool,
    selection: Selection,
    pivot_only: bool,
    related_table: TableRef,
    pivot_table: Option<TableRef>,
    through_table: Option<TableRef>,
    aliases: AliasGenerator,
    preloader: Preloader,
    scopes: GlobalScopes,
    sideload: Option<Arc<Value>>,
}

impl RelationQueryBuilder {
    pub(crate) fn new(
        relation: Arc<RelationDefinition>,
        related: Arc<Schema>,
        morph_tag: Option<String>,
        parent: ParentScope,
        client: Arc<dyn QueryClient>,
        aliases: AliasGenerator,
    ) -> ModelResult<Self> {
        let keys = relation.boot()?;
        let outer_table = match &parent {
            ParentScope::Correlated { outer_table, .. } => Some(outer_table.clone()),
            _ => None,
        };

        // Tables sharing a name with the outer query (or with each other) are aliased.
        let related_table = if outer_table.as_deref() == Some(related.table()) {
            TableRef::aliased(related.table(), &aliases.next_alias())
        } else {
            TableRef::new(related.table())
        };

        let pivot_table = match keys.pivot_table() {
            Some(pivot) if outer_table.as_deref() == Some(pivot) || pivot == related.table() => {
                Some(TableRef::aliased(pivot, &aliases.next_alias()))
            }
            Some(pivot) => Some(TableRef::new(pivot)),
            None => None,
        };

        let through_table = if relation.kind() == RelationKind::HasManyThrough {
            let through = relation.through_schema()?;
            if outer_table.as_deref() == Some(through.table())
                || through.table() == related.table()
            {
                Some(TableRef::aliased(through.table(), &aliases.next_alias()))
            } else {
                Some(TableRef::new(through.table()))
            }
        } else {
            None
        };

        let mut statement = client.query();
        statement.set_table(related_table.clone());
        if let Some(refine) = &relation.options().on_query {
            statement = refine(statement, related_table.reference());
        }

        let sideload = match &parent {
            ParentScope::One(record) => record.sideload().cloned(),
            ParentScope::Many(records) => {
                records.first().and_then(|record| record.sideload().cloned())
            }
            ParentScope::Correlated { .. } => None,
        };

        Ok(Self {
            scopes: related.global_scopes().clone(),
            relation,
            keys,
            related,
            morph_tag,
            parent,
            client,
            statement,
            applied: false,
            empty_batch: false,
            selection: Selection::Records,
            pivot_only: false,
            related_table,
            pivot_table,
            through_table,
            aliases,
            preloader: Preloader::new(),
            sideload,
        })
    }

    /// Query addressing the pivot rows of `parent` directly; results are raw rows
    pub(crate) fn pivot_only(
        relation: Arc<RelationDefinition>,
        parent: &Record,
        client: Arc<dyn QueryClient>,
    ) -> ModelResult<Self> {
        if !relation.kind().uses_pivot() {
            return Err(ModelError::UnsupportedOperation(format!(
                "{}.{} has no pivot table",
                relation.owner_name(),
                relation.name()
            )));
        }
        let keys = relation.boot()?;
        let pivot = TableRef::new(keys.require_pivot_table()?);
        let aliases = AliasGenerator::new(&client.config().self_join_alias_prefix);

        let mut statement = client.query();
        statement.set_table(pivot.clone());

        Ok(Self {
            related: relation.related_schema()?,
            relation,
            keys,
            morph_tag: None,
            parent: ParentScope::One(Box::new(parent.detached())),
            client,
            statement,
            applied: false,
            empty_batch: false,
            selection: Selection::Records,
            pivot_only: true,
            related_table: pivot.clone(),
            pivot_table: Some(pivot),
            through_table: None,
            aliases,
            preloader: Preloader::new(),
            scopes: GlobalScopes::new(),
            sideload: None,
        })
    }

    pub(crate) fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    pub fn relation(&self) -> &Arc<RelationDefinition> {
        &self.relation
    }

    pub fn related_schema(&self) -> &Arc<Schema> {
        &self.related
    }

    /// Name qualifying related columns: the table or its self-join alias
    pub fn related_ref(&self) -> &str {
        self.related_table.reference()
    }

    /// `column` qualified with the related table reference
    pub fn qualify(&self, column: &str) -> String {
        format!("{}.{}", self.related_ref(), column)
    }

    pub fn pivot_ref(&self) -> Option<&str> {
        self.pivot_table.as_ref().map(TableRef::reference)
    }

    pub fn through_ref(&self) -> Option<&str> {
        self.through_table.as_ref().map(TableRef::reference)
    }

    /// Type tag this query targets, for morph-to relations
    pub fn morph_tag(&self) -> Option<&str> {
        self.morph_tag.as_deref()
    }

    pub fn is_eager(&self) -> bool {
        matches!(self.parent, ParentScope::Many(_))
    }

    pub fn is_pivot_only(&self) -> bool {
        self.pivot_only
    }

    pub fn is_applied(&self) -> bool {
        self.applied
    }

    pub fn statement(&self) -> &QueryBuilder {
        &self.statement
    }

    pub(crate) fn client(&self) -> &Arc<dyn QueryClient> {
        &self.client
    }

    pub(crate) fn aliases(&self) -> &AliasGenerator {
        &self.aliases
    }

    pub(crate) fn preloader_mut(&mut self) -> &mut Preloader {
        &mut self.preloader
    }

    /// Refine the underlying statement (ordering, limits, selections)
    pub fn map_statement<F>(mut self, refine: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.statement = refine(std::mem::take(&mut self.statement));
        self
    }

    pub fn select(self, fields: &str) -> Self {
        self.map_statement(|s| s.select(fields))
    }

    pub fn order_by(self, column: &str) -> Self {
        self.map_statement(|s| s.order_by(column))
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.map_statement(|s| s.order_by_desc(column))
    }

    pub fn limit(self, count: i64) -> Self {
        self.map_statement(|s| s.limit(count))
    }

    pub fn without_global_scope(mut self, name: &str) -> Self {
        self.scopes.remove(name);
        self
    }

    pub fn without_global_scopes(mut self) -> Self {
        self.scopes.clear();
        self
    }

    /// Auxiliary value handed to every record this query creates
    pub fn sideload(mut self, value: Value) -> Self {
        self.sideload = Some(Arc::new(value));
        self
    }

    /// Equality predicates from a JSON object of related attributes
    pub fn where_attributes(mut self, values: &Value) -> ModelResult<Self> {
        let Value::Object(map) = values else {
            return Err(ModelError::Serialization(format!(
                "expected an object of attributes, got {}",
                values
            )));
        };
        for (attribute, value) in map {
            let column = self.qualify(self.related.require_column(attribute, "relation query")?);
            self = self.where_eq(&column, value.clone());
        }
        Ok(self)
    }

    fn pivot_column(&self, column: &str) -> ModelResult<String> {
        match self.pivot_ref() {
            Some(pivot) => Ok(format!("{}.{}", pivot, column)),
            None => Err(ModelError::UnsupportedOperation(format!(
                "{}.{} has no pivot table",
                self.relation.owner_name(),
                self.relation.name()
            ))),
        }
    }

    pub fn where_pivot<T: Into<Value>>(self, column: &str, value: T) -> ModelResult<Self> {
        let column = self.pivot_column(column)?;
        Ok(self.where_eq(&column, value))
    }

    pub fn where_in_pivot<T: Into<Value>>(self, column: &str, values: Vec<T>) -> ModelResult<Self> {
        let column = self.pivot_column(column)?;
        Ok(self.where_in(&column, values))
    }

    pub fn where_not_in_pivot<T: Into<Value>>(
        self,
        column: &str,
        values: Vec<T>,
    ) -> ModelResult<Self> {
        let column = self.pivot_column(column)?;
        Ok(self.where_not_in(&column, values))
    }

    fn describe(&self) -> String {
        format!("{}.{}", self.relation.owner_name(), self.relation.name())
    }

    fn pivot_key_alias(&self, column: &str) -> String {
        format!("pivot_{}", column)
    }

    pub(crate) fn pivot_foreign_key_alias(keys: &ResolvedKeys) -> ModelResult<String> {
        Ok(format!("pivot_{}", keys.require(KeySlot::PivotForeignKey)?.column))
    }

    pub(crate) fn through_key_alias(keys: &ResolvedKeys) -> ModelResult<String> {
        Ok(format!("through_{}", keys.require(KeySlot::ForeignKey)?.column))
    }

    /// Add the relationship constraints. Runs once per instance.
    pub fn apply_constraints(&mut self) -> ModelResult<()> {
        if self.applied {
            return Ok(());
        }

        let mut statement = std::mem::take(&mut self.statement);
        group_user_predicates(&mut statement);

        let keys = self.keys.clone();
        let has_values = match self.relation.kind() {
            RelationKind::HasOne | RelationKind::HasMany => {
                let local = keys.require(KeySlot::LocalKey)?;
                let foreign = keys.require(KeySlot::ForeignKey)?;
                self.constrain(&mut statement, self.qualify(&foreign.column), local)?
            }
            RelationKind::MorphOne | RelationKind::MorphMany => {
                let local = keys.require(KeySlot::LocalKey)?;
                let morph_id = keys.require(KeySlot::MorphId)?;
                let morph_type = keys.require(KeySlot::MorphType)?;
                let has_values =
                    self.constrain(&mut statement, self.qualify(&morph_id.column), local)?;
                let tag = self.relation.owner_tag()?;
                statement = statement.where_eq(&self.qualify(&morph_type.column), tag);
                has_values
            }
            RelationKind::BelongsTo => {
                let local = keys.require(KeySlot::LocalKey)?;
                let foreign = keys.require(KeySlot::ForeignKey)?;
                self.constrain(&mut statement, self.qualify(&local.column), foreign)?
            }
            RelationKind::MorphTo => {
                let morph_id = keys.require(KeySlot::MorphId)?;
                let target_key = self.relation.morph_target_key(&self.related)?;
                self.constrain(&mut statement, self.qualify(&target_key.column), morph_id)?
            }
            RelationKind::ManyToMany | RelationKind::MorphToMany => {
                self.apply_pivot_constraints(&mut statement, &keys)?
            }
            RelationKind::HasManyThrough => self.apply_through_constraints(&mut statement, &keys)?,
        };

        if matches!(self.parent, ParentScope::One(_))
            && self.relation.kind().is_to_one()
            && self.selection == Selection::Records
            && statement.limit_value().is_none()
        {
            statement.set_limit(Some(1));
        }

        match self.selection {
            Selection::Exists => statement.clear_select(),
            Selection::Count => {
                statement.clear_select();
                statement.push_select(SelectField::Expression("COUNT(*)".to_string()));
            }
            Selection::Records if !self.pivot_only => {
                if statement.has_select() {
                    for expression in self.relation_key_selection()? {
                        if !selects(&statement, &expression, self.related_ref()) {
                            statement.push_select(SelectField::Expression(expression));
                        }
                    }
                } else {
                    for expression in self.default_selection()? {
                        statement.push_select(SelectField::Expression(expression));
                    }
                }
            }
            Selection::Records => {}
        }

        if !self.pivot_only {
            statement = self.scopes.apply(statement, self.related_table.reference());
        }

        self.statement = statement;
        self.empty_batch = !has_values;
        self.applied = true;
        Ok(())
    }

    fn apply_pivot_constraints(
        &self,
        statement: &mut QueryBuilder,
        keys: &ResolvedKeys,
    ) -> ModelResult<bool> {
        let local = keys.require(KeySlot::LocalKey)?;
        let pivot_foreign = keys.require(KeySlot::PivotForeignKey)?;
        let pivot = self
            .pivot_table
            .clone()
            .ok_or_else(|| ModelError::Query(format!("{} has no pivot table", self.describe())))?;
        let pivot_ref = pivot.reference().to_string();

        if !self.pivot_only {
            let related_key = keys.require(KeySlot::RelatedKey)?;
            let pivot_related = keys.require(KeySlot::PivotRelatedForeignKey)?;
            statement.push_join(JoinClause {
                join_type: JoinType::Inner,
                table: pivot,
                on_conditions: vec![(
                    self.qualify(&related_key.column),
                    format!("{}.{}", pivot_ref, pivot_related.column),
                )],
            });
        }

        let pivot_column = format!("{}.{}", pivot_ref, pivot_foreign.column);
        let has_values = self.constrain(statement, pivot_column, local)?;

        if self.relation.kind() == RelationKind::MorphToMany {
            let morph_type = keys.require(KeySlot::PivotMorphType)?;
            statement.add_where(
                Connector::And,
                WhereClause::Basic {
                    column: format!("{}.{}", pivot_ref, morph_type.column),
                    operator: QueryOperator::Equal,
                    value: Value::String(self.relation.owner_tag()?),
                },
            );
        }

        Ok(has_values)
    }

    fn apply_through_constraints(
        &self,
        statement: &mut QueryBuilder,
        keys: &ResolvedKeys,
    ) -> ModelResult<bool> {
        let local = keys.require(KeySlot::LocalKey)?;
        let foreign = keys.require(KeySlot::ForeignKey)?;
        let through_local = keys.require(KeySlot::ThroughLocalKey)?;
        let through_foreign = keys.require(KeySlot::ThroughForeignKey)?;
        let through = self
            .through_table
            .clone()
            .ok_or_else(|| ModelError::Query(format!("{} has no through table", self.describe())))?;
        let through_ref = through.reference().to_string();

        statement.push_join(JoinClause {
            join_type: JoinType::Inner,
            table: through,
            on_conditions: vec![(
                format!("{}.{}", through_ref, through_local.column),
                self.qualify(&through_foreign.column),
            )],
        });

        self.constrain(statement, format!("{}.{}", through_ref, foreign.column), local)
    }

    /// Constrain `column` by the parent-side key.
    /// Returns false for an eager batch with no usable values.
    fn constrain(
        &self,
        statement: &mut QueryBuilder,
        column: String,
        parent_key: &ResolvedKeyPair,
    ) -> ModelResult<bool> {
        match &self.parent {
            ParentScope::One(parent) => {
                let value = parent
                    .get(&parent_key.attribute)
                    .filter(|value| !value.is_null())
                    .cloned()
                    .ok_or_else(|| {
                        ModelError::missing_value(
                            self.relation.owner_name(),
                            self.relation.name(),
                            &parent_key.attribute,
                        )
                    })?;
                statement.add_where(
                    Connector::And,
                    WhereClause::Basic {
                        column,
                        operator: QueryOperator::Equal,
                        value,
                    },
                );
                Ok(true)
            }
            ParentScope::Many(parents) => {
                if parents.iter().any(|parent| parent.get(&parent_key.attribute).is_none()) {
                    return Err(ModelError::missing_value(
                        self.relation.owner_name(),
                        self.relation.name(),
                        &parent_key.attribute,
                    ));
                }
                let values = distinct_values(parents, &parent_key.attribute);
                let has_values = !values.is_empty();
                statement.add_where(
                    Connector::And,
                    WhereClause::In {
                        column,
                        values,
                        negated: false,
                    },
                );
                Ok(has_values)
            }
            ParentScope::Correlated { outer_ref, .. } => {
                statement.add_where(
                    Connector::And,
                    WhereClause::Column {
                        left: column,
                        operator: QueryOperator::Equal,
                        right: format!("{}.{}", outer_ref, parent_key.column),
                    },
                );
                Ok(true)
            }
        }
    }

    /// Columns selected when the caller did not restrict the selection
    fn default_selection(&self) -> ModelResult<Vec<String>> {
        let keys = &self.keys;
        let mut columns = Vec::new();
        match self.relation.kind() {
            RelationKind::ManyToMany | RelationKind::MorphToMany => {
                let pivot = self.pivot_ref().unwrap_or_default();
                columns.push(format!("{}.*", self.related_ref()));
                let mut pivot_columns = vec![
                    keys.require(KeySlot::PivotForeignKey)?.column.clone(),
                    keys.require(KeySlot::PivotRelatedForeignKey)?.column.clone(),
                ];
                pivot_columns.extend(self.relation.options().pivot_columns.iter().cloned());
                if self.relation.options().pivot_timestamps {
                    pivot_columns.push("created_at".to_string());
                    pivot_columns.push("updated_at".to_string());
                }
                for column in pivot_columns {
                    let alias = self.pivot_key_alias(&column);
                    columns.push(format!("{}.{} AS {}", pivot, column, alias));
                }
            }
            RelationKind::HasManyThrough => {
                columns.push(format!("{}.*", self.related_ref()));
                columns.extend(self.relation_key_selection()?);
            }
            _ => {}
        }
        Ok(columns)
    }

    /// Columns partitioning needs in every eager result
    fn relation_key_selection(&self) -> ModelResult<Vec<String>> {
        let keys = &self.keys;
        let expression = match self.relation.kind() {
            RelationKind::HasOne | RelationKind::HasMany => {
                self.qualify(&keys.require(KeySlot::ForeignKey)?.column)
            }
            RelationKind::MorphOne | RelationKind::MorphMany => {
                self.qualify(&keys.require(KeySlot::MorphId)?.column)
            }
            RelationKind::BelongsTo => self.qualify(&keys.require(KeySlot::LocalKey)?.column),
            RelationKind::MorphTo => {
                self.qualify(&self.relation.morph_target_key(&self.related)?.column)
            }
            RelationKind::ManyToMany | RelationKind::MorphToMany => {
                let column = &keys.require(KeySlot::PivotForeignKey)?.column;
                format!(
                    "{}.{} AS {}",
                    self.pivot_ref().unwrap_or_default(),
                    column,
                    Self::pivot_foreign_key_alias(keys)?
                )
            }
            RelationKind::HasManyThrough => {
                let column = &keys.require(KeySlot::ForeignKey)?.column;
                format!(
                    "{}.{} AS {}",
                    self.through_ref().unwrap_or_default(),
                    column,
                    Self::through_key_alias(keys)?
                )
            }
        };
        Ok(vec![expression])
    }

    /// Make sure join and partition keys are selected when the caller restricted the columns
    pub fn select_relation_keys(&mut self) -> ModelResult<()> {
        if !self.statement.has_select() || self.pivot_only {
            return Ok(());
        }
        for expression in self.relation_key_selection()? {
            if !selects(&self.statement, &expression, self.related_ref()) {
                self.statement.push_select(SelectField::Expression(expression));
            }
        }
        Ok(())
    }

    /// Select the default columns unless the caller already chose some
    pub(crate) fn select_default_columns(&mut self) {
        if self.statement.has_select() {
            return;
        }
        let columns = match self.default_selection() {
            Ok(columns) if !columns.is_empty() => columns,
            _ => vec![format!("{}.*", self.related_ref())],
        };
        for column in columns {
            self.statement.push_select(SelectField::Expression(column));
        }
    }

    /// SQL with values inlined
    pub fn to_sql(&mut self) -> ModelResult<String> {
        self.apply_constraints()?;
        Ok(self.statement.to_sql())
    }

    /// SQL with placeholders for the client's dialect, plus its parameters
    pub fn to_sql_with_params(&mut self) -> ModelResult<(String, Vec<Value>)> {
        self.apply_constraints()?;
        Ok(self.statement.to_sql_with_params(self.client.dialect()))
    }

    /// The constrained statement
    pub fn into_statement(mut self) -> ModelResult<QueryBuilder> {
        self.apply_constraints()?;
        Ok(self.statement)
    }

    fn ensure_executable(&self) -> ModelResult<()> {
        if matches!(self.parent, ParentScope::Correlated { .. }) {
            return Err(ModelError::UnsupportedOperation(format!(
                "existence query for {} is embedded in its outer query, not executed",
                self.describe()
            )));
        }
        Ok(())
    }

    async fn fetch_rows(&mut self) -> ModelResult<Vec<Map<String, Value>>> {
        self.ensure_executable()?;
        self.apply_constraints()?;
        if self.empty_batch {
            return Ok(Vec::new());
        }
        let (sql, params) = self.statement.to_sql_with_params(self.client.dialect());
        fetch_json_rows(self.client.as_ref(), &self.describe(), &sql, &params).await
    }

    /// Run the query and return related records, with their own preloads processed
    pub async fn exec(mut self) -> ModelResult<Vec<Record>> {
        if self.pivot_only {
            return Err(ModelError::UnsupportedOperation(format!(
                "pivot query for {} returns rows, use exec_raw",
                self.describe()
            )));
        }
        let rows = self.fetch_rows().await?;
        let mut records: Vec<Record> = rows
            .into_iter()
            .map(|row| Record::from_row(self.related.clone(), row, self.sideload.clone()))
            .collect();
        self.preloader.process_all_for_many(&mut records, &self.client).await?;
        Ok(records)
    }

    /// Run the query and return raw rows
    pub async fn exec_raw(mut self) -> ModelResult<Vec<Map<String, Value>>> {
        self.fetch_rows().await
    }

    pub async fn first(mut self) -> ModelResult<Option<Record>> {
        self.statement.set_limit(Some(1));
        Ok(self.exec().await?.into_iter().next())
    }

    pub async fn first_or_fail(self) -> ModelResult<Record> {
        let description = self.describe();
        self.first()
            .await?
            .ok_or_else(|| ModelError::RowNotFound(format!("no related row for {}", description)))
    }

    /// Pages of a lazy to-many relation; pages start at 1
    pub fn paginate(self, per_page: i64, page: i64) -> ModelResult<Self> {
        let kind = self.relation.kind();
        if kind.is_to_one()
            || kind == RelationKind::HasManyThrough
            || !matches!(self.parent, ParentScope::One(_))
        {
            return Err(ModelError::UnsupportedOperation(format!(
                "pagination is not available for {} relation {}",
                kind,
                self.describe()
            )));
        }
        Ok(self.map_statement(|s| s.paginate(per_page, page)))
    }

    fn ensure_direct_write(&self, action: &str) -> ModelResult<()> {
        let kind = self.relation.kind();
        let joined = kind.uses_pivot() || kind == RelationKind::HasManyThrough;
        if (joined && !self.pivot_only) || !matches!(self.parent, ParentScope::One(_)) {
            return Err(ModelError::UnsupportedOperation(format!(
                "{} is not available on this {} query for {}",
                action,
                kind,
                self.describe()
            )));
        }
        Ok(())
    }

    /// Update the matched rows. Keys are attributes, or pivot columns on a pivot query.
    pub async fn update(mut self, values: Value) -> ModelResult<u64> {
        self.ensure_direct_write("update")?;
        let Value::Object(map) = values else {
            return Err(ModelError::Serialization(format!(
                "expected an object of values, got {}",
                values
            )));
        };

        let mut changes = Vec::with_capacity(map.len());
        for (key, value) in map {
            let column = if self.pivot_only {
                key
            } else {
                self.related.require_column(&key, "relation update")?.to_string()
            };
            changes.push((column, value));
        }

        self.apply_constraints()?;
        let statement = std::mem::take(&mut self.statement).into_update(changes);
        let (sql, params) = statement.to_sql_with_params(self.client.dialect());
        execute_statement(self.client.as_ref(), &self.describe(), &sql, &params).await
    }

    /// Delete the matched rows
    pub async fn delete(mut self) -> ModelResult<u64> {
        self.ensure_direct_write("delete")?;
        self.apply_constraints()?;
        let statement = std::mem::take(&mut self.statement).into_delete();
        let (sql, params) = statement.to_sql_with_params(self.client.dialect());
        execute_statement(self.client.as_ref(), &self.describe(), &sql, &params).await
    }

    /// Constrained subquery for embedding in an outer query
    pub(crate) fn into_existence_statement(
        mut self,
        selection: Selection,
    ) -> ModelResult<QueryBuilder> {
        self.selection = selection;
        self.apply_constraints()?;
        Ok(self.statement)
    }
}

impl QueryFilters for RelationQueryBuilder {
    fn statement_mut(&mut self) -> &mut QueryBuilder {
        &mut self.statement
    }
}

impl std::fmt::Debug for RelationQueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationQueryBuilder")
            .field("relation", &self.describe())
            .field("related", &self.related_table)
            .field("applied", &self.applied)
            .field("pivot_only", &self.pivot_only)
            .field("statement", &self.statement.to_sql())
            .finish()
    }
}

/// Wrap caller predicates containing OR so appended constraints bind to all of them
pub(crate) fn group_user_predicates(statement: &mut QueryBuilder) {
    if statement.where_clauses.iter().any(|p| p.connector == Connector::Or) {
        let grouped = std::mem::take(&mut statement.where_clauses);
        statement.add_where(Connector::And, WhereClause::Group(grouped));
    }
}

fn selects(statement: &QueryBuilder, expression: &str, table_ref: &str) -> bool {
    statement.selects_expression(expression)
        || (!expression.contains(" AS ")
            && (statement.selects_expression("*")
                || statement.selects_expression(&format!("{}.*", table_ref))))
}

/// Non-null values of `attribute` across `records`, first occurrence order
fn distinct_values(records: &[Record], attribute: &str) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    records
        .iter()
        .filter_map(|record| record.get(attribute))
        .filter(|value| lookup_key(value).map(|key| seen.insert(key)).unwrap_or(false))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrmConfig;
    use crate::backends::SqliteClient;
    use crate::model::SchemaBuilder;
    use crate::relationships::RelationOptions;
    use once_cell::sync::Lazy;
    use serde_json::json;

    static USER: Lazy<Arc<Schema>> = Lazy::new(|| {
        SchemaBuilder::new("User", "users")
            .columns(&["id", "country_id"])
            .has_many("posts", || POST.clone(), RelationOptions::new())
            .has_one("latest", || POST.clone(), RelationOptions::new())
            .many_to_many(
                "skills",
                || SKILL.clone(),
                RelationOptions::new().pivot_columns(&["proficiency"]),
            )
            .build()
    });

    static POST: Lazy<Arc<Schema>> = Lazy::new(|| {
        SchemaBuilder::new("Post", "posts")
            .columns(&["id", "user_id", "title"])
            .belongs_to("user", || USER.clone(), RelationOptions::new())
            .build()
    });

    static SKILL: Lazy<Arc<Schema>> =
        Lazy::new(|| SchemaBuilder::new("Skill", "skills").columns(&["id", "name"]).build());

    static COUNTRY: Lazy<Arc<Schema>> = Lazy::new(|| {
        SchemaBuilder::new("Country", "countries")
            .column("id")
            .has_many_through("posts", || POST.clone(), || USER.clone(), RelationOptions::new())
            .build()
    });

    async fn client() -> Arc<dyn QueryClient> {
        Arc::new(SqliteClient::in_memory(OrmConfig::default()).await.unwrap())
    }

    fn record(schema: &Arc<Schema>, values: Value) -> Record {
        let Value::Object(row) = values else { unreachable!() };
        Record::from_row(schema.clone(), row, None)
    }

    #[tokio::test]
    async fn test_lazy_has_many_and_to_one_limit() {
        let client = client().await;
        let user = record(&USER, json!({"id": 1}));

        let mut posts = user.related_query("posts", client.clone()).unwrap();
        assert_eq!(posts.to_sql().unwrap(), "SELECT * FROM posts WHERE posts.user_id = 1");

        let mut latest = user.related_query("latest", client).unwrap();
        assert_eq!(latest.to_sql().unwrap(), "SELECT * FROM posts WHERE posts.user_id = 1 LIMIT 1");
    }

    #[tokio::test]
    async fn test_constraints_apply_once() {
        let client = client().await;
        let user = record(&USER, json!({"id": 1}));
        let mut query = user.related_query("posts", client).unwrap().where_eq("posts.title", "a");

        let first = query.to_sql().unwrap();
        let second = query.to_sql().unwrap();
        assert_eq!(first, second);

        let mut copy = query.clone();
        assert_eq!(copy.to_sql().unwrap(), first);
    }

    #[tokio::test]
    async fn test_or_predicates_are_grouped_before_constraints() {
        let client = client().await;
        let user = record(&USER, json!({"id": 1}));
        let mut query = user
            .related_query("posts", client)
            .unwrap()
            .where_eq("posts.title", "a")
            .or_where_eq("posts.title", "b");

        assert_eq!(
            query.to_sql().unwrap(),
            "SELECT * FROM posts WHERE (posts.title = 'a' OR posts.title = 'b') \
             AND posts.user_id = 1"
        );
    }

    #[tokio::test]
    async fn test_missing_parent_value_fails_before_sql() {
        let client = client().await;
        let post = record(&POST, json!({"id": 3, "user_id": null}));
        let mut query = post.related_query("user", client).unwrap();
        assert!(matches!(
            query.to_sql(),
            Err(ModelError::MissingForeignKeyValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_eager_belongs_to_uses_distinct_values() {
        let client = client().await;
        let posts = vec![
            record(&POST, json!({"id": 1, "user_id": 4})),
            record(&POST, json!({"id": 2, "user_id": 4})),
            record(&POST, json!({"id": 3, "user_id": 5})),
            record(&POST, json!({"id": 4, "user_id": null})),
        ];
        let mut query = POST.relation("user").unwrap().eager_query(&posts, client).unwrap();
        assert_eq!(query.to_sql().unwrap(), "SELECT * FROM users WHERE users.id IN (4, 5)");
    }

    #[tokio::test]
    async fn test_eager_query_rejects_parents_without_the_key_attribute() {
        let client = client().await;
        let posts = vec![
            record(&POST, json!({"id": 1, "user_id": 4})),
            record(&POST, json!({"id": 2, "title": "no key"})),
        ];
        let mut query = POST.relation("user").unwrap().eager_query(&posts, client).unwrap();
        assert!(matches!(
            query.to_sql(),
            Err(ModelError::MissingForeignKeyValue { attribute, .. }) if attribute == "user_id"
        ));
    }

    #[tokio::test]
    async fn test_many_to_many_selects_pivot_columns() {
        let client = client().await;
        let user = record(&USER, json!({"id": 1}));
        let mut query = user.related_query("skills", client).unwrap();
        assert_eq!(
            query.to_sql().unwrap(),
            "SELECT skills.*, skill_user.user_id AS pivot_user_id, \
             skill_user.skill_id AS pivot_skill_id, \
             skill_user.proficiency AS pivot_proficiency FROM skills \

             INNER JOIN skill_user ON skills.id = skill_user.skill_id WHERE skill_user.user_id = 1"
        );
    }

    #[tokio::test]
    async fn test_cherry_picked_columns_keep_relation_keys() {
        let client = client().await;
        let users = vec![record(&USER, json!({"id": 1}))];
        let mut query = USER
            .relation("posts")
            .unwrap()
            .eager_query(&users, client)
            .unwrap()
            .select("posts.title");
        assert_eq!(
            query.to_sql().unwrap(),
            "SELECT posts.title, posts.user_id FROM posts WHERE posts.user_id IN (1)"
        );
    }

    #[tokio::test]
    async fn test_through_joins_and_aliases_key() {
        let client = client().await;
        let country = record(&COUNTRY, json!({"id": 7}));
        let mut query = country.related_query("posts", client).unwrap();
        assert_eq!(
            query.to_sql().unwrap(),
            "SELECT posts.*, users.country_id AS through_country_id FROM posts \
             INNER JOIN users ON users.id = posts.user_id WHERE users.country_id = 7"
        );
    }

    #[tokio::test]
    async fn test_paginate_rejects_to_one_and_through() {
        let client = client().await;
        let user = record(&USER, json!({"id": 1}));
        let country = record(&COUNTRY, json!({"id": 7}));

        assert!(user.related_query("posts", client.clone()).unwrap().paginate(10, 2).is_ok());
        assert!(matches!(
            user.related_query("latest", client.clone()).unwrap().paginate(10, 1),
            Err(ModelError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            country.related_query("posts", client).unwrap().paginate(10, 1),
            Err(ModelError::UnsupportedOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_where_pivot_requires_pivot_relation() {
        let client = client().await;
        let user = record(&USER, json!({"id": 1}));

        let mut skills = user
            .related_query("skills", client.clone())
            .unwrap()
            .where_pivot("proficiency", 3)
            .unwrap();
        assert!(skills.to_sql().unwrap().contains("skill_user.proficiency = 3"));

        assert!(user.related_query("posts", client).unwrap().where_pivot("x", 1).is_err());
    }
}
