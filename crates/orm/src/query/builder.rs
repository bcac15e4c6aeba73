//! Query Builder - Core builder implementation

use super::types::*;

/// Query builder for constructing database queries
///
/// Methods consume and return the builder so calls chain. The `&mut`
/// variants (`add_where`, `push_select`, ...) exist for code that refines a
/// builder held inside another structure.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    pub(crate) query_type: QueryType,
    pub(crate) select_fields: Vec<SelectField>,
    pub(crate) table: Option<TableRef>,
    pub(crate) set_clauses: Vec<SetClause>,
    pub(crate) returning: Vec<String>,
    pub(crate) where_clauses: Vec<Predicate>,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) order_by: Vec<(String, OrderDirection)>,
    pub(crate) group_by: Vec<String>,
    pub(crate) limit_count: Option<i64>,
    pub(crate) offset_value: Option<i64>,
}

impl QueryBuilder {
    /// Create a new query builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a predicate
    pub fn add_where(&mut self, connector: Connector, clause: WhereClause) {
        self.where_clauses.push(Predicate { connector, clause });
    }

    /// Append a SELECT list entry
    pub fn push_select(&mut self, field: SelectField) {
        self.select_fields.push(field);
    }

    /// Drop every SELECT list entry
    pub fn clear_select(&mut self) {
        self.select_fields.clear();
    }

    /// True once the caller restricted the selected columns
    pub fn has_select(&self) -> bool {
        !self.select_fields.is_empty()
    }

    pub fn selects_expression(&self, expression: &str) -> bool {
        self.select_fields
            .iter()
            .any(|field| matches!(field, SelectField::Expression(e) if e == expression))
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn table(&self) -> Option<&TableRef> {
        self.table.as_ref()
    }

    pub fn set_table(&mut self, table: TableRef) {
        self.table = Some(table);
    }

    pub fn where_clauses(&self) -> &[Predicate] {
        &self.where_clauses
    }

    pub fn limit_value(&self) -> Option<i64> {
        self.limit_count
    }

    pub fn set_limit(&mut self, limit: Option<i64>) {
        self.limit_count = limit;
    }

    pub fn push_join(&mut self, join: JoinClause) {
        self.joins.push(join);
    }

    /// Turn this SELECT into an UPDATE of the same table and predicates
    pub fn into_update(mut self, values: Vec<(String, serde_json::Value)>) -> Self {
        self.query_type = QueryType::Update;
        self.select_fields.clear();
        self.order_by.clear();
        self.limit_count = None;
        self.offset_value = None;
        self.set_clauses = values
            .into_iter()
            .map(|(column, value)| SetClause { column, value })
            .collect();
        self
    }

    /// Turn this SELECT into a DELETE of the same table and predicates
    pub fn into_delete(mut self) -> Self {
        self.query_type = QueryType::Delete;
        self.select_fields.clear();
        self.order_by.clear();
        self.limit_count = None;
        self.offset_value = None;
        self
    }
}
