//! INSERT, UPDATE and DELETE statements

use serde_json::Value;

use super::builder::QueryBuilder;
use super::types::*;

impl QueryBuilder {
    fn targeting(mut self, query_type: QueryType, table: &str) -> Self {
        self.query_type = query_type;
        self.set_table(TableRef::new(table));
        self
    }

    pub fn insert_into(self, table: &str) -> Self {
        self.targeting(QueryType::Insert, table)
    }

    pub fn update(self, table: &str) -> Self {
        self.targeting(QueryType::Update, table)
    }

    pub fn delete_from(self, table: &str) -> Self {
        self.targeting(QueryType::Delete, table)
    }

    /// Column assignment for INSERT or UPDATE
    pub fn set<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.set_values(vec![(column.to_string(), value.into())])
    }

    pub fn set_values(mut self, values: Vec<(String, Value)>) -> Self {
        self.set_clauses
            .extend(values.into_iter().map(|(column, value)| SetClause { column, value }));
        self
    }
}
