//! Query Builder WHERE clause operations
//!
//! `QueryFilters` carries the predicate methods so the plain statement
//! builder, model queries and relation queries all chain the same way.

use super::builder::QueryBuilder;
use super::types::*;
use serde_json::Value;

/// Chainable WHERE predicates over an underlying statement
pub trait QueryFilters: Sized {
    /// The statement predicates are added to
    fn statement_mut(&mut self) -> &mut QueryBuilder;

    /// Add a predicate with an explicit connector
    fn push_where(mut self, connector: Connector, clause: WhereClause) -> Self {
        self.statement_mut().add_where(connector, clause);
        self
    }

    /// Add WHERE condition with custom operator
    fn where_op<T: Into<Value>>(self, column: &str, operator: QueryOperator, value: T) -> Self {
        self.push_where(
            Connector::And,
            WhereClause::Basic {
                column: column.to_string(),
                operator,
                value: value.into(),
            },
        )
    }

    /// Add WHERE condition with equality
    fn where_eq<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::Equal, value)
    }

    /// Add WHERE condition with not equal
    fn where_ne<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::NotEqual, value)
    }

    /// Add WHERE condition with greater than
    fn where_gt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::GreaterThan, value)
    }

    /// Add WHERE condition with greater than or equal
    fn where_gte<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::GreaterThanOrEqual, value)
    }

    /// Add WHERE condition with less than
    fn where_lt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::LessThan, value)
    }

    /// Add WHERE condition with less than or equal
    fn where_lte<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::LessThanOrEqual, value)
    }

    /// Add WHERE condition with LIKE
    fn where_like(self, column: &str, pattern: &str) -> Self {
        self.where_op(column, QueryOperator::Like, pattern)
    }

    /// Add WHERE condition with IN
    fn where_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        self.push_where(
            Connector::And,
            WhereClause::In {
                column: column.to_string(),
                values: values.into_iter().map(Into::into).collect(),
                negated: false,
            },
        )
    }

    /// Add WHERE condition with NOT IN
    fn where_not_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        self.push_where(
            Connector::And,
            WhereClause::In {
                column: column.to_string(),
                values: values.into_iter().map(Into::into).collect(),
                negated: true,
            },
        )
    }

    /// Add WHERE condition with IS NULL
    fn where_null(self, column: &str) -> Self {
        self.push_where(
            Connector::And,
            WhereClause::Null {
                column: column.to_string(),
                negated: false,
            },
        )
    }

    /// Add WHERE condition with IS NOT NULL
    fn where_not_null(self, column: &str) -> Self {
        self.push_where(
            Connector::And,
            WhereClause::Null {
                column: column.to_string(),
                negated: true,
            },
        )
    }

    /// Compare two columns
    fn where_column(self, left: &str, operator: QueryOperator, right: &str) -> Self {
        self.push_where(
            Connector::And,
            WhereClause::Column {
                left: left.to_string(),
                operator,
                right: right.to_string(),
            },
        )
    }

    /// Add raw WHERE condition; each `?` in `sql` takes the next binding
    fn where_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.push_where(
            Connector::And,
            WhereClause::Raw {
                sql: sql.to_string(),
                bindings,
            },
        )
    }

    /// Add EXISTS subquery condition
    fn where_exists(self, subquery: QueryBuilder) -> Self {
        self.push_where(
            Connector::And,
            WhereClause::Exists {
                query: Box::new(subquery),
                negated: false,
            },
        )
    }

    /// Add NOT EXISTS subquery condition
    fn where_not_exists(self, subquery: QueryBuilder) -> Self {
        self.push_where(
            Connector::And,
            WhereClause::Exists {
                query: Box::new(subquery),
                negated: true,
            },
        )
    }

    /// Compare a scalar subquery with a value
    fn where_subquery<T: Into<Value>>(
        self,
        subquery: QueryBuilder,
        operator: QueryOperator,
        value: T,
    ) -> Self {

        self.push_where(
            Connector::And,
            WhereClause::Subquery {
                query: Box::new(subquery),
                operator,
                value: value.into(),
            },
        )
    }

    /// Parenthesised group of predicates joined with AND
    fn where_group<F>(self, build: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        let group = build(QueryBuilder::new());
        self.push_where(Connector::And, WhereClause::Group(group.where_clauses))
    }

    /// OR variant of `where_eq`
    fn or_where_eq<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_where(
            Connector::Or,
            WhereClause::Basic {
                column: column.to_string(),
                operator: QueryOperator::Equal,
                value: value.into(),
            },
        )
    }

    /// OR variant of `where_in`
    fn or_where_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        self.push_where(
            Connector::Or,
            WhereClause::In {
                column: column.to_string(),
                values: values.into_iter().map(Into::into).collect(),
                negated: false,
            },
        )
    }

    /// OR variant of `where_null`
    fn or_where_null(self, column: &str) -> Self {
        self.push_where(
            Connector::Or,
            WhereClause::Null {
                column: column.to_string(),
                negated: false,
            },
        )
    }

    /// OR variant of `where_group`
    fn or_where_group<F>(self, build: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        let group = build(QueryBuilder::new());
        self.push_where(Connector::Or, WhereClause::Group(group.where_clauses))
    }
}

impl QueryFilters for QueryBuilder {
    fn statement_mut(&mut self) -> &mut QueryBuilder {
        self
    }
}
